use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use log::{error, info, warn};

use staging::{ColumnType, StagingTable};

use crate::adjacency::AdjacencyStep;
use crate::attributes::{
    ConstructionYearStep, DwellingCountStep, FootprintStep, FunctionCategoryStep,
    RetainFunctionsStep, UsageTagsStep,
};
use crate::columns::LABEL;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::metrics::{ExternalMetricsStep, HeightMetricsStep};
use crate::neighbors::NeighborCountStep;
use crate::shape::{
    FootprintAreaStep, FootprintPerimeterStep, LengthWidthStep, OrientedBoundingRectStep,
    VertexCountStep,
};
use crate::step::{run_step, FeatureStep, StepReport};
use crate::store::{GeometryStore, SeedFilter};

/// Create the staging table from the store's seed, with its `label` column.
///
/// With `reject_duplicates` a repeated entity id is an error; otherwise the
/// repeat is dropped and logged.
pub fn seed_table(
    store: &dyn GeometryStore,
    name: &str,
    filter: &SeedFilter,
    reject_duplicates: bool,
) -> PipelineResult<StagingTable> {
    let records = store.seed(filter);
    let mut table = StagingTable::seed(
        name,
        records.iter().map(|r| r.entity_id.clone()),
        !reject_duplicates,
    )?;

    table.add_column(LABEL, ColumnType::Text)?;
    let labelled = table.assign_by_id(
        LABEL,
        records
            .iter()
            .filter_map(|r| Some((r.entity_id.as_str(), r.label.clone()?))),
    )?;
    info!("{}: {} of {} entities labelled", name, labelled, table.len());

    Ok(table)
}

/// Result of [`Pipeline::run_skipping_missing_sources`].
#[derive(Debug, Default)]
pub struct SkippingRun {
    pub reports: Vec<StepReport>,
    /// Steps left out, in order: joiners whose source was unavailable and
    /// every later step reading one of their columns.
    pub skipped: Vec<String>,
}

impl SkippingRun {
    /// Whether every step ran.
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// An ordered, validated sequence of feature steps.
pub struct Pipeline {
    steps: Vec<Box<dyn FeatureStep>>,
}

impl Pipeline {
    /// Columns present before the first step runs.
    pub const SEED_COLUMNS: [&'static str; 2] = [StagingTable::ID_COLUMN, LABEL];

    /// Reject sequences in which a step reads a column that neither the
    /// seed nor an earlier step provides.
    pub fn new(steps: Vec<Box<dyn FeatureStep>>) -> PipelineResult<Self> {
        let mut available: HashSet<String> =
            Self::SEED_COLUMNS.iter().map(|s| s.to_string()).collect();

        for step in &steps {
            if let Some(column) = step.inputs().into_iter().find(|c| !available.contains(c)) {
                return Err(PipelineError::Ordering {
                    step: step.name(),
                    column,
                });
            }
            available.extend(step.outputs().into_iter().map(|spec| spec.name));
        }

        Ok(Self { steps })
    }

    /// The canonical sequence for `config`.
    pub fn standard(config: &PipelineConfig, store: Arc<dyn GeometryStore>) -> PipelineResult<Self> {
        config.validate()?;

        let mut steps: Vec<Box<dyn FeatureStep>> = vec![
            Box::new(UsageTagsStep {
                store: store.clone(),
            }),
            Box::new(FunctionCategoryStep {
                vocabulary: config.vocabulary.clone(),
            }),
        ];
        if let Some(retain) = &config.retain_functions {
            steps.push(Box::new(RetainFunctionsStep {
                retain: retain.clone(),
            }));
        }
        steps.push(Box::new(ConstructionYearStep {
            store: store.clone(),
            sentinel: config.construction_year_sentinel,
        }));
        steps.push(Box::new(DwellingCountStep {
            store: store.clone(),
        }));
        steps.push(Box::new(FootprintStep { store }));
        steps.push(Box::new(FootprintAreaStep));
        steps.push(Box::new(FootprintPerimeterStep));
        steps.push(Box::new(VertexCountStep {
            tolerance: config.simplify_tolerance,
        }));
        steps.push(Box::new(OrientedBoundingRectStep));
        steps.push(Box::new(LengthWidthStep));
        steps.push(Box::new(AdjacencyStep {
            buffer_distance: config.buffer_distance,
            excluded: config.excluded_functions.clone(),
        }));
        steps.push(Box::new(NeighborCountStep {
            radii: config.neighbor_radii.clone(),
        }));
        for lod in &config.lods {
            steps.push(Box::new(ExternalMetricsStep::from_file(
                lod.clone(),
                config.metrics_path(lod),
            )));
        }
        for lod in &config.lods {
            steps.push(Box::new(HeightMetricsStep { lod: lod.clone() }));
        }

        Self::new(steps)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name() == name)
    }

    pub fn run(&self, table: &mut StagingTable) -> PipelineResult<Vec<StepReport>> {
        self.run_from(table, 0)
    }

    /// Run steps `start..`. On failure the table keeps every column written
    /// so far and the error names the step to resume from.
    pub fn run_from(
        &self,
        table: &mut StagingTable,
        start: usize,
    ) -> PipelineResult<Vec<StepReport>> {
        if start > self.steps.len() {
            return Err(PipelineError::Config(format!(
                "cannot resume at step {start}, pipeline has {}",
                self.steps.len()
            )));
        }

        let t0 = Instant::now();
        let mut reports = Vec::with_capacity(self.steps.len() - start);

        for (index, step) in self.steps.iter().enumerate().skip(start) {
            match run_step(step.as_ref(), table) {
                Ok(report) => reports.push(report),
                Err(source) => {
                    error!("{}: step {} ({}) failed: {}", table.name(), index, step.name(), source);
                    return Err(PipelineError::StepFailed {
                        step: step.name(),
                        index,
                        source: Box::new(source),
                    });
                }
            }
        }

        info!(
            "{}: ran {} steps in {:.2?}",
            table.name(),
            reports.len(),
            t0.elapsed()
        );
        Ok(reports)
    }

    /// Run every step, carrying on past joiners whose external source is
    /// unavailable. Such a joiner leaves no columns behind, and steps that
    /// read its outputs are skipped as well. Any other failure aborts as in
    /// [`run_from`](Self::run_from).
    pub fn run_skipping_missing_sources(&self, table: &mut StagingTable) -> PipelineResult<SkippingRun> {
        let t0 = Instant::now();
        let mut run = SkippingRun::default();
        let mut unavailable: HashSet<String> = HashSet::new();

        for (index, step) in self.steps.iter().enumerate() {
            if let Some(column) = step.inputs().into_iter().find(|c| unavailable.contains(c)) {
                warn!("{}: skipping {}, {} is unavailable", table.name(), step.name(), column);
                unavailable.extend(step.outputs().into_iter().map(|spec| spec.name));
                run.skipped.push(step.name());
                continue;
            }

            match run_step(step.as_ref(), table) {
                Ok(report) => run.reports.push(report),
                Err(source @ PipelineError::ExternalSource { .. }) => {
                    warn!("{}: skipping {}: {}", table.name(), step.name(), source);
                    unavailable.extend(step.outputs().into_iter().map(|spec| spec.name));
                    run.skipped.push(step.name());
                }
                Err(source) => {
                    error!("{}: step {} ({}) failed: {}", table.name(), index, step.name(), source);
                    return Err(PipelineError::StepFailed {
                        step: step.name(),
                        index,
                        source: Box::new(source),
                    });
                }
            }
        }

        info!(
            "{}: ran {} steps, skipped {} in {:.2?}",
            table.name(),
            run.reports.len(),
            run.skipped.len(),
            t0.elapsed()
        );
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::{FP_LENGTH, FP_WIDTH};
    use crate::testing::{line_store, metrics_csv};
    use std::fs;

    fn config(metrics_dir: &std::path::Path) -> PipelineConfig {
        PipelineConfig {
            case_study: "test".into(),
            neighbor_radii: vec![15.0, 5.0],
            lods: vec!["lod2".into()],
            metrics_dir: metrics_dir.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn standard_sequence_is_ordered() {
        let store = line_store(11.0, 11.0);
        let pipeline = Pipeline::standard(&config(std::path::Path::new(".")), store).unwrap();
        let names = pipeline.step_names();
        assert_eq!(names.first().map(String::as_str), Some("usage_tags"));
        assert_eq!(names.last().map(String::as_str), Some("height_metrics_lod2"));
        assert!(pipeline.position("adjacency").unwrap() > pipeline.position("footprint").unwrap());
        assert_eq!(pipeline.position("retain_functions"), None);
    }

    #[test]
    fn reading_before_producing_is_an_ordering_error() {
        let steps: Vec<Box<dyn FeatureStep>> = vec![
            Box::new(LengthWidthStep),
            Box::new(OrientedBoundingRectStep),
        ];
        let err = Pipeline::new(steps).err().unwrap();
        assert!(matches!(err, PipelineError::Ordering { ref step, .. } if step == "length_width"));
    }

    #[test]
    fn full_run_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("merged_lod2.csv"), metrics_csv()).unwrap();
        let store = line_store(11.0, 11.0);
        let config = config(dir.path());

        let mut table =
            seed_table(store.as_ref(), &config.case_study, &SeedFilter::default(), false).unwrap();
        let pipeline = Pipeline::standard(&config, store).unwrap();

        pipeline.run(&mut table).unwrap();
        let first = table.clone();
        pipeline.run(&mut table).unwrap();
        assert_eq!(table, first);

        let length = table.get::<f64>(FP_LENGTH).unwrap();
        let width = table.get::<f64>(FP_WIDTH).unwrap();
        for (l, w) in length.iter().zip(width) {
            if let (Some(l), Some(w)) = (l, w) {
                assert!(l >= w);
            }
        }
        assert_eq!(
            table.get::<f64>("height_max_lod2").unwrap(),
            [Some(12.0), Some(14.0), None, None]
        );
    }

    #[test]
    fn resumes_after_missing_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let store = line_store(11.0, 11.0);
        let config = config(dir.path());

        let mut table =
            seed_table(store.as_ref(), &config.case_study, &SeedFilter::default(), false).unwrap();
        let pipeline = Pipeline::standard(&config, store).unwrap();

        let err = pipeline.run(&mut table).unwrap_err();
        let failed = err.failed_step().unwrap();
        assert_eq!(failed, pipeline.position("external_metrics_lod2").unwrap());
        assert!(matches!(
            err,
            PipelineError::StepFailed { ref source, .. }
                if matches!(**source, PipelineError::ExternalSource { .. })
        ));
        // Everything before the joiner survived.
        assert_eq!(
            table.get::<i64>("adjacent_count").unwrap(),
            [Some(1), Some(2), Some(1), None]
        );

        fs::write(dir.path().join("merged_lod2.csv"), metrics_csv()).unwrap();
        let reports = pipeline.run_from(&mut table, failed).unwrap();
        assert_eq!(reports.len(), pipeline.len() - failed);
        assert!(table.has_column("height_min_lod2"));
    }

    #[test]
    fn missing_lod_is_skipped_with_its_heights() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("merged_lod2.csv"), metrics_csv()).unwrap();
        let store = line_store(11.0, 11.0);
        let config = PipelineConfig {
            lods: vec!["lod1".into(), "lod2".into()],
            ..config(dir.path())
        };

        let mut table =
            seed_table(store.as_ref(), &config.case_study, &SeedFilter::default(), false).unwrap();
        let pipeline = Pipeline::standard(&config, store).unwrap();
        let run = pipeline.run_skipping_missing_sources(&mut table).unwrap();

        assert!(!run.is_complete());
        assert_eq!(run.skipped, ["external_metrics_lod1", "height_metrics_lod1"]);
        assert_eq!(run.reports.len(), pipeline.len() - 2);
        assert!(table.column_names().all(|c| !c.ends_with("_lod1")));
        assert_eq!(
            table.get::<f64>("height_max_lod2").unwrap(),
            [Some(12.0), Some(14.0), None, None]
        );
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn failed_joiner_leaves_no_columns() {
        let dir = tempfile::tempdir().unwrap();
        let store = line_store(11.0, 11.0);
        let config = config(dir.path());

        let mut table =
            seed_table(store.as_ref(), &config.case_study, &SeedFilter::default(), false).unwrap();
        let pipeline = Pipeline::standard(&config, store).unwrap();

        assert!(pipeline.run(&mut table).is_err());
        assert!(!table.has_column("actual_volume_lod2"));
        assert!(!table.has_column("height_max_lod2"));
    }

    #[test]
    fn duplicate_seed_ids() {
        let mut store = crate::store::BuildingStore::new();
        store.insert_building("x", None, None);
        store.insert_label("x", "a");
        store.insert_label("y", "b");
        // `BuildingStore` never yields duplicates; build a seed by hand.
        struct Twice(crate::store::BuildingStore);
        impl GeometryStore for Twice {
            fn seed(&self, filter: &SeedFilter) -> Vec<crate::store::SeedRecord> {
                let mut s = self.0.seed(filter);
                s.extend(self.0.seed(filter));
                s
            }
            fn footprint(&self, id: &str) -> Option<geo::Polygon<f64>> {
                self.0.footprint(id)
            }
            fn usage_tags(&self, id: &str) -> Option<staging::Tags> {
                self.0.usage_tags(id)
            }
            fn construction_year(&self, id: &str) -> Option<i64> {
                self.0.construction_year(id)
            }
            fn dwelling_count(&self, id: &str) -> Option<i64> {
                self.0.dwelling_count(id)
            }
        }
        let twice = Twice(store);

        let table = seed_table(&twice, "t", &SeedFilter::default(), false).unwrap();
        assert_eq!(table.ids(), ["x", "y"]);
        assert_eq!(
            table.get::<String>(LABEL).unwrap(),
            [Some("a".to_string()), Some("b".to_string())]
        );

        assert!(seed_table(&twice, "t", &SeedFilter::default(), true).is_err());
    }
}
