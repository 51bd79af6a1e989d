//! Join of externally computed 3D shape metrics, one table per LoD.
//!
//! The metrics producer writes `merged_<lod>.csv` with one row per building
//! part. Ids carry a two-character part suffix (`NL.IMBAG.Pand.0503100000000001-0`)
//! which is stripped before matching. Rows describing shapes with holes are
//! unreliable and dropped at load.

use std::fs::File;
use std::io::Seek;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, AsArray};
use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use arrow::datatypes::Float64Type;
use arrow_schema::DataType;
use hashbrown::HashMap;
use log::{debug, info, warn};

use staging::{ColumnType, StagingTable};

use crate::columns::{self, HEIGHT_MAX, HEIGHT_MIN};
use crate::error::{PipelineError, PipelineResult};
use crate::step::{ColumnSpec, FeatureStep, StepReport};
use crate::store::{text_column, with_types};

/// One metric of the external source.
#[derive(Debug, Clone, Copy)]
pub struct MetricSpec {
    /// Column name in the producer's CSV.
    pub source: &'static str,
    /// Staging column stem; the LoD tag is appended.
    pub stem: &'static str,
    pub ty: ColumnType,
}

const fn float(source: &'static str, stem: &'static str) -> MetricSpec {
    MetricSpec {
        source,
        stem,
        ty: ColumnType::Float,
    }
}

pub const METRICS: [MetricSpec; 14] = [
    float("actual_volume", "actual_volume"),
    float("convex_hull_volume", "convex_hull_volume"),
    float("footprint_perimeter", "footprint_perimeter"),
    float("obb_width", "obb_width"),
    float("obb_length", "obb_length"),
    float("ground_area", "ground_area"),
    float("wall_area", "wall_area"),
    float("roof_area", "roof_area"),
    MetricSpec {
        source: "ground_point_count",
        stem: "ground_point_count",
        ty: ColumnType::Int,
    },
    float("max_Z", "max_z"),
    float("min_Z", "min_z"),
    float("ground_Z", "ground_z"),
    float("shared_walls_area", "shared_walls_area"),
    float("closest_distance", "closest_distance"),
];

const ID: &str = "id";
const HOLE_COUNT: &str = "hole_count";
const ID_SUFFIX_LEN: usize = 2;

#[derive(Debug, Clone, PartialEq)]
struct MetricsRow {
    id: String,
    values: [Option<f64>; METRICS.len()],
}

/// Rows of one LoD's metrics source.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricsTable {
    rows: Vec<MetricsRow>,
    normalized: bool,
}

impl MetricsTable {
    /// Build from `(id, values)` rows; values follow [`METRICS`] order.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = (String, [Option<f64>; METRICS.len()])>,
    {
        Self {
            rows: records
                .into_iter()
                .map(|(id, values)| MetricsRow { id, values })
                .collect(),
            normalized: false,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|r| r.id.as_str())
    }

    /// Read a producer CSV, keeping only rows whose `hole_count` is 0.
    pub fn load_csv(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| PipelineError::external(path, e))?;

        let (schema, _) = Format::default()
            .with_header(true)
            .infer_schema(&mut file, Some(1000))
            .map_err(|e| PipelineError::external(path, e))?;
        file.rewind()?;
        let types: Vec<(&str, DataType)> = [(ID, DataType::Utf8), (HOLE_COUNT, DataType::Float64)]
            .into_iter()
            .chain(METRICS.iter().map(|m| (m.source, DataType::Float64)))
            .collect();
        let schema = with_types(&schema, &types);

        for required in [ID, HOLE_COUNT] {
            if schema.field_with_name(required).is_err() {
                return Err(PipelineError::external(
                    path,
                    format!("missing column `{required}`"),
                ));
            }
        }
        let missing: Vec<&str> = METRICS
            .iter()
            .map(|m| m.source)
            .filter(|name| schema.field_with_name(name).is_err())
            .collect();
        if !missing.is_empty() {
            warn!("{}: no column for {:?}, left null", path.display(), missing);
        }

        let reader = ReaderBuilder::new(Arc::new(schema))
            .with_header(true)
            .build(file)
            .map_err(|e| PipelineError::external(path, e))?;

        let mut rows = Vec::new();
        let mut with_holes = 0usize;
        for batch in reader {
            let batch = batch.map_err(|e| PipelineError::external(path, e))?;

            let ids = text_column(&batch, ID)?;
            let ids = ids.as_string::<i32>();
            let holes = float_column(&batch, HOLE_COUNT)?;
            let metrics: Vec<Option<arrow::array::ArrayRef>> = METRICS
                .iter()
                .map(|m| {
                    batch
                        .column_by_name(m.source)
                        .map(|_| float_column(&batch, m.source))
                        .transpose()
                })
                .collect::<PipelineResult<_>>()?;

            let holes = holes.as_primitive::<Float64Type>();
            for row in 0..batch.num_rows() {
                if ids.is_null(row) {
                    continue;
                }
                if holes.is_null(row) || holes.value(row) != 0.0 {
                    with_holes += 1;
                    continue;
                }

                let mut values = [None; METRICS.len()];
                for (slot, column) in values.iter_mut().zip(&metrics) {
                    if let Some(column) = column {
                        let column = column.as_primitive::<Float64Type>();
                        if column.is_valid(row) {
                            *slot = Some(column.value(row));
                        }
                    }
                }
                rows.push(MetricsRow {
                    id: ids.value(row).to_owned(),
                    values,
                });
            }
        }

        info!(
            "{}: {} metric rows, {} dropped for holes",
            path.display(),
            rows.len(),
            with_holes
        );
        Ok(Self {
            rows,
            normalized: false,
        })
    }

    /// Strip the part suffix from every id. Calling it again does nothing.
    pub fn normalize_ids(&mut self) {
        if self.normalized {
            return;
        }
        for row in &mut self.rows {
            let cut = row
                .id
                .char_indices()
                .rev()
                .nth(ID_SUFFIX_LEN - 1)
                .map_or(0, |(i, _)| i);
            row.id.truncate(cut);
        }
        self.normalized = true;
    }

    /// Lookup by id. Ids occurring more than once map to `None`.
    fn lookup(&self) -> HashMap<&str, Option<usize>> {
        let mut map: HashMap<&str, Option<usize>> = HashMap::with_capacity(self.rows.len());
        for (i, row) in self.rows.iter().enumerate() {
            map.entry(row.id.as_str())
                .and_modify(|slot| *slot = None)
                .or_insert(Some(i));
        }
        map
    }
}

fn float_column(
    batch: &arrow::record_batch::RecordBatch,
    name: &str,
) -> PipelineResult<arrow::array::ArrayRef> {
    let column = batch
        .column_by_name(name)
        .ok_or_else(|| arrow_schema::ArrowError::SchemaError(format!("no column `{name}`")))?;
    Ok(arrow::compute::cast(column, &DataType::Float64)?)
}

/// Where an [`ExternalMetricsStep`] gets its rows.
#[derive(Debug, Clone)]
pub enum MetricsSource {
    File(PathBuf),
    Loaded(MetricsTable),
}

/// `<metric>_<lod>` for every metric of one LoD.
pub struct ExternalMetricsStep {
    pub lod: String,
    pub source: MetricsSource,
}

impl ExternalMetricsStep {
    pub fn from_file(lod: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            lod: lod.into(),
            source: MetricsSource::File(path.into()),
        }
    }
}

impl FeatureStep for ExternalMetricsStep {
    fn name(&self) -> String {
        format!("external_metrics_{}", self.lod)
    }

    fn inputs(&self) -> Vec<String> {
        vec![]
    }

    fn outputs(&self) -> Vec<ColumnSpec> {
        METRICS
            .iter()
            .map(|m| ColumnSpec::new(columns::with_lod(m.stem, &self.lod), m.ty))
            .collect()
    }

    fn apply(&self, table: &mut StagingTable) -> PipelineResult<StepReport> {
        let mut metrics = match &self.source {
            MetricsSource::File(path) => MetricsTable::load_csv(path)?,
            MetricsSource::Loaded(loaded) => loaded.clone(),
        };
        metrics.normalize_ids();

        let lookup = metrics.lookup();
        let ambiguous = lookup.values().filter(|v| v.is_none()).count();
        if ambiguous > 0 {
            warn!(
                "{}: {} ids occur more than once after normalisation, left null",
                self.name(),
                ambiguous
            );
        }

        let matched: Vec<Option<&MetricsRow>> = table
            .ids()
            .iter()
            .map(|id| {
                lookup
                    .get(id.as_str())
                    .copied()
                    .flatten()
                    .map(|i| &metrics.rows[i])
            })
            .collect();

        for (k, metric) in METRICS.iter().enumerate() {
            let name = columns::with_lod(metric.stem, &self.lod);
            let values = matched.iter().map(|r| r.and_then(|r| r.values[k]));
            match metric.ty {
                ColumnType::Int => table.assign(&name, values.map(|v| v.map(|v| v as i64)).collect())?,
                _ => table.assign(&name, values.collect())?,
            }
        }

        let affected = matched.iter().filter(|r| r.is_some()).count();
        debug!("{}: {} of {} metric rows joined", self.name(), affected, metrics.len());

        Ok(StepReport {
            affected,
            left_null: table.len() - affected,
            ..StepReport::new(self.name())
        })
    }
}

/// `height_max_<lod> = max_z - ground_z`, `height_min_<lod> = min_z - ground_z`.
pub struct HeightMetricsStep {
    pub lod: String,
}

impl FeatureStep for HeightMetricsStep {
    fn name(&self) -> String {
        format!("height_metrics_{}", self.lod)
    }

    fn inputs(&self) -> Vec<String> {
        ["max_z", "min_z", "ground_z"]
            .into_iter()
            .map(|stem| columns::with_lod(stem, &self.lod))
            .collect()
    }

    fn outputs(&self) -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new(columns::with_lod(HEIGHT_MAX, &self.lod), ColumnType::Float),
            ColumnSpec::new(columns::with_lod(HEIGHT_MIN, &self.lod), ColumnType::Float),
        ]
    }

    fn apply(&self, table: &mut StagingTable) -> PipelineResult<StepReport> {
        let ground = columns::with_lod("ground_z", &self.lod);
        for (out, top) in [(HEIGHT_MAX, "max_z"), (HEIGHT_MIN, "min_z")] {
            let top = columns::with_lod(top, &self.lod);
            let ground = ground.as_str();
            table.compute_par(&columns::with_lod(out, &self.lod), |t, row| {
                let z = t.value::<f64>(&top, row).ok()??;
                let g = t.value::<f64>(ground, row).ok()??;
                Some(z - g)
            })?;
        }
        StepReport::from_column(self.name(), table, &columns::with_lod(HEIGHT_MAX, &self.lod))
    }
}
