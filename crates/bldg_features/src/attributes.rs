//! Steps copying per-building attributes out of the [`GeometryStore`].

use std::sync::Arc;

use log::warn;

use staging::{ColumnType, StagingTable, Tags};

use crate::columns::{CONSTRUCTION_YEAR, DWELLING_COUNT, FOOTPRINT, FUNCTION, FUNCTION_TAGS};
use crate::error::PipelineResult;
use crate::function::{classify, FunctionCategory, UsageVocabulary};
use crate::step::{ColumnSpec, FeatureStep, StepReport};
use crate::store::GeometryStore;

/// `function_tags`: distinct usage labels over all units in the building.
pub struct UsageTagsStep {
    pub store: Arc<dyn GeometryStore>,
}

impl FeatureStep for UsageTagsStep {
    fn name(&self) -> String {
        "usage_tags".into()
    }

    fn inputs(&self) -> Vec<String> {
        vec![]
    }

    fn outputs(&self) -> Vec<ColumnSpec> {
        vec![ColumnSpec::new(FUNCTION_TAGS, ColumnType::Tags)]
    }

    fn apply(&self, table: &mut StagingTable) -> PipelineResult<StepReport> {
        let store = self.store.as_ref();
        table.compute_par::<Tags, _>(FUNCTION_TAGS, |t, row| store.usage_tags(t.entity_id(row)))?;
        StepReport::from_column(self.name(), table, FUNCTION_TAGS)
    }
}

/// `function`: category from the decision table.
pub struct FunctionCategoryStep {
    pub vocabulary: UsageVocabulary,
}

impl FeatureStep for FunctionCategoryStep {
    fn name(&self) -> String {
        "function_category".into()
    }

    fn inputs(&self) -> Vec<String> {
        vec![FUNCTION_TAGS.into()]
    }

    fn outputs(&self) -> Vec<ColumnSpec> {
        vec![ColumnSpec::new(FUNCTION, ColumnType::Text)]
    }

    fn apply(&self, table: &mut StagingTable) -> PipelineResult<StepReport> {
        let tags = table.get::<Tags>(FUNCTION_TAGS)?;
        let values: Vec<Option<String>> = tags
            .iter()
            .map(|t| Some(classify(t.as_ref(), &self.vocabulary).as_str().to_owned()))
            .collect();
        table.assign(FUNCTION, values)?;
        StepReport::from_column(self.name(), table, FUNCTION)
    }
}

/// Delete rows whose function is outside `retain`.
pub struct RetainFunctionsStep {
    pub retain: Vec<FunctionCategory>,
}

impl FeatureStep for RetainFunctionsStep {
    fn name(&self) -> String {
        "retain_functions".into()
    }

    fn inputs(&self) -> Vec<String> {
        vec![FUNCTION.into()]
    }

    fn outputs(&self) -> Vec<ColumnSpec> {
        vec![]
    }

    fn apply(&self, table: &mut StagingTable) -> PipelineResult<StepReport> {
        let functions = table.get::<String>(FUNCTION)?.to_vec();
        let deleted = table.delete_rows(|_, row| {
            let category = functions[row]
                .as_deref()
                .and_then(|s| s.parse::<FunctionCategory>().ok());
            !category.is_some_and(|c| self.retain.contains(&c))
        });

        if deleted > 0 {
            warn!(
                "{}: removed {} entities outside {:?}",
                table.name(),
                deleted,
                self.retain
            );
        }

        Ok(StepReport {
            affected: deleted,
            ..StepReport::new(self.name())
        })
    }
}

/// `construction_year`; the sentinel year is stored as null.
pub struct ConstructionYearStep {
    pub store: Arc<dyn GeometryStore>,
    pub sentinel: Option<i64>,
}

impl FeatureStep for ConstructionYearStep {
    fn name(&self) -> String {
        "construction_year".into()
    }

    fn inputs(&self) -> Vec<String> {
        vec![]
    }

    fn outputs(&self) -> Vec<ColumnSpec> {
        vec![ColumnSpec::new(CONSTRUCTION_YEAR, ColumnType::Int)]
    }

    fn apply(&self, table: &mut StagingTable) -> PipelineResult<StepReport> {
        let store = self.store.as_ref();
        let sentinel = self.sentinel;
        table.compute_par::<i64, _>(CONSTRUCTION_YEAR, |t, row| {
            store
                .construction_year(t.entity_id(row))
                .filter(|year| Some(*year) != sentinel)
        })?;
        StepReport::from_column(self.name(), table, CONSTRUCTION_YEAR)
    }
}

/// `dwelling_count`: distinct usage units referencing the building.
pub struct DwellingCountStep {
    pub store: Arc<dyn GeometryStore>,
}

impl FeatureStep for DwellingCountStep {
    fn name(&self) -> String {
        "dwelling_count".into()
    }

    fn inputs(&self) -> Vec<String> {
        vec![]
    }

    fn outputs(&self) -> Vec<ColumnSpec> {
        vec![ColumnSpec::new(DWELLING_COUNT, ColumnType::Int)]
    }

    fn apply(&self, table: &mut StagingTable) -> PipelineResult<StepReport> {
        let store = self.store.as_ref();
        table.compute_par::<i64, _>(DWELLING_COUNT, |t, row| {
            store.dwelling_count(t.entity_id(row))
        })?;
        StepReport::from_column(self.name(), table, DWELLING_COUNT)
    }
}

/// `footprint` geometry, spatially indexed.
pub struct FootprintStep {
    pub store: Arc<dyn GeometryStore>,
}

impl FeatureStep for FootprintStep {
    fn name(&self) -> String {
        "footprint".into()
    }

    fn inputs(&self) -> Vec<String> {
        vec![]
    }

    fn outputs(&self) -> Vec<ColumnSpec> {
        vec![ColumnSpec::new(FOOTPRINT, ColumnType::Polygon)]
    }

    fn apply(&self, table: &mut StagingTable) -> PipelineResult<StepReport> {
        let store = self.store.as_ref();
        table.compute_par(FOOTPRINT, |t, row| store.footprint(t.entity_id(row)))?;
        table.create_spatial_index(FOOTPRINT)?;
        StepReport::from_column(self.name(), table, FOOTPRINT)
    }
}
