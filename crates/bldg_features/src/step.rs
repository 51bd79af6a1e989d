use std::time::Instant;

use log::{debug, info, warn};

use staging::{ColumnType, StagingTable};

use crate::error::{PipelineError, PipelineResult};

/// A column a step writes, with its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: ColumnType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// What a step did to the table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepReport {
    pub step: String,
    /// Rows that received a (non-null) value, or rows removed by a filter.
    pub affected: usize,
    /// Count columns explicitly set to zero because nothing matched.
    pub zero_filled: usize,
    /// Rows left null, usually because an input was null.
    pub left_null: usize,
}

impl StepReport {
    pub fn new(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            ..Default::default()
        }
    }

    /// Non-null and null counts of `column`.
    pub(crate) fn from_column(
        step: impl Into<String>,
        table: &StagingTable,
        column: &str,
    ) -> PipelineResult<Self> {
        let data = table
            .column(column)
            .ok_or_else(|| staging::StagingError::ColumnNotFound(column.to_owned()))?
            .data();
        let left_null = data.null_count();
        Ok(Self {
            step: step.into(),
            affected: data.len() - left_null,
            zero_filled: 0,
            left_null,
        })
    }
}

/// One idempotent transformation of the staging table.
///
/// A step reads the columns named by [`inputs`](Self::inputs) and writes the
/// columns named by [`outputs`](Self::outputs). Running it twice on the same
/// table gives the same table.
pub trait FeatureStep: Send + Sync {
    fn name(&self) -> String;

    fn inputs(&self) -> Vec<String>;

    fn outputs(&self) -> Vec<ColumnSpec>;

    /// Fill the output columns. Callers go through [`run_step`], which has
    /// already checked inputs and declared outputs.
    fn apply(&self, table: &mut StagingTable) -> PipelineResult<StepReport>;
}

/// Check inputs, declare outputs, apply and log one step.
///
/// A step that fails takes the output columns it declared with it, so the
/// table looks as if it never ran. Columns that existed before are kept.
pub fn run_step(step: &dyn FeatureStep, table: &mut StagingTable) -> PipelineResult<StepReport> {
    let name = step.name();
    let t0 = Instant::now();
    info!("{}: start", name);

    for column in step.inputs() {
        if column != StagingTable::ID_COLUMN && !table.has_column(&column) {
            return Err(PipelineError::Precondition {
                step: name,
                column,
            });
        }
    }

    let mut declared = Vec::new();
    for spec in step.outputs() {
        if table.add_column(&spec.name, spec.ty)? {
            declared.push(spec.name);
        } else {
            debug!("{}: column {} already present", name, spec.name);
        }
    }

    let report = match step.apply(table) {
        Ok(report) => report,
        Err(err) => {
            for column in &declared {
                table.drop_column(column);
            }
            if !declared.is_empty() {
                warn!("{}: failed, removed {} new columns", name, declared.len());
            }
            return Err(err);
        }
    };

    if report.zero_filled > 0 || report.left_null > 0 {
        info!(
            "{}: {} affected, {} zero-filled, {} left null ({:.2?})",
            name,
            report.affected,
            report.zero_filled,
            report.left_null,
            t0.elapsed()
        );
    } else {
        info!("{}: {} affected ({:.2?})", name, report.affected, t0.elapsed());
    }

    Ok(report)
}
