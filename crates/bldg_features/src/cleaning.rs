//! Final, destructive pass over the staging table: drop helper and
//! redundant columns, then rows missing a required value.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use staging::{ColumnData, StagingTable};

use crate::columns::{
    CENTROID, FOOTPRINT, FOOTPRINT_BUFFER, FP_AREA, FP_PERIMETER, FUNCTION, FUNCTION_TAGS, LABEL,
    OBB_SIDE_1, OBB_SIDE_2,
};
use crate::error::{PipelineError, PipelineResult};

/// Two columns carrying the same quantity from different sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedundantPair {
    pub keep: String,
    pub drop: String,
    /// Relative difference above which a row counts as a discrepancy.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

fn default_tolerance() -> f64 {
    0.05
}

impl RedundantPair {
    pub fn new(keep: &str, drop: &str) -> Self {
        Self {
            keep: keep.to_owned(),
            drop: drop.to_owned(),
            tolerance: default_tolerance(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningPolicy {
    /// Intermediate columns nobody downstream reads.
    pub helper_columns: Vec<String>,
    /// Features dropped as duplicates of another feature.
    pub redundant_columns: Vec<String>,
    pub redundant_pairs: Vec<RedundantPair>,
    /// Rows with a null in any of these are deleted. `None` means every
    /// column left after dropping.
    pub required: Option<Vec<String>>,
}

impl Default for CleaningPolicy {
    fn default() -> Self {
        let owned = |names: &[&str]| names.iter().map(|s| s.to_string()).collect();
        Self {
            helper_columns: owned(&[
                FUNCTION_TAGS,
                FOOTPRINT_BUFFER,
                CENTROID,
                OBB_SIDE_1,
                OBB_SIDE_2,
                FUNCTION,
                FOOTPRINT,
            ]),
            redundant_columns: owned(&[
                "actual_volume_lod1",
                "convex_hull_volume_lod1",
                "convex_hull_volume_lod2",
                "wall_area_lod1",
                "roof_area_lod1",
                "height_max_lod1",
            ]),
            redundant_pairs: vec![
                RedundantPair::new(FP_AREA, "ground_area_lod1"),
                RedundantPair::new(FP_AREA, "ground_area_lod2"),
                RedundantPair::new(FP_PERIMETER, "footprint_perimeter_lod1"),
                RedundantPair::new(FP_PERIMETER, "footprint_perimeter_lod2"),
            ],
            required: None,
        }
    }
}

impl CleaningPolicy {
    pub fn validate(&self) -> PipelineResult<()> {
        if let Some(required) = &self.required {
            if !required.iter().any(|c| c == LABEL) {
                return Err(PipelineError::Config(format!(
                    "cleaning.required must include `{LABEL}`"
                )));
            }
        }
        if let Some(pair) = self
            .redundant_pairs
            .iter()
            .find(|p| !p.tolerance.is_finite() || p.tolerance < 0.0)
        {
            return Err(PipelineError::Config(format!(
                "tolerance of {} / {} must be a non-negative number",
                pair.keep, pair.drop
            )));
        }
        Ok(())
    }
}

/// Rows of a redundant pair that disagree by more than the tolerance.
#[derive(Debug, Clone, PartialEq)]
pub struct Discrepancy {
    pub keep: String,
    pub drop: String,
    pub rows: usize,
    pub compared: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleaningReport {
    pub dropped_columns: Vec<String>,
    pub discrepancies: Vec<Discrepancy>,
    pub deleted_rows: usize,
    pub remaining_rows: usize,
}

/// Apply `policy` to `table`. Must run after every feature step.
pub fn clean(table: &mut StagingTable, policy: &CleaningPolicy) -> PipelineResult<CleaningReport> {
    let mut report = CleaningReport::default();

    for name in &policy.helper_columns {
        if table.drop_column(name) {
            report.dropped_columns.push(name.clone());
        }
    }

    for pair in &policy.redundant_pairs {
        if let Some(d) = compare_pair(table, pair) {
            if d.rows > 0 {
                warn!(
                    "{}: {} and {} disagree by more than {:.0}% in {} of {} rows",
                    table.name(),
                    d.keep,
                    d.drop,
                    pair.tolerance * 100.0,
                    d.rows,
                    d.compared
                );
            }
            report.discrepancies.push(d);
        }
        if table.drop_column(&pair.drop) {
            report.dropped_columns.push(pair.drop.clone());
        }
    }

    for name in &policy.redundant_columns {
        if table.drop_column(name) {
            report.dropped_columns.push(name.clone());
        }
    }

    let required: Vec<String> = match &policy.required {
        Some(list) => {
            if let Some(missing) = list.iter().find(|c| !table.has_column(c)) {
                return Err(PipelineError::Precondition {
                    step: "cleaning".into(),
                    column: missing.clone(),
                });
            }
            list.clone()
        }
        None => table.column_names().map(str::to_owned).collect(),
    };

    let columns: Vec<&ColumnData> = required
        .iter()
        .filter_map(|c| table.column(c))
        .map(|c| c.data())
        .collect();
    let incomplete: Vec<bool> = (0..table.len())
        .map(|row| columns.iter().any(|data| data.is_null(row)))
        .collect();

    report.deleted_rows = table.delete_rows(|_, row| incomplete[row]);
    report.remaining_rows = table.len();

    info!(
        "{}: cleaning dropped {} columns and {} rows, {} rows remain",
        table.name(),
        report.dropped_columns.len(),
        report.deleted_rows,
        report.remaining_rows
    );
    Ok(report)
}

fn numeric(table: &StagingTable, name: &str) -> Option<Vec<Option<f64>>> {
    match table.column(name)?.data() {
        ColumnData::Float(values) => Some(values.clone()),
        ColumnData::Int(values) => Some(values.iter().map(|v| v.map(|v| v as f64)).collect()),
        _ => None,
    }
}

fn compare_pair(table: &StagingTable, pair: &RedundantPair) -> Option<Discrepancy> {
    let keep = numeric(table, &pair.keep)?;
    let drop = numeric(table, &pair.drop)?;

    let mut rows = 0;
    let mut compared = 0;
    for (a, b) in keep.iter().zip(&drop) {
        let (Some(a), Some(b)) = (a, b) else {
            continue;
        };
        compared += 1;
        let scale = a.abs().max(b.abs());
        if scale > 0.0 && (a - b).abs() / scale > pair.tolerance {
            rows += 1;
        }
    }

    Some(Discrepancy {
        keep: pair.keep.clone(),
        drop: pair.drop.clone(),
        rows,
        compared,
    })
}
