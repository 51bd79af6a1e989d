//! Multi-radius neighbour counts around each footprint centroid.

use geo::{Point, Polygon};
use rayon::prelude::*;

use staging::{ColumnType, StagingError, StagingTable};

use crate::adjacency::ensure_index;
use crate::columns::{self, CENTROID, FOOTPRINT};
use crate::error::PipelineResult;
use crate::geometry;
use crate::step::{ColumnSpec, FeatureStep, StepReport};

/// `neighbor_count_<r>[A]`: buildings B ≠ A whose footprint lies within
/// `r` of A's centroid (inclusive). Null when A has no footprint.
pub struct NeighborCountStep {
    pub radii: Vec<f64>,
}

impl FeatureStep for NeighborCountStep {
    fn name(&self) -> String {
        "neighbor_counts".into()
    }

    fn inputs(&self) -> Vec<String> {
        vec![FOOTPRINT.into()]
    }

    fn outputs(&self) -> Vec<ColumnSpec> {
        let mut out = vec![ColumnSpec::new(CENTROID, ColumnType::Point)];
        out.extend(
            self.radii
                .iter()
                .map(|r| ColumnSpec::new(columns::neighbor_count(*r), ColumnType::Int)),
        );
        out
    }

    fn apply(&self, table: &mut StagingTable) -> PipelineResult<StepReport> {
        ensure_index(table, FOOTPRINT)?;

        table.compute_par::<Point<f64>, _>(CENTROID, |t, row| {
            geometry::centroid(t.value::<Polygon<f64>>(FOOTPRINT, row).ok().flatten()?)
        })?;

        let counts = self.count_within(table)?;

        let report = StepReport {
            affected: counts.iter().filter(|c| c.is_some()).count(),
            zero_filled: counts
                .iter()
                .filter(|c| c.as_ref().is_some_and(|c| c.iter().all(|n| *n == 0)))
                .count(),
            left_null: counts.iter().filter(|c| c.is_none()).count(),
            ..StepReport::new(self.name())
        };

        for (i, radius) in self.radii.iter().enumerate() {
            let values = counts.iter().map(|c| c.as_ref().map(|c| c[i])).collect();
            table.assign(&columns::neighbor_count(*radius), values)?;
        }

        Ok(report)
    }
}

impl NeighborCountStep {
    /// One count per radius for each row, `None` for rows without a
    /// footprint.
    fn count_within(&self, table: &StagingTable) -> PipelineResult<Vec<Option<Vec<i64>>>> {
        let footprints = table.get::<Polygon<f64>>(FOOTPRINT)?;
        let centroids = table.get::<Point<f64>>(CENTROID)?;
        let index = table
            .spatial_index(FOOTPRINT)
            .ok_or_else(|| StagingError::ColumnNotFound(FOOTPRINT.to_owned()))?;
        let reach = self.radii.iter().copied().fold(0.0, f64::max);

        let counts = (0..table.len())
            .into_par_iter()
            .map(|a| {
                footprints[a].as_ref()?;
                let mut counts = vec![0i64; self.radii.len()];
                let Some(c) = centroids[a].as_ref() else {
                    return Some(counts);
                };
                let id = table.entity_id(a);

                for b in index.candidates_near(c, reach) {
                    if table.entity_id(b) == id {
                        continue;
                    }
                    let Some(fp) = footprints[b].as_ref() else {
                        continue;
                    };
                    let d = geometry::distance_to_point(fp, c);
                    for (n, r) in counts.iter_mut().zip(&self.radii) {
                        if d <= *r {
                            *n += 1;
                        }
                    }
                }
                Some(counts)
            })
            .collect();

        Ok(counts)
    }
}
