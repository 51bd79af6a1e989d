//! Touching-footprint counts.
//!
//! A building B is adjacent to A when B's footprint intersects A's footprint
//! grown outward by the buffer distance (mitred corners). The relation is
//! not symmetric: a building tucked into the sharp corner of A's buffer can
//! touch A's buffer while A never reaches B's.
//!
//! Pair search goes through the R-tree on the buffer column. Each candidate
//! footprint is a shard processed in parallel against the read-only table;
//! the counts are assigned once every shard is done.

use geo::{Intersects, MultiPolygon, Polygon};
use log::{debug, warn};
use rayon::prelude::*;
use smallvec::SmallVec;

use staging::{polygon_envelope, ColumnType, StagingError, StagingTable};

use crate::columns::{ADJACENT_COUNT, ADJACENT_OF_ADJACENT_COUNT, FOOTPRINT, FOOTPRINT_BUFFER, FUNCTION};
use crate::error::PipelineResult;
use crate::function::FunctionCategory;
use crate::geometry;
use crate::step::{ColumnSpec, FeatureStep, StepReport};

pub struct AdjacencyStep {
    pub buffer_distance: f64,
    /// Functions ignored on both sides of a pair when counting.
    pub excluded: Vec<FunctionCategory>,
}

impl FeatureStep for AdjacencyStep {
    fn name(&self) -> String {
        "adjacency".into()
    }

    fn inputs(&self) -> Vec<String> {
        vec![FOOTPRINT.into(), FUNCTION.into()]
    }

    fn outputs(&self) -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new(ADJACENT_COUNT, ColumnType::Int),
            ColumnSpec::new(ADJACENT_OF_ADJACENT_COUNT, ColumnType::Int),
        ]
    }

    fn apply(&self, table: &mut StagingTable) -> PipelineResult<StepReport> {
        ensure_index(table, FOOTPRINT)?;

        let distance = self.buffer_distance;
        table.add_column(FOOTPRINT_BUFFER, ColumnType::MultiPolygon)?;
        table.compute_par::<MultiPolygon<f64>, _>(FOOTPRINT_BUFFER, |t, row| {
            let fp = t.value::<Polygon<f64>>(FOOTPRINT, row).ok().flatten()?;
            geometry::miter_buffer(fp, distance)
        })?;
        table.create_spatial_index(FOOTPRINT_BUFFER)?;

        let partners = touching_pairs(table)?;
        let pairs: usize = partners.iter().map(|p| p.len()).sum();
        debug!("{}: {} buffer/footprint pairs", table.name(), pairs);

        let excluded: Vec<bool> = table
            .get::<String>(FUNCTION)?
            .iter()
            .map(|f| {
                let category = f
                    .as_deref()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(FunctionCategory::Unknown);
                self.excluded.contains(&category)
            })
            .collect();

        let has_footprint: Vec<bool> = table
            .get::<Polygon<f64>>(FOOTPRINT)?
            .iter()
            .map(Option::is_some)
            .collect();

        let counts: Vec<Option<i64>> = (0..table.len())
            .map(|a| {
                if !has_footprint[a] {
                    None
                } else if excluded[a] {
                    Some(0)
                } else {
                    Some(partners[a].iter().filter(|&&b| !excluded[b]).count() as i64)
                }
            })
            .collect();

        let second_order: Vec<Option<i64>> = (0..table.len())
            .map(|a| {
                has_footprint[a].then(|| {
                    partners[a]
                        .iter()
                        .filter_map(|&b| counts[b])
                        .max()
                        .unwrap_or(0)
                })
            })
            .collect();

        let report = StepReport {
            affected: counts.iter().filter(|c| c.is_some()).count(),
            zero_filled: counts.iter().filter(|c| **c == Some(0)).count(),
            left_null: counts.iter().filter(|c| c.is_none()).count(),
            ..StepReport::new(self.name())
        };

        table.assign(ADJACENT_COUNT, counts)?;
        table.assign(ADJACENT_OF_ADJACENT_COUNT, second_order)?;
        table.drop_column(FOOTPRINT_BUFFER);

        Ok(report)
    }
}

pub(crate) fn ensure_index(table: &mut StagingTable, column: &str) -> PipelineResult<()> {
    if table.spatial_index(column).is_none() {
        warn!("{}: no spatial index on {}, building one", table.name(), column);
        table.create_spatial_index(column)?;
    }
    Ok(())
}

/// For each row A, the rows B (B ≠ A by id) whose footprint intersects A's
/// buffer. Rows without a buffer have no partners.
fn touching_pairs(table: &StagingTable) -> PipelineResult<Vec<SmallVec<[usize; 8]>>> {
    let footprints = table.get::<Polygon<f64>>(FOOTPRINT)?;
    let buffers = table.get::<MultiPolygon<f64>>(FOOTPRINT_BUFFER)?;
    let index = table
        .spatial_index(FOOTPRINT_BUFFER)
        .ok_or_else(|| StagingError::ColumnNotFound(FOOTPRINT_BUFFER.to_owned()))?;

    // Shard per footprint B: which buffers does it hit?
    let hits: Vec<Vec<usize>> = (0..table.len())
        .into_par_iter()
        .map(|b| {
            let Some(fp) = footprints[b].as_ref() else {
                return Vec::new();
            };
            let Some(env) = polygon_envelope(fp) else {
                return Vec::new();
            };
            let id = table.entity_id(b);
            index
                .candidates(&env)
                .filter(|&a| table.entity_id(a) != id)
                .filter(|&a| buffers[a].as_ref().is_some_and(|buf| buf.intersects(fp)))
                .collect()
        })
        .collect();

    let mut partners = vec![SmallVec::<[usize; 8]>::new(); table.len()];
    for (b, buffers_hit) in hits.into_iter().enumerate() {
        for a in buffers_hit {
            partners[a].push(b);
        }
    }
    for p in &mut partners {
        p.sort_unstable();
        p.dedup();
    }
    Ok(partners)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{FootprintStep, FunctionCategoryStep, UsageTagsStep};
    use crate::function::UsageVocabulary;
    use crate::geometry::square;
    use crate::step::run_step;
    use crate::store::BuildingStore;
    use crate::testing::{line_store, seeded};
    use std::sync::Arc;

    fn excluded() -> Vec<FunctionCategory> {
        vec![FunctionCategory::Others, FunctionCategory::Unknown]
    }

    fn prepared(store: Arc<BuildingStore>) -> StagingTable {
        let mut table = seeded(store.as_ref());
        run_step(&UsageTagsStep { store: store.clone() }, &mut table).unwrap();
        run_step(
            &FunctionCategoryStep {
                vocabulary: UsageVocabulary::default(),
            },
            &mut table,
        )
        .unwrap();
        run_step(&FootprintStep { store }, &mut table).unwrap();
        table
    }

    fn adjacency(table: &mut StagingTable) -> StepReport {
        run_step(
            &AdjacencyStep {
                buffer_distance: 0.1,
                excluded: excluded(),
            },
            table,
        )
        .unwrap()
    }

    #[test]
    fn touching_line_of_three() {
        let mut table = prepared(line_store(11.0, 11.0));
        let report = adjacency(&mut table);

        assert_eq!(
            table.get::<i64>(ADJACENT_COUNT).unwrap(),
            [Some(1), Some(2), Some(1), None]
        );
        assert_eq!(
            table.get::<i64>(ADJACENT_OF_ADJACENT_COUNT).unwrap(),
            [Some(2), Some(1), Some(2), None]
        );
        assert_eq!(report.zero_filled, 0);
        assert_eq!(report.left_null, 1);
        assert!(!table.has_column(FOOTPRINT_BUFFER));
    }

    #[test]
    fn gap_wider_than_buffer_is_zero_filled() {
        // Side 10 at offset 11 leaves a 1 m gap.
        let mut table = prepared(line_store(10.0, 11.0));
        let report = adjacency(&mut table);

        assert_eq!(
            table.get::<i64>(ADJACENT_COUNT).unwrap(),
            [Some(0), Some(0), Some(0), None]
        );
        assert_eq!(
            table.get::<i64>(ADJACENT_OF_ADJACENT_COUNT).unwrap(),
            [Some(0), Some(0), Some(0), None]
        );
        assert_eq!(report.zero_filled, 3);
        assert_eq!(report.left_null, 1);
    }

    #[test]
    fn excluded_functions_do_not_count() {
        let mut table = prepared(line_store(11.0, 11.0));
        let mut functions = table.get::<String>(FUNCTION).unwrap().to_vec();
        functions[1] = Some(FunctionCategory::Others.to_string());
        table.assign(FUNCTION, functions).unwrap();

        adjacency(&mut table);
        assert_eq!(
            table.get::<i64>(ADJACENT_COUNT).unwrap(),
            [Some(0), Some(0), Some(0), None]
        );
        // The second-order count ignores categories but reads the counts.
        assert_eq!(
            table.get::<i64>(ADJACENT_OF_ADJACENT_COUNT).unwrap(),
            [Some(0), Some(0), Some(0), None]
        );
    }

    #[test]
    fn mitre_corner_makes_adjacency_asymmetric() {
        let mut store = BuildingStore::new();
        store.insert_building("A", Some(square(0.0, 0.0, 10.0)), None);
        // Edge on x + y = 20.15: 0.106 from A's corner, inside A's mitred
        // buffer corner (x + y up to 20.2).
        store.insert_building(
            "B",
            Some(Polygon::new(
                vec![(9.5, 10.65), (10.65, 9.5), (12.0, 12.0), (9.5, 10.65)].into(),
                vec![],
            )),
            None,
        );
        store.insert_unit("u1", ["A"], ["woonfunctie"]);
        store.insert_unit("u2", ["B"], ["woonfunctie"]);

        let mut table = prepared(Arc::new(store));
        adjacency(&mut table);

        assert_eq!(table.get::<i64>(ADJACENT_COUNT).unwrap(), [Some(1), Some(0)]);
        assert_eq!(
            table.get::<i64>(ADJACENT_OF_ADJACENT_COUNT).unwrap(),
            [Some(0), Some(0)]
        );
    }

    #[test]
    fn cracked_footprint_does_not_reach_distant_buildings() {
        let mut store = BuildingStore::new();
        let cracked = Polygon::new(
            vec![
                (0.0, 0.0),
                (10.0, 0.0),
                (10.0, 10.0),
                (5.001, 10.0),
                (5.001, 0.5),
                (4.999, 0.5),
                (4.999, 10.0),
                (0.0, 10.0),
                (0.0, 0.0),
            ]
            .into(),
            vec![],
        );
        store.insert_building("A", Some(cracked), None);
        store.insert_building("B", Some(square(4.0, 400.0, 2.0)), None);
        store.insert_unit("u1", ["A"], ["woonfunctie"]);
        store.insert_unit("u2", ["B"], ["woonfunctie"]);

        let mut table = prepared(Arc::new(store));
        adjacency(&mut table);

        assert_eq!(table.get::<i64>(ADJACENT_COUNT).unwrap(), [Some(0), Some(0)]);
    }

    #[test]
    fn rerun_is_idempotent_and_rebuilds_missing_index() {
        let mut table = prepared(line_store(11.0, 11.0));
        adjacency(&mut table);
        let first = table.clone();

        // Reassigning the footprint invalidates its index.
        let footprints = table.get::<Polygon<f64>>(FOOTPRINT).unwrap().to_vec();
        table.assign(FOOTPRINT, footprints).unwrap();
        assert!(table.spatial_index(FOOTPRINT).is_none());

        adjacency(&mut table);
        assert!(table.spatial_index(FOOTPRINT).is_some());
        assert_eq!(table, first);
    }
}
