//! Shared fixtures for the unit tests.

use std::sync::Arc;

use staging::StagingTable;

use crate::geometry::square;
use crate::pipeline::seed_table;
use crate::store::{BuildingStore, GeometryStore, SeedFilter};

/// Three squares of `side` in a row at x = 0, `offset`, `2 * offset`
/// (`NL.A`..`NL.C`) plus `NL.D` without geometry.
///
/// A and C are residential, B is mixed (two units), D has no units. C's
/// construction year is the 1005 sentinel.
pub(crate) fn line_store(side: f64, offset: f64) -> Arc<BuildingStore> {
    let mut store = BuildingStore::new();
    store.insert_building("NL.A", Some(square(0.0, 0.0, side)), Some(1930));
    store.insert_building("NL.B", Some(square(offset, 0.0, side)), Some(1965));
    store.insert_building("NL.C", Some(square(2.0 * offset, 0.0, side)), Some(1005));
    store.insert_building("NL.D", None, None);

    store.insert_unit("u1", ["NL.A"], ["woonfunctie"]);
    store.insert_unit("u2", ["NL.B"], ["woonfunctie"]);
    store.insert_unit("u3", ["NL.B"], ["winkelfunctie"]);
    store.insert_unit("u4", ["NL.C"], ["woonfunctie"]);

    for (id, label) in [
        ("NL.A", "terraced"),
        ("NL.B", "terraced"),
        ("NL.C", "terraced"),
        ("NL.D", "detached"),
    ] {
        store.insert_label(id, label);
    }
    Arc::new(store)
}

pub(crate) fn seeded(store: &dyn GeometryStore) -> StagingTable {
    seed_table(store, "test", &SeedFilter::default(), false).unwrap()
}

/// Metrics for the line fixture: A and B present, C dropped for holes.
pub(crate) fn metrics_csv() -> &'static str {
    "\
id,actual_volume,convex_hull_volume,footprint_perimeter,obb_width,obb_length,ground_area,wall_area,roof_area,ground_point_count,max_Z,min_Z,ground_Z,hole_count,shared_walls_area,closest_distance
NL.A-0,500.0,520.0,44.0,11.0,11.0,121.0,400.0,121.0,12,12.5,3.0,0.5,0,40.0,0.0
NL.B-0,800.0,820.0,44.0,11.0,11.0,121.0,400.0,121.0,20,15.0,6.0,1.0,0,80.0,0.0
NL.C-0,700.0,720.0,44.0,11.0,11.0,121.0,400.0,121.0,15,14.0,4.0,1.0,2,40.0,0.0
"
}
