//! Staging: a run-scoped, typed columnar table keyed by entity id.
//!
//! - Rows are entities addressed by a unique string id (`entity_id`).
//! - Columns are declared with a [`ColumnType`] before they are written;
//!   re-declaring an existing column is a no-op.
//! - Values are nullable per cell; null is never coerced to zero.
//! - Geometry columns (polygon, multipolygon, point) may carry an R-tree index over their
//!   envelopes, rebuilt on demand after the column or the row set changes.
//!
//! The table lives for one run: seed it, let the feature steps add and fill
//! columns, then hand it to whatever persists the result.

mod column;
mod error;
mod index;
mod table;

pub use column::{Column, ColumnData, ColumnType, ColumnValue, Tags};
pub use error::{StagingError, StagingResult};
pub use index::{
    multi_polygon_envelope, point_envelope, polygon_envelope, IndexedEnvelope, SpatialIndex,
};
pub use table::StagingTable;
