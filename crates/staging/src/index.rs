use std::fmt;

use geo::{BoundingRect, MultiPolygon, Point, Polygon, Rect};
use rstar::{RTree, RTreeObject, AABB};

use crate::column::ColumnData;

/// Envelope of one row's geometry, as stored in the R-tree.
#[derive(Clone, Debug)]
pub struct IndexedEnvelope {
    pub row: usize,
    env: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedEnvelope {
    type Envelope = AABB<[f64; 2]>;

    #[inline]
    fn envelope(&self) -> Self::Envelope {
        self.env
    }
}

/// R-tree over the envelopes of a geometry column.
///
/// The index only narrows candidates; callers still run the exact predicate
/// (intersection, distance) on the geometries it returns.
#[derive(Clone)]
pub struct SpatialIndex {
    column: String,
    tree: RTree<IndexedEnvelope>,
}

impl SpatialIndex {
    /// Bulk-load an index over every non-null geometry of `data`.
    /// Returns `None` for non-geometry columns.
    pub(crate) fn build(column: &str, data: &ColumnData) -> Option<Self> {
        let entries: Vec<IndexedEnvelope> = match data {
            ColumnData::Polygon(values) => values
                .iter()
                .enumerate()
                .filter_map(|(row, geom)| {
                    let env = polygon_envelope(geom.as_ref()?)?;
                    Some(IndexedEnvelope { row, env })
                })
                .collect(),
            ColumnData::MultiPolygon(values) => values
                .iter()
                .enumerate()
                .filter_map(|(row, geom)| {
                    let env = multi_polygon_envelope(geom.as_ref()?)?;
                    Some(IndexedEnvelope { row, env })
                })
                .collect(),
            ColumnData::Point(values) => values
                .iter()
                .enumerate()
                .filter_map(|(row, point)| {
                    let p = point.as_ref()?;
                    Some(IndexedEnvelope {
                        row,
                        env: point_envelope(p),
                    })
                })
                .collect(),
            _ => return None,
        };

        Some(Self {
            column: column.to_owned(),
            tree: RTree::bulk_load(entries),
        })
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// Number of indexed (non-null) geometries.
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows whose envelope intersects `envelope` (boundary-inclusive).
    pub fn candidates<'a>(
        &'a self,
        envelope: &AABB<[f64; 2]>,
    ) -> impl Iterator<Item = usize> + 'a {
        self.tree
            .locate_in_envelope_intersecting(envelope)
            .map(|entry| entry.row)
    }

    /// Rows whose envelope comes within `radius` of `point` along either axis.
    pub fn candidates_near(&self, point: &Point<f64>, radius: f64) -> Vec<usize> {
        let env = AABB::from_corners(
            [point.x() - radius, point.y() - radius],
            [point.x() + radius, point.y() + radius],
        );
        self.tree
            .locate_in_envelope_intersecting(&env)
            .map(|entry| entry.row)
            .collect()
    }
}

impl fmt::Debug for SpatialIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpatialIndex")
            .field("column", &self.column)
            .field("len", &self.tree.size())
            .finish()
    }
}

/// Axis-aligned envelope of a polygon, `None` for an empty polygon.
pub fn polygon_envelope(polygon: &Polygon<f64>) -> Option<AABB<[f64; 2]>> {
    polygon.bounding_rect().map(rect_envelope)
}

/// Envelope over all parts, `None` when there are none.
pub fn multi_polygon_envelope(parts: &MultiPolygon<f64>) -> Option<AABB<[f64; 2]>> {
    parts.bounding_rect().map(rect_envelope)
}

fn rect_envelope(rect: Rect<f64>) -> AABB<[f64; 2]> {
    AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y])
}

#[inline]
pub fn point_envelope(point: &Point<f64>) -> AABB<[f64; 2]> {
    AABB::from_point([point.x(), point.y()])
}
