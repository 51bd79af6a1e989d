//! Planar geometry operators used by the feature steps.
//!
//! Everything here works on projected coordinates in metres (RD New and the
//! like); no geodetic correction is applied.

use geo::algorithm::orient::Direction;
use geo::{
    Area, Centroid, Coord, CoordsIter, EuclideanDistance, EuclideanLength, LineString,
    MinimumRotatedRect, MultiPolygon, Orient, Point, Polygon, Simplify,
};

/// Ratio of miter length to buffer distance above which a convex corner is
/// bevelled instead of extended.
pub const MITER_LIMIT: f64 = 5.0;

/// Footprints with less area than this are treated as collapsed.
const DEGENERATE_AREA: f64 = 1e-9;

const EPS: f64 = 1e-12;

#[inline]
pub fn area(footprint: &Polygon<f64>) -> f64 {
    footprint.unsigned_area()
}

/// Length of the exterior ring plus every interior ring.
pub fn perimeter(footprint: &Polygon<f64>) -> f64 {
    footprint.exterior().euclidean_length()
        + footprint
            .interiors()
            .iter()
            .map(|ring| ring.euclidean_length())
            .sum::<f64>()
}

/// Number of stored vertices, closing vertices of each ring included.
#[inline]
pub fn vertex_count(footprint: &Polygon<f64>) -> usize {
    footprint.coords_count()
}

/// Douglas–Peucker on every ring, keeping a ring's original vertices if the
/// simplified version would no longer be a ring.
pub fn simplify_preserving(footprint: &Polygon<f64>, tolerance: f64) -> Polygon<f64> {
    let simplify_ring = |ring: &LineString<f64>| {
        let simplified = ring.simplify(&tolerance);
        if simplified.0.len() >= 4 {
            simplified
        } else {
            ring.clone()
        }
    };

    Polygon::new(
        simplify_ring(footprint.exterior()),
        footprint.interiors().iter().map(simplify_ring).collect(),
    )
}

#[inline]
pub fn centroid(footprint: &Polygon<f64>) -> Option<Point<f64>> {
    footprint.centroid()
}

/// Distance from a footprint to a point; zero when the point is inside.
#[inline]
pub fn distance_to_point(footprint: &Polygon<f64>, point: &Point<f64>) -> f64 {
    footprint.euclidean_distance(point)
}

/// Side lengths of the oriented minimum-area bounding rectangle, in ring
/// order (not sorted). A footprint that collapses to a line or point yields
/// `(0.0, 0.0)`.
pub fn oriented_rect_sides(footprint: &Polygon<f64>) -> (f64, f64) {
    if footprint.unsigned_area() <= DEGENERATE_AREA {
        return (0.0, 0.0);
    }

    let Some(rect) = footprint.minimum_rotated_rect() else {
        return (0.0, 0.0);
    };

    let corners = &rect.exterior().0;
    if corners.len() < 3 {
        return (0.0, 0.0);
    }

    (
        dist(corners[0], corners[1]),
        dist(corners[1], corners[2]),
    )
}

/// Grow a footprint outward by `distance` with mitred (sharp) corners.
///
/// The buffer is returned as overlapping pieces whose union is the buffered
/// region: the footprint itself, one strip per ring edge on its outward
/// side, and one corner patch per convex vertex (a miter quad, or a bevel
/// triangle when the miter would exceed [`MITER_LIMIT`]). Concave vertices
/// and narrow cracks need no patch since neighbouring strips overlap there,
/// so no part of the buffer lies farther than `distance * MITER_LIMIT` from
/// the footprint. Strips along hole edges shrink the hole and fill it when
/// it is narrower than twice the distance.
///
/// Returns `None` for a footprint whose exterior has fewer than three
/// distinct vertices.
pub fn miter_buffer(footprint: &Polygon<f64>, distance: f64) -> Option<MultiPolygon<f64>> {
    // Exterior counter-clockwise, holes clockwise: material is always on the
    // left of the walking direction, so "right" is always outward.
    let oriented = footprint.orient(Direction::Default);
    let exterior = distinct_vertices(oriented.exterior())?;

    if distance <= 0.0 {
        return Some(MultiPolygon::new(vec![oriented]));
    }

    let mut pieces = Vec::with_capacity(2 * exterior.len() + 1);
    push_ring_pieces(&exterior, distance, &mut pieces);
    for hole in oriented.interiors() {
        if let Some(pts) = distinct_vertices(hole) {
            push_ring_pieces(&pts, distance, &mut pieces);
        }
    }
    pieces.push(oriented);

    Some(MultiPolygon::new(pieces))
}

/// Ring vertices without consecutive duplicates or the closing vertex;
/// `None` below three.
fn distinct_vertices(ring: &LineString<f64>) -> Option<Vec<Coord<f64>>> {
    let mut pts: Vec<Coord<f64>> = Vec::with_capacity(ring.0.len());
    for &c in &ring.0 {
        if pts.last().map_or(true, |&p| !coincident(p, c)) {
            pts.push(c);
        }
    }
    while pts.len() > 1 && coincident(pts[0], pts[pts.len() - 1]) {
        pts.pop();
    }
    (pts.len() >= 3).then_some(pts)
}

fn push_ring_pieces(pts: &[Coord<f64>], distance: f64, pieces: &mut Vec<Polygon<f64>>) {
    let n = pts.len();
    for i in 0..n {
        let prev = pts[(i + n - 1) % n];
        let cur = pts[i];
        let next = pts[(i + 1) % n];

        let n0 = right_normal(prev, cur);
        let n1 = right_normal(cur, next);
        let cur0 = shift(cur, n0, distance);
        let cur1 = shift(cur, n1, distance);

        // Strip along the edge cur -> next.
        pieces.push(piece(vec![cur, next, shift(next, n1, distance), cur1]));

        if cross(sub(cur, prev), sub(next, cur)) <= EPS {
            continue;
        }

        // 1 + cos(turn angle); the miter vector is (n0 + n1) * d / denom.
        let denom = 1.0 + n0.x * n1.x + n0.y * n1.y;
        if denom > EPS && (2.0 / denom).sqrt() <= MITER_LIMIT {
            let tip = Coord {
                x: cur.x + (n0.x + n1.x) * distance / denom,
                y: cur.y + (n0.y + n1.y) * distance / denom,
            };
            pieces.push(piece(vec![cur, cur0, tip, cur1]));
        } else {
            pieces.push(piece(vec![cur, cur0, cur1]));
        }
    }
}

#[inline]
fn piece(corners: Vec<Coord<f64>>) -> Polygon<f64> {
    Polygon::new(LineString::new(corners), vec![])
}

#[inline]
fn shift(c: Coord<f64>, normal: Coord<f64>, distance: f64) -> Coord<f64> {
    Coord {
        x: c.x + normal.x * distance,
        y: c.y + normal.y * distance,
    }
}

#[inline]
fn right_normal(a: Coord<f64>, b: Coord<f64>) -> Coord<f64> {
    let d = sub(b, a);
    let len = d.x.hypot(d.y);
    Coord {
        x: d.y / len,
        y: -d.x / len,
    }
}

#[inline]
fn sub(a: Coord<f64>, b: Coord<f64>) -> Coord<f64> {
    Coord {
        x: a.x - b.x,
        y: a.y - b.y,
    }
}

#[inline]
fn cross(u: Coord<f64>, v: Coord<f64>) -> f64 {
    u.x * v.y - u.y * v.x
}

#[inline]
fn dist(a: Coord<f64>, b: Coord<f64>) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

#[inline]
fn coincident(a: Coord<f64>, b: Coord<f64>) -> bool {
    (a.x - b.x).abs() <= EPS && (a.y - b.y).abs() <= EPS
}

/// Axis-aligned square with its lower-left corner at `(x, y)`.
#[cfg(test)]
pub(crate) fn square(x: f64, y: f64, side: f64) -> Polygon<f64> {
    Polygon::new(
        LineString::from(vec![
            (x, y),
            (x + side, y),
            (x + side, y + side),
            (x, y + side),
            (x, y),
        ]),
        vec![],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, BoundingRect, Intersects};

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn square_descriptors() {
        let sq = square(0.0, 0.0, 10.0);
        assert!(close(area(&sq), 100.0));
        assert!(close(perimeter(&sq), 40.0));
        // Four corners plus the closing vertex.
        assert_eq!(vertex_count(&sq), 5);
    }

    #[test]
    fn perimeter_includes_holes() {
        let outer = square(0.0, 0.0, 10.0);
        let hole = square(2.0, 2.0, 2.0);
        let with_hole = Polygon::new(outer.exterior().clone(), vec![hole.exterior().clone()]);
        assert!(close(perimeter(&with_hole), 48.0));
        assert!(close(area(&with_hole), 96.0));
    }

    #[test]
    fn simplification_drops_near_collinear_vertices() {
        let poly = polygon![
            (x: 0.0, y: 0.0),
            (x: 5.0, y: 0.05),
            (x: 10.0, y: 0.0),
            (x: 10.0, y: 10.0),
            (x: 0.0, y: 10.0),
        ];
        assert_eq!(vertex_count(&poly), 6);
        assert_eq!(vertex_count(&simplify_preserving(&poly, 0.1)), 5);
    }

    #[test]
    fn simplification_keeps_tiny_rings() {
        let tiny = square(0.0, 0.0, 0.05);
        let simplified = simplify_preserving(&tiny, 0.1);
        assert_eq!(vertex_count(&simplified), vertex_count(&tiny));
    }

    #[test]
    fn miter_buffer_of_square_keeps_sharp_corners() {
        let buf = miter_buffer(&square(0.0, 0.0, 10.0), 0.1).unwrap();
        // Footprint, four strips and four corner squares; none overlap.
        assert!(close(buf.unsigned_area(), 10.2 * 10.2));
        assert!(buf.intersects(&Point::new(10.09, 10.09)));
        assert!(!buf.intersects(&Point::new(10.11, 10.0)));
    }

    #[test]
    fn miter_buffer_handles_concave_corners() {
        // L-shape: 10x10 square minus its upper-right 5x5 quadrant.
        let l_shape = polygon![
            (x: 0.0, y: 0.0),
            (x: 10.0, y: 0.0),
            (x: 10.0, y: 5.0),
            (x: 5.0, y: 5.0),
            (x: 5.0, y: 10.0),
            (x: 0.0, y: 10.0),
        ];
        let buf = miter_buffer(&l_shape, 1.0).unwrap();
        assert!(buf.intersects(&Point::new(5.5, 5.5)));
        assert!(buf.intersects(&Point::new(6.0, 6.0)));
        assert!(!buf.intersects(&Point::new(6.5, 6.5)));
        assert!(buf.intersects(&Point::new(10.9, -0.9)));
        assert!(!buf.intersects(&Point::new(11.1, 5.0)));
    }

    #[test]
    fn miter_buffer_stays_near_cracked_footprint() {
        // 10x10 square with a 2 mm wide, 9.5 m deep crack from the top edge.
        let cracked = polygon![
            (x: 0.0, y: 0.0),
            (x: 10.0, y: 0.0),
            (x: 10.0, y: 10.0),
            (x: 5.001, y: 10.0),
            (x: 5.001, y: 0.5),
            (x: 4.999, y: 0.5),
            (x: 4.999, y: 10.0),
            (x: 0.0, y: 10.0),
        ];
        let buf = miter_buffer(&cracked, 0.1).unwrap();

        let bounds = buf.bounding_rect().unwrap();
        assert!(bounds.min().x >= -0.1 - 1e-9 && bounds.min().y >= -0.1 - 1e-9);
        assert!(bounds.max().x <= 10.1 + 1e-9 && bounds.max().y <= 10.1 + 1e-9);

        // The crack is filled, nothing above it is.
        assert!(buf.intersects(&Point::new(5.0, 5.0)));
        assert!(!buf.intersects(&Point::new(5.0, 10.3)));

        let far = square(4.0, 400.0, 2.0);
        assert!(!buf.intersects(&far));
    }

    #[test]
    fn miter_buffer_bevels_sharp_spikes() {
        // Needle-like tip at (20, 0.5): the miter would run far past it.
        let spike = polygon![(x: 0.0, y: 0.0), (x: 20.0, y: 0.5), (x: 0.0, y: 1.0)];
        let buf = miter_buffer(&spike, 0.1).unwrap();
        let bounds = buf.bounding_rect().unwrap();
        assert!(bounds.max().x <= 20.0 + 0.1 * MITER_LIMIT);
    }

    #[test]
    fn miter_buffer_closes_small_holes() {
        let outer = square(0.0, 0.0, 10.0);
        let small = square(4.0, 4.0, 0.1);
        let large = square(1.0, 1.0, 2.0);
        let poly = Polygon::new(
            outer.exterior().clone(),
            vec![small.exterior().clone(), large.exterior().clone()],
        );
        let buf = miter_buffer(&poly, 0.1).unwrap();
        assert!(buf.intersects(&Point::new(4.05, 4.05)));
        assert!(buf.intersects(&Point::new(1.05, 2.0)));
        assert!(!buf.intersects(&Point::new(2.0, 2.0)));
    }

    #[test]
    fn oriented_rect_sides_of_rotated_rectangle() {
        let (s, c) = 30f64.to_radians().sin_cos();
        let corner = |x: f64, y: f64| (x * c - y * s, x * s + y * c);
        let rect = Polygon::new(
            LineString::from(vec![
                corner(0.0, 0.0),
                corner(20.0, 0.0),
                corner(20.0, 10.0),
                corner(0.0, 10.0),
                corner(0.0, 0.0),
            ]),
            vec![],
        );
        let (a, b) = oriented_rect_sides(&rect);
        assert!(close(a.max(b), 20.0), "{a} {b}");
        assert!(close(a.min(b), 10.0), "{a} {b}");
    }

    #[test]
    fn degenerate_footprint_has_zero_sides() {
        let line = polygon![(x: 0.0, y: 0.0), (x: 5.0, y: 0.0), (x: 10.0, y: 0.0)];
        assert_eq!(oriented_rect_sides(&line), (0.0, 0.0));

        let point = polygon![(x: 3.0, y: 3.0), (x: 3.0, y: 3.0), (x: 3.0, y: 3.0)];
        assert_eq!(oriented_rect_sides(&point), (0.0, 0.0));
        assert!(miter_buffer(&point, 0.1).is_none());
    }

    #[test]
    fn point_distance_is_zero_inside() {
        let sq = square(0.0, 0.0, 10.0);
        assert!(close(distance_to_point(&sq, &Point::new(5.0, 5.0)), 0.0));
        assert!(close(distance_to_point(&sq, &Point::new(16.0, 5.0)), 6.0));
        assert_eq!(centroid(&sq), Some(Point::new(5.0, 5.0)));
    }
}
