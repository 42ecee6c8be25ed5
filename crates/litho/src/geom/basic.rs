//! The bundled reference geometry backend.
//!
//! Shapes are kept as sets of simple polygons. Boolean results are produced
//! by half-plane clipping: intersections and differences are exact when the
//! clipping operand is convex, and unions are stored as disjoint
//! decompositions (`a ∪ b = a ⊎ (b \ a)`), which is exact for arbitrary
//! operands as long as the pieces subtracted away are convex. Layout
//! primitives are rectangles and convex polygons in practice; a flow that
//! needs general boolean algebra plugs a full engine into [`GeomBackend`].

use smallvec::smallvec;

use super::{GeomBackend, Point, Polygon, Shape, TextSize, font};
use crate::error::{CompileResult, Error};

const AREA_EPS: f64 = 1e-12;
const SIDE_EPS: f64 = 1e-9;

/// Pure-Rust [`GeomBackend`] implementation with no external engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicGeom;

fn signed_area(poly: &[Point]) -> f64 {
    let mut acc = 0.0;
    for (i, p) in poly.iter().enumerate() {
        let q = poly[(i + 1) % poly.len()];
        acc += p.x * q.y - q.x * p.y;
    }
    acc / 2.0
}

fn ccw(mut poly: Polygon) -> Polygon {
    if signed_area(&poly) < 0.0 {
        poly.reverse();
    }
    poly
}

fn is_convex(poly: &[Point]) -> bool {
    if poly.len() < 3 {
        return false;
    }
    let mut sign = 0.0f64;
    for i in 0..poly.len() {
        let a = poly[i];
        let b = poly[(i + 1) % poly.len()];
        let c = poly[(i + 2) % poly.len()];
        let cross = (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x);
        if cross.abs() < SIDE_EPS {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}

/// Signed side of `p` relative to the directed line `a -> b`; positive is
/// left (inside for CCW edges).
fn side(p: Point, a: Point, b: Point) -> f64 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

fn poly_bounds(poly: &[Point]) -> (Point, Point) {
    let mut min = Point::new(f64::INFINITY, f64::INFINITY);
    let mut max = Point::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
    for p in poly {
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
    }
    (min, max)
}

fn bounds_disjoint(a: &[Point], b: &[Point]) -> bool {
    let (amin, amax) = poly_bounds(a);
    let (bmin, bmax) = poly_bounds(b);
    amax.x < bmin.x || bmax.x < amin.x || amax.y < bmin.y || bmax.y < amin.y
}

/// Intersection of segment `p -> q` with the infinite line through `a, b`.
fn line_hit(p: Point, q: Point, a: Point, b: Point) -> Point {
    let sp = side(p, a, b);
    let sq = side(q, a, b);
    let t = sp / (sp - sq);
    Point::new(p.x + t * (q.x - p.x), p.y + t * (q.y - p.y))
}

/// Sutherland–Hodgman clip of `subject` against the half-plane left of
/// `a -> b`.
fn clip_halfplane(subject: &[Point], a: Point, b: Point) -> Polygon {
    let mut out = Polygon::new();
    if subject.is_empty() {
        return out;
    }
    for i in 0..subject.len() {
        let cur = subject[i];
        let next = subject[(i + 1) % subject.len()];
        let cur_in = side(cur, a, b) >= -SIDE_EPS;
        let next_in = side(next, a, b) >= -SIDE_EPS;
        if cur_in {
            out.push(cur);
        }
        if cur_in != next_in {
            out.push(line_hit(cur, next, a, b));
        }
    }
    out
}

/// Clips `subject` to the inside of the convex CCW polygon `clip`.
fn clip_convex(subject: &[Point], clip: &[Point]) -> Polygon {
    let mut result: Polygon = subject.iter().copied().collect();
    for i in 0..clip.len() {
        let a = clip[i];
        let b = clip[(i + 1) % clip.len()];
        result = clip_halfplane(&result, a, b);
        if result.is_empty() {
            break;
        }
    }
    result
}

/// `subject \ clip` for convex CCW `clip`, decomposed edge by edge: the
/// piece outside edge `i` but inside edges `0..i` is emitted, then the
/// working set is narrowed to the inside of edge `i`.
fn subtract_convex(subject: &[Point], clip: &[Point]) -> Vec<Polygon> {
    let mut pieces = Vec::new();
    let mut core: Polygon = subject.iter().copied().collect();
    for i in 0..clip.len() {
        let a = clip[i];
        let b = clip[(i + 1) % clip.len()];
        let outside = clip_halfplane(&core, b, a);
        if signed_area(&outside).abs() > AREA_EPS {
            pieces.push(outside);
        }
        core = clip_halfplane(&core, a, b);
        if core.is_empty() {
            break;
        }
    }
    pieces
}

/// Removes the (convex) polygons of `cut` from every piece in `pieces`.
/// Non-convex cut polygons are reported to the caller.
fn subtract_all(pieces: Vec<Polygon>, cut: &[Polygon], op: &str) -> CompileResult<Vec<Polygon>> {
    let mut current = pieces;
    for raw in cut {
        if raw.len() < 3 {
            continue;
        }
        let clip = ccw(raw.clone());
        if !is_convex(&clip) {
            return Err(Error::geom(format!(
                "BasicGeom only supports convex operands for {op}; use a full boolean engine"
            )));
        }
        let mut next = Vec::with_capacity(current.len());
        for piece in &current {
            next.extend(subtract_convex(piece, &clip));
        }
        current = next;
        if current.is_empty() {
            break;
        }
    }
    Ok(current)
}

impl GeomBackend for BasicGeom {
    fn union(&self, a: &Shape, b: &Shape) -> CompileResult<Shape> {
        let mut polygons = a.polygons.clone();
        for pb in &b.polygons {
            if pb.len() < 3 {
                continue;
            }
            // Carve away the area already covered by `a` where we can, so the
            // decomposition stays disjoint. Non-convex covers are left
            // overlapping, which is still a correct union of point sets.
            let mut pieces = vec![pb.clone()];
            for pa in &a.polygons {
                if pa.len() < 3 || bounds_disjoint(pa, pb) {
                    continue;
                }
                let clip = ccw(pa.clone());
                if !is_convex(&clip) {
                    continue;
                }
                let mut next = Vec::with_capacity(pieces.len());
                for piece in &pieces {
                    next.extend(subtract_convex(piece, &clip));
                }
                pieces = next;
                if pieces.is_empty() {
                    break;
                }
            }
            polygons.extend(pieces);
        }
        Ok(Shape::new(polygons))
    }

    fn difference(&self, a: &Shape, b: &Shape) -> CompileResult<Shape> {
        let mut polygons = Vec::new();
        for pa in &a.polygons {
            if pa.len() < 3 {
                continue;
            }
            let pieces = subtract_all(vec![pa.clone()], &b.polygons, "difference")?;
            polygons.extend(pieces);
        }
        Ok(Shape::new(polygons))
    }

    fn intersection(&self, a: &Shape, b: &Shape) -> CompileResult<Shape> {
        let mut polygons = Vec::new();
        for pa in &a.polygons {
            for pb in &b.polygons {
                if pa.len() < 3 || pb.len() < 3 {
                    continue;
                }
                let hit = if is_convex(pb) {
                    clip_convex(pa, &ccw(pb.clone()))
                } else if is_convex(pa) {
                    clip_convex(pb, &ccw(pa.clone()))
                } else {
                    return Err(Error::geom(
                        "BasicGeom only supports convex operands for intersection; use a full boolean engine",
                    ));
                };
                if signed_area(&hit).abs() > AREA_EPS {
                    polygons.push(hit);
                }
            }
        }
        Ok(Shape::new(polygons))
    }

    fn grow(&self, shape: &Shape, d: f64) -> CompileResult<Shape> {
        let mut polygons = Vec::new();
        for raw in &shape.polygons {
            if raw.len() < 3 {
                continue;
            }
            let poly = ccw(raw.clone());
            let n = poly.len();
            let mut grown = Polygon::new();
            for i in 0..n {
                let prev = poly[(i + n - 1) % n];
                let cur = poly[i];
                let next = poly[(i + 1) % n];
                let off_a = offset_line(prev, cur, d);
                let off_b = offset_line(cur, next, d);
                grown.push(miter(off_a, off_b).unwrap_or_else(|| {
                    let normal = edge_normal(prev, cur);
                    Point::new(cur.x + normal.x * d, cur.y + normal.y * d)
                }));
            }
            if signed_area(&grown).abs() > AREA_EPS {
                polygons.push(grown);
            }
        }
        Ok(Shape::new(polygons))
    }

    fn fillet(&self, shape: &Shape, r: f64) -> CompileResult<Shape> {
        if r <= 0.0 {
            return Err(Error::domain("fillet radius must be positive"));
        }
        let mut polygons = Vec::new();
        for raw in &shape.polygons {
            if raw.len() < 3 {
                continue;
            }
            let poly = ccw(raw.clone());
            polygons.push(fillet_polygon(&poly, r));
        }
        Ok(Shape::new(polygons))
    }

    fn text(&self, text: &str, size: TextSize) -> CompileResult<Shape> {
        font::render(text, size)
    }

    fn qr_polygons(&self, _data: &str, _pixel: f64) -> CompileResult<Shape> {
        Err(Error::geom(
            "QR rendering is not supported by BasicGeom; plug a geometry engine with QR support",
        ))
    }
}

/// Outward unit normal of the CCW edge `a -> b` (interior is on the left).
fn edge_normal(a: Point, b: Point) -> Point {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len = (dx * dx + dy * dy).sqrt();
    if len == 0.0 {
        return Point::default();
    }
    Point::new(dy / len, -dx / len)
}

fn offset_line(a: Point, b: Point, d: f64) -> (Point, Point) {
    let n = edge_normal(a, b);
    (
        Point::new(a.x + n.x * d, a.y + n.y * d),
        Point::new(b.x + n.x * d, b.y + n.y * d),
    )
}

/// Intersection of two infinite lines given as point pairs; `None` when they
/// are (nearly) parallel.
fn miter(l1: (Point, Point), l2: (Point, Point)) -> Option<Point> {
    let d1 = l1.1.sub(l1.0);
    let d2 = l2.1.sub(l2.0);
    let denom = d1.x * d2.y - d1.y * d2.x;
    if denom.abs() < 1e-12 {
        return None;
    }
    let w = l2.0.sub(l1.0);
    let t = (w.x * d2.y - w.y * d2.x) / denom;
    Some(Point::new(l1.0.x + t * d1.x, l1.0.y + t * d1.y))
}

const FILLET_SEGMENTS: usize = 8;

fn fillet_polygon(poly: &[Point], r: f64) -> Polygon {
    let n = poly.len();
    let mut out = Polygon::new();
    for i in 0..n {
        let prev = poly[(i + n - 1) % n];
        let cur = poly[i];
        let next = poly[(i + 1) % n];
        let u = unit(prev.sub(cur));
        let w = unit(next.sub(cur));
        let cos_theta = (u.x * w.x + u.y * w.y).clamp(-1.0, 1.0);
        let theta = cos_theta.acos();
        if theta < 1e-6 || (std::f64::consts::PI - theta).abs() < 1e-6 {
            out.push(cur);
            continue;
        }
        let half = theta / 2.0;
        let mut t = r / half.tan();
        let limit = 0.5 * dist(prev, cur).min(dist(next, cur));
        let radius = if t > limit {
            t = limit;
            t * half.tan()
        } else {
            r
        };
        let bis = unit(Point::new(u.x + w.x, u.y + w.y));
        let center = Point::new(cur.x + bis.x * radius / half.sin(), cur.y + bis.y * radius / half.sin());
        let t0 = Point::new(cur.x + u.x * t, cur.y + u.y * t);
        let t1 = Point::new(cur.x + w.x * t, cur.y + w.y * t);
        let a0 = (t0.y - center.y).atan2(t0.x - center.x);
        let mut a1 = (t1.y - center.y).atan2(t1.x - center.x);
        // sweep the short way round
        while a1 - a0 > std::f64::consts::PI {
            a1 -= 2.0 * std::f64::consts::PI;
        }
        while a0 - a1 > std::f64::consts::PI {
            a1 += 2.0 * std::f64::consts::PI;
        }
        for k in 0..=FILLET_SEGMENTS {
            let ang = a0 + (a1 - a0) * k as f64 / FILLET_SEGMENTS as f64;
            out.push(Point::new(
                center.x + radius * ang.cos(),
                center.y + radius * ang.sin(),
            ));
        }
    }
    out
}

fn unit(p: Point) -> Point {
    let len = (p.x * p.x + p.y * p.y).sqrt();
    if len == 0.0 {
        return Point::default();
    }
    Point::new(p.x / len, p.y / len)
}

fn dist(a: Point, b: Point) -> f64 {
    let d = a.sub(b);
    (d.x * d.x + d.y * d.y).sqrt()
}

/// Axis-aligned rectangle polygon, counter-clockwise.
pub(crate) fn rect_polygon(p1: Point, p2: Point) -> Polygon {
    let (xmin, xmax) = (p1.x.min(p2.x), p1.x.max(p2.x));
    let (ymin, ymax) = (p1.y.min(p2.y), p1.y.max(p2.y));
    smallvec![
        Point::new(xmin, ymin),
        Point::new(xmax, ymin),
        Point::new(xmax, ymax),
        Point::new(xmin, ymax),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Shape {
        Shape::new(vec![rect_polygon(Point::new(x0, y0), Point::new(x1, y1))])
    }

    fn total_area(shape: &Shape) -> f64 {
        shape.polygons.iter().map(|p| signed_area(p).abs()).sum()
    }

    #[test]
    fn union_of_overlapping_rects_is_disjoint() {
        let g = BasicGeom;
        let u = g.union(&rect(0.0, 0.0, 10.0, 10.0), &rect(5.0, 0.0, 15.0, 10.0)).unwrap();
        assert!((total_area(&u) - 150.0).abs() < 1e-9);
        let bb = u.bounding_box().unwrap();
        assert_eq!((bb.min.x, bb.min.y, bb.max.x, bb.max.y), (0.0, 0.0, 15.0, 10.0));
    }

    #[test]
    fn difference_removes_overlap() {
        let g = BasicGeom;
        let d = g
            .difference(&rect(0.0, 0.0, 10.0, 10.0), &rect(5.0, 0.0, 15.0, 10.0))
            .unwrap();
        assert!((total_area(&d) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn intersection_is_the_overlap() {
        let g = BasicGeom;
        let i = g
            .intersection(&rect(0.0, 0.0, 10.0, 10.0), &rect(5.0, 5.0, 15.0, 15.0))
            .unwrap();
        assert!((total_area(&i) - 25.0).abs() < 1e-9);
    }

    #[test]
    fn union_minus_operand_shrinks_or_keeps_bbox() {
        let g = BasicGeom;
        let a = rect(0.0, 0.0, 10.0, 4.0);
        let b = rect(8.0, 0.0, 20.0, 4.0);
        let u = g.union(&a, &b).unwrap();
        let d = g.difference(&u, &b).unwrap();
        let bb_union = u.bounding_box().unwrap();
        let bb_diff = d.bounding_box().unwrap();
        assert!(bb_union.contains(&bb_diff));
    }

    #[test]
    fn grow_expands_bbox_by_offset() {
        let g = BasicGeom;
        let grown = g.grow(&rect(0.0, 0.0, 10.0, 10.0), 2.0).unwrap();
        let bb = grown.bounding_box().unwrap();
        assert!((bb.min.x + 2.0).abs() < 1e-9);
        assert!((bb.max.y - 12.0).abs() < 1e-9);
    }

    #[test]
    fn fillet_stays_inside_original_bbox() {
        let g = BasicGeom;
        let shape = rect(0.0, 0.0, 10.0, 10.0);
        let rounded = g.fillet(&shape, 2.0).unwrap();
        assert!(shape.bounding_box().unwrap().contains(&rounded.bounding_box().unwrap()));
    }

    #[test]
    fn non_convex_difference_operand_is_rejected() {
        let g = BasicGeom;
        let l_shape = Shape::new(vec![smallvec![
            Point::new(0.0, 0.0),
            Point::new(4.0, 0.0),
            Point::new(4.0, 1.0),
            Point::new(1.0, 1.0),
            Point::new(1.0, 4.0),
            Point::new(0.0, 4.0),
        ]]);
        let err = g.difference(&rect(0.0, 0.0, 10.0, 10.0), &l_shape).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Geom);
    }
}
