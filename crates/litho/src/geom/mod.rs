//! Planar geometry consumed by the evaluator.
//!
//! The compiler itself only moves points around; everything that needs real
//! computational geometry (boolean set operations, offsets, fillets, raster
//! text, QR codes) goes through the [`GeomBackend`] trait. [`BasicGeom`] is
//! the bundled pure-Rust backend; a production mask flow can substitute a
//! full boolean engine without touching the front end.

mod basic;
mod font;

use smallvec::SmallVec;

use crate::error::{CompileResult, Error};

pub use basic::BasicGeom;
pub(crate) use basic::rect_polygon;

/// A point in layout coordinates (user units, typically micrometres).
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub(crate) fn add(self, other: Self) -> Self {
        Self::new(self.x + other.x, self.y + other.y)
    }

    pub(crate) fn sub(self, other: Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y)
    }

    pub(crate) fn rotated(self, angle_rad: f64, center: Self) -> Self {
        let (s, c) = angle_rad.sin_cos();
        let dx = self.x - center.x;
        let dy = self.y - center.y;
        Self::new(dx * c - dy * s + center.x, dx * s + dy * c + center.y)
    }
}

/// A simple polygon. Most layout polygons are rectangles, so the point
/// storage is inlined up to eight vertices.
pub type Polygon = SmallVec<[Point; 8]>;

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BBox {
    pub min: Point,
    pub max: Point,
}

impl BBox {
    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    pub(crate) fn expand(&mut self, p: Point) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
    }

    /// True if `other` fits inside `self` (with a small tolerance).
    pub fn contains(&self, other: &Self) -> bool {
        const EPS: f64 = 1e-9;
        self.min.x <= other.min.x + EPS
            && self.min.y <= other.min.y + EPS
            && self.max.x + EPS >= other.max.x
            && self.max.y + EPS >= other.max.y
    }
}

/// An owned polygon set. The payload of `Value::Shape`.
///
/// A shape carries no layer; layers are stamped when polygons are added to a
/// cell (the section's layer context decides).
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Shape {
    pub polygons: Vec<Polygon>,
}

impl Shape {
    pub fn new(polygons: Vec<Polygon>) -> Self {
        Self { polygons }
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.iter().all(Polygon::is_empty)
    }

    fn points(&self) -> impl Iterator<Item = Point> + '_ {
        self.polygons.iter().flatten().copied()
    }

    pub fn bounding_box(&self) -> Option<BBox> {
        let mut points = self.points();
        let first = points.next()?;
        let mut bb = BBox { min: first, max: first };
        for p in points {
            bb.expand(p);
        }
        Some(bb)
    }

    pub fn width(&self) -> f64 {
        self.bounding_box().map_or(0.0, |bb| bb.width())
    }

    pub fn height(&self) -> f64 {
        self.bounding_box().map_or(0.0, |bb| bb.height())
    }

    /// Mean of the vertex set. This is the original tool's notion of a shape
    /// center, not an area centroid.
    pub fn center(&self) -> Point {
        let mut n = 0usize;
        let mut sx = 0.0;
        let mut sy = 0.0;
        for p in self.points() {
            n += 1;
            sx += p.x;
            sy += p.y;
        }
        if n == 0 {
            return Point::default();
        }
        Point::new(sx / n as f64, sy / n as f64)
    }

    pub(crate) fn map_points(&self, f: impl Fn(Point) -> Point) -> Self {
        Self {
            polygons: self
                .polygons
                .iter()
                .map(|poly| poly.iter().map(|&p| f(p)).collect())
                .collect(),
        }
    }
}

/// The nine anchor positions shared by `rect`, `text` and anchored translate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Anchor {
    C,
    N,
    Ne,
    E,
    Se,
    S,
    Sw,
    W,
    Nw,
}

impl Anchor {
    pub(crate) const ALL: [Self; 9] = [
        Self::C,
        Self::N,
        Self::Ne,
        Self::E,
        Self::Se,
        Self::S,
        Self::Sw,
        Self::W,
        Self::Nw,
    ];

    /// The anchor's position on a box spanning `[xmin, xmax] x [ymin, ymax]`.
    pub(crate) fn position(self, xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Point {
        let cx = 0.5 * (xmin + xmax);
        let cy = 0.5 * (ymin + ymax);
        match self {
            Self::C => Point::new(cx, cy),
            Self::N => Point::new(cx, ymax),
            Self::Ne => Point::new(xmax, ymax),
            Self::E => Point::new(xmax, cy),
            Self::Se => Point::new(xmax, ymin),
            Self::S => Point::new(cx, ymin),
            Self::Sw => Point::new(xmin, ymin),
            Self::W => Point::new(xmin, cy),
            Self::Nw => Point::new(xmin, ymax),
        }
    }
}

/// Sizing mode for raster text: glyph height or total string width.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TextSize {
    Height(f64),
    Width(f64),
}

/// The geometric primitive engine consumed by the evaluator.
///
/// Affine transforms are pure point maps and come with default
/// implementations; backends only have to supply the operations that need
/// real computational geometry.
pub trait GeomBackend {
    /// Set union of two polygon sets.
    fn union(&self, a: &Shape, b: &Shape) -> CompileResult<Shape>;

    /// Set difference `a \ b`.
    fn difference(&self, a: &Shape, b: &Shape) -> CompileResult<Shape>;

    /// Set intersection.
    fn intersection(&self, a: &Shape, b: &Shape) -> CompileResult<Shape>;

    /// Outward offset by `d` (negative shrinks).
    fn grow(&self, shape: &Shape, d: f64) -> CompileResult<Shape>;

    /// Corner rounding with radius `r`.
    fn fillet(&self, shape: &Shape, r: f64) -> CompileResult<Shape>;

    /// Renders `text` as polygons, unanchored, with the given sizing.
    fn text(&self, text: &str, size: TextSize) -> CompileResult<Shape>;

    /// Renders QR code polygons for `data` with the given pixel pitch.
    fn qr_polygons(&self, data: &str, pixel: f64) -> CompileResult<Shape>;

    fn translate(&self, shape: &Shape, dx: f64, dy: f64) -> Shape {
        shape.map_points(|p| Point::new(p.x + dx, p.y + dy))
    }

    fn rotate(&self, shape: &Shape, angle_rad: f64, center: Point) -> Shape {
        shape.map_points(|p| p.rotated(angle_rad, center))
    }

    /// Reflection across the line through `p1` and `p2`.
    fn mirror(&self, shape: &Shape, p1: Point, p2: Point) -> CompileResult<Shape> {
        let d = p2.sub(p1);
        let len2 = d.x * d.x + d.y * d.y;
        if len2 == 0.0 {
            return Err(Error::domain("mirror axis points must be distinct"));
        }
        Ok(shape.map_points(|p| {
            let v = p.sub(p1);
            let t = (v.x * d.x + v.y * d.y) / len2;
            let foot = Point::new(p1.x + t * d.x, p1.y + t * d.y);
            Point::new(2.0 * foot.x - p.x, 2.0 * foot.y - p.y)
        }))
    }

    fn scale(&self, shape: &Shape, sx: f64, sy: f64) -> Shape {
        shape.map_points(|p| Point::new(p.x * sx, p.y * sy))
    }

    fn bounding_box(&self, shape: &Shape) -> Option<BBox> {
        shape.bounding_box()
    }
}
