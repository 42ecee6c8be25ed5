//! The output container: named cells holding polygons and references.
//!
//! This is the surface the evaluator and section parser assemble into
//! (`get_or_create` / `add_polygons` / `add_reference`) and the emit module
//! reads back out. Cells are iterated in sorted name order at emit time;
//! insertion order is preserved internally so caches round-trip exactly.

use indexmap::IndexMap;

use crate::geom::{BBox, Point, Polygon, Shape};

/// A polygon stamped with its fabrication layer.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LayerPolygon {
    pub layer: u16,
    pub points: Polygon,
}

/// A placement of another cell at an origin and rotation (degrees).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CellRef {
    pub cell: String,
    pub origin: Point,
    pub rotation: f64,
}

/// A regularly spaced grid of references to the same cell.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CellArray {
    pub cell: String,
    pub cols: u32,
    pub rows: u32,
    pub spacing: Point,
    pub origin: Point,
    pub rotation: f64,
}

/// Either a single reference or an array reference.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Reference {
    Single(CellRef),
    Array(CellArray),
}

impl Reference {
    pub fn cell_name(&self) -> &str {
        match self {
            Self::Single(r) => &r.cell,
            Self::Array(a) => &a.cell,
        }
    }

    pub(crate) fn translated(&self, dx: f64, dy: f64) -> Self {
        match self {
            Self::Single(r) => Self::Single(CellRef {
                origin: Point::new(r.origin.x + dx, r.origin.y + dy),
                ..r.clone()
            }),
            Self::Array(a) => Self::Array(CellArray {
                origin: Point::new(a.origin.x + dx, a.origin.y + dy),
                ..a.clone()
            }),
        }
    }

    pub(crate) fn rotated(&self, angle_deg: f64) -> Self {
        match self {
            Self::Single(r) => Self::Single(CellRef {
                rotation: r.rotation + angle_deg,
                ..r.clone()
            }),
            Self::Array(a) => Self::Array(CellArray {
                rotation: a.rotation + angle_deg,
                ..a.clone()
            }),
        }
    }
}

/// A named container of polygons and references.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Cell {
    pub polygons: Vec<LayerPolygon>,
    pub references: Vec<Reference>,
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty() && self.references.is_empty()
    }

    /// Adds every polygon of `shape` stamped with `layer`.
    pub fn add_shape(&mut self, shape: &Shape, layer: u16) {
        for poly in &shape.polygons {
            if poly.len() >= 3 {
                self.polygons.push(LayerPolygon {
                    layer,
                    points: poly.clone(),
                });
            }
        }
    }

    pub fn add_reference(&mut self, reference: Reference) {
        self.references.push(reference);
    }

    /// Bounding box over this cell's own polygons. References are not
    /// resolved here; use [`Library::cell_bounding_box`] for that.
    pub fn bounding_box(&self) -> Option<BBox> {
        let mut points = self.polygons.iter().flat_map(|p| p.points.iter().copied());
        let first = points.next()?;
        let mut bb = BBox { min: first, max: first };
        for p in points {
            bb.expand(p);
        }
        Some(bb)
    }
}

/// The library of named cells a compile produces.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Library {
    pub cells: IndexMap<String, Cell>,
}

impl Library {
    pub fn get(&self, name: &str) -> Option<&Cell> {
        self.cells.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cells.contains_key(name)
    }

    /// Looks up `name`, creating an empty cell if absent. Repeated sections
    /// naming the same cell therefore append to it.
    pub fn get_or_create(&mut self, name: &str) -> &mut Cell {
        self.cells.entry(name.to_owned()).or_default()
    }

    pub fn insert(&mut self, name: String, cell: Cell) {
        self.cells.insert(name, cell);
    }

    /// Cell names in emit order (sorted).
    pub fn sorted_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.cells.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Flattens a cell into layer-stamped polygons, resolving references and
    /// arrays recursively. Depth is bounded to keep reference cycles from
    /// recursing forever.
    pub fn flatten(&self, name: &str) -> Vec<LayerPolygon> {
        let mut out = Vec::new();
        self.flatten_into(name, Point::default(), 0.0, &mut out, 0);
        out
    }

    fn flatten_into(&self, name: &str, origin: Point, rotation_deg: f64, out: &mut Vec<LayerPolygon>, depth: u8) {
        const MAX_DEPTH: u8 = 64;
        if depth > MAX_DEPTH {
            return;
        }
        let Some(cell) = self.get(name) else {
            return;
        };
        let rad = rotation_deg.to_radians();
        let place = |p: Point| p.rotated(rad, Point::default()).add(origin);
        for poly in &cell.polygons {
            out.push(LayerPolygon {
                layer: poly.layer,
                points: poly.points.iter().map(|&p| place(p)).collect(),
            });
        }
        for reference in &cell.references {
            match reference {
                Reference::Single(r) => {
                    let mut nested = Vec::new();
                    self.flatten_into(&r.cell, r.origin, r.rotation, &mut nested, depth + 1);
                    for poly in nested {
                        out.push(LayerPolygon {
                            layer: poly.layer,
                            points: poly.points.iter().map(|&p| place(p)).collect(),
                        });
                    }
                }
                Reference::Array(a) => {
                    for col in 0..a.cols {
                        for row in 0..a.rows {
                            let offset = Point::new(a.spacing.x * f64::from(col), a.spacing.y * f64::from(row));
                            let mut nested = Vec::new();
                            self.flatten_into(&a.cell, offset.add(a.origin), a.rotation, &mut nested, depth + 1);
                            for poly in nested {
                                out.push(LayerPolygon {
                                    layer: poly.layer,
                                    points: poly.points.iter().map(|&p| place(p)).collect(),
                                });
                            }
                        }
                    }
                }
            }
        }
    }

    /// Bounding box of a cell including single references (arrays use their
    /// full extent). Reference rotation is applied to the referenced box.
    pub fn cell_bounding_box(&self, name: &str) -> Option<BBox> {
        let cell = self.get(name)?;
        let mut bb: Option<BBox> = cell.bounding_box();
        for reference in &cell.references {
            let Some(inner) = self.cell_bounding_box(reference.cell_name()) else {
                continue;
            };
            let expand = |bb: &mut Option<BBox>, p: Point| match bb {
                Some(b) => b.expand(p),
                None => *bb = Some(BBox { min: p, max: p }),
            };
            let corners = |b: &BBox| {
                [
                    Point::new(b.min.x, b.min.y),
                    Point::new(b.max.x, b.min.y),
                    Point::new(b.max.x, b.max.y),
                    Point::new(b.min.x, b.max.y),
                ]
            };
            match reference {
                Reference::Single(r) => {
                    let rad = r.rotation.to_radians();
                    for c in corners(&inner) {
                        expand(&mut bb, c.rotated(rad, Point::default()).add(r.origin));
                    }
                }
                Reference::Array(a) => {
                    let rad = a.rotation.to_radians();
                    for col in [0, a.cols.saturating_sub(1)] {
                        for row in [0, a.rows.saturating_sub(1)] {
                            let off = Point::new(a.spacing.x * f64::from(col), a.spacing.y * f64::from(row));
                            for c in corners(&inner) {
                                expand(&mut bb, c.add(off).rotated(rad, Point::default()).add(a.origin));
                            }
                        }
                    }
                }
            }
        }
        bb
    }
}
