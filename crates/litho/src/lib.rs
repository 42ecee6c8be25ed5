#![doc = include_str!("../../../README.md")]

mod cache;
mod error;
mod eval;
mod geom;
mod hash;
mod lexer;
mod library;
mod reduce;
mod resolve;
mod script;
mod token;
mod transform;
mod tree;
mod value;

pub mod emit;

pub use crate::{
    error::{CompileResult, Error, ErrorKind},
    geom::{Anchor, BBox, BasicGeom, GeomBackend, Point, Polygon, Shape, TextSize},
    library::{Cell, CellArray, CellRef, LayerPolygon, Library, Reference},
    script::{CompileOptions, Script, ShapeDef},
    transform::{Caller, Transform, TranslateArgs},
    value::{ImportCall, Obj, Tag, Value},
};
