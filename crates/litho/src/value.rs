//! The heterogeneous typed value set the reducer and evaluator operate on.

use indexmap::IndexMap;

use crate::{
    geom::{Point, Shape},
    library::Reference,
    transform::Transform,
};

/// Insertion-ordered mapping payload of `Value::Obj`.
pub type Obj = IndexMap<String, Value>;

/// A deferred cross-namespace shape call: `ns.Shape(...)` is resolved by the
/// dot operator once the namespace name is adjacent.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ImportCall {
    pub shape: String,
    pub largs: Vec<Value>,
    pub dargs: IndexMap<String, Value>,
}

/// Primary value type flowing through expression reduction.
///
/// `Name`, `ParamShapeRef`, `ArgumentList` and `Assignment` are evaluation
/// plumbing: they exist while a token list is being reduced or an argument
/// list is being consumed and never end up in a cell library.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    None,
    Int(i64),
    Float(f64),
    Str(String),
    Point(Point),
    /// Insertion-ordered `{key=value, ...}` object.
    Obj(Obj),
    /// Owned polygon set.
    Shape(Shape),
    /// A reference instance into the cell library.
    ShapeRef(Reference),
    /// A first-class transform built by `translate`, `rotate`, etc.
    Func(Transform),
    /// Deferred `ns.Shape(...)` resolution.
    Import(ImportCall),
    /// A parametric symbol operand (keyed by clean name) waiting for its
    /// argument list and the `make` operator.
    ParamShapeRef(String),
    ArgumentList(Vec<Value>),
    Assignment(String, Box<Value>),
    /// An identifier not yet substituted by the resolver.
    Name(String),
}

/// Discriminant of [`Value`], used for operator dispatch and diagnostics.
/// The display form matches the language's own vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Tag {
    None,
    Int,
    Float,
    String,
    Point,
    Obj,
    Shape,
    ShapeRef,
    Func,
    Import,
    ParamShapeRef,
    ArgumentList,
    Assignment,
    Name,
}

impl Value {
    pub fn tag(&self) -> Tag {
        match self {
            Self::None => Tag::None,
            Self::Int(_) => Tag::Int,
            Self::Float(_) => Tag::Float,
            Self::Str(_) => Tag::String,
            Self::Point(_) => Tag::Point,
            Self::Obj(_) => Tag::Obj,
            Self::Shape(_) => Tag::Shape,
            Self::ShapeRef(_) => Tag::ShapeRef,
            Self::Func(_) => Tag::Func,
            Self::Import(_) => Tag::Import,
            Self::ParamShapeRef(_) => Tag::ParamShapeRef,
            Self::ArgumentList(_) => Tag::ArgumentList,
            Self::Assignment(..) => Tag::Assignment,
            Self::Name(_) => Tag::Name,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Classifies a parsed number: values within 1e-9 of an integer become
    /// `Int`, everything else `Float`.
    pub(crate) fn from_number(n: f64) -> Self {
        if (n - n.round()).abs() < 1e-9 && n.abs() < i64::MAX as f64 {
            Self::Int(n.round() as i64)
        } else {
            Self::Float(n)
        }
    }

    /// String coercion used by `+` concatenation and generated cell names:
    /// integers print without a decimal point, floats in shortest
    /// round-trip form, strings verbatim.
    pub(crate) fn coerce_string(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => ryu::Buffer::new().format(*f).to_owned(),
            Self::Point(p) => format!(
                "{},{}",
                ryu::Buffer::new().format(p.x),
                ryu::Buffer::new().format(p.y)
            ),
            Self::Obj(obj) => {
                let mut out = String::new();
                for (i, (k, v)) in obj.iter().enumerate() {
                    if i > 0 {
                        out.push('_');
                    }
                    out.push_str(k);
                    out.push_str(&v.coerce_string());
                }
                out
            }
            other => format!("<{}>", other.tag()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_classification_is_absolute() {
        assert_eq!(Value::from_number(3.0), Value::Int(3));
        assert_eq!(Value::from_number(3.00001), Value::Float(3.00001));
        // the relative test in the original misclassified values near zero
        assert_eq!(Value::from_number(0.0), Value::Int(0));
        assert_eq!(Value::from_number(1e-12), Value::Int(0));
    }

    #[test]
    fn string_coercion() {
        assert_eq!(Value::Int(14).coerce_string(), "14");
        assert_eq!(Value::Float(3.5).coerce_string(), "3.5");
        assert_eq!(Value::Str("x".into()).coerce_string(), "x");
        let mut obj = Obj::new();
        obj.insert("a".into(), Value::Int(1));
        obj.insert("b".into(), Value::Int(2));
        assert_eq!(Value::Obj(obj).coerce_string(), "a1_b2");
    }
}
