//! First-class transform values built by `translate`, `rotate`, `array`,
//! `call` and friends, applied by the dot operator.
//!
//! Transforms are a closed enum rather than trait objects: the set is fixed
//! by the language, dispatch stays a `match`, and the values serialize with
//! everything else that can end up in a cached tree.

use indexmap::IndexMap;

use crate::{
    error::{CompileResult, Error},
    eval::Evaluator,
    geom::{Anchor, Point, Shape},
    library::{CellArray, Reference},
    token::Token,
    value::Value,
};

/// How a `translate(...)` positions its operand.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum TranslateArgs {
    /// Plain vector displacement.
    Vector { dx: f64, dy: f64 },
    /// Move the operand so its bounding-box anchor lands at `at`.
    Anchor { anchor: String, at: Point },
}

/// A first-class transform with its accepted operand set.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Transform {
    Translate { args: TranslateArgs, copy: bool },
    Rotate {
        angle_rad: f64,
        center: Option<Point>,
        copy: bool,
    },
    /// Mirror across the line `p1 -> p2`. With only one point (both `x` and
    /// `y` named) this is a point mirror: a 180° rotation about `p1`.
    Mirror {
        p1: Point,
        p2: Option<Point>,
        copy: bool,
    },
    Grow { d: f64 },
    Round { r: f64 },
    Scale { sx: f64, sy: f64 },
    Array { lx: u32, ly: u32, dx: f64, dy: f64 },
    Caller(Caller),
}

impl Transform {
    /// Whether the dot operator may feed `operand` into this transform.
    pub(crate) fn accepts(&self, operand: &Token) -> bool {
        match self {
            Self::Translate { .. } | Self::Rotate { .. } => matches!(
                operand,
                Token::Lit(Value::Shape(_) | Value::Point(_) | Value::ShapeRef(_))
            ),
            Self::Mirror { .. } | Self::Grow { .. } | Self::Round { .. } | Self::Scale { .. } => {
                matches!(operand, Token::Lit(Value::Shape(_)))
            }
            Self::Array { .. } => matches!(operand, Token::Lit(Value::Shape(_) | Value::ShapeRef(_))),
            Self::Caller(_) => matches!(operand, Token::Lit(Value::Name(_)) | Token::Tree(_)),
        }
    }

    pub(crate) fn apply(&self, operand: Token, ev: &mut Evaluator<'_>) -> CompileResult<Token> {
        match self {
            Self::Translate { args, copy } => apply_translate(args, *copy, operand, ev),
            Self::Rotate {
                angle_rad,
                center,
                copy,
            } => apply_rotate(*angle_rad, *center, *copy, operand, ev),
            Self::Mirror { p1, p2, copy } => {
                let Token::Lit(Value::Shape(shape)) = operand else {
                    return Err(Error::type_error("mirror expects a shape operand"));
                };
                let mirrored = match p2 {
                    Some(p2) => ev.geom().mirror(&shape, *p1, *p2)?,
                    // point mirror: 180° rotation about p1
                    None => ev.geom().rotate(&shape, std::f64::consts::PI, *p1),
                };
                let result = if *copy { ev.union(&shape, &mirrored)? } else { mirrored };
                Ok(Token::Lit(Value::Shape(result)))
            }
            Self::Grow { d } => {
                let Token::Lit(Value::Shape(shape)) = operand else {
                    return Err(Error::type_error("grow expects a shape operand"));
                };
                Ok(Token::Lit(Value::Shape(ev.geom().grow(&shape, *d)?)))
            }
            Self::Round { r } => {
                let Token::Lit(Value::Shape(shape)) = operand else {
                    return Err(Error::type_error("round expects a shape operand"));
                };
                Ok(Token::Lit(Value::Shape(ev.geom().fillet(&shape, *r)?)))
            }
            Self::Scale { sx, sy } => {
                let Token::Lit(Value::Shape(shape)) = operand else {
                    return Err(Error::type_error("scale expects a shape operand"));
                };
                Ok(Token::Lit(Value::Shape(ev.geom().scale(&shape, *sx, *sy))))
            }
            Self::Array { lx, ly, dx, dy } => apply_array(*lx, *ly, *dx, *dy, operand, ev),
            Self::Caller(caller) => caller.apply(operand, ev),
        }
    }
}

fn apply_translate(
    args: &TranslateArgs,
    copy: bool,
    operand: Token,
    ev: &mut Evaluator<'_>,
) -> CompileResult<Token> {
    match operand {
        Token::Lit(Value::Shape(shape)) => {
            let (dx, dy) = match args {
                TranslateArgs::Vector { dx, dy } => (*dx, *dy),
                TranslateArgs::Anchor { anchor, at } => {
                    let Some(bb) = shape.bounding_box() else {
                        return Ok(Token::Lit(Value::Shape(shape)));
                    };
                    let anchor: Anchor = anchor
                        .parse()
                        .map_err(|_| Error::domain(format!("unknown anchor '{anchor}'")))?;
                    let pos = anchor.position(bb.min.x, bb.min.y, bb.max.x, bb.max.y);
                    (at.x - pos.x, at.y - pos.y)
                }
            };
            let moved = ev.geom().translate(&shape, dx, dy);
            let result = if copy { ev.union(&shape, &moved)? } else { moved };
            Ok(Token::Lit(Value::Shape(result)))
        }
        Token::Lit(Value::Point(p)) => {
            let TranslateArgs::Vector { dx, dy } = args else {
                return Err(Error::type_error("anchored translate applies to shapes only"));
            };
            if copy {
                return Err(Error::domain("\"copy\" may only be specified when translating shapes"));
            }
            Ok(Token::Lit(Value::Point(Point::new(p.x + dx, p.y + dy))))
        }
        Token::Lit(Value::ShapeRef(reference)) => {
            let TranslateArgs::Vector { dx, dy } = args else {
                return Err(Error::type_error("anchored translate applies to shapes only"));
            };
            if copy {
                return Err(Error::domain("\"copy\" may only be specified when translating shapes"));
            }
            Ok(Token::Lit(Value::ShapeRef(reference.translated(*dx, *dy))))
        }
        other => Err(Error::type_error(format!(
            "translate cannot be applied to {}",
            crate::token::describe(Some(&other))
        ))),
    }
}

fn apply_rotate(
    angle_rad: f64,
    center: Option<Point>,
    copy: bool,
    operand: Token,
    ev: &mut Evaluator<'_>,
) -> CompileResult<Token> {
    match operand {
        Token::Lit(Value::Shape(shape)) => {
            let pivot = center.unwrap_or_else(|| shape.center());
            let rotated = ev.geom().rotate(&shape, angle_rad, pivot);
            let result = if copy { ev.union(&shape, &rotated)? } else { rotated };
            Ok(Token::Lit(Value::Shape(result)))
        }
        Token::Lit(Value::Point(p)) => {
            if copy {
                return Err(Error::domain("\"copy\" may only be specified when rotating shapes"));
            }
            let pivot = center.unwrap_or_default();
            Ok(Token::Lit(Value::Point(p.rotated(angle_rad, pivot))))
        }
        Token::Lit(Value::ShapeRef(reference)) => {
            if copy {
                return Err(Error::domain("\"copy\" may only be specified when rotating shapes"));
            }
            Ok(Token::Lit(Value::ShapeRef(reference.rotated(angle_rad.to_degrees()))))
        }
        other => Err(Error::type_error(format!(
            "rotate cannot be applied to {}",
            crate::token::describe(Some(&other))
        ))),
    }
}

fn apply_array(lx: u32, ly: u32, dx: f64, dy: f64, operand: Token, ev: &mut Evaluator<'_>) -> CompileResult<Token> {
    match operand {
        Token::Lit(Value::Shape(shape)) => {
            let w = shape.width();
            let h = shape.height();
            let (sx, sy) = (w + dx, h + dy);
            // grid centered on the origin
            let start = ev.geom().translate(
                &shape,
                -(f64::from(lx - 1) * sx) / 2.0,
                -(f64::from(ly - 1) * sy) / 2.0,
            );
            let mut acc = Shape::default();
            for row in 0..ly {
                for col in 0..lx {
                    let copy = ev
                        .geom()
                        .translate(&start, f64::from(col) * sx, f64::from(row) * sy);
                    acc = ev.union(&acc, &copy)?;
                }
            }
            Ok(Token::Lit(Value::Shape(acc)))
        }
        Token::Lit(Value::ShapeRef(Reference::Single(r))) => {
            let bb = ev.script().library.cell_bounding_box(&r.cell);
            let (w, h) = bb.map_or((0.0, 0.0), |bb| (bb.width(), bb.height()));
            Ok(Token::Lit(Value::ShapeRef(Reference::Array(CellArray {
                cell: r.cell,
                cols: lx,
                rows: ly,
                spacing: Point::new(dx + w, dy + h),
                origin: r.origin,
                rotation: r.rotation,
            }))))
        }
        other => Err(Error::type_error(format!(
            "array cannot be applied to {}",
            crate::token::describe(Some(&other))
        ))),
    }
}

/// The sweeping callable produced by `call(start=..., step=..., stop=...)`.
///
/// Sweep positions are precomputed at construction; applying the caller to a
/// shape name (or deferred shape) evaluates the shape once per position and
/// unions the results. Letter dimensions count in a base-26 positional code
/// with `a = 0`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Caller {
    arg_sets: Vec<Vec<Value>>,
}

const MAX_SWEEP_STEPS: usize = 100_000;

fn letter_to_num(s: &str) -> Option<f64> {
    if s.is_empty() {
        return None;
    }
    let mut acc = 0i64;
    for c in s.chars() {
        let c = c.to_ascii_lowercase();
        if !c.is_ascii_lowercase() {
            return None;
        }
        acc = acc * 26 + i64::from(c as u8 - b'a');
    }
    Some(acc as f64)
}

fn num_to_letter(n: f64) -> String {
    let mut i = n.ceil().max(0.0) as i64;
    let mut out = Vec::new();
    loop {
        out.push((b'a' + (i % 26) as u8) as char);
        i /= 26;
        if i == 0 {
            break;
        }
    }
    out.iter().rev().collect()
}

/// One sweep dimension: its numeric cursor plus whether it materializes as a
/// letter.
fn dim_value(v: &Value, what: &str) -> CompileResult<(f64, bool)> {
    match v {
        Value::Int(_) | Value::Float(_) => Ok((v.as_number().expect("numeric"), false)),
        Value::Str(s) => letter_to_num(s)
            .map(|n| (n, true))
            .ok_or_else(|| Error::domain(format!("invalid sweep letter {s:?} in call({what}=...)"))),
        other => Err(Error::type_error(format!(
            "call({what}=...) expects numbers or letters, found '{}'",
            other.tag()
        ))),
    }
}

fn dims_of(value: &Value, what: &str) -> CompileResult<Vec<(f64, bool)>> {
    match value {
        Value::Point(p) => Ok(vec![(p.x, false), (p.y, false)]),
        Value::ArgumentList(items) => items.iter().map(|v| dim_value(v, what)).collect(),
        other => Ok(vec![dim_value(other, what)?]),
    }
}

impl Caller {
    /// Builds the sweep from the named `start`/`step`/`stop` arguments.
    /// Either all three are present or none; no other form is valid.
    pub(crate) fn build(dargs: &IndexMap<String, Value>) -> CompileResult<Self> {
        for key in dargs.keys() {
            if !matches!(key.as_str(), "start" | "step" | "stop") {
                return Err(Error::unknown_named("call", key));
            }
        }
        let present = ["start", "step", "stop"].map(|k| dargs.contains_key(k));
        if present.iter().all(|p| !p) {
            return Ok(Self { arg_sets: Vec::new() });
        }
        if !present.iter().all(|p| *p) {
            return Err(Error::arity("call() requires either all of start/step/stop or none"));
        }

        let start = dims_of(&dargs["start"], "start")?;
        let step = dims_of(&dargs["step"], "step")?;
        let stop = dims_of(&dargs["stop"], "stop")?;
        if start.len() != step.len() || start.len() != stop.len() {
            return Err(Error::arity("call() start/step/stop must have the same number of dimensions"));
        }
        if start.is_empty() {
            return Ok(Self { arg_sets: Vec::new() });
        }
        for (_, is_letter) in &step {
            if *is_letter {
                return Err(Error::domain("call() step values must be numeric"));
            }
        }

        let dims = start.len();
        let mut cursor: Vec<f64> = start.iter().map(|(n, _)| *n).collect();
        let mut arg_sets = Vec::new();
        loop {
            if arg_sets.len() >= MAX_SWEEP_STEPS {
                return Err(Error::domain("call() sweep produced too many steps"));
            }
            arg_sets.push(
                cursor
                    .iter()
                    .zip(&start)
                    .map(|(&n, &(_, is_letter))| {
                        if is_letter {
                            Value::Str(num_to_letter(n))
                        } else {
                            Value::from_number(n)
                        }
                    })
                    .collect(),
            );
            cursor[0] += step[0].0;
            let mut dim = 0usize;
            loop {
                if cursor[dim] > stop[dim].0 || step[dim].0 < 1e-5 {
                    cursor[dim] = start[dim].0;
                    dim += 1;
                    if dim < dims {
                        cursor[dim] += step[dim].0;
                    } else {
                        return Ok(Self { arg_sets });
                    }
                } else {
                    break;
                }
            }
        }
    }

    pub(crate) fn sweep_len(&self) -> usize {
        self.arg_sets.len()
    }

    fn apply(&self, operand: Token, ev: &mut Evaluator<'_>) -> CompileResult<Token> {
        let mut acc = Shape::default();
        match operand {
            Token::Lit(Value::Name(shape_name)) => {
                let def = ev
                    .script()
                    .shape_dict
                    .get(&shape_name)
                    .cloned()
                    .ok_or_else(|| Error::unresolved(vec![shape_name.clone()], "parametric function call"))?;
                for args in &self.arg_sets {
                    if args.len() > def.args.len() {
                        return Err(Error::arity("more sweep parameters than shape parameters"));
                    }
                    if args.len() != def.args.len() {
                        return Err(Error::unresolved(
                            def.args[args.len()..].to_vec(),
                            "parametric function call",
                        ));
                    }
                    let argdict: IndexMap<String, Value> =
                        def.args.iter().cloned().zip(args.iter().cloned()).collect();
                    let shape = ev.instantiate_def(&def, argdict, &shape_name)?;
                    acc = ev.union(&acc, &shape)?;
                }
            }
            Token::Tree(deferred) => {
                for args in &self.arg_sets {
                    if args.len() != deferred.wanted.len() {
                        return Err(Error::arity("sweep dimensions do not match the pending parameters"));
                    }
                    let argdict: IndexMap<String, Value> = deferred
                        .wanted
                        .iter()
                        .map(|(_, param)| param.clone())
                        .zip(args.iter().cloned())
                        .collect();
                    let shape = ev.instantiate_tree(deferred.tree.as_ref().clone(), argdict)?;
                    acc = ev.union(&acc, &shape)?;
                }
            }
            other => {
                return Err(Error::type_error(format!(
                    "call result cannot be applied to {}",
                    crate::token::describe(Some(&other))
                )));
            }
        }
        Ok(Token::Lit(Value::Shape(acc)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sweep(start: Value, step: Value, stop: Value) -> Caller {
        let mut dargs = IndexMap::new();
        dargs.insert("start".to_owned(), start);
        dargs.insert("step".to_owned(), step);
        dargs.insert("stop".to_owned(), stop);
        Caller::build(&dargs).unwrap()
    }

    #[test]
    fn scalar_sweep_is_inclusive() {
        let caller = sweep(Value::Int(1), Value::Int(1), Value::Int(3));
        assert_eq!(
            caller.arg_sets,
            vec![vec![Value::Int(1)], vec![Value::Int(2)], vec![Value::Int(3)]]
        );
    }

    #[test]
    fn two_dimensional_sweep_resets_lower_dimension() {
        let caller = sweep(
            Value::Point(Point::new(0.0, 0.0)),
            Value::Point(Point::new(1.0, 1.0)),
            Value::Point(Point::new(1.0, 1.0)),
        );
        assert_eq!(caller.sweep_len(), 4);
        assert_eq!(caller.arg_sets[0], vec![Value::Int(0), Value::Int(0)]);
        assert_eq!(caller.arg_sets[3], vec![Value::Int(1), Value::Int(1)]);
    }

    #[test]
    fn letter_sweep_counts_base26() {
        let caller = sweep(Value::Str("a".into()), Value::Int(1), Value::Str("c".into()));
        assert_eq!(
            caller.arg_sets,
            vec![
                vec![Value::Str("a".into())],
                vec![Value::Str("b".into())],
                vec![Value::Str("c".into())],
            ]
        );
    }

    #[test]
    fn partial_start_step_stop_is_an_error() {
        let mut dargs = IndexMap::new();
        dargs.insert("start".to_owned(), Value::Int(1));
        let err = Caller::build(&dargs).unwrap_err();
        assert!(err.message().contains("either all of start/step/stop or none"));
    }

    #[test]
    fn letters_round_trip() {
        assert_eq!(letter_to_num("a"), Some(0.0));
        assert_eq!(letter_to_num("z"), Some(25.0));
        assert_eq!(letter_to_num("ba"), Some(26.0));
        assert_eq!(num_to_letter(26.0), "ba");
    }
}
