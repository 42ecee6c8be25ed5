//! Operator-precedence reduction of a node's token list to values.
//!
//! Each precedence group gets one left-to-right pass. An operator that
//! belongs to the current group inspects one token to the left and one to
//! the right and rewrites in place; the dot operator appears in two groups
//! because function application must run before points are assembled, while
//! point operands can only be fed to functions afterwards.

use crate::{
    error::{CompileResult, Error},
    eval::Evaluator,
    geom::Point,
    token::{Op, Token, describe},
    value::Value,
};

/// Precedence groups, tightest binding first.
const PRECEDENCE: [&[Op]; 14] = [
    &[Op::Make],
    &[Op::Dot],
    &[Op::Pow],
    &[Op::Mul, Op::Div],
    &[Op::Add, Op::Sub],
    &[Op::PStart, Op::PEnd],
    &[Op::PSep],
    &[Op::Dot],
    &[Op::OAssign],
    &[Op::OSep],
    &[Op::OStart, Op::OEnd],
    &[Op::Assign],
    &[Op::Unpack],
    &[Op::Comma],
];

pub(crate) fn reduce(tokens: &mut Vec<Token>, ev: &mut Evaluator<'_>) -> CompileResult<()> {
    for group in PRECEDENCE {
        let mut i = 0usize;
        while i < tokens.len() {
            let in_group = matches!(&tokens[i], Token::Op(op) if group.contains(op));
            if in_group {
                let advance = apply_operator(tokens, &mut i, ev)?;
                if !advance {
                    continue;
                }
            }
            i += 1;
        }
    }

    // a sweeping callable followed directly by its parenthesized operand,
    // `call(...)(myshape)`, applies by adjacency
    let mut i = 0usize;
    while i + 1 < tokens.len() {
        let applies = matches!(
            &tokens[i],
            Token::Lit(Value::Func(f @ crate::transform::Transform::Caller(_))) if f.accepts(&tokens[i + 1])
        );
        if applies {
            let Token::Lit(Value::Func(func)) = tokens.remove(i) else {
                unreachable!("matched above");
            };
            let operand = tokens.remove(i);
            let result = func.apply(operand, ev)?;
            tokens.insert(i, result);
        } else {
            i += 1;
        }
    }
    Ok(())
}

fn pop_prev(tokens: &mut Vec<Token>, i: &mut usize) -> Token {
    *i -= 1;
    tokens.remove(*i)
}

fn pop_next(tokens: &mut Vec<Token>, i: usize) -> Token {
    tokens.remove(i + 1)
}

fn numeric(token: Option<&Token>) -> Option<Value> {
    match token {
        Some(Token::Lit(v)) if v.is_numeric() => Some(v.clone()),
        _ => None,
    }
}

fn illegal(op: Op, prev: Option<&Token>, next: Option<&Token>) -> Error {
    Error::type_error(format!(
        "illegal operands for operator '{op}': {} and {}",
        describe(prev),
        describe(next)
    ))
}

/// Applies the operator at `tokens[*i]`. Returns whether the outer cursor
/// should advance (it must not when the operator token itself was removed).
fn apply_operator(tokens: &mut Vec<Token>, i: &mut usize, ev: &mut Evaluator<'_>) -> CompileResult<bool> {
    let Token::Op(op) = tokens[*i] else {
        unreachable!("apply_operator is only called on operator tokens");
    };
    let prev_exists = *i > 0;
    let prev = if prev_exists { Some(&tokens[*i - 1]) } else { None };
    let next = tokens.get(*i + 1);

    match op {
        Op::Pow | Op::Mul | Op::Div | Op::Add | Op::Sub => {
            // two scalar numeric operands
            if let (Some(a), Some(b)) = (numeric(prev), numeric(next)) {
                pop_prev(tokens, i);
                pop_next(tokens, *i);
                tokens[*i] = Token::Lit(arith(op, &a, &b)?);
                return Ok(true);
            }
            // component-wise point arithmetic
            if matches!(op, Op::Add | Op::Sub)
                && let (Some(Token::Lit(Value::Point(_))), Some(Token::Lit(Value::Point(_)))) = (prev, next)
            {
                let Token::Lit(Value::Point(a)) = pop_prev(tokens, i) else {
                    unreachable!()
                };
                let Token::Lit(Value::Point(b)) = pop_next(tokens, *i) else {
                    unreachable!()
                };
                let p = if op == Op::Add { a.add(b) } else { a.sub(b) };
                tokens[*i] = Token::Lit(Value::Point(p));
                return Ok(true);
            }
            // string concatenation with numeric coercion
            if op == Op::Add && string_concat_applies(prev, next) {
                let a = pop_prev(tokens, i);
                let b = pop_next(tokens, *i);
                let (Token::Lit(a), Token::Lit(b)) = (a, b) else {
                    unreachable!()
                };
                tokens[*i] = Token::Lit(Value::Str(a.coerce_string() + &b.coerce_string()));
                return Ok(true);
            }
            // unary +/- on numbers
            if matches!(op, Op::Add | Op::Sub)
                && (!prev_exists || matches!(prev, Some(Token::Op(_))))
                && let Some(v) = numeric(next)
            {
                pop_next(tokens, *i);
                tokens[*i] = Token::Lit(match (op, v) {
                    (Op::Sub, Value::Int(n)) => Value::Int(-n),
                    (Op::Sub, Value::Float(n)) => Value::Float(-n),
                    (_, v) => v,
                });
                return Ok(true);
            }
            // shape algebra: + union, - difference, * intersection
            if matches!(op, Op::Add | Op::Sub | Op::Mul)
                && let (Some(Token::Lit(Value::Shape(_))), Some(Token::Lit(Value::Shape(_)))) = (prev, next)
            {
                let Token::Lit(Value::Shape(a)) = pop_prev(tokens, i) else {
                    unreachable!()
                };
                let Token::Lit(Value::Shape(b)) = pop_next(tokens, *i) else {
                    unreachable!()
                };
                let result = match op {
                    Op::Add => ev.union(&a, &b)?,
                    Op::Sub => ev.geom().difference(&a, &b)?,
                    _ => ev.geom().intersection(&a, &b)?,
                };
                tokens[*i] = Token::Lit(Value::Shape(result));
                return Ok(true);
            }
            // '+' between references concatenates: the expression collapses
            // to a reference sequence the section parser adds one by one
            if op == Op::Add
                && matches!(prev, Some(Token::Lit(Value::ShapeRef(_))))
                && matches!(next, Some(Token::Lit(Value::ShapeRef(_))))
            {
                tokens.remove(*i);
                return Ok(false);
            }
            // a '*' with no valid left neighbor is an unpack marker; it is
            // applied in its own later pass
            if op == Op::Mul && (!prev_exists || matches!(prev, Some(Token::Op(Op::Comma)))) {
                tokens[*i] = Token::Op(Op::Unpack);
                return Ok(true);
            }
            Err(illegal(op, prev, next))
        }

        Op::PStart => {
            // `[ n` opens a point (or list) element
            if let Some(Token::Lit(v @ (Value::Int(_) | Value::Float(_) | Value::Str(_)))) = next {
                let v = v.clone();
                pop_next(tokens, *i);
                tokens[*i] = Token::PointX(v);
                return Ok(true);
            }
            Err(illegal(op, prev, next))
        }

        Op::PEnd => {
            // `n ]` closes a point
            if let Some(Token::Lit(v @ (Value::Int(_) | Value::Float(_) | Value::Str(_)))) = prev {
                let v = v.clone();
                pop_prev(tokens, i);
                tokens[*i] = Token::PointY(v);
                return Ok(true);
            }
            // `[n]` with a single element is a one-dimensional list (sweep
            // specifications use these)
            if let Some(Token::PointX(v)) = prev {
                let v = v.clone();
                pop_prev(tokens, i);
                tokens[*i] = Token::Lit(Value::ArgumentList(vec![v]));
                return Ok(true);
            }
            Err(illegal(op, prev, next))
        }

        Op::PSep => {
            if let (Some(Token::PointX(a)), Some(Token::PointY(b))) = (prev, next) {
                let (a, b) = (a.clone(), b.clone());
                pop_prev(tokens, i);
                pop_next(tokens, *i);
                // numeric pairs are points; anything else is a generic
                // two-element list (letter sweeps)
                tokens[*i] = match (a.as_number(), b.as_number()) {
                    (Some(x), Some(y)) => Token::Lit(Value::Point(Point::new(x, y))),
                    _ => Token::Lit(Value::ArgumentList(vec![a, b])),
                };
                return Ok(true);
            }
            Err(illegal(op, prev, next))
        }

        Op::Dot => {
            // imported shape instantiation: `ns.Shape(...)`
            if let (Some(Token::Lit(Value::Name(_))), Some(Token::Lit(Value::Import(_)))) = (prev, next) {
                let Token::Lit(Value::Name(ns)) = pop_prev(tokens, i) else {
                    unreachable!()
                };
                let Token::Lit(Value::Import(call)) = pop_next(tokens, *i) else {
                    unreachable!()
                };
                let shape = ev.instantiate_import(&ns, call)?;
                tokens[*i] = Token::Lit(Value::Shape(shape));
                return Ok(true);
            }
            // function application
            if let Some(Token::Lit(Value::Func(func))) = next {
                if prev.is_some_and(|p| func.accepts(p)) {
                    let func = func.clone();
                    let operand = pop_prev(tokens, i);
                    pop_next(tokens, *i);
                    tokens[*i] = func.apply(operand, ev)?;
                    return Ok(true);
                }
                // a just-closed point is not assembled yet in the first dot
                // pass; leave the application for the second one
                if matches!(prev, Some(Token::Op(Op::PEnd) | Token::PointY(_))) {
                    return Ok(true);
                }
            }
            Err(illegal(op, prev, next))
        }

        Op::OAssign => {
            let name = match prev {
                Some(Token::Lit(Value::Name(n))) => Some(n.clone()),
                Some(Token::AssignName(n)) => Some(n.clone()),
                _ => None,
            };
            if let (Some(name), Some(Token::Lit(_))) = (name, next) {
                pop_prev(tokens, i);
                let Token::Lit(value) = pop_next(tokens, *i) else {
                    unreachable!()
                };
                let mut obj = crate::value::Obj::new();
                obj.insert(name, value);
                tokens[*i] = Token::Lit(Value::Obj(obj));
                return Ok(true);
            }
            Err(illegal(op, prev, next))
        }

        Op::OSep => {
            if let (Some(Token::Lit(Value::Obj(_))), Some(Token::Lit(Value::Obj(_)))) = (prev, next) {
                let Token::Lit(Value::Obj(mut left)) = pop_prev(tokens, i) else {
                    unreachable!()
                };
                let Token::Lit(Value::Obj(right)) = pop_next(tokens, *i) else {
                    unreachable!()
                };
                // right wins on key conflict
                for (k, v) in right {
                    left.insert(k, v);
                }
                tokens[*i] = Token::Lit(Value::Obj(left));
                return Ok(true);
            }
            // a lonely separator next to its braces is discarded
            if matches!(prev, Some(Token::Op(Op::OStart)) | None) || matches!(next, Some(Token::Op(Op::OEnd)) | None) {
                tokens.remove(*i);
                return Ok(false);
            }
            Err(illegal(op, prev, next))
        }

        Op::OStart => {
            if let Some(Token::Lit(Value::Obj(_))) = next {
                let obj = pop_next(tokens, *i);
                tokens[*i] = obj;
                return Ok(true);
            }
            Err(illegal(op, prev, next))
        }

        Op::OEnd => {
            if let Some(Token::Lit(Value::Obj(_))) = prev {
                let obj = pop_prev(tokens, i);
                tokens[*i] = obj;
                return Ok(true);
            }
            Err(illegal(op, prev, next))
        }

        Op::Assign => {
            let name = match prev {
                Some(Token::Lit(Value::Name(n))) => Some(n.clone()),
                Some(Token::AssignName(n)) => Some(n.clone()),
                _ => None,
            };
            if let (Some(name), Some(Token::Lit(_))) = (name, next) {
                pop_prev(tokens, i);
                let Token::Lit(value) = pop_next(tokens, *i) else {
                    unreachable!()
                };
                tokens[*i] = Token::Lit(Value::Assignment(name, Box::new(value)));
                return Ok(true);
            }
            Err(illegal(op, prev, next))
        }

        Op::Unpack => {
            if let Some(Token::Lit(Value::Obj(_))) = next {
                let Token::Lit(Value::Obj(obj)) = pop_next(tokens, *i) else {
                    unreachable!()
                };
                let mut items: Vec<Value> = obj
                    .into_iter()
                    .map(|(k, v)| Value::Assignment(k, Box::new(v)))
                    .collect();
                items.push(Value::Assignment(
                    "__ignore_extra_args__".to_owned(),
                    Box::new(Value::None),
                ));
                tokens[*i] = Token::Lit(Value::ArgumentList(items));
                return Ok(true);
            }
            Err(illegal(op, prev, next))
        }

        Op::Make => {
            if let (Some(Token::Lit(Value::ParamShapeRef(_))), Some(Token::Lit(Value::ArgumentList(_)))) = (prev, next)
            {
                let Token::Lit(Value::ParamShapeRef(clean)) = pop_prev(tokens, i) else {
                    unreachable!()
                };
                let Token::Lit(Value::ArgumentList(params)) = pop_next(tokens, *i) else {
                    unreachable!()
                };
                let reference = ev.make_instance(&clean, params)?;
                tokens[*i] = Token::Lit(Value::ShapeRef(reference));
                return Ok(true);
            }
            Err(illegal(op, prev, next))
        }

        Op::Comma => {
            let take = |token: Option<Token>| -> Vec<Value> {
                match token {
                    Some(Token::Lit(Value::ArgumentList(items))) => items,
                    Some(Token::Lit(Value::None)) | None => Vec::new(),
                    Some(Token::Lit(v)) => vec![v],
                    Some(_) => Vec::new(),
                }
            };
            let left = if prev_exists && matches!(prev, Some(Token::Lit(_))) {
                Some(pop_prev(tokens, i))
            } else {
                None
            };
            let right = if matches!(tokens.get(*i + 1), Some(Token::Lit(_))) {
                Some(pop_next(tokens, *i))
            } else {
                None
            };
            let mut items = take(left);
            items.extend(take(right));
            tokens[*i] = Token::Lit(Value::ArgumentList(items));
            Ok(true)
        }
    }
}

fn string_concat_applies(prev: Option<&Token>, next: Option<&Token>) -> bool {
    let concatenable = |t: Option<&Token>| {
        matches!(
            t,
            Some(Token::Lit(
                Value::Str(_) | Value::Int(_) | Value::Float(_) | Value::Point(_)
            ))
        )
    };
    let is_str = |t: Option<&Token>| matches!(t, Some(Token::Lit(Value::Str(_))));
    (is_str(prev) || is_str(next)) && concatenable(prev) && concatenable(next)
}

fn arith(op: Op, a: &Value, b: &Value) -> CompileResult<Value> {
    let any_float = matches!(a, Value::Float(_)) || matches!(b, Value::Float(_));
    let (x, y) = (
        a.as_number().expect("checked numeric"),
        b.as_number().expect("checked numeric"),
    );
    Ok(match op {
        Op::Pow => {
            // integer powers stay integers; float operands or negative
            // exponents go through floating point
            if let (Value::Int(base), Value::Int(exp)) = (a, b)
                && *exp >= 0
                && let Ok(exp) = u32::try_from(*exp)
                && let Some(result) = base.checked_pow(exp)
            {
                Value::Int(result)
            } else {
                Value::Float(x.powf(y))
            }
        }
        Op::Mul => {
            if let (Value::Int(a), Value::Int(b)) = (a, b)
                && let Some(r) = a.checked_mul(*b)
            {
                Value::Int(r)
            } else {
                Value::Float(x * y)
            }
        }
        Op::Div => {
            if y == 0.0 {
                return Err(Error::domain("division by zero"));
            }
            Value::Float(x / y)
        }
        Op::Add => {
            if !any_float
                && let (Value::Int(a), Value::Int(b)) = (a, b)
                && let Some(r) = a.checked_add(*b)
            {
                Value::Int(r)
            } else {
                Value::Float(x + y)
            }
        }
        Op::Sub => {
            if !any_float
                && let (Value::Int(a), Value::Int(b)) = (a, b)
                && let Some(r) = a.checked_sub(*b)
            {
                Value::Int(r)
            } else {
                Value::Float(x - y)
            }
        }
        _ => unreachable!("arith is only called for arithmetic operators"),
    })
}
