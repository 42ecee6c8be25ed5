//! Reducer-internal token representation.
//!
//! `PointX`/`PointY`, `AssignName`, `Tree` and the operator markers never
//! leak out of expression reduction; completed expressions consist of
//! `Token::Lit` values only.

use std::fmt;

use crate::{tree::CallTree, value::Value};

/// Operator markers. `Make` and `Unpack` never come from the lexer: `make`
/// is synthesized by `ref(...)`, and `Unpack` is a retagged `*` with no
/// left operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub(crate) enum Op {
    Make,
    Dot,
    Pow,
    Mul,
    Div,
    Add,
    Sub,
    PStart,
    PSep,
    PEnd,
    OStart,
    OSep,
    OEnd,
    OAssign,
    Assign,
    Unpack,
    Comma,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Make => "make",
            Self::Dot => ".",
            Self::Pow => "^",
            Self::Mul | Self::Unpack => "*",
            Self::Div => "/",
            Self::Add => "+",
            Self::Sub => "-",
            Self::PStart => "[",
            Self::PSep | Self::OSep | Self::Comma => ",",
            Self::PEnd => "]",
            Self::OStart => "{",
            Self::OEnd => "}",
            Self::OAssign | Self::Assign => "=",
        };
        f.write_str(s)
    }
}

/// A deferred shape instantiation: a cloned shape body whose arguments were
/// not all resolvable yet. `wanted` maps the outer (scope) name to the shape
/// parameter it will bind; once `wanted` drains, the tree is evaluated and
/// the token collapses to the produced shape.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub(crate) struct DeferredCall {
    pub tree: Box<CallTree>,
    pub wanted: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub(crate) enum Token {
    Lit(Value),
    Op(Op),
    /// An identifier immediately followed by `=`; protected from name
    /// resolution so `dx=10` works even when `dx` is bound in scope.
    AssignName(String),
    /// First element of a bracketed pair, payload still untyped.
    PointX(Value),
    /// Last element of a bracketed pair.
    PointY(Value),
    /// Deferred sub-expression with pending arguments.
    Tree(DeferredCall),
}

/// Canonical reprint of a token list: tokens separated by single spaces,
/// except that an `AssignName` keeps its `=` glued on so the list re-lexes
/// to itself.
pub(crate) fn render_tokens(tokens: &[Token]) -> String {
    let mut out = String::new();
    for (i, tok) in tokens.iter().enumerate() {
        // an AssignName is only an AssignName because its '=' follows
        // immediately, so the separator space is suppressed there
        let glued = i > 0 && matches!(tokens[i - 1], Token::AssignName(_));
        if i > 0 && !glued {
            out.push(' ');
        }
        match tok {
            Token::Lit(Value::Int(v)) => out.push_str(&v.to_string()),
            Token::Lit(Value::Float(v)) => out.push_str(ryu::Buffer::new().format(*v)),
            Token::Lit(Value::Str(s)) => {
                out.push('"');
                out.push_str(s);
                out.push('"');
            }
            Token::Lit(Value::Name(n)) => out.push_str(n),
            Token::Lit(other) => out.push_str(&format!("<{}>", other.tag())),
            Token::Op(op) => out.push_str(&op.to_string()),
            Token::AssignName(n) => out.push_str(n),
            Token::PointX(v) | Token::PointY(v) => out.push_str(&v.coerce_string()),
            Token::Tree(_) => out.push_str("<tree>"),
        }
    }
    out
}

/// Short description of a token for error messages.
pub(crate) fn describe(token: Option<&Token>) -> String {
    match token {
        None => "nothing".to_owned(),
        Some(Token::Lit(v)) => format!("'{}'", v.tag()),
        Some(Token::Op(op)) => format!("operator '{op}'"),
        Some(Token::AssignName(n)) => format!("assignment name '{n}'"),
        Some(Token::PointX(_)) => "'point-x'".to_owned(),
        Some(Token::PointY(_)) => "'point-y'".to_owned(),
        Some(Token::Tree(_)) => "'tree'".to_owned(),
    }
}
