use std::fmt;

use strum::{Display, IntoStaticStr};

/// Result type alias for operations that can fail during a compile.
pub type CompileResult<T> = Result<T, Error>;

/// Classification of compile errors.
///
/// Every variant except `Cache` is fatal to the current compile. `Cache` is
/// recoverable by design: a stale or unreadable cache file degrades to a full
/// recompile and is never surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// Unexpected character, unterminated string, illegal identifier.
    Lex,
    /// Unbalanced parentheses, bad section header, bad SYMBOL pattern.
    Parse,
    /// Operator operand types match no rewrite rule, or a function received a
    /// value of the wrong tag.
    Type,
    /// Identifier unresolved after scope resolution.
    Name,
    /// Wrong number of positional arguments, missing required named argument,
    /// or unknown named argument.
    Arity,
    /// Numeric value out of range, invalid unit, anchor conflict.
    Domain,
    /// An import tried to bind a layer name to a number already bound to
    /// another name.
    LayerConflict,
    /// An import brought a parametric symbol name that is already present.
    DuplicateSymbol,
    /// Cache deserialization or validation failure. Recoverable.
    Cache,
    /// Surfaced from the geometry backend. Fatal.
    Geom,
}

/// A compile error with its taxonomy kind and a human-readable message.
///
/// `Name` errors additionally carry the offending identifiers so callers can
/// assert on exactly which names were unresolved.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    /// Unresolved identifiers, populated for `ErrorKind::Name` only.
    names: Vec<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            names: Vec::new(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The unresolved identifiers of a `Name` error, empty for other kinds.
    pub fn unresolved_names(&self) -> &[String] {
        &self.names
    }

    pub(crate) fn lex(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Lex, message)
    }

    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, message)
    }

    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub(crate) fn arity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Arity, message)
    }

    pub(crate) fn domain(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Domain, message)
    }

    pub(crate) fn layer_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LayerConflict, message)
    }

    pub(crate) fn duplicate_symbol(name: &str) -> Self {
        Self::new(
            ErrorKind::DuplicateSymbol,
            format!("duplicate parametric symbol name {name:?}"),
        )
    }

    pub(crate) fn cache(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cache, message)
    }

    pub(crate) fn geom(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Geom, message)
    }

    /// Builds a `Name` error from the list of unresolved identifiers found in
    /// `context` (a function name, section head or similar).
    pub(crate) fn unresolved(names: Vec<String>, context: &str) -> Self {
        let list = names
            .iter()
            .map(|n| format!("{n:?}"))
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            kind: ErrorKind::Name,
            message: format!("unresolved name(s) {list} in {context}"),
            names,
        }
    }

    /// A call to a name that is neither a builtin nor a known shape.
    pub(crate) fn invalid_function(func: &str) -> Self {
        Self {
            kind: ErrorKind::Name,
            message: format!("invalid function or shape {func:?}"),
            names: vec![func.to_owned()],
        }
    }

    /// Wrong positional argument count for `func`.
    pub(crate) fn arg_count(func: &str, expected: usize, got: usize) -> Self {
        Self::new(
            ErrorKind::Arity,
            format!("{func}() takes {expected} positional argument(s) but {got} were given"),
        )
    }

    /// A named argument `func` does not accept.
    pub(crate) fn unknown_named(func: &str, name: &str) -> Self {
        Self::new(ErrorKind::Arity, format!("unexpected argument {name:?} in {func}() call"))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Error: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}
