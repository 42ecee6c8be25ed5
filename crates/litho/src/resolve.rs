//! Name resolution: substituting identifiers with bound values.
//!
//! A scope is built fresh for every resolution call so the magic bindings
//! are always present and always win. Resolution is idempotent; resolved
//! tokens are not `Name`s any more and a second pass leaves them alone.

use ahash::AHashMap;
use chrono::NaiveDateTime;
use indexmap::IndexMap;

use crate::{
    error::CompileResult,
    eval::Evaluator,
    script::{CompileOptions, Script},
    token::Token,
    tree::{CallTree, Child},
    value::Value,
};

/// A flattened lookup scope: explicit bindings, optionally the script's
/// globals beneath them, and the magic bindings on top of everything.
#[derive(Debug)]
pub(crate) struct Scope {
    bindings: AHashMap<String, Value>,
}

impl Scope {
    /// Builds a scope from `argdict`. With `resolve_globals`, the script's
    /// globals are folded in beneath the explicit bindings (never
    /// overwriting them). Magic bindings are injected last and override
    /// user assignments of the same name.
    pub fn build(
        script: &Script,
        opts: &CompileOptions,
        argdict: IndexMap<String, Value>,
        resolve_globals: bool,
    ) -> Self {
        let mut bindings: AHashMap<String, Value> = argdict.into_iter().collect();
        if resolve_globals {
            for (name, value) in &script.globals {
                bindings.entry(name.clone()).or_insert_with(|| value.clone());
            }
        }
        let timestamp: NaiveDateTime = opts
            .timestamp
            .unwrap_or_else(|| chrono::Local::now().naive_local());
        bindings.insert("__FILENAME__".to_owned(), Value::Str(script.file_stem()));
        bindings.insert("__HASH__".to_owned(), Value::Str(script.hash.clone()));
        bindings.insert(
            "__DATE__".to_owned(),
            Value::Str(timestamp.format("%d.%m.%Y").to_string()),
        );
        bindings.insert(
            "__TIME__".to_owned(),
            Value::Str(timestamp.format("%H:%M").to_string()),
        );
        bindings.insert("True".to_owned(), Value::Int(1));
        bindings.insert("False".to_owned(), Value::Int(0));
        Self { bindings }
    }

    /// A bare scope with a single binding, used when a deferred tree's
    /// pending parameter becomes available.
    pub fn single(name: String, value: Value) -> Self {
        let mut bindings = AHashMap::new();
        bindings.insert(name, value);
        Self { bindings }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }
}

/// Walks a tree and substitutes every resolvable `Name`, returning the
/// names that stayed unresolved. Deferred `Tree` tokens have their pending
/// arguments drained; when the last one binds, the sub-tree is evaluated
/// and the token collapses to the produced shape.
pub(crate) fn resolve_tree(
    tree: &mut CallTree,
    scope: &Scope,
    ev: &mut Evaluator<'_>,
) -> CompileResult<Vec<String>> {
    let mut unresolved = Vec::new();
    for child in &mut tree.children {
        match child {
            Child::Node(node) => unresolved.extend(resolve_tree(node, scope, ev)?),
            Child::Tokens(tokens) => unresolved.extend(resolve_tokens(tokens, scope, ev)?),
            Child::Text(_) => {}
        }
    }
    unresolved.extend(resolve_tokens(&mut tree.literals, scope, ev)?);
    Ok(unresolved)
}

pub(crate) fn resolve_tokens(
    tokens: &mut [Token],
    scope: &Scope,
    ev: &mut Evaluator<'_>,
) -> CompileResult<Vec<String>> {
    let mut unresolved = Vec::new();
    for token in tokens.iter_mut() {
        match token {
            Token::Lit(value) => resolve_value(value, scope, &mut unresolved),
            Token::Tree(deferred) => {
                // the deferred tree's own pending parameters are bound later;
                // they don't count as unresolved at this level
                let inner = resolve_tree(&mut deferred.tree, scope, ev)?;
                unresolved.extend(
                    inner
                        .into_iter()
                        .filter(|n| !deferred.wanted.iter().any(|(_, param)| param == n)),
                );
                let mut remaining = Vec::with_capacity(deferred.wanted.len());
                for (outer, param) in deferred.wanted.drain(..) {
                    if let Some(value) = scope.get(&outer) {
                        let bound = Scope::single(param, value.clone());
                        resolve_tree(&mut deferred.tree, &bound, ev)?;
                    } else {
                        remaining.push((outer, param));
                    }
                }
                deferred.wanted = remaining;
                if deferred.wanted.is_empty() {
                    let mut sub = deferred.tree.as_ref().clone();
                    ev.evaluate(&mut sub, true)?;
                    if let Some(shape) = sub.shape_result() {
                        *token = Token::Lit(Value::Shape(shape.clone()));
                    }
                }
            }
            _ => {}
        }
    }
    Ok(unresolved)
}

/// Substitutes names inside a value: bare names, argument-list entries and
/// assignment payloads.
pub(crate) fn resolve_value(value: &mut Value, scope: &Scope, unresolved: &mut Vec<String>) {
    match value {
        Value::Name(name) => {
            if let Some(bound) = scope.get(name) {
                *value = bound.clone();
            } else {
                unresolved.push(name.clone());
            }
        }
        Value::ArgumentList(items) => {
            for item in items {
                resolve_value(item, scope, unresolved);
            }
        }
        Value::Assignment(_, payload) => resolve_value(payload, scope, unresolved),
        _ => {}
    }
}
