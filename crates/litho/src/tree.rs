//! Call-tree construction: grouping raw section text by parentheses.
//!
//! Each parenthesized group becomes a child node whose `func` is the
//! identifier immediately before the `(`. Text between groups is kept as
//! raw children, lexed afterwards, and adjacent token lists are merged so
//! the reducer sees one flat list per node.

use crate::{
    error::{CompileResult, Error},
    lexer::{LexState, lex},
    token::Token,
    value::Value,
};

use crate::geom::Shape;
use crate::library::Reference;

/// One child of a call-tree node: raw text (pre-lex), a lexed token list,
/// or a nested call.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub(crate) enum Child {
    Text(String),
    Tokens(Vec<Token>),
    Node(CallTree),
}

/// A node of the call tree. `func` is empty for plain groups and the root.
///
/// `literals` is the node's evaluation outcome: the token sequence exported
/// to the parent (a single value for most nodes, a `ShapeRef` run for
/// reference expressions, or the three-token `make` sequence emitted by
/// `ref`). Pristine bodies stored in shape/symbol dictionaries never have
/// `literals` populated; evaluation always works on a clone.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub(crate) struct CallTree {
    pub func: String,
    pub children: Vec<Child>,
    pub literals: Vec<Token>,
}

/// Collapses whitespace and truncates long text for error context windows.
pub(crate) fn shorten_text(text: &str, max: usize) -> String {
    let collapsed: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max {
        return collapsed;
    }
    let chars: Vec<char> = collapsed.chars().collect();
    let head: String = chars[..max / 2 - 2].iter().collect();
    let tail: String = chars[chars.len() - max / 2 + 1..].iter().collect();
    format!("{head}...{tail}")
}

impl CallTree {
    fn with_func(func: impl Into<String>) -> Self {
        Self {
            func: func.into(),
            ..Self::default()
        }
    }

    fn push_text(&mut self, text: &str) {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            self.children.push(Child::Text(trimmed.to_owned()));
        }
    }

    /// Builds the tree for one section body and lexes every text child.
    pub fn parse(text: &str) -> CompileResult<Self> {
        let mut tree = Self::build(text)?;
        tree.lex_text()?;
        Ok(tree)
    }

    fn build(text: &str) -> CompileResult<Self> {
        let chars: Vec<char> = text.chars().collect();
        let mut stack: Vec<Self> = vec![Self::default()];
        let mut buf = String::new();
        let mut delim: Option<char> = None;

        for (i, &c) in chars.iter().enumerate() {
            if let Some(d) = delim {
                buf.push(c);
                if c == d {
                    delim = None;
                }
            } else if c == '"' || c == '\'' {
                delim = Some(c);
                buf.push(c);
            } else if c == '(' {
                // the maximal trailing identifier of the buffer names the call
                let split = buf
                    .char_indices()
                    .rev()
                    .find(|(_, ch)| !ch.is_ascii_alphanumeric() && *ch != '_')
                    .map_or(0, |(p, ch)| p + ch.len_utf8());
                let func = buf[split..].to_owned();
                let prefix = buf[..split].to_owned();
                let top = stack.last_mut().expect("tree stack never empties here");
                top.push_text(&prefix);
                stack.push(Self::with_func(func));
                buf.clear();
            } else if c == ')' {
                let top = stack.last_mut().expect("tree stack never empties here");
                top.push_text(&buf);
                buf.clear();
                let node = stack.pop().expect("tree stack never empties here");
                let Some(parent) = stack.last_mut() else {
                    let lo = i.saturating_sub(30);
                    let hi = (i + 30).min(chars.len());
                    let window: String = chars[lo..hi].iter().collect();
                    return Err(Error::parse(format!(
                        "additional ')' at:\n'{}'",
                        shorten_text(&window, 60)
                    )));
                };
                parent.children.push(Child::Node(node));
            } else {
                buf.push(c);
            }
        }

        if stack.len() > 1 {
            return Err(Error::parse("additional '('"));
        }
        let mut root = stack.pop().expect("tree stack holds exactly the root");
        root.push_text(&buf);
        Ok(root)
    }

    /// Lexes text children in place and merges adjacent token lists.
    /// Bracket modes carry across the text children of one node.
    fn lex_text(&mut self) -> CompileResult<()> {
        let mut state = LexState::default();
        for child in &mut self.children {
            match child {
                Child::Text(text) => {
                    let tokens = lex(text, &mut state)?;
                    *child = Child::Tokens(tokens);
                }
                Child::Node(node) => node.lex_text()?,
                Child::Tokens(_) => {}
            }
        }
        // merge adjacent token lists so each node reduces one flat list
        let mut merged: Vec<Child> = Vec::with_capacity(self.children.len());
        for child in self.children.drain(..) {
            match (merged.last_mut(), child) {
                (Some(Child::Tokens(acc)), Child::Tokens(tokens)) => acc.extend(tokens),
                (_, other) => merged.push(other),
            }
        }
        self.children = merged;
        Ok(())
    }

    /// The single shape outcome of an evaluated tree, if that is what it
    /// produced.
    pub fn shape_result(&self) -> Option<&Shape> {
        match self.literals.as_slice() {
            [Token::Lit(Value::Shape(shape))] => Some(shape),
            _ => None,
        }
    }

    /// The reference outcomes of an evaluated tree: present only when every
    /// top-level literal is a `ShapeRef`.
    pub fn ref_results(&self) -> Option<Vec<Reference>> {
        if self.literals.is_empty() {
            return None;
        }
        let mut refs = Vec::with_capacity(self.literals.len());
        for token in &self.literals {
            match token {
                Token::Lit(Value::ShapeRef(r)) => refs.push(r.clone()),
                _ => return None,
            }
        }
        Some(refs)
    }

    /// The assignments an evaluated tree produced, if any: a single
    /// assignment or an argument list consisting of assignments.
    pub fn assignment_results(&self) -> Option<Vec<(String, Value)>> {
        match self.literals.as_slice() {
            [Token::Lit(Value::Assignment(name, value))] => Some(vec![(name.clone(), (**value).clone())]),
            [Token::Lit(Value::ArgumentList(items))] => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Assignment(name, value) => out.push((name.clone(), (**value).clone())),
                        _ => return None,
                    }
                }
                Some(out)
            }
            _ => None,
        }
    }
}
