//! Metadata queries.
//!
//! A query is a list of terms joined by ` OR `. Within a term, whitespace
//! separated expressions must all hold:
//!
//! - `key:value` has, `key=value` equal, `key[value` prefix, `key]value`
//!   suffix, `key~value` match, `key<value` less, `key>value` greater.
//!   A `!` before the operator negates it (`role!=task`).
//! - `key?` requires the key, `key!?` forbids it.
//! - Anything else is a full-text search word, optionally starting with an
//!   operator (`[pre`, `~part`) and/or `!`.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{BoxError, Result};
use crate::meta::is_valid_key;

pub mod compiler;

pub use compiler::{Compiled, CompiledTerm, MetaFilter, Searcher, compile};

/// Comparison operator of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// Type-dependent: equal for words and identifiers, match for text.
    Has,
    Equal,
    Prefix,
    Suffix,
    Match,
    Less,
    Greater,
    Exist,
}

impl CompareOp {
    fn from_char(c: char) -> Option<Self> {
        match c {
            ':' => Some(CompareOp::Has),
            '=' => Some(CompareOp::Equal),
            '[' => Some(CompareOp::Prefix),
            ']' => Some(CompareOp::Suffix),
            '~' => Some(CompareOp::Match),
            '<' => Some(CompareOp::Less),
            '>' => Some(CompareOp::Greater),
            '?' => Some(CompareOp::Exist),
            _ => None,
        }
    }

    fn symbol(self) -> char {
        match self {
            CompareOp::Has => ':',
            CompareOp::Equal => '=',
            CompareOp::Prefix => '[',
            CompareOp::Suffix => ']',
            CompareOp::Match => '~',
            CompareOp::Less => '<',
            CompareOp::Greater => '>',
            CompareOp::Exist => '?',
        }
    }
}

/// One comparison: operator, negation and operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    pub op: CompareOp,
    pub negate: bool,
    pub value: String,
}

impl Expr {
    pub fn new(op: CompareOp, negate: bool, value: impl Into<String>) -> Self {
        Self {
            op,
            negate,
            value: value.into(),
        }
    }
}

/// A conjunction of key comparisons and search words.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Term {
    pub keys: BTreeMap<String, Vec<Expr>>,
    pub search: Vec<Expr>,
}

impl Term {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.search.is_empty()
    }

    pub fn add_key(&mut self, key: &str, expr: Expr) {
        self.keys.entry(key.to_string()).or_default().push(expr);
    }
}

/// Terms are alternatives; a zettel matches if any term matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub terms: Vec<Term>,
}

impl Query {
    pub fn parse(text: &str) -> Result<Self> {
        let mut terms = Vec::new();
        let mut term = Term::default();
        for token in text.split_whitespace() {
            if token == "OR" {
                if term.is_empty() {
                    return Err(BoxError::InvalidQuery(format!(
                        "empty alternative in '{text}'"
                    )));
                }
                terms.push(std::mem::take(&mut term));
                continue;
            }
            parse_token(token, &mut term)?;
        }
        if term.is_empty() {
            if !terms.is_empty() {
                return Err(BoxError::InvalidQuery(format!(
                    "query ends with OR: '{text}'"
                )));
            }
        } else {
            terms.push(term);
        }
        Ok(Query { terms })
    }

    /// True if the query selects everything.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

fn parse_token(token: &str, term: &mut Term) -> Result<()> {
    let key_len = token
        .find(|c: char| !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'))
        .unwrap_or(token.len());
    let (key, rest) = token.split_at(key_len);
    if is_valid_key(key)
        && let Some((op, negate, value)) = split_operator(rest)
    {
        if op == CompareOp::Exist {
            if !value.is_empty() {
                return Err(BoxError::InvalidQuery(format!(
                    "'{token}': nothing may follow '?'"
                )));
            }
        } else if value.is_empty() {
            return Err(BoxError::InvalidQuery(format!("'{token}': missing value")));
        }
        term.add_key(key, Expr::new(op, negate, value));
        return Ok(());
    }

    let (negate, word) = match token.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    let (op, word) = match word.chars().next().and_then(CompareOp::from_char) {
        Some(CompareOp::Exist) | None => (CompareOp::Has, word),
        Some(op) => (op, &word[1..]),
    };
    if word.is_empty() {
        return Err(BoxError::InvalidQuery(format!(
            "'{token}': missing search word"
        )));
    }
    term.search.push(Expr::new(op, negate, word));
    Ok(())
}

/// `[!]<op>value` following a key.
fn split_operator(rest: &str) -> Option<(CompareOp, bool, &str)> {
    let (negate, rest) = match rest.strip_prefix('!') {
        Some(r) => (true, r),
        None => (false, rest),
    };
    let op = CompareOp::from_char(rest.chars().next()?)?;
    Some((op, negate, &rest[1..]))
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negate {
            write!(f, "!")?;
        }
        write!(f, "{}{}", self.op.symbol(), self.value)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                write!(f, " OR ")?;
            }
            let mut first = true;
            let mut sep = |f: &mut fmt::Formatter<'_>| -> fmt::Result {
                if !std::mem::take(&mut first) {
                    write!(f, " ")?;
                }
                Ok(())
            };
            for (key, exprs) in &term.keys {
                for expr in exprs {
                    sep(f)?;
                    write!(f, "{key}{expr}")?;
                }
            }
            for expr in &term.search {
                sep(f)?;
                write!(f, "{expr}")?;
            }
        }
        Ok(())
    }
}
