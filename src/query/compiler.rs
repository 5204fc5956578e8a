//! Turning a parsed query into metadata filters.
//!
//! Every key gets filters chosen by its value type. Existence checks come
//! first, value comparisons after. Positive comparisons whose operand is a
//! single word are also looked up in the search index, which narrows the
//! identifiers worth reading at all.

use std::borrow::Cow;
use std::cmp::Ordering;

use super::{CompareOp, Expr, Query, Term};
use crate::id::{ZID_LEN, Zid, ZidSet};
use crate::index::split_words;
use crate::meta::keys::KEY_ID;
use crate::meta::{KeyType, Meta, key_type, split_list};

/// Word lookup in a search index.
pub trait Searcher: Send + Sync {
    /// Zettel containing a word that satisfies `op` with `word`.
    /// `word` is lowercase.
    fn search(&self, op: CompareOp, word: &str) -> ZidSet;
}

/// A condition on metadata.
pub trait MetaFilter: Send + Sync {
    fn matches(&self, meta: &Meta) -> bool;
}

/// Value of `key`, including the identifier itself.
fn value_of<'a>(meta: &'a Meta, key: &str) -> Option<Cow<'a, str>> {
    if key == KEY_ID {
        return Some(Cow::Owned(meta.zid.to_string()));
    }
    meta.get(key).map(Cow::Borrowed)
}

/// `key?` and `key!?`.
struct ExistFilter {
    key: String,
    exists: bool,
}

impl MetaFilter for ExistFilter {
    fn matches(&self, meta: &Meta) -> bool {
        value_of(meta, &self.key).is_some() == self.exists
    }
}

/// Credentials are never revealed through queries.
struct NeverFilter;

impl MetaFilter for NeverFilter {
    fn matches(&self, _meta: &Meta) -> bool {
        false
    }
}

/// A comparison with `Has` already resolved for the key type.
#[derive(Debug, Clone)]
struct Comparison {
    op: CompareOp,
    negate: bool,
    value: String,
}

/// All value comparisons of one key.
struct ValueFilter {
    key: String,
    ty: KeyType,
    comparisons: Vec<Comparison>,
}

impl MetaFilter for ValueFilter {
    fn matches(&self, meta: &Meta) -> bool {
        let Some(actual) = value_of(meta, &self.key) else {
            // An absent key satisfies only negated comparisons.
            return self.comparisons.iter().all(|c| c.negate);
        };
        self.comparisons.iter().all(|c| {
            let hit = if self.ty.is_set() {
                split_list(&actual)
                    .into_iter()
                    .any(|elem| compare(self.ty, c.op, elem, &c.value))
            } else {
                compare(self.ty, c.op, &actual, &c.value)
            };
            hit != c.negate
        })
    }
}

/// Full-text words matched against metadata values, used when no search
/// index is at hand.
struct WordFilter {
    op: CompareOp,
    negate: bool,
    word: String,
}

impl MetaFilter for WordFilter {
    fn matches(&self, meta: &Meta) -> bool {
        let hit = meta
            .iter()
            .flat_map(|(_, v)| split_words(v))
            .any(|w| word_matches(self.op, &w, &self.word));
        hit != self.negate
    }
}

/// How a search index compares one of its words with a query word.
pub fn word_matches(op: CompareOp, word: &str, query: &str) -> bool {
    match op {
        CompareOp::Equal => word == query,
        CompareOp::Prefix => word.starts_with(query),
        CompareOp::Suffix => word.ends_with(query),
        CompareOp::Has | CompareOp::Match => word.contains(query),
        CompareOp::Less => word < query,
        CompareOp::Greater => word > query,
        CompareOp::Exist => true,
    }
}

/// Concrete operator for `has` on a key of type `ty`.
fn resolve_has(op: CompareOp, ty: KeyType) -> CompareOp {
    if op != CompareOp::Has {
        return op;
    }
    match ty {
        KeyType::String | KeyType::Url => CompareOp::Match,
        KeyType::Timestamp => CompareOp::Prefix,
        _ => CompareOp::Equal,
    }
}

/// Case folding shared by value comparisons and the words of the search
/// index, so index narrowing never disagrees with a comparison.
pub fn fold_case(s: &str) -> String {
    s.to_lowercase()
}

fn compare(ty: KeyType, op: CompareOp, actual: &str, want: &str) -> bool {
    match op {
        CompareOp::Equal => match ty {
            KeyType::Number => match (actual.parse::<i64>(), want.parse::<i64>()) {
                (Ok(a), Ok(b)) => a == b,
                _ => actual == want,
            },
            KeyType::Zid | KeyType::IdSet | KeyType::Timestamp => actual == want,
            _ => fold_case(actual) == fold_case(want),
        },
        CompareOp::Prefix => fold_case(actual).starts_with(&fold_case(want)),
        CompareOp::Suffix => fold_case(actual).ends_with(&fold_case(want)),
        CompareOp::Match => fold_case(actual).contains(&fold_case(want)),
        CompareOp::Less => ordering(ty, actual, want) == Some(Ordering::Less),
        CompareOp::Greater => ordering(ty, actual, want) == Some(Ordering::Greater),
        CompareOp::Has | CompareOp::Exist => false,
    }
}

/// Order of two values of type `ty`. Identifiers are zero-padded on the
/// left, truncated timestamps on the right, so both compare like numbers.
fn ordering(ty: KeyType, a: &str, b: &str) -> Option<Ordering> {
    match ty {
        KeyType::Number => Some(a.parse::<i64>().ok()?.cmp(&b.parse::<i64>().ok()?)),
        KeyType::Zid | KeyType::IdSet => Some(format!("{a:0>ZID_LEN$}").cmp(&format!("{b:0>ZID_LEN$}"))),
        KeyType::Timestamp => Some(format!("{a:0<ZID_LEN$}").cmp(&format!("{b:0<ZID_LEN$}"))),
        _ => Some(fold_case(a).cmp(&fold_case(b))),
    }
}

/// Operand as the search index would store it, if it is a single word.
fn index_word(ty: KeyType, value: &str) -> Option<String> {
    if !matches!(
        ty,
        KeyType::String | KeyType::Word | KeyType::WordSet | KeyType::TagSet
    ) {
        return None;
    }
    let word = value.strip_prefix('#').unwrap_or(value);
    if word.is_empty() || !word.chars().all(char::is_alphanumeric) {
        return None;
    }
    Some(fold_case(word))
}

/// Intersect `candidates` with `found`.
fn narrow(candidates: &mut Option<ZidSet>, found: ZidSet) {
    *candidates = Some(match candidates.take() {
        None => found,
        Some(c) => c.intersection(&found).copied().collect(),
    });
}

/// One compiled alternative of a query.
pub struct CompiledTerm {
    filters: Vec<Box<dyn MetaFilter>>,
    /// Only these identifiers can match, if known.
    candidates: Option<ZidSet>,
    /// These identifiers never match.
    excluded: ZidSet,
}

impl CompiledTerm {
    fn match_all() -> Self {
        Self {
            filters: Vec::new(),
            candidates: None,
            excluded: ZidSet::new(),
        }
    }

    /// Index-derived necessary condition, checked before any metadata is read.
    pub fn pre_match(&self, zid: Zid) -> bool {
        self.candidates.as_ref().is_none_or(|c| c.contains(&zid)) && !self.excluded.contains(&zid)
    }

    pub fn matches(&self, meta: &Meta) -> bool {
        self.filters.iter().all(|f| f.matches(meta))
    }
}

/// A query ready to be run against metadata.
pub struct Compiled {
    terms: Vec<CompiledTerm>,
    index_result: Option<ZidSet>,
}

impl Compiled {
    pub fn terms(&self) -> &[CompiledTerm] {
        &self.terms
    }

    /// The complete answer, if the search index alone provides it.
    pub fn result(&self) -> Option<&ZidSet> {
        self.index_result.as_ref()
    }

    pub fn matches(&self, meta: &Meta) -> bool {
        self.terms
            .iter()
            .any(|t| t.pre_match(meta.zid) && t.matches(meta))
    }
}

pub fn compile(query: &Query, searcher: Option<&dyn Searcher>) -> Compiled {
    if query.is_empty() {
        return Compiled {
            terms: vec![CompiledTerm::match_all()],
            index_result: None,
        };
    }

    let terms: Vec<CompiledTerm> = query
        .terms
        .iter()
        .map(|t| compile_term(t, searcher))
        .collect();

    let index_only = searcher.is_some()
        && query
            .terms
            .iter()
            .all(|t| t.keys.is_empty() && !t.search.is_empty() && t.search.iter().all(|e| !e.negate));
    let index_result = index_only.then(|| {
        terms
            .iter()
            .filter_map(|t| t.candidates.as_ref())
            .flatten()
            .copied()
            .collect()
    });
    Compiled {
        terms,
        index_result,
    }
}

fn compile_term(term: &Term, searcher: Option<&dyn Searcher>) -> CompiledTerm {
    let mut exist_filters: Vec<Box<dyn MetaFilter>> = Vec::new();
    let mut value_filters: Vec<Box<dyn MetaFilter>> = Vec::new();
    let mut candidates = None;
    let mut excluded = ZidSet::new();

    for (key, exprs) in &term.keys {
        let ty = key_type(key);
        if ty == KeyType::Credential {
            exist_filters.push(Box::new(NeverFilter));
            continue;
        }
        let mut comparisons = Vec::new();
        for Expr { op, negate, value } in exprs {
            if *op == CompareOp::Exist {
                exist_filters.push(Box::new(ExistFilter {
                    key: key.clone(),
                    exists: !negate,
                }));
                continue;
            }
            let op = resolve_has(*op, ty);
            let value = if ty == KeyType::TagSet && !value.starts_with('#') {
                format!("#{value}")
            } else {
                value.clone()
            };
            if !negate
                && !matches!(op, CompareOp::Less | CompareOp::Greater)
                && let Some(searcher) = searcher
                && let Some(word) = index_word(ty, &value)
            {
                narrow(&mut candidates, searcher.search(op, &word));
            }
            comparisons.push(Comparison {
                op,
                negate: *negate,
                value,
            });
        }
        if !comparisons.is_empty() {
            value_filters.push(Box::new(ValueFilter {
                key: key.clone(),
                ty,
                comparisons,
            }));
        }
    }

    for expr in &term.search {
        let word = fold_case(&expr.value);
        match searcher {
            Some(searcher) => {
                let found = searcher.search(expr.op, &word);
                if expr.negate {
                    excluded.extend(found);
                } else {
                    narrow(&mut candidates, found);
                }
            }
            None => value_filters.push(Box::new(WordFilter {
                op: expr.op,
                negate: expr.negate,
                word,
            })),
        }
    }

    exist_filters.extend(value_filters);
    CompiledTerm {
        filters: exist_filters,
        candidates,
        excluded,
    }
}
