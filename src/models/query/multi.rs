use std::fmt;
use std::sync::LazyLock;

use hashbrown::HashMap;
use indexmap::IndexMap;
use itertools::Itertools;
use regex::{Captures, Regex};

use crate::models::query::term::{QueryTerm, TermStatus};

// The query grammar: `@` clauses with an optional status marker and
// either a field name or `*`, interleaved with free-text spans. Kept as
// one alternation for compatibility with the historic parsers of this
// format.
static QUERY_GRAMMAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)@(?P<status>[+-]?)(?P<field>\w+|\*)\s+(?P<term>[^@()]+)?|(?P<all>[^@()]+)")
        .expect("query grammar compiles")
});

/// Builds [`MultiFieldQuery`] values from user input.
///
/// Owns the case-insensitive mappings from user-facing field names to
/// backend full-text fields and to grouping attributes. Parsing never
/// fails: segments that do not yield a term are dropped.
#[derive(Debug, Clone, Default)]
pub struct QueryParser {
    user_sph: HashMap<String, String>,
    user_attr: HashMap<String, String>,
    allow_empty: bool,
}

impl QueryParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a user field to the backend full-text field it queries.
    pub fn with_field(mut self, user: &str, sphinx: &str) -> Self {
        self.user_sph
            .insert(user.trim().to_lowercase(), sphinx.to_string());
        self
    }

    /// Map a user field to the attribute used for filtering on it.
    pub fn with_attr(mut self, user: &str, attribute: &str) -> Self {
        self.user_attr
            .insert(user.trim().to_lowercase(), attribute.to_string());
        self
    }

    pub fn with_field_map(mut self, map: impl IntoIterator<Item = (String, String)>) -> Self {
        for (user, sphinx) in map {
            self = self.with_field(&user, &sphinx);
        }
        self
    }

    pub fn with_attr_map(mut self, map: impl IntoIterator<Item = (String, String)>) -> Self {
        for (user, attribute) in map {
            self = self.with_attr(&user, &attribute);
        }
        self
    }

    /// When off (the default), an all-inactive query renders to the
    /// backend as a single space so the server can tell "no query" from
    /// "match everything".
    pub fn with_allow_empty(mut self, on: bool) -> Self {
        self.allow_empty = on;
        self
    }

    pub fn parse(&self, input: &str) -> MultiFieldQuery {
        let mut query = MultiFieldQuery::new(self.clone());
        for caps in QUERY_GRAMMAR.captures_iter(input) {
            if let Some(term) = self.term_from_captures(&caps) {
                query.insert(term);
            }
        }
        query
    }

    fn term_from_captures(&self, caps: &Captures<'_>) -> Option<QueryTerm> {
        if let Some(all) = caps.name("all") {
            return self.make_term(TermStatus::Active, "*", all.as_str());
        }
        let status = match caps.name("status").map(|m| m.as_str()) {
            Some("-") => TermStatus::Inactive,
            _ => TermStatus::Active,
        };
        let field = caps.name("field")?.as_str();
        let term = caps.name("term")?.as_str();
        self.make_term(status, field, term)
    }

    pub(crate) fn make_term(
        &self,
        status: TermStatus,
        field: &str,
        term: &str,
    ) -> Option<QueryTerm> {
        let user_field = field.trim().to_lowercase();
        QueryTerm::resolved(
            status,
            &user_field,
            term,
            self.user_sph.get(&user_field).cloned(),
            self.user_attr.get(&user_field).cloned(),
        )
    }

    pub(crate) fn allow_empty(&self) -> bool {
        self.allow_empty
    }
}

/// An ordered collection of [`QueryTerm`]s, keyed by term hash.
///
/// Insertion order is what the user sees; the canonical form depends
/// only on the set of active terms and is used as the cache identity of
/// the query.
#[derive(Debug, Clone)]
pub struct MultiFieldQuery {
    parser: QueryParser,
    terms: IndexMap<String, QueryTerm>,
}

impl MultiFieldQuery {
    pub(crate) fn new(parser: QueryParser) -> Self {
        Self {
            parser,
            terms: IndexMap::new(),
        }
    }

    pub fn parser(&self) -> &QueryParser {
        &self.parser
    }

    /// Insert a term unless an equal refinement is already present; the
    /// first occurrence wins.
    pub fn insert(&mut self, term: QueryTerm) {
        let hash = term.hash();
        self.terms.entry(hash).or_insert(term);
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueryTerm> {
        self.terms.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut QueryTerm> {
        self.terms.values_mut()
    }

    /// Whether the query holds the same refinement as `term`, whatever
    /// its status. `term` is parsed with this query's own parser.
    pub fn has_term(&self, term: &str) -> bool {
        self.hash_of(term)
            .is_some_and(|hash| self.terms.contains_key(&hash))
    }

    /// Flip a term between active and inactive. Returns false when the
    /// query holds no such refinement.
    pub fn toggle(&mut self, term: &str) -> bool {
        self.update_status(term, None)
    }

    pub fn toggle_on(&mut self, term: &str) -> bool {
        self.update_status(term, Some(TermStatus::Active))
    }

    pub fn toggle_off(&mut self, term: &str) -> bool {
        self.update_status(term, Some(TermStatus::Inactive))
    }

    /// Flip an already-constructed term, matched by identity.
    pub fn toggle_term(&mut self, term: &QueryTerm) -> bool {
        self.apply_status(&term.hash(), None)
    }

    pub fn set_term_status(&mut self, term: &QueryTerm, status: TermStatus) -> bool {
        self.apply_status(&term.hash(), Some(status))
    }

    fn update_status(&mut self, term: &str, status: Option<TermStatus>) -> bool {
        let Some(hash) = self.hash_of(term) else {
            return false;
        };
        self.apply_status(&hash, status)
    }

    fn apply_status(&mut self, hash: &str, status: Option<TermStatus>) -> bool {
        let Some(found) = self.terms.get_mut(hash) else {
            return false;
        };
        match status {
            Some(status) => found.set_status(status),
            None => found.flip(),
        }
        true
    }

    fn hash_of(&self, term: &str) -> Option<String> {
        self.parser.parse(term).iter().next().map(QueryTerm::hash)
    }

    /// Count of terms addressing `field` by either its user name or its
    /// backend name, whatever their status.
    pub fn count_field(&self, field: &str) -> usize {
        let field = field.trim().to_lowercase();
        self.iter()
            .filter(|t| {
                t.user_field() == field || t.sphinx_field().to_lowercase() == field
            })
            .count()
    }

    /// The backend query string: active emissions in insertion order.
    pub fn to_sphinx(&self, exclude_numeric: bool) -> String {
        let rendered = self
            .iter()
            .filter_map(|t| t.to_sphinx(exclude_numeric))
            .join(" ");
        if rendered.is_empty() && !self.parser.allow_empty() {
            // A bare space keeps the backend in "no query" mode rather
            // than matching the whole index.
            " ".to_string()
        } else {
            rendered
        }
    }

    /// The canonical form: active emissions, sorted by field then by
    /// lowercased term. Stable across term order, status flips of other
    /// terms, and display renames.
    pub fn to_canonical(&self) -> String {
        self.iter()
            .filter(|t| t.is_active())
            .sorted()
            .filter_map(QueryTerm::to_canonical)
            .join(" ")
            .trim()
            .to_string()
    }
}

impl fmt::Display for MultiFieldQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.iter().join(" "))
    }
}

impl<'a> IntoIterator for &'a MultiFieldQuery {
    type Item = &'a QueryTerm;
    type IntoIter = indexmap::map::Values<'a, String, QueryTerm>;

    fn into_iter(self) -> Self::IntoIter {
        self.terms.values()
    }
}
