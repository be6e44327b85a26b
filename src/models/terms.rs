//! Resolution of group-by ids to human-readable terms.

use hashbrown::HashMap;
use itertools::Itertools;

use crate::models::backend::{MatchMode, SearchBackend, SearchMatch, SortMode};
use crate::models::error::{BackendError, Error};

/// Mapping from a raw group-by id to its display term.
pub type TermMap = HashMap<i64, String>;

/// Extracts the group key from a raw match; facet rows are keyed on it.
pub type GroupIdFn<'a> = &'a dyn Fn(&SearchMatch) -> Option<i64>;

/// Where display terms come from.
///
/// For an embedded source, `name` is a string attribute on the grouped
/// matches themselves, packed as `id<delim>term<delim>id<delim>term...`.
/// For a lookup source, `name` is a separate index queried once per
/// facet with a filter on `id_attr`; `query` is an optional query text
/// for that lookup and `term_attr` the attribute holding the display
/// string.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default)]
    pub id_attr: String,
    #[serde(default)]
    pub term_attr: String,
    #[serde(default = "SourceConfig::default_delim")]
    pub delim: String,
    #[serde(default)]
    pub query: String,
}

impl SourceConfig {
    fn default_delim() -> String {
        ",".to_string()
    }

    /// A source packed into an attribute of the grouped matches.
    pub fn embedded(attribute: &str) -> Self {
        Self {
            name: attribute.to_string(),
            id_attr: String::new(),
            term_attr: String::new(),
            delim: Self::default_delim(),
            query: String::new(),
        }
    }

    /// A source resolved against a separate lookup index.
    pub fn lookup(index: &str, id_attr: &str, term_attr: &str) -> Self {
        Self {
            name: index.to_string(),
            id_attr: id_attr.to_string(),
            term_attr: term_attr.to_string(),
            delim: Self::default_delim(),
            query: String::new(),
        }
    }

    pub fn with_delim(mut self, delim: &str) -> Self {
        self.delim = delim.to_string();
        self
    }

    pub fn with_query(mut self, query: &str) -> Self {
        self.query = query.to_string();
        self
    }
}

/// Strategy resolving group-by ids to display terms for a batch of raw
/// matches.
pub trait TermSource {
    fn fetch_terms(
        &mut self,
        matches: &[SearchMatch],
        cfg: &SourceConfig,
        id_of: GroupIdFn<'_>,
    ) -> Result<TermMap, Error>;
}

/// Splits a delimiter-packed source attribute into id/term pairs. Used
/// by the embedded-attribute variant; a dangling trailing id is dropped.
pub(crate) fn split_packed_terms(matches: &[SearchMatch], cfg: &SourceConfig) -> TermMap {
    let mut terms = TermMap::new();
    for m in matches {
        let Some(packed) = m.attr(&cfg.name).and_then(|a| a.as_str()) else {
            continue;
        };
        for (id, term) in packed.split(cfg.delim.as_str()).tuples() {
            if let Ok(id) = id.trim().parse::<i64>() {
                terms.insert(id, term.trim().to_string());
            }
        }
    }
    terms
}

/// The lookup-index variant: one full-scan query against the source
/// index, filtered to the ids present in the grouped matches. The
/// backend state is restored whole afterwards, including on error.
pub struct IndexTermSource<'a> {
    backend: &'a mut dyn SearchBackend,
}

impl<'a> IndexTermSource<'a> {
    pub fn new(backend: &'a mut dyn SearchBackend) -> Self {
        Self { backend }
    }

    fn run_lookup(&mut self, ids: &[i64], cfg: &SourceConfig) -> Result<TermMap, Error> {
        let backend = &mut *self.backend;
        backend.set_limits(0, ids.len() as u32, (ids.len() as u32).max(1000), 0);
        backend.set_select(&format!("{}, {}", cfg.id_attr, cfg.term_attr));
        backend.reset_group_by();
        backend.set_match_mode(MatchMode::FullScan);
        backend.set_sort_mode(SortMode::Relevance, "");
        backend.set_array_result(true);
        backend.reset_filters();
        backend.set_filter(&cfg.id_attr, ids.to_vec(), false);
        backend.add_query(&cfg.query, &cfg.name, "term lookup");

        let mut results = backend.run_queries()?;
        let result = results
            .pop()
            .ok_or_else(|| BackendError::Query("empty batch from term lookup".to_string()))?;
        if let Some(err) = result.error_str() {
            return Err(BackendError::Query(err.to_string()).into());
        }

        let mut terms = TermMap::new();
        for m in &result.matches {
            let Some(id) = m.attr(&cfg.id_attr).and_then(|a| a.as_int()) else {
                continue;
            };
            if let Some(term) = m.attr(&cfg.term_attr) {
                terms.insert(id, term.to_string());
            }
        }
        Ok(terms)
    }
}

impl TermSource for IndexTermSource<'_> {
    fn fetch_terms(
        &mut self,
        matches: &[SearchMatch],
        cfg: &SourceConfig,
        id_of: GroupIdFn<'_>,
    ) -> Result<TermMap, Error> {
        let ids: Vec<i64> = matches.iter().filter_map(id_of).unique().collect();
        if ids.is_empty() {
            return Ok(TermMap::new());
        }
        let snapshot = self.backend.snapshot();
        let terms = self.run_lookup(&ids, cfg);
        self.backend.restore(snapshot);
        terms
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::models::backend::Attr;

    #[test]
    fn test_split_packed_terms() {
        let cfg = SourceConfig::embedded("actor_terms_attr");
        let matches = vec![
            SearchMatch::new(1).with_attr("actor_terms_attr", "1,Harrison Ford,2,Sean Connery"),
            SearchMatch::new(2).with_attr("actor_terms_attr", "3,Clint Eastwood"),
        ];
        let terms = split_packed_terms(&matches, &cfg);
        assert_eq!(terms.len(), 3);
        assert_eq!(terms[&1], "Harrison Ford");
        assert_eq!(terms[&3], "Clint Eastwood");
    }

    #[test]
    fn test_split_ignores_dangling_id() {
        let cfg = SourceConfig::embedded("src");
        let matches = vec![SearchMatch::new(1).with_attr("src", "7,Seven,8")];
        let terms = split_packed_terms(&matches, &cfg);
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[&7], "Seven");
    }

    #[test]
    fn test_split_skips_non_string_attr() {
        let cfg = SourceConfig::embedded("src");
        let matches = vec![SearchMatch::new(1).with_attr("src", Attr::Int(12))];
        assert!(split_packed_terms(&matches, &cfg).is_empty());
    }
}
