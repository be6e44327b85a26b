//! The front door tying parsing, batching and faceting together.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::debug;

use crate::models::backend::{QueryResult, SearchBackend, SearchMatch};
use crate::models::error::{Error, Result};
use crate::models::facet::FacetResult;
use crate::models::group::FacetGroup;
use crate::models::query::{MultiFieldQuery, QueryParser};
use crate::models::terms::{GroupIdFn, IndexTermSource, SourceConfig, TermMap, TermSource};

/// Host-supplied configuration for a [`FacetedClient`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientConfig {
    /// Index the main query and unpinned facets run against.
    pub index: String,
    /// User field name to backend full-text field.
    #[serde(default)]
    pub field_map: HashMap<String, String>,
    /// User field name to grouping attribute.
    #[serde(default)]
    pub attr_map: HashMap<String, String>,
    /// Turn numeric refinements into attribute filters instead of
    /// full-text clauses.
    #[serde(default)]
    pub filtering: bool,
    /// Let an all-inactive query through as an empty (match-all) query.
    #[serde(default)]
    pub allow_empty: bool,
    /// Environment prefix for cache keys.
    #[serde(default)]
    pub cache_env: String,
}

/// What a search call returns: the main query's matches plus the
/// computed refinement options per facet, in facet order.
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub matches: Vec<SearchMatch>,
    pub total_found: u64,
    pub time: f64,
    pub error: Option<String>,
    pub warning: Option<String>,
    pub facets: IndexMap<String, FacetResult>,
}

/// A single-caller faceted search session.
///
/// The client owns its backend: the wrapped connection state is mutated
/// and restored around every sub-operation, which is only sound with one
/// caller at a time. Pool clients for parallelism.
pub struct FacetedClient<B: SearchBackend> {
    backend: B,
    parser: QueryParser,
    group: FacetGroup,
    index: String,
    filtering: bool,
    cache_env: String,
}

impl<B: SearchBackend> FacetedClient<B> {
    pub fn new(backend: B, config: ClientConfig) -> Result<Self> {
        if config.index.trim().is_empty() {
            return Err(Error::Config("default index must not be empty".to_string()));
        }
        let parser = QueryParser::new()
            .with_field_map(config.field_map)
            .with_attr_map(config.attr_map)
            .with_allow_empty(config.allow_empty);
        Ok(Self {
            backend,
            parser,
            group: FacetGroup::default().with_default_index(&config.index),
            index: config.index,
            filtering: config.filtering,
            cache_env: config.cache_env,
        })
    }

    pub fn with_facets(mut self, facets: impl IntoIterator<Item = crate::models::facet::Facet>) -> Self {
        for facet in facets {
            self.group.push(facet);
        }
        self
    }

    /// Replace the facet group wholesale, e.g. to attach a cache. The
    /// configured cache environment prefix is applied to the group's
    /// cache.
    pub fn with_group(mut self, group: FacetGroup) -> Self {
        self.group = group.with_default_index(&self.index);
        if !self.cache_env.is_empty() {
            if let Some(cache) = self.group.cache_mut() {
                cache.set_env(&self.cache_env);
            }
        }
        self
    }

    pub fn parser(&self) -> &QueryParser {
        &self.parser
    }

    pub fn group(&self) -> &FacetGroup {
        &self.group
    }

    pub fn group_mut(&mut self) -> &mut FacetGroup {
        &mut self.group
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn default_index(&self) -> &str {
        &self.index
    }

    pub fn parse(&self, input: &str) -> MultiFieldQuery {
        self.parser.parse(input)
    }

    /// Parse and run `input` with all attached facets in one batch.
    pub fn query(&mut self, input: &str) -> Result<SearchResults> {
        let mut query = self.parser.parse(input);
        self.query_parsed(&mut query)
    }

    /// Run an already-parsed query. The query is taken mutably: term
    /// resolution renames its display terms in place, so re-rendering it
    /// afterwards shows names instead of raw ids.
    pub fn query_parsed(&mut self, query: &mut MultiFieldQuery) -> Result<SearchResults> {
        let snapshot = self.backend.snapshot();
        let outcome = self.run(query);
        self.backend.restore(snapshot);
        outcome
    }

    fn run(&mut self, query: &mut MultiFieldQuery) -> Result<SearchResults> {
        if self.filtering {
            for term in query.iter().filter(|t| t.is_active() && t.user_field() != "*") {
                if let Some(value) = term.numeric_value() {
                    self.backend.set_filter(term.attribute(), vec![value], false);
                }
            }
        }
        self.backend
            .add_query(&query.to_sphinx(self.filtering), &self.index, "main");

        let have_facets = !self.group.is_empty();
        let cached =
            have_facets && self.group.caching_enabled() && self.group.try_cached(query);
        if have_facets && !cached {
            self.group
                .prepare_all(query, &mut self.backend, self.filtering);
        }

        let results = self.backend.run_queries()?;
        let Some((main, facet_results)) = results.split_first() else {
            return Err(crate::models::error::BackendError::Query(
                "empty batch from backend".to_string(),
            )
            .into());
        };

        if have_facets {
            if main.total_found == 0 {
                // Nothing to refine; leave the facets empty rather than
                // presenting options onto an empty result set. This also
                // drops cache-served rows, which would be stale here.
                self.group.reset();
            } else if !cached {
                self.group
                    .apply_results(query, facet_results, &mut self.backend)?;
                self.group.store_results(query, false, false);
            }
        }

        debug!(
            query = %query,
            total_found = main.total_found,
            facets = self.group.len(),
            cached,
            "search complete"
        );
        Ok(self.bundle(main))
    }

    fn bundle(&self, main: &QueryResult) -> SearchResults {
        SearchResults {
            matches: main.matches.clone(),
            total_found: main.total_found,
            time: main.time,
            error: main.error.clone(),
            warning: main.warning.clone(),
            facets: self.group.results_by_name(),
        }
    }
}

/// The lookup-index term source capability: hosts resolving ids outside
/// a facet computation can point the client at a terms index directly.
impl<B: SearchBackend> TermSource for FacetedClient<B> {
    fn fetch_terms(
        &mut self,
        matches: &[SearchMatch],
        cfg: &SourceConfig,
        id_of: GroupIdFn<'_>,
    ) -> std::result::Result<TermMap, Error> {
        IndexTermSource::new(&mut self.backend).fetch_terms(matches, cfg, id_of)
    }
}
