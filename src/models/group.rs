//! Batched facet computation with optional caching.

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::models::backend::{QueryResult, SearchBackend};
use crate::models::cache::FacetGroupCache;
use crate::models::error::Result;
use crate::models::facet::{Facet, FacetResult};
use crate::models::query::MultiFieldQuery;
use crate::models::terms::IndexTermSource;

/// Aggregate time value marking a result that came from the cache.
pub const CACHE_HIT_TIME: f64 = -1.0;

/// An ordered set of facets computed together in one backend batch.
///
/// The order of facets is fixed at construction: the i-th enqueued
/// sub-query maps to the i-th facet, and cached result lists are stored
/// and replayed in the same order.
#[derive(Default)]
pub struct FacetGroup {
    facets: Vec<Facet>,
    cache: Option<FacetGroupCache>,
    default_index: String,
    caching: bool,
    lookup_terms: bool,
    time: f64,
}

impl FacetGroup {
    pub fn new(facets: Vec<Facet>) -> Self {
        Self {
            facets,
            cache: None,
            default_index: "*".to_string(),
            caching: false,
            lookup_terms: false,
            time: 0.0,
        }
    }

    pub fn with_default_index(mut self, index: &str) -> Self {
        self.default_index = index.to_string();
        self
    }

    /// Attach a cache; caching defaults to on once one is attached.
    pub fn with_cache(mut self, cache: FacetGroupCache) -> Self {
        self.cache = Some(cache);
        self.caching = true;
        self
    }

    pub fn with_caching(mut self, on: bool) -> Self {
        self.caching = on;
        self
    }

    /// Resolve display terms through a lookup index (one extra query per
    /// sourced facet) instead of embedded source attributes.
    pub fn with_term_lookup(mut self, on: bool) -> Self {
        self.lookup_terms = on;
        self
    }

    pub fn push(&mut self, facet: Facet) {
        self.facets.push(facet);
    }

    pub fn len(&self) -> usize {
        self.facets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Facet> {
        self.facets.iter()
    }

    /// Aggregate wall time of the last computation, or
    /// [`CACHE_HIT_TIME`] when it was served from the cache.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn cache(&self) -> Option<&FacetGroupCache> {
        self.cache.as_ref()
    }

    pub fn cache_mut(&mut self) -> Option<&mut FacetGroupCache> {
        self.cache.as_mut()
    }

    pub fn default_index(&self) -> &str {
        &self.default_index
    }

    /// Facet results keyed by facet name, in facet order.
    pub fn results_by_name(&self) -> IndexMap<String, FacetResult> {
        self.facets
            .iter()
            .map(|f| (f.name().to_string(), f.results().clone()))
            .collect()
    }

    /// Zero every facet's results and the aggregate time.
    pub fn reset(&mut self) {
        for facet in &mut self.facets {
            facet.reset();
        }
        self.time = 0.0;
    }

    /// Compute all facets for `query` in one backend round-trip.
    ///
    /// `caching` overrides the configured default when given. On a cache
    /// miss the fresh results are written back add-if-absent under the
    /// normal key; only [`preload`](Self::preload) writes sticky entries.
    pub fn compute(
        &mut self,
        query: &mut MultiFieldQuery,
        backend: &mut dyn SearchBackend,
        caching: Option<bool>,
    ) -> Result<()> {
        let use_cache = caching.unwrap_or(self.caching) && self.cache.is_some();

        if use_cache && self.try_cached(query) {
            return Ok(());
        }

        self.prepare_all(query, backend, false);
        let results = backend.run_queries()?;
        self.apply_results(query, &results, backend)?;

        if use_cache {
            self.store_results(query, false, false);
        }
        Ok(())
    }

    /// Compute without consulting the cache and persist the results
    /// under a sticky key, overwriting any previous entry. Sticky
    /// entries survive ordinary cache clears.
    pub fn preload(
        &mut self,
        query: &mut MultiFieldQuery,
        backend: &mut dyn SearchBackend,
    ) -> Result<()> {
        self.compute(query, backend, Some(false))?;
        self.store_results(query, true, true);
        Ok(())
    }

    /// Enqueue every facet's sub-query; returns the occupied slots.
    pub(crate) fn prepare_all(
        &self,
        query: &MultiFieldQuery,
        backend: &mut dyn SearchBackend,
        exclude_numeric: bool,
    ) -> Vec<usize> {
        self.facets
            .iter()
            .map(|f| f.prepare(query, backend, exclude_numeric, &self.default_index))
            .collect()
    }

    /// Distribute batch results onto the facets by position, resolve
    /// terms, order rows, and aggregate time.
    pub(crate) fn apply_results(
        &mut self,
        query: &mut MultiFieldQuery,
        results: &[QueryResult],
        backend: &mut dyn SearchBackend,
    ) -> Result<()> {
        for facet in &mut self.facets {
            facet.reset();
        }
        self.time = 0.0;
        let lookup = self.lookup_terms;
        let mut total = 0.0;
        for (facet, raw) in self.facets.iter_mut().zip(results) {
            if lookup {
                let mut source = IndexTermSource::new(backend);
                facet.set_values(query, raw, Some(&mut source))?;
            } else {
                facet.set_values(query, raw, None)?;
            }
            facet.order_values();
            total += facet.time();
        }
        self.time = total;
        debug!(facets = self.facets.len(), time = self.time, "facet batch applied");
        Ok(())
    }

    /// Load facet results from the cache. True on a hit, in which case
    /// the aggregate time is the cache-hit marker and the backend is
    /// never touched. Cache failures degrade to a miss.
    pub(crate) fn try_cached(&mut self, query: &MultiFieldQuery) -> bool {
        let Some(cache) = self.cache.as_mut() else {
            return false;
        };
        let stored = match cache.get_facets(query) {
            Ok(stored) => stored,
            Err(err) => {
                warn!(error = %err, "facet cache read failed, treating as miss");
                return false;
            }
        };
        let Some(stored) = stored else {
            debug!("facet cache miss");
            return false;
        };
        if stored.len() != self.facets.len() {
            warn!(
                stored = stored.len(),
                facets = self.facets.len(),
                "cached facet list has wrong arity, recomputing"
            );
            return false;
        }
        for (facet, results) in self.facets.iter_mut().zip(stored) {
            facet.set_results(results);
        }
        self.time = CACHE_HIT_TIME;
        debug!("facet cache hit");
        true
    }

    /// Persist current results; failures are logged and swallowed.
    /// Results carrying a backend error are never persisted.
    pub(crate) fn store_results(&mut self, query: &MultiFieldQuery, overwrite: bool, sticky: bool) {
        let Some(cache) = self.cache.as_mut() else {
            return;
        };
        if self
            .facets
            .iter()
            .any(|f| f.results().error.as_deref().is_some_and(|e| !e.is_empty()))
        {
            return;
        }
        let results: Vec<FacetResult> = self.facets.iter().map(|f| f.results().clone()).collect();
        if let Err(err) = cache.set_facets(query, &results, overwrite, sticky) {
            warn!(error = %err, "facet cache write failed");
        }
    }

    pub(crate) fn caching_enabled(&self) -> bool {
        self.caching && self.cache.is_some()
    }
}

impl<'a> IntoIterator for &'a FacetGroup {
    type Item = &'a Facet;
    type IntoIter = std::slice::Iter<'a, Facet>;

    fn into_iter(self) -> Self::IntoIter {
        self.facets.iter()
    }
}

impl std::fmt::Debug for FacetGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FacetGroup")
            .field("facets", &self.facets.len())
            .field("caching", &self.caching)
            .field("time", &self.time)
            .finish()
    }
}
