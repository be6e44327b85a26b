//! Caching of computed facet result lists.
//!
//! Entries are keyed on the canonical form of the query: an environment
//! prefix plus the hex MD5 of [`MultiFieldQuery::to_canonical`]. A
//! sticky variant of every key, marked by [`STICKY_MARKER`], survives
//! ordinary clears; preloaded results live there. Adapters prepend the
//! [`NAMESPACE`] so the cache shares a store with unrelated data safely.

// Submodules.
mod memory;
#[cfg(feature = "memcached-cache")]
mod memcached_store;
#[cfg(feature = "redis-cache")]
mod redis_store;

pub use memory::*;
#[cfg(feature = "memcached-cache")]
pub use memcached_store::*;
#[cfg(feature = "redis-cache")]
pub use redis_store::*;

use crate::models::error::CacheError;
use crate::models::facet::FacetResult;
use crate::models::query::MultiFieldQuery;

/// Namespace prefix every adapter applies to physical keys.
pub const NAMESPACE: &str = "FSPHINX_";

/// Logical prefix of keys exempt from ordinary clears.
pub const STICKY_MARKER: &str = "sticky_";

/// Minimal key/value contract the facet cache runs on.
///
/// `set` with `overwrite` off is add-if-absent and reports whether the
/// value was written. `clear` drops every entry under the given logical
/// prefix; sticky entries only go when `also_sticky` is set.
pub trait KvStore {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    fn set(
        &mut self,
        key: &str,
        value: &[u8],
        overwrite: bool,
        sticky: bool,
    ) -> Result<bool, CacheError>;

    fn clear(&mut self, prefix: &str, also_sticky: bool) -> Result<(), CacheError>;
}

/// Facet results cached per canonical query.
pub struct FacetGroupCache {
    store: Box<dyn KvStore>,
    env: String,
}

impl FacetGroupCache {
    pub fn new(store: Box<dyn KvStore>) -> Self {
        Self {
            store,
            env: String::new(),
        }
    }

    /// Isolate entries under an environment prefix (test vs production
    /// data in a shared store).
    pub fn with_env(mut self, env: &str) -> Self {
        self.set_env(env);
        self
    }

    pub fn set_env(&mut self, env: &str) {
        self.env = env.to_string();
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    fn normal_key(&self, canonical: &str) -> String {
        format!("{}{:x}", self.env, md5::compute(canonical))
    }

    fn sticky_key(&self, canonical: &str) -> String {
        format!("{STICKY_MARKER}{}", self.normal_key(canonical))
    }

    /// Stored results for this query: the sticky entry wins over the
    /// normal one. `None` on a miss.
    pub fn get_facets(
        &mut self,
        query: &MultiFieldQuery,
    ) -> Result<Option<Vec<FacetResult>>, CacheError> {
        self.get_by_canonical(&query.to_canonical())
    }

    pub fn get_by_canonical(
        &mut self,
        canonical: &str,
    ) -> Result<Option<Vec<FacetResult>>, CacheError> {
        for key in [self.sticky_key(canonical), self.normal_key(canonical)] {
            if let Some(bytes) = self.store.get(&key)? {
                return Ok(Some(serde_json::from_slice(&bytes)?));
            }
        }
        Ok(None)
    }

    /// Store one result list per facet, in facet order. Returns whether
    /// the entry was written (add-if-absent may decline).
    pub fn set_facets(
        &mut self,
        query: &MultiFieldQuery,
        results: &[FacetResult],
        overwrite: bool,
        sticky: bool,
    ) -> Result<bool, CacheError> {
        self.set_by_canonical(&query.to_canonical(), results, overwrite, sticky)
    }

    pub fn set_by_canonical(
        &mut self,
        canonical: &str,
        results: &[FacetResult],
        overwrite: bool,
        sticky: bool,
    ) -> Result<bool, CacheError> {
        let key = if sticky {
            self.sticky_key(canonical)
        } else {
            self.normal_key(canonical)
        };
        let bytes = serde_json::to_vec(results)?;
        self.store.set(&key, &bytes, overwrite, sticky)
    }

    /// Drop every entry of this environment. Sticky entries stay unless
    /// `also_sticky` is set.
    pub fn clear(&mut self, also_sticky: bool) -> Result<(), CacheError> {
        self.store.clear(&self.env, also_sticky)
    }
}

impl std::fmt::Debug for FacetGroupCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FacetGroupCache").field("env", &self.env).finish()
    }
}
