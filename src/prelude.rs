pub use crate::models::backend::{
    Attr, BackendState, GroupFunc, MatchMode, QueryResult, SearchBackend, SearchMatch, SortMode,
    SortOrder,
};
pub use crate::models::cache::{FacetGroupCache, KvStore, MemoryStore};
pub use crate::models::client::{ClientConfig, FacetedClient, SearchResults};
pub use crate::models::error::{BackendError, CacheError, Error};
pub use crate::models::facet::{Facet, FacetResult, FacetValue};
pub use crate::models::group::FacetGroup;
pub use crate::models::query::{MultiFieldQuery, QueryParser, QueryTerm, TermStatus};
pub use crate::models::terms::{IndexTermSource, SourceConfig, TermSource};

#[cfg(feature = "memcached-cache")]
pub use crate::models::cache::MemcachedStore;
#[cfg(feature = "redis-cache")]
pub use crate::models::cache::RedisStore;
