//! Faceted search middleware for Sphinx-compatible full-text engines.
//!
//! The crate sits between a host application and a searchd-speaking
//! client: it parses a small field-qualified query language, batches one
//! grouped sub-query per configured facet onto the main query, shapes
//! the grouped results into refinement options with display names, and
//! caches computed option lists per canonical query.
//!
//! Entry points: [`models::client::FacetedClient`] for the full
//! parse-search-facet cycle, [`models::group::FacetGroup`] for facet
//! computation on its own, [`models::query::QueryParser`] for just the
//! query language.

pub mod models;
pub mod prelude;
pub mod testing;
