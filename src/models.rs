pub mod backend;
pub mod cache;
pub mod client;
pub mod error;
pub mod facet;
pub mod group;
pub mod query;
pub mod terms;
