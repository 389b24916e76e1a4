//! CloudCache edge integration: batched purge collection and sharded image
//! CDN rewriting for a content site.

pub mod application;
pub mod cache;
pub mod cdn;
pub mod config;
pub mod domain;
pub mod infra;
pub(crate) mod util;
