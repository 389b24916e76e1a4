//! Domain layer types and invariants.

pub mod content;
pub mod error;
pub mod image;
pub mod purge;
pub mod shard;
pub mod site;
