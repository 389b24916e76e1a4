//! Infrastructure adapters and runtime bootstrap.

pub mod content;
pub mod credentials;
pub mod error;
pub mod http;
pub mod nonce;
pub mod purge_api;
pub mod store;
pub mod telemetry;
