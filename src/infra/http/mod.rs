//! HTTP surface: credential capture plus live purge and rewrite endpoints.

mod capture;
mod live;
mod middleware;

use std::sync::Arc;

use axum::{
    Router,
    http::StatusCode,
    middleware as axum_middleware,
    response::IntoResponse,
    routing::{get, post},
};

use crate::cache::PurgeTrigger;
use crate::domain::site::SiteOrigin;

use super::content::StaticContent;
use super::nonce::NonceSigner;
use super::purge_api::PurgeApiClient;
use super::store::FileStore;

pub use live::{EVENTS_NONCE_ACTION, EVENTS_NONCE_HEADER};
pub use middleware::{REQUEST_ID_HEADER, RequestContext};

#[derive(Clone)]
pub struct HttpState {
    pub origin: Arc<SiteOrigin>,
    pub store: FileStore,
    pub signer: NonceSigner,
    pub trigger: Arc<PurgeTrigger>,
    pub content: Arc<StaticContent>,
    pub purge: Arc<PurgeApiClient>,
    /// Configured credentials that take precedence over request headers.
    pub purge_key_override: Option<String>,
    pub cdn_domain_override: Option<String>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/", post(capture::capture_credential))
        .route("/events", post(live::handle_events))
        .route("/rewrite", post(live::rewrite_fragment))
        .route("/_health", get(health))
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}

async fn health() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}
