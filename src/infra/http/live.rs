//! Endpoints used on live traffic, where the edge supplies credentials as
//! request headers.
//!
//! The edge injects the purge key into every request, so `POST /events` also
//! needs a signed token in [`EVENTS_NONCE_HEADER`].

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::application::cycle::PurgeCycle;
use crate::application::error::ErrorReport;
use crate::application::repos::CredentialSource;
use crate::cache::SiteEvent;
use crate::cdn::{AttachmentCache, CdnRewriter, rewrite_html};
use crate::domain::content::{PostId, PostStatus};
use crate::domain::error::DomainError;
use crate::domain::purge::ExecutionContext;
use crate::infra::credentials::{
    CDN_DOMAIN_HEADER, HeaderCredentials, OverrideCredentials, header_value,
};

use super::HttpState;

const SOURCE: &str = "infra::http::live";

pub const EVENTS_NONCE_HEADER: &str = "x-cloudcache-nonce";
pub const EVENTS_NONCE_ACTION: &str = "purge_events_action";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct EventBatch {
    events: Vec<EventPayload>,
    /// Purge the whole site regardless of the events.
    purge_all: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EventPayload {
    event: String,
    post_id: Option<PostId>,
    new_status: Option<PostStatus>,
    old_status: Option<PostStatus>,
}

#[derive(Debug, Serialize)]
struct EventsResponse {
    cycle_id: String,
    handled: usize,
    outcome: String,
}

/// Run one purge cycle over the posted events. Unsigned batches are refused
/// with 403 before anything is collected or dispatched.
pub(super) async fn handle_events(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(batch): Json<EventBatch>,
) -> Response {
    let nonce = header_value(&headers, EVENTS_NONCE_HEADER).unwrap_or_default();
    if !state.signer.verify(EVENTS_NONCE_ACTION, &nonce) {
        warn!(
            events = batch.events.len(),
            purge_all = batch.purge_all,
            "Event batch with invalid nonce refused"
        );
        return StatusCode::FORBIDDEN.into_response();
    }

    let events = match batch
        .events
        .into_iter()
        .map(|payload| {
            SiteEvent::from_parts(
                &payload.event,
                payload.post_id,
                payload.new_status,
                payload.old_status,
            )
        })
        .collect::<Result<Vec<_>, DomainError>>()
    {
        Ok(events) => events,
        Err(err) => {
            let mut response = (StatusCode::BAD_REQUEST, err.to_string()).into_response();
            ErrorReport::from_error(SOURCE, &err).attach(&mut response);
            return response;
        }
    };

    let credentials: Arc<dyn CredentialSource> = Arc::new(OverrideCredentials::new(
        state.purge_key_override.clone(),
        state.cdn_domain_override.clone(),
        Arc::new(HeaderCredentials::from_headers(&headers)),
    ));
    let dispatcher = state.purge.with_context(ExecutionContext::Http, credentials);

    let mut cycle = PurgeCycle::begin(
        state.origin.as_ref().clone(),
        state.trigger.as_ref(),
        state.content.as_ref(),
    );
    if batch.purge_all {
        cycle.purge_everything();
    }
    let mut handled = 0;
    for event in &events {
        if cycle.handle(event).await.is_some() {
            handled += 1;
        }
    }
    let cycle_id = cycle.id().to_string();
    let outcome = cycle.finish(&dispatcher).await;

    Json(EventsResponse {
        cycle_id,
        handled,
        outcome: outcome.to_string(),
    })
    .into_response()
}

/// Rewrite image URLs in the posted HTML fragment.
pub(super) async fn rewrite_fragment(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let cdn_domain = state
        .cdn_domain_override
        .clone()
        .or_else(|| header_value(&headers, CDN_DOMAIN_HEADER));
    let cache = AttachmentCache::new();
    let rewriter = CdnRewriter::new(
        &state.origin,
        cdn_domain.as_deref(),
        state.content.as_ref(),
        &cache,
    );
    let html = rewrite_html(&rewriter, &body);
    ([(CONTENT_TYPE, "text/html; charset=utf-8")], html).into_response()
}
