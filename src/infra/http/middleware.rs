//! Request id propagation and response logging.

use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::application::error::ErrorReport;
use crate::infra::credentials::{CDN_DOMAIN_HEADER, PURGE_KEY_HEADER};

pub const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_REQUEST_ID_LEN: usize = 64;

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
}

/// Reuse the caller's request id when it is sane, otherwise mint one, and
/// echo it on the response.
pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

    request.extensions_mut().insert(RequestContext {
        request_id: request_id.clone(),
    });

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Log every response; failures carry the attached [`ErrorReport`].
///
/// Edge credentials are logged as present or absent, never by value.
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let edge_key = request.headers().contains_key(PURGE_KEY_HEADER);
    let edge_cdn = request.headers().contains_key(CDN_DOMAIN_HEADER);
    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();
    let started = Instant::now();

    let mut response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis();

    if !status.is_client_error() && !status.is_server_error() {
        debug!(
            target: "cloudcache::http::response",
            status = status.as_u16(),
            method = %method,
            path,
            elapsed_ms,
            edge_key,
            edge_cdn,
            request_id,
            "request served"
        );
        return response;
    }

    let (source, messages) = match response.extensions_mut().remove::<ErrorReport>() {
        Some(report) => (report.source, report.messages),
        None => ("unknown", Vec::new()),
    };

    if status.is_server_error() {
        error!(
            target: "cloudcache::http::response",
            status = status.as_u16(),
            method = %method,
            path,
            elapsed_ms,
            edge_key,
            source,
            chain = ?messages,
            request_id,
            "request failed"
        );
    } else {
        warn!(
            target: "cloudcache::http::response",
            status = status.as_u16(),
            method = %method,
            path,
            elapsed_ms,
            edge_key,
            source,
            chain = ?messages,
            request_id,
            "request rejected"
        );
    }

    response
}
