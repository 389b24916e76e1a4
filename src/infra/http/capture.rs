//! Receives the signed round trip and stores the credential the edge
//! injected into it.

use axum::{
    Form,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::application::error::ErrorReport;
use crate::infra::credentials::{CredentialKind, header_value, persist_credential};

use super::HttpState;

const SOURCE: &str = "infra::http::capture";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct CaptureForm {
    generate_hash: Option<String>,
    generate_cdn_domain: Option<String>,
    nonce: Option<String>,
}

impl CaptureForm {
    fn kind(&self) -> Option<CredentialKind> {
        if self.generate_hash.is_some() {
            Some(CredentialKind::PurgeKey)
        } else if self.generate_cdn_domain.is_some() {
            Some(CredentialKind::CdnDomain)
        } else {
            None
        }
    }
}

/// Answers with an empty body whether or not anything was stored.
pub(super) async fn capture_credential(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Form(form): Form<CaptureForm>,
) -> Response {
    let Some(kind) = form.kind() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let nonce = form.nonce.as_deref().unwrap_or_default();
    if !state.signer.verify(kind.nonce_action(), nonce) {
        warn!(kind = kind.request_field(), "Credential capture with invalid nonce");
        return StatusCode::OK.into_response();
    }

    let Some(value) = header_value(&headers, kind.header()) else {
        debug!(header = kind.header(), "Credential header absent");
        return StatusCode::OK.into_response();
    };

    match persist_credential(&state.store, kind, &value, state.origin.host()).await {
        Ok(()) => {
            info!(kind = kind.request_field(), "Credential captured");
            StatusCode::OK.into_response()
        }
        Err(err) => {
            let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
            ErrorReport::from_error(SOURCE, &err).attach(&mut response);
            response
        }
    }
}
