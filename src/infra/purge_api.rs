//! Client for the CloudCache purge service.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::application::repos::{CredentialSource, DispatchReceipt, PurgeDispatcher, PurgeError};
use crate::domain::purge::{ExecutionContext, PurgeRequest};

use super::error::InfraError;

pub const DEFAULT_PURGE_ENDPOINT: &str = "https://cloudcache-api.blizhost.com/purge/";
pub const DEFAULT_PURGE_TIMEOUT: Duration = Duration::from_secs(15);

const METRIC_DISPATCH: &str = "cloudcache_purge_dispatch_total";
const METRIC_DISPATCH_MS: &str = "cloudcache_purge_dispatch_ms";

#[derive(Debug, Clone)]
pub struct PurgeApiConfig {
    pub endpoint: String,
    pub timeout: Duration,
    pub verify_tls: bool,
    pub enabled: bool,
    /// Local hostname reported as `server`.
    pub server_hostname: String,
    /// When set, purging only runs on servers whose hostname contains it.
    pub required_host_marker: Option<String>,
    pub user: String,
    pub plugin_version: String,
}

impl PurgeApiConfig {
    fn host_allowed(&self) -> bool {
        match self.required_host_marker.as_deref() {
            Some(marker) if !marker.is_empty() => self.server_hostname.contains(marker),
            _ => true,
        }
    }
}

/// Account name from a document root such as `/home/<user>/public_html`.
pub fn user_from_document_root(root: &str) -> Option<String> {
    root.split('/')
        .nth(2)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

/// Hostname from `HOSTNAME`, then `/etc/hostname`.
pub fn detect_hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME")
        && !name.trim().is_empty()
    {
        return name.trim().to_string();
    }
    std::fs::read_to_string("/etc/hostname")
        .map(|name| name.trim().to_string())
        .unwrap_or_default()
}

#[derive(Debug, Serialize)]
struct WireTarget<'a> {
    url: String,
    method: &'a str,
}

#[derive(Clone)]
pub struct PurgeApiClient {
    client: reqwest::Client,
    config: PurgeApiConfig,
    context: ExecutionContext,
    credentials: Arc<dyn CredentialSource>,
}

impl PurgeApiClient {
    pub fn new(
        config: PurgeApiConfig,
        context: ExecutionContext,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, InfraError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("cloudcache/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|err| InfraError::http(format!("failed to build purge client: {err}")))?;
        Ok(Self {
            client,
            config,
            context,
            credentials,
        })
    }

    /// Same client and settings, issuing from `context` with `credentials`.
    pub fn with_context(
        &self,
        context: ExecutionContext,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        Self {
            client: self.client.clone(),
            config: self.config.clone(),
            context,
            credentials,
        }
    }

    fn encode_targets(request: &PurgeRequest) -> Result<String, PurgeError> {
        let targets: Vec<WireTarget<'_>> = request
            .targets()
            .iter()
            .map(|target| WireTarget {
                url: target.request_path(),
                method: target.method().as_wire(),
            })
            .collect();
        serde_json::to_string(&targets).map_err(|err| PurgeError::Encode(err.to_string()))
    }
}

#[async_trait]
impl PurgeDispatcher for PurgeApiClient {
    #[instrument(skip_all, fields(host = %request.host(), targets = request.len()))]
    async fn dispatch(&self, request: &PurgeRequest) -> Result<DispatchReceipt, PurgeError> {
        if !self.config.enabled {
            return Err(PurgeError::Disabled);
        }
        if !self.config.host_allowed() {
            debug!(
                server = %self.config.server_hostname,
                "Server is not on the CloudCache network"
            );
            return Err(PurgeError::Disabled);
        }
        let Some(key) = self.credentials.purge_key().await else {
            return Err(PurgeError::MissingCredential);
        };

        let urls = Self::encode_targets(request)?;
        let form = [
            ("urls", urls.as_str()),
            ("user", self.config.user.as_str()),
            ("host", request.host()),
            ("key", key.as_str()),
            ("server", self.config.server_hostname.as_str()),
            ("phpsapi", self.context.as_str()),
            ("plugin_version", self.config.plugin_version.as_str()),
        ];

        let started = Instant::now();
        let result = self
            .client
            .post(&self.config.endpoint)
            .form(&form)
            .send()
            .await;
        histogram!(METRIC_DISPATCH_MS).record(started.elapsed().as_secs_f64() * 1000.0);

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                counter!(METRIC_DISPATCH, "result" => "transport_error").increment(1);
                return Err(PurgeError::Transport(err.to_string()));
            }
        };
        let status = response.status();
        if !status.is_success() {
            counter!(METRIC_DISPATCH, "result" => "rejected").increment(1);
            return Err(PurgeError::Rejected {
                status: status.as_u16(),
            });
        }

        counter!(METRIC_DISPATCH, "result" => "ok").increment(1);
        info!(status = status.as_u16(), "Purge request accepted");
        Ok(DispatchReceipt {
            status: status.as_u16(),
            target_count: request.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use httpmock::MockServer;

    use super::*;
    use crate::domain::purge::PurgeTarget;
    use crate::infra::credentials::HeaderCredentials;
    use crate::infra::credentials::OverrideCredentials;

    fn config(endpoint: String) -> PurgeApiConfig {
        PurgeApiConfig {
            endpoint,
            timeout: Duration::from_secs(5),
            verify_tls: true,
            enabled: true,
            server_hostname: "web01.blizhost.com".into(),
            required_host_marker: Some("blizhost".into()),
            user: "alice".into(),
            plugin_version: "4.0.0".into(),
        }
    }

    fn credentials(key: Option<&str>) -> Arc<dyn CredentialSource> {
        let inner: Arc<dyn CredentialSource> = Arc::new(HeaderCredentials::default());
        Arc::new(OverrideCredentials::new(key.map(str::to_string), None, inner))
    }

    fn request() -> PurgeRequest {
        PurgeRequest::new(
            "example.com",
            vec![
                PurgeTarget::exact("https://example.com/hello/?amp=1"),
                PurgeTarget::wildcard("https://example.com/.*sitemap.*"),
            ],
        )
    }

    #[test]
    fn extracts_user_from_document_root() {
        assert_eq!(
            user_from_document_root("/home/alice/public_html").as_deref(),
            Some("alice")
        );
        assert_eq!(user_from_document_root("/srv"), None);
        assert_eq!(user_from_document_root(""), None);
    }

    #[test]
    fn wire_targets_use_paths_and_methods() {
        let encoded = PurgeApiClient::encode_targets(&request()).expect("encode");
        assert_eq!(
            encoded,
            r#"[{"url":"/hello/?amp=1","method":"default"},{"url":"/.*sitemap.*","method":"regex"}]"#
        );
    }

    #[tokio::test]
    async fn posts_form_with_credential() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("POST")
                .path("/purge/")
                .form_urlencoded_tuple("host", "example.com")
                .form_urlencoded_tuple("key", "k-1")
                .form_urlencoded_tuple("user", "alice")
                .form_urlencoded_tuple("phpsapi", "cli");
            then.status(200).body("ok");
        });

        let client = PurgeApiClient::new(
            config(server.url("/purge/")),
            ExecutionContext::Cli,
            credentials(Some("k-1")),
        )
        .expect("client");
        let receipt = client.dispatch(&request()).await.expect("dispatch");

        mock.assert();
        assert_eq!(receipt.target_count, 2);
        assert_eq!(receipt.status, 200);
    }

    #[tokio::test]
    async fn skips_without_key_or_outside_network() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("POST").path("/purge/");
            then.status(200);
        });

        let missing = PurgeApiClient::new(
            config(server.url("/purge/")),
            ExecutionContext::Http,
            credentials(None),
        )
        .expect("client");
        assert!(matches!(
            missing.dispatch(&request()).await,
            Err(PurgeError::MissingCredential)
        ));

        let mut foreign = config(server.url("/purge/"));
        foreign.server_hostname = "laptop.local".into();
        let foreign = PurgeApiClient::new(foreign, ExecutionContext::Http, credentials(Some("k")))
            .expect("client");
        assert!(matches!(
            foreign.dispatch(&request()).await,
            Err(PurgeError::Disabled)
        ));

        mock.assert_hits(0);
    }

    #[tokio::test]
    async fn non_success_status_is_rejected() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("POST").path("/purge/");
            then.status(403);
        });

        let client = PurgeApiClient::new(
            config(server.url("/purge/")),
            ExecutionContext::Cli,
            credentials(Some("k")),
        )
        .expect("client");
        assert!(matches!(
            client.dispatch(&request()).await,
            Err(PurgeError::Rejected { status: 403 })
        ));
    }
}
