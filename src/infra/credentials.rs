//! Purge key and CDN domain acquisition.
//!
//! The edge injects both values as request headers on live traffic. Outside
//! live traffic they come from the transient store, refilled on a miss by a
//! signed POST back to the site that makes the edge inject them again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::application::repos::CredentialSource;

use super::error::InfraError;
use super::nonce::NonceSigner;
use super::store::FileStore;

pub const PURGE_KEY_HEADER: &str = "x-purge-key";
pub const CDN_DOMAIN_HEADER: &str = "x-cdn-domain";

/// Lifetime of a cached credential.
pub const CREDENTIAL_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    PurgeKey,
    CdnDomain,
}

impl CredentialKind {
    pub fn header(self) -> &'static str {
        match self {
            CredentialKind::PurgeKey => PURGE_KEY_HEADER,
            CredentialKind::CdnDomain => CDN_DOMAIN_HEADER,
        }
    }

    pub fn transient_key(self) -> &'static str {
        match self {
            CredentialKind::PurgeKey => "bliz_hash_transient",
            CredentialKind::CdnDomain => "bliz_domain_transient",
        }
    }

    pub fn option_key(self) -> &'static str {
        match self {
            CredentialKind::PurgeKey => "bliz_hash",
            CredentialKind::CdnDomain => "bliz_domain",
        }
    }

    /// Form flag that asks the site to capture this credential.
    pub fn request_field(self) -> &'static str {
        match self {
            CredentialKind::PurgeKey => "generate_hash",
            CredentialKind::CdnDomain => "generate_cdn_domain",
        }
    }

    pub fn nonce_action(self) -> &'static str {
        match self {
            CredentialKind::PurgeKey => "generate_hash_action",
            CredentialKind::CdnDomain => "generate_cdn_domain_action",
        }
    }
}

/// Durable record stored under `bliz_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeKeyRecord {
    pub hash: String,
    pub domain: String,
    pub timestamp: i64,
}

/// Durable record stored under `bliz_domain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdnDomainRecord {
    pub domain: String,
    pub site_domain: String,
    pub timestamp: i64,
}

/// Header value with surrounding whitespace and control characters removed.
pub fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?.to_str().ok()?;
    let cleaned: String = value.chars().filter(|ch| !ch.is_control()).collect();
    let cleaned = cleaned.trim();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

/// Credentials carried by the current inbound request.
#[derive(Debug, Clone, Default)]
pub struct HeaderCredentials {
    purge_key: Option<String>,
    cdn_domain: Option<String>,
}

impl HeaderCredentials {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            purge_key: header_value(headers, PURGE_KEY_HEADER),
            cdn_domain: header_value(headers, CDN_DOMAIN_HEADER),
        }
    }
}

#[async_trait]
impl CredentialSource for HeaderCredentials {
    async fn purge_key(&self) -> Option<String> {
        self.purge_key.clone()
    }

    async fn cdn_domain(&self) -> Option<String> {
        self.cdn_domain.clone()
    }
}

/// Save a captured credential to the transient store and its durable record.
pub async fn persist_credential(
    store: &FileStore,
    kind: CredentialKind,
    value: &str,
    site_domain: &str,
) -> Result<(), InfraError> {
    store
        .set_transient(kind.transient_key(), value, CREDENTIAL_TTL)
        .await?;
    let timestamp = OffsetDateTime::now_utc().unix_timestamp();
    match kind {
        CredentialKind::PurgeKey => {
            let record = PurgeKeyRecord {
                hash: value.to_string(),
                domain: site_domain.to_string(),
                timestamp,
            };
            store.update_option(kind.option_key(), &record).await
        }
        CredentialKind::CdnDomain => {
            let record = CdnDomainRecord {
                domain: value.to_string(),
                site_domain: site_domain.to_string(),
                timestamp,
            };
            store.update_option(kind.option_key(), &record).await
        }
    }
}

/// Asks the site to capture a fresh credential from the edge.
#[derive(Debug, Clone)]
pub struct RoundTripRefresher {
    client: reqwest::Client,
    home_page: String,
    signer: NonceSigner,
}

impl RoundTripRefresher {
    pub fn new(
        home_page: impl Into<String>,
        signer: NonceSigner,
        timeout: Duration,
        verify_tls: bool,
    ) -> Result<Self, InfraError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_tls)
            .build()
            .map_err(|err| InfraError::http(format!("failed to build refresh client: {err}")))?;
        Ok(Self {
            client,
            home_page: home_page.into(),
            signer,
        })
    }

    /// POST `<field>=1&nonce=<nonce>` to the home page. The response body is
    /// ignored; the capture side writes the store.
    pub async fn request(&self, kind: CredentialKind) -> Result<(), InfraError> {
        let nonce = self.signer.create(kind.nonce_action());
        let form = [(kind.request_field(), "1"), ("nonce", nonce.as_str())];
        let response = self
            .client
            .post(&self.home_page)
            .form(&form)
            .send()
            .await
            .map_err(|err| InfraError::http(err.to_string()))?;
        debug!(
            kind = kind.request_field(),
            status = response.status().as_u16(),
            "Credential refresh requested"
        );
        Ok(())
    }
}

/// Credentials read from the transient store, refreshed once on a miss.
#[derive(Debug, Clone)]
pub struct StoredCredentials {
    store: FileStore,
    refresher: Option<Arc<RoundTripRefresher>>,
}

impl StoredCredentials {
    pub fn new(store: FileStore, refresher: Option<Arc<RoundTripRefresher>>) -> Self {
        Self { store, refresher }
    }

    pub async fn get(&self, kind: CredentialKind) -> Option<String> {
        if let Some(value) = self.read(kind).await {
            return Some(value);
        }
        let refresher = self.refresher.as_ref()?;
        if let Err(err) = refresher.request(kind).await {
            warn!(kind = kind.request_field(), error = %err, "Credential refresh failed");
            return None;
        }
        let value = self.read(kind).await;
        if value.is_some() {
            info!(kind = kind.request_field(), "Credential refreshed");
        }
        value
    }

    async fn read(&self, kind: CredentialKind) -> Option<String> {
        match self.store.get_transient(kind.transient_key()).await {
            Ok(value) => value.filter(|value| !value.is_empty()),
            Err(err) => {
                warn!(key = kind.transient_key(), error = %err, "Transient read failed");
                None
            }
        }
    }
}

#[async_trait]
impl CredentialSource for StoredCredentials {
    async fn purge_key(&self) -> Option<String> {
        self.get(CredentialKind::PurgeKey).await
    }

    async fn cdn_domain(&self) -> Option<String> {
        self.get(CredentialKind::CdnDomain).await
    }
}

/// Fixed credentials from configuration take precedence over `inner`.
pub struct OverrideCredentials {
    purge_key: Option<String>,
    cdn_domain: Option<String>,
    inner: Arc<dyn CredentialSource>,
}

impl OverrideCredentials {
    pub fn new(
        purge_key: Option<String>,
        cdn_domain: Option<String>,
        inner: Arc<dyn CredentialSource>,
    ) -> Self {
        Self {
            purge_key,
            cdn_domain,
            inner,
        }
    }
}

#[async_trait]
impl CredentialSource for OverrideCredentials {
    async fn purge_key(&self) -> Option<String> {
        match &self.purge_key {
            Some(key) => Some(key.clone()),
            None => self.inner.purge_key().await,
        }
    }

    async fn cdn_domain(&self) -> Option<String> {
        match &self.cdn_domain {
            Some(domain) => Some(domain.clone()),
            None => self.inner.cdn_domain().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use httpmock::MockServer;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn header_values_are_trimmed() {
        let mut headers = HeaderMap::new();
        headers.insert(PURGE_KEY_HEADER, HeaderValue::from_static("  abc123 "));
        headers.insert(CDN_DOMAIN_HEADER, HeaderValue::from_static(""));
        let credentials = HeaderCredentials::from_headers(&headers);
        assert_eq!(credentials.purge_key.as_deref(), Some("abc123"));
        assert_eq!(credentials.cdn_domain, None);
    }

    #[tokio::test]
    async fn persisted_credential_is_readable() {
        let dir = TempDir::new().expect("tempdir");
        let store = FileStore::new(dir.path());
        persist_credential(&store, CredentialKind::CdnDomain, "cdn.example.net", "example.com")
            .await
            .expect("persist");

        let stored = StoredCredentials::new(store.clone(), None);
        assert_eq!(stored.cdn_domain().await.as_deref(), Some("cdn.example.net"));
        assert_eq!(stored.purge_key().await, None);

        let record: CdnDomainRecord = store
            .option("bliz_domain")
            .await
            .expect("read")
            .expect("record");
        assert_eq!(record.site_domain, "example.com");
    }

    #[tokio::test]
    async fn miss_triggers_one_signed_round_trip() {
        let server = MockServer::start();
        let refresh = server.mock(|when, then| {
            when.method("POST")
                .path("/")
                .form_urlencoded_tuple("generate_hash", "1");
            then.status(200);
        });

        let dir = TempDir::new().expect("tempdir");
        let refresher = RoundTripRefresher::new(
            server.url("/"),
            NonceSigner::new("secret"),
            Duration::from_secs(5),
            true,
        )
        .expect("client");
        let stored = StoredCredentials::new(FileStore::new(dir.path()), Some(Arc::new(refresher)));

        assert_eq!(stored.purge_key().await, None);
        refresh.assert();
    }

    #[tokio::test]
    async fn overrides_win() {
        let inner: Arc<dyn CredentialSource> = Arc::new(HeaderCredentials::default());
        let credentials = OverrideCredentials::new(Some("fixed".into()), None, inner);
        assert_eq!(credentials.purge_key().await.as_deref(), Some("fixed"));
        assert_eq!(credentials.cdn_domain().await, None);
    }
}
