//! The site's own origin: home URL, canonical host and transport security.

use url::Url;

use super::error::DomainError;
use super::purge::{PurgeTarget, WILDCARD_MARKER};

const DEFAULT_UPLOADS_PATH: &str = "/wp-content/uploads";

/// Canonical description of the site the purge and CDN engines act for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteOrigin {
    home_url: String,
    host: String,
    secure: bool,
    uploads_url: String,
}

impl SiteOrigin {
    /// Build an origin from the configured home URL.
    ///
    /// The home URL may carry a subdirectory (`https://example.com/blog`); a
    /// trailing slash is dropped so paths can be appended verbatim.
    pub fn new(home_url: &str, secure: bool) -> Result<Self, DomainError> {
        let trimmed = home_url.trim().trim_end_matches('/');
        let parsed = Url::parse(trimmed)
            .map_err(|err| DomainError::validation(format!("invalid home URL `{trimmed}`: {err}")))?;
        let host = parsed
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| DomainError::validation(format!("home URL `{trimmed}` has no host")))?;

        Ok(Self {
            home_url: trimmed.to_string(),
            host: normalize_host(host),
            secure,
            uploads_url: format!("{trimmed}{DEFAULT_UPLOADS_PATH}"),
        })
    }

    /// Override the public base URL of the uploads directory.
    pub fn with_uploads_url(mut self, uploads_url: &str) -> Self {
        self.uploads_url = uploads_url.trim().trim_end_matches('/').to_string();
        self
    }

    pub fn home_url(&self) -> &str {
        &self.home_url
    }

    /// Lowercased host without a leading `www.` label.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn uploads_url(&self) -> &str {
        &self.uploads_url
    }

    pub fn scheme(&self) -> &'static str {
        if self.secure { "https" } else { "http" }
    }

    /// `<home>/` as linked from the front end.
    pub fn home_page(&self) -> String {
        format!("{}/", self.home_url)
    }

    /// Pattern under the home URL, e.g. `<home>/.*sitemap.*`.
    pub fn pattern(&self, suffix: &str) -> PurgeTarget {
        PurgeTarget::wildcard(format!("{}/{suffix}", self.home_url))
    }

    /// Everything below the home URL, including a subdirectory install.
    pub fn home_wildcard(&self) -> PurgeTarget {
        self.pattern(WILDCARD_MARKER)
    }

    /// Everything served for the origin host.
    pub fn full_purge_target(&self) -> PurgeTarget {
        PurgeTarget::wildcard(format!(
            "{}://{}/{WILDCARD_MARKER}",
            self.scheme(),
            self.host
        ))
    }

    /// Absolute URL for an operator-supplied URL or path. Anything that is
    /// not a valid `http(s)` URL with a host is taken as a path below the
    /// home URL.
    pub fn resolve_url(&self, url_or_path: &str) -> String {
        let trimmed = url_or_path.trim();
        let absolute = Url::parse(trimmed)
            .is_ok_and(|url| matches!(url.scheme(), "http" | "https") && url.has_host());
        if absolute {
            trimmed.to_string()
        } else {
            format!("{}/{}", self.home_url, trimmed.trim_start_matches('/'))
        }
    }

    /// Whether `host` names this site, ignoring case and a leading `www.`.
    ///
    /// An empty host is a relative reference and therefore same-origin.
    pub fn matches_host(&self, host: &str) -> bool {
        host.is_empty() || normalize_host(host) == self.host
    }
}

/// Lowercase a host and strip one leading `www.` label.
pub fn normalize_host(host: &str) -> String {
    let lower = host.to_ascii_lowercase();
    match lower.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => lower,
    }
}
