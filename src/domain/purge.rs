//! Purge targets and the batched request assembled from them.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Pattern marker understood by the purge service as "anything".
pub const WILDCARD_MARKER: &str = ".*";

/// How the purge service should match a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurgeMethod {
    /// Literal path match.
    Exact,
    /// Regular-expression match on the path.
    Wildcard,
}

impl PurgeMethod {
    /// Value of the `method` field on the wire.
    pub fn as_wire(self) -> &'static str {
        match self {
            PurgeMethod::Exact => "default",
            PurgeMethod::Wildcard => "regex",
        }
    }
}

/// A URL or URL pattern to invalidate, tagged with its match method.
///
/// The method is chosen by whoever builds the target; it is never inferred
/// from the string, so a literal path containing `.*` stays exact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PurgeTarget {
    url: String,
    method: PurgeMethod,
}

impl PurgeTarget {
    pub fn exact(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: PurgeMethod::Exact,
        }
    }

    pub fn wildcard(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: PurgeMethod::Wildcard,
        }
    }

    /// Wildcard covering everything beneath the path of `base`. Query and
    /// fragment are dropped and the path gains a trailing slash when it
    /// lacks one.
    pub fn beneath(base: &str) -> Self {
        let mut pattern = match Url::parse(base) {
            Ok(url) if url.has_host() => {
                format!("{}{}", url.origin().ascii_serialization(), url.path())
            }
            _ => base
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_string(),
        };
        if !pattern.ends_with('/') {
            pattern.push('/');
        }
        pattern.push_str(WILDCARD_MARKER);
        Self::wildcard(pattern)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> PurgeMethod {
        self.method
    }

    /// Host named by the target when it is an absolute URL.
    pub fn host(&self) -> Option<String> {
        Url::parse(&self.url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
    }

    /// Path plus query, the form the purge service keys its cache on.
    pub fn request_path(&self) -> String {
        match Url::parse(&self.url) {
            Ok(url) => match url.query() {
                Some(query) if !query.is_empty() => format!("{}?{query}", url.path()),
                _ => url.path().to_string(),
            },
            Err(_) => self.url.clone(),
        }
    }
}

impl fmt::Display for PurgeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.url, self.method.as_wire())
    }
}

/// Where the purge is issued from; reported to the purge service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionContext {
    Cli,
    Http,
}

impl ExecutionContext {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionContext::Cli => "cli",
            ExecutionContext::Http => "http",
        }
    }
}

/// One batched invalidation for a single host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeRequest {
    host: String,
    targets: Vec<PurgeTarget>,
}

impl PurgeRequest {
    /// Build a request, dropping targets whose URL string was already seen.
    /// The first occurrence keeps its position and method.
    pub fn new(host: impl Into<String>, targets: impl IntoIterator<Item = PurgeTarget>) -> Self {
        let mut seen = HashSet::new();
        let targets = targets
            .into_iter()
            .filter(|target| seen.insert(target.url.clone()))
            .collect();
        Self {
            host: host.into(),
            targets,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn targets(&self) -> &[PurgeTarget] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_methods() {
        assert_eq!(PurgeMethod::Exact.as_wire(), "default");
        assert_eq!(PurgeMethod::Wildcard.as_wire(), "regex");
    }

    #[test]
    fn literal_dot_star_stays_exact() {
        let target = PurgeTarget::exact("https://example.com/odd.*name/");
        assert_eq!(target.method(), PurgeMethod::Exact);
    }

    #[test]
    fn beneath_adds_separator_once() {
        assert_eq!(
            PurgeTarget::beneath("https://example.com/themes").url(),
            "https://example.com/themes/.*"
        );
        assert_eq!(
            PurgeTarget::beneath("https://example.com/themes/").url(),
            "https://example.com/themes/.*"
        );
    }

    #[test]
    fn beneath_drops_query_and_fragment() {
        let target = PurgeTarget::beneath("https://example.com/shop?page=2");
        assert_eq!(target.url(), "https://example.com/shop/.*");
        assert_eq!(target.request_path(), "/shop/.*");
        assert_eq!(target.method(), PurgeMethod::Wildcard);

        assert_eq!(
            PurgeTarget::beneath("http://example.com:8080/a/#top").url(),
            "http://example.com:8080/a/.*"
        );
        assert_eq!(PurgeTarget::beneath("/shop?page=2").url(), "/shop/.*");
    }

    #[test]
    fn request_path_keeps_query() {
        let target = PurgeTarget::exact("https://example.com/feed/?post_type=product");
        assert_eq!(target.request_path(), "/feed/?post_type=product");
        assert_eq!(target.host().as_deref(), Some("example.com"));

        let pattern = PurgeTarget::wildcard("https://example.com/.*sitemap.*");
        assert_eq!(pattern.request_path(), "/.*sitemap.*");
    }

    #[test]
    fn request_path_passes_bare_paths_through() {
        let target = PurgeTarget::exact("/wp-content/themes/style.css");
        assert_eq!(target.request_path(), "/wp-content/themes/style.css");
        assert!(target.host().is_none());
    }

    #[test]
    fn request_dedupes_by_url_string() {
        let request = PurgeRequest::new(
            "example.com",
            [
                PurgeTarget::exact("https://example.com/a/"),
                PurgeTarget::exact("https://example.com/b/"),
                PurgeTarget::wildcard("https://example.com/a/"),
            ],
        );
        assert_eq!(request.len(), 2);
        assert_eq!(request.targets()[0].method(), PurgeMethod::Exact);
        assert_eq!(request.targets()[1].url(), "https://example.com/b/");
    }
}
