//! Rewrites same-origin image URLs into sharded CDN URLs.

use metrics::counter;
use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::{Captures, Regex};
use tracing::debug;
use url::{Url, form_urlencoded};

use crate::application::repos::AttachmentRepo;
use crate::domain::image::{
    CanonicalImagePath, Dimensions, ImageReference, is_supported, parse_size_suffix,
};
use crate::domain::shard::ShardAssignment;
use crate::domain::site::SiteOrigin;

use super::attachments::AttachmentCache;

const METRIC_REWRITTEN: &str = "cloudcache_cdn_urls_rewritten_total";

static STYLE_BACKGROUND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)background(?:-image)?\s*:\s*url\(\s*(['"]?)([^'")]*)['"]?\s*\)"#)
        .unwrap_or_else(|err| panic!("invalid background pattern: {err}"))
});

/// One candidate of a computed `srcset`.
#[derive(Debug, Clone, PartialEq)]
pub struct SrcsetSource {
    pub url: String,
    /// `w` or `x`.
    pub descriptor: char,
    pub value: f32,
}

/// URL rewriter bound to one site and one cycle's attachment cache.
#[derive(Clone, Copy)]
pub struct CdnRewriter<'a> {
    origin: &'a SiteOrigin,
    cdn_domain: Option<&'a str>,
    attachments: &'a dyn AttachmentRepo,
    cache: &'a AttachmentCache,
}

impl<'a> CdnRewriter<'a> {
    /// An empty CDN domain counts as none.
    pub fn new(
        origin: &'a SiteOrigin,
        cdn_domain: Option<&'a str>,
        attachments: &'a dyn AttachmentRepo,
        cache: &'a AttachmentCache,
    ) -> Self {
        Self {
            origin,
            cdn_domain: cdn_domain.map(str::trim).filter(|domain| !domain.is_empty()),
            attachments,
            cache,
        }
    }

    pub fn origin(&self) -> &SiteOrigin {
        self.origin
    }

    pub fn cdn_domain(&self) -> Option<&str> {
        self.cdn_domain
    }

    pub(crate) fn attachments(&self) -> &dyn AttachmentRepo {
        self.attachments
    }

    /// CDN URL for `url`, or `url` itself when it is not a same-origin image.
    ///
    /// Without a CDN domain the URL is only made absolute.
    pub fn rewrite_url(&self, url: &str) -> String {
        let Some(absolute) = self.absolute(url) else {
            return url.to_string();
        };
        let Ok(parsed) = Url::parse(&absolute) else {
            return url.to_string();
        };
        if !is_supported(parsed.path())
            || !self.origin.matches_host(parsed.host_str().unwrap_or_default())
        {
            return url.to_string();
        }
        let Some(cdn_domain) = self.cdn_domain else {
            return absolute;
        };

        let reference = ImageReference::from_url(&parsed);
        let canonical = self.canonicalize(&reference, &absolute);
        let shard = ShardAssignment::for_host(&reference.host);

        let mut cdn_url = format!(
            "https://{}/{}{}",
            shard.hostname(cdn_domain),
            reference.host,
            canonical.path
        );
        if let Some(query) = self.query(reference.query.as_deref(), canonical.resize) {
            cdn_url.push('?');
            cdn_url.push_str(&query);
        }
        counter!(METRIC_REWRITTEN).increment(1);
        cdn_url
    }

    /// Rewrite a comma-separated list of `url [descriptor]` entries, as found
    /// in `src`, `srcset` and their lazy-loading variants.
    pub fn rewrite_attribute_list(&self, value: &str) -> String {
        value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (url, descriptor) = match entry.split_once(char::is_whitespace) {
                    Some((url, descriptor)) => (url, descriptor.trim()),
                    None => (entry, ""),
                };
                let rewritten = self.rewrite_url(url);
                if descriptor.is_empty() {
                    rewritten
                } else {
                    format!("{rewritten} {descriptor}")
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Rewrite only the URL inside `background:` / `background-image:`
    /// declarations; the rest of the style is left as written.
    pub fn rewrite_style(&self, style: &str) -> String {
        STYLE_BACKGROUND
            .replace_all(style, |captures: &Captures<'_>| {
                let declaration = &captures[0];
                let url = &captures[2];
                if url.trim().is_empty() {
                    return declaration.to_string();
                }
                declaration.replacen(url, &self.rewrite_url(url), 1)
            })
            .into_owned()
    }

    pub fn rewrite_srcset_sources(&self, sources: &[SrcsetSource]) -> Vec<SrcsetSource> {
        sources
            .iter()
            .map(|source| SrcsetSource {
                url: self.rewrite_url(&source.url),
                ..source.clone()
            })
            .collect()
    }

    /// Add `//i0.<cdn>` through `//i3.<cdn>` to the DNS prefetch hints.
    pub fn dns_prefetch_hints(&self, mut hints: Vec<String>) -> Vec<String> {
        let Some(cdn_domain) = self.cdn_domain else {
            return hints;
        };
        for shard in ShardAssignment::all() {
            let hint = format!("//{}", shard.hostname(cdn_domain));
            if !hints.contains(&hint) {
                hints.push(hint);
            }
        }
        hints
    }

    fn absolute(&self, url: &str) -> Option<String> {
        let url = url.trim();
        if url.is_empty() {
            return None;
        }
        let scheme = self.origin.scheme();
        let absolute = if let Some(rest) = url.strip_prefix("//") {
            format!("{scheme}://{rest}")
        } else if url.starts_with('/') {
            format!("{}{url}", self.origin.home_url())
        } else if has_http_scheme(url) {
            url.to_string()
        } else {
            format!("{scheme}://{}", url.trim_start_matches(['/', '\\']))
        };
        Some(absolute)
    }

    /// Strip a `-<w>x<h>` suffix unless the file carrying it is the
    /// attachment's original upload.
    fn canonicalize(&self, reference: &ImageReference, lookup_url: &str) -> CanonicalImagePath {
        let filename = reference.filename();
        let Some(suffix) = parse_size_suffix(filename) else {
            return CanonicalImagePath::unchanged(&reference.path);
        };

        let decoded = percent_decode_str(filename).decode_utf8_lossy();
        if self.is_original_upload(lookup_url, &decoded) {
            return CanonicalImagePath::unchanged(&reference.path);
        }

        CanonicalImagePath {
            path: format!("{}{}", reference.directory(), suffix.stripped_name()),
            resize: Some(suffix.dimensions),
        }
    }

    fn is_original_upload(&self, lookup_url: &str, filename: &str) -> bool {
        let Some(id) = self.cache.resolve(lookup_url, self.attachments) else {
            return false;
        };
        match self.attachments.metadata(id) {
            Ok(Some(meta)) if !meta.file.is_empty() => meta.basename() == filename,
            Ok(_) => false,
            Err(err) => {
                debug!(attachment = id, error = %err, "Attachment metadata unavailable");
                false
            }
        }
    }

    /// Original query kept verbatim, followed by `resize` and `ssl` unless
    /// the original already names them.
    fn query(&self, original: Option<&str>, resize: Option<Dimensions>) -> Option<String> {
        let original_keys: Vec<String> = original
            .map(|query| {
                form_urlencoded::parse(query.as_bytes())
                    .map(|(key, _)| key.into_owned())
                    .collect()
            })
            .unwrap_or_default();

        let mut synthetic = form_urlencoded::Serializer::new(String::new());
        let mut added = false;
        if let Some(size) = resize.filter(|size| size.is_positive())
            && !original_keys.iter().any(|key| key == "resize")
        {
            synthetic.append_pair("resize", &format!("{},{}", size.width, size.height));
            added = true;
        }
        if self.origin.secure() && !original_keys.iter().any(|key| key == "ssl") {
            synthetic.append_pair("ssl", "1");
            added = true;
        }
        let synthetic = synthetic.finish();

        match (original, added) {
            (Some(original), true) => Some(format!("{original}&{synthetic}")),
            (Some(original), false) => Some(original.to_string()),
            (None, true) => Some(synthetic),
            (None, false) => None,
        }
    }
}

fn has_http_scheme(url: &str) -> bool {
    ["http://", "https://"].iter().any(|scheme| {
        url.get(..scheme.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(scheme))
    })
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use super::*;
    use crate::application::repos::RepoError;
    use crate::domain::image::{AttachmentId, AttachmentMeta};

    const CDN: &str = "cdn.example.net";

    #[derive(Default)]
    struct Attachments {
        by_url: HashMap<String, AttachmentId>,
        meta: HashMap<AttachmentId, AttachmentMeta>,
    }

    impl Attachments {
        fn with(mut self, url: &str, id: AttachmentId, file: &str) -> Self {
            self.by_url.insert(url.to_string(), id);
            self.meta.insert(
                id,
                AttachmentMeta {
                    file: file.to_string(),
                    width: 1200,
                    height: 800,
                    sizes: BTreeMap::new(),
                },
            );
            self
        }
    }

    impl AttachmentRepo for Attachments {
        fn attachment_id_for_url(&self, url: &str) -> Result<Option<AttachmentId>, RepoError> {
            Ok(self.by_url.get(url).copied())
        }

        fn metadata(&self, id: AttachmentId) -> Result<Option<AttachmentMeta>, RepoError> {
            Ok(self.meta.get(&id).cloned())
        }
    }

    fn origin() -> SiteOrigin {
        SiteOrigin::new("https://example.com", true).expect("origin")
    }

    fn shard_host() -> String {
        ShardAssignment::for_host("example.com").hostname(CDN)
    }

    #[test]
    fn same_origin_jpeg_goes_to_its_shard() {
        let origin = origin();
        let cache = AttachmentCache::new();
        let repo = Attachments::default();
        let rewriter = CdnRewriter::new(&origin, Some(CDN), &repo, &cache);

        let rewritten = rewriter.rewrite_url("https://example.com/wp-content/uploads/cat.jpg?v=3");
        assert_eq!(
            rewritten,
            format!(
                "https://{}/example.com/wp-content/uploads/cat.jpg?v=3&ssl=1",
                shard_host()
            )
        );
    }

    #[test]
    fn foreign_hosts_and_other_types_are_untouched() {
        let origin = origin();
        let cache = AttachmentCache::new();
        let repo = Attachments::default();
        let rewriter = CdnRewriter::new(&origin, Some(CDN), &repo, &cache);

        for url in [
            "https://other.org/cat.jpg",
            "https://cdn.example.com/cat.jpg",
            "https://example.com/logo.svg",
            "https://example.com/scan.bmp",
            "https://example.com/about/",
            "",
            "data:image/png;base64,AAAA",
        ] {
            assert_eq!(rewriter.rewrite_url(url), url);
        }
    }

    #[test]
    fn relative_and_protocol_relative_urls_are_resolved() {
        let origin = origin();
        let cache = AttachmentCache::new();
        let repo = Attachments::default();
        let rewriter = CdnRewriter::new(&origin, Some(CDN), &repo, &cache);
        let expected = format!("https://{}/example.com/uploads/cat.png?ssl=1", shard_host());

        assert_eq!(rewriter.rewrite_url("/uploads/cat.png"), expected);
        assert_eq!(rewriter.rewrite_url("//example.com/uploads/cat.png"), expected);
        assert_eq!(rewriter.rewrite_url("example.com/uploads/cat.png"), expected);
    }

    #[test]
    fn www_host_matches_but_keeps_its_name_in_the_path() {
        let origin = origin();
        let cache = AttachmentCache::new();
        let repo = Attachments::default();
        let rewriter = CdnRewriter::new(&origin, Some(CDN), &repo, &cache);

        let rewritten = rewriter.rewrite_url("https://www.example.com/a.webp");
        let shard = ShardAssignment::for_host("www.example.com").hostname(CDN);
        assert_eq!(rewritten, format!("https://{shard}/www.example.com/a.webp?ssl=1"));
    }

    #[test]
    fn generated_thumbnail_is_stripped_with_resize_hint() {
        let origin = origin();
        let cache = AttachmentCache::new();
        let url = "https://example.com/wp-content/uploads/2024/05/sunset-300x200.jpg";
        let repo = Attachments::default().with(url, 11, "2024/05/sunset.jpg");
        let rewriter = CdnRewriter::new(&origin, Some(CDN), &repo, &cache);

        assert_eq!(
            rewriter.rewrite_url(url),
            format!(
                "https://{}/example.com/wp-content/uploads/2024/05/sunset.jpg?resize=300%2C200&ssl=1",
                shard_host()
            )
        );
    }

    #[test]
    fn original_named_like_a_thumbnail_is_kept() {
        let origin = origin();
        let cache = AttachmentCache::new();
        let url = "https://example.com/wp-content/uploads/2024/05/photo-300x200.jpg";
        let repo = Attachments::default().with(url, 12, "2024/05/photo-300x200.jpg");
        let rewriter = CdnRewriter::new(&origin, Some(CDN), &repo, &cache);

        assert_eq!(
            rewriter.rewrite_url(url),
            format!(
                "https://{}/example.com/wp-content/uploads/2024/05/photo-300x200.jpg?ssl=1",
                shard_host()
            )
        );
    }

    #[test]
    fn unknown_attachment_still_strips_suffix() {
        let origin = origin();
        let cache = AttachmentCache::new();
        let repo = Attachments::default();
        let rewriter = CdnRewriter::new(&origin, Some(CDN), &repo, &cache);

        let rewritten = rewriter.rewrite_url("https://example.com/u/My%20Photo-640x480.JPG");
        assert_eq!(
            rewritten,
            format!(
                "https://{}/example.com/u/My%20Photo.JPG?resize=640%2C480&ssl=1",
                shard_host()
            )
        );
    }

    #[test]
    fn original_query_wins_on_collision() {
        let origin = origin();
        let cache = AttachmentCache::new();
        let repo = Attachments::default();
        let rewriter = CdnRewriter::new(&origin, Some(CDN), &repo, &cache);

        let rewritten = rewriter.rewrite_url("https://example.com/u/a-10x20.gif?ssl=0&resize=5,5");
        assert!(rewritten.ends_with("/example.com/u/a.gif?ssl=0&resize=5,5"));
    }

    #[test]
    fn insecure_site_adds_no_ssl_flag() {
        let origin = SiteOrigin::new("http://example.com", false).expect("origin");
        let cache = AttachmentCache::new();
        let repo = Attachments::default();
        let rewriter = CdnRewriter::new(&origin, Some(CDN), &repo, &cache);

        let rewritten = rewriter.rewrite_url("http://example.com/u/a.jpg");
        assert_eq!(rewritten, format!("https://{}/example.com/u/a.jpg", shard_host()));
    }

    #[test]
    fn without_cdn_domain_only_normalizes() {
        let origin = origin();
        let cache = AttachmentCache::new();
        let repo = Attachments::default();
        let rewriter = CdnRewriter::new(&origin, Some("  "), &repo, &cache);

        assert_eq!(
            rewriter.rewrite_url("/uploads/cat.jpg"),
            "https://example.com/uploads/cat.jpg"
        );
        assert_eq!(rewriter.dns_prefetch_hints(vec!["//fonts.example".into()]), [
            "//fonts.example"
        ]);
    }

    #[test]
    fn attribute_lists_keep_descriptors() {
        let origin = origin();
        let cache = AttachmentCache::new();
        let repo = Attachments::default();
        let rewriter = CdnRewriter::new(&origin, Some(CDN), &repo, &cache);
        let shard = shard_host();

        let rewritten = rewriter.rewrite_attribute_list(
            "https://example.com/a.jpg 300w,https://other.org/b.jpg   2x, ,/c.png",
        );
        assert_eq!(
            rewritten,
            format!(
                "https://{shard}/example.com/a.jpg?ssl=1 300w, https://other.org/b.jpg 2x, https://{shard}/example.com/c.png?ssl=1"
            )
        );
    }

    #[test]
    fn style_rewrites_only_background_urls() {
        let origin = origin();
        let cache = AttachmentCache::new();
        let repo = Attachments::default();
        let rewriter = CdnRewriter::new(&origin, Some(CDN), &repo, &cache);
        let shard = shard_host();

        let style = "color: red; background-image: url('https://example.com/bg.jpg'); \
                     BACKGROUND: url(/hero.png) no-repeat; mask: url(/m.png)";
        assert_eq!(
            rewriter.rewrite_style(style),
            format!(
                "color: red; background-image: url('https://{shard}/example.com/bg.jpg?ssl=1'); \
                 BACKGROUND: url(https://{shard}/example.com/hero.png?ssl=1) no-repeat; mask: url(/m.png)"
            )
        );
        assert_eq!(rewriter.rewrite_style("background: url()"), "background: url()");
    }

    #[test]
    fn srcset_sources_keep_descriptors() {
        let origin = origin();
        let cache = AttachmentCache::new();
        let repo = Attachments::default();
        let rewriter = CdnRewriter::new(&origin, Some(CDN), &repo, &cache);

        let sources = [
            SrcsetSource {
                url: "https://example.com/a.jpg".into(),
                descriptor: 'w',
                value: 640.0,
            },
            SrcsetSource {
                url: "https://other.org/b.jpg".into(),
                descriptor: 'x',
                value: 2.0,
            },
        ];
        let rewritten = rewriter.rewrite_srcset_sources(&sources);
        assert!(rewritten[0].url.starts_with("https://i"));
        assert_eq!(rewritten[0].descriptor, 'w');
        assert_eq!(rewritten[1], sources[1]);
    }

    #[test]
    fn prefetch_hints_are_added_once() {
        let origin = origin();
        let cache = AttachmentCache::new();
        let repo = Attachments::default();
        let rewriter = CdnRewriter::new(&origin, Some(CDN), &repo, &cache);

        let hints = rewriter.dns_prefetch_hints(vec!["//i1.cdn.example.net".into()]);
        assert_eq!(
            hints,
            [
                "//i1.cdn.example.net",
                "//i0.cdn.example.net",
                "//i2.cdn.example.net",
                "//i3.cdn.example.net",
            ]
        );
    }

    #[test]
    fn attachment_lookups_are_cached_per_url() {
        let origin = origin();
        let cache = AttachmentCache::new();
        let url = "https://example.com/u/p-1x1.jpg";
        let repo = Attachments::default().with(url, 1, "u/p.jpg");
        let rewriter = CdnRewriter::new(&origin, Some(CDN), &repo, &cache);

        let first = rewriter.rewrite_url(url);
        let second = rewriter.rewrite_url(url);
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }
}
