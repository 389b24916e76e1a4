//! Streaming rewrite of image attributes inside HTML fragments.

use lol_html::{RewriteStrSettings, element, rewrite_str};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use super::rewriter::CdnRewriter;

/// Attributes that may carry image URLs, in processing order.
pub const IMAGE_ATTRIBUTES: [&str; 7] = [
    "src",
    "srcset",
    "data-src",
    "data-srcset",
    "data-lazyload",
    "data-src-rs-ref",
    "style",
];

static HAS_IMAGE_ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:src|srcset|data-src|data-srcset|data-lazyload|data-src-rs-ref|style)=")
        .unwrap_or_else(|err| panic!("invalid attribute pattern: {err}"))
});

/// Rewrite image URLs in every element of `html`.
///
/// Fragments without any candidate attribute, and fragments the parser
/// rejects, come back unchanged. Attributes are only re-serialized when their
/// value actually changed.
pub fn rewrite_html(rewriter: &CdnRewriter<'_>, html: &str) -> String {
    if html.is_empty() || !HAS_IMAGE_ATTRIBUTE.is_match(html) {
        return html.to_string();
    }

    let result = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("*", |el| {
                // Lazy loaders keep the placeholder in `src`.
                let lazy = el.has_attribute("data-lazyload") || el.has_attribute("data-src");
                for name in IMAGE_ATTRIBUTES {
                    if name == "src" && lazy {
                        continue;
                    }
                    let Some(raw) = el.get_attribute(name) else {
                        continue;
                    };
                    let value = decode_entities(&raw);
                    let rewritten = if name == "style" {
                        rewriter.rewrite_style(&value)
                    } else {
                        rewriter.rewrite_attribute_list(&value)
                    };
                    if rewritten != value {
                        el.set_attribute(name, &encode_ampersands(&rewritten))?;
                    }
                }
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    );

    match result {
        Ok(rewritten) => rewritten,
        Err(err) => {
            warn!(error = %err, "HTML rewrite failed; fragment left unchanged");
            html.to_string()
        }
    }
}

/// Decode the entities that commonly appear in URL-bearing attributes.
fn decode_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    let mut decoded = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(index) = rest.find('&') {
        decoded.push_str(&rest[..index]);
        rest = &rest[index..];
        match ENTITIES.iter().find(|(entity, _)| rest.starts_with(entity)) {
            Some((entity, replacement)) => {
                decoded.push(*replacement);
                rest = &rest[entity.len()..];
            }
            None => {
                decoded.push('&');
                rest = &rest[1..];
            }
        }
    }
    decoded.push_str(rest);
    decoded
}

const ENTITIES: [(&str, char); 15] = [
    ("&amp;", '&'),
    ("&#038;", '&'),
    ("&#38;", '&'),
    ("&#x26;", '&'),
    ("&#X26;", '&'),
    ("&quot;", '"'),
    ("&#034;", '"'),
    ("&#34;", '"'),
    ("&#x22;", '"'),
    ("&#X22;", '"'),
    ("&#039;", '\''),
    ("&#39;", '\''),
    ("&#x27;", '\''),
    ("&#X27;", '\''),
    ("&apos;", '\''),
];

/// The rewriter quotes `"` itself; bare ampersands are escaped here.
fn encode_ampersands(value: &str) -> String {
    value.replace('&', "&amp;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::repos::{AttachmentRepo, RepoError};
    use crate::cdn::AttachmentCache;
    use crate::domain::image::{AttachmentId, AttachmentMeta};
    use crate::domain::shard::ShardAssignment;
    use crate::domain::site::SiteOrigin;

    struct NoAttachments;

    impl AttachmentRepo for NoAttachments {
        fn attachment_id_for_url(&self, _url: &str) -> Result<Option<AttachmentId>, RepoError> {
            Ok(None)
        }

        fn metadata(&self, _id: AttachmentId) -> Result<Option<AttachmentMeta>, RepoError> {
            Ok(None)
        }
    }

    fn rewrite(html: &str) -> String {
        let origin = SiteOrigin::new("https://example.com", true).expect("origin");
        let cache = AttachmentCache::new();
        let rewriter = CdnRewriter::new(&origin, Some("cdn.example.net"), &NoAttachments, &cache);
        rewrite_html(&rewriter, html)
    }

    fn shard() -> String {
        ShardAssignment::for_host("example.com").hostname("cdn.example.net")
    }

    #[test]
    fn fragments_without_candidates_are_untouched() {
        let html = "<p>Plain <a href=\"https://example.com/a.jpg\">link</a></p>";
        assert_eq!(rewrite(html), html);
        assert_eq!(rewrite(""), "");
    }

    #[test]
    fn rewrites_src_and_srcset_without_wrapper() {
        let html = r#"<img src="https://example.com/a.jpg" srcset="https://example.com/a.jpg 1x, /b.png 2x" alt="A">"#;
        let shard = shard();
        assert_eq!(
            rewrite(html),
            format!(
                r#"<img src="https://{shard}/example.com/a.jpg?ssl=1" srcset="https://{shard}/example.com/a.jpg?ssl=1 1x, https://{shard}/example.com/b.png?ssl=1 2x" alt="A">"#
            )
        );
    }

    #[test]
    fn lazy_placeholders_keep_their_src() {
        let html = r#"<img src="/placeholder.gif" data-src="/real.jpg">"#;
        let shard = shard();
        assert_eq!(
            rewrite(html),
            format!(
                r#"<img src="/placeholder.gif" data-src="https://{shard}/example.com/real.jpg?ssl=1">"#
            )
        );
    }

    #[test]
    fn query_ampersands_are_escaped() {
        let html = r#"<img src="https://example.com/a.jpg?w=1&amp;h=2">"#;
        let shard = shard();
        assert_eq!(
            rewrite(html),
            format!(r#"<img src="https://{shard}/example.com/a.jpg?w=1&amp;h=2&amp;ssl=1">"#)
        );
    }

    #[test]
    fn style_backgrounds_are_rewritten() {
        let html = r#"<div style="background-image: url(&quot;/hero.webp&quot;)">Hi</div>"#;
        let out = rewrite(html);
        assert!(out.contains(&format!("https://{}/example.com/hero.webp?ssl=1", shard())));
        assert!(out.ends_with(">Hi</div>"));
    }

    #[test]
    fn foreign_images_leave_markup_byte_identical() {
        let html = r#"<figure><img src='https://other.org/x.jpg' class="wide"></figure>"#;
        assert_eq!(rewrite(html), html);
    }

    #[test]
    fn decodes_common_entities() {
        assert_eq!(decode_entities("a&#038;b&amp;c&#39;d&x"), "a&b&c'd&x");
        assert_eq!(decode_entities("none"), "none");
    }

    #[test]
    fn decodes_hex_references() {
        assert_eq!(decode_entities("a&#x26;b&#X27;c&#x22;d"), "a&b'c\"d");
    }

    #[test]
    fn hex_ampersand_is_not_escaped_twice() {
        let html = r#"<img src="https://example.com/a.jpg?w=1&#x26;h=2">"#;
        let shard = shard();
        assert_eq!(
            rewrite(html),
            format!(r#"<img src="https://{shard}/example.com/a.jpg?w=1&amp;h=2&amp;ssl=1">"#)
        );
    }
}
