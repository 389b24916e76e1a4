use cloudcache::cdn::{AttachmentCache, CdnRewriter, SrcsetSource, rewrite_html};
use cloudcache::domain::shard::ShardAssignment;
use cloudcache::domain::site::SiteOrigin;
use cloudcache::infra::content::StaticContent;

const CDN: &str = "cdn.example.net";

const SNAPSHOT: &str = r#"{
    "attachments": [
        {
            "id": 11,
            "meta": {
                "file": "2024/05/banner-300x200.jpg",
                "width": 300,
                "height": 200
            }
        },
        {
            "id": 12,
            "meta": {
                "file": "2024/05/photo.jpg",
                "width": 1600,
                "height": 1200,
                "sizes": {
                    "medium": {"file": "photo-300x200.jpg", "width": 300, "height": 200}
                }
            }
        }
    ]
}"#;

fn origin() -> SiteOrigin {
    SiteOrigin::new("https://example.com", true).expect("origin")
}

fn shard_host() -> String {
    ShardAssignment::for_host("example.com").hostname(CDN)
}

#[test]
fn shard_is_stable_and_in_range() {
    let first = ShardAssignment::for_host("example.com");
    for _ in 0..10 {
        assert_eq!(ShardAssignment::for_host("example.com"), first);
    }
    for host in ["a.org", "b.net", "example.com", "shop.example.co.uk"] {
        assert!(ShardAssignment::for_host(host).index() < 4);
    }
}

#[test]
fn thumbnails_are_stripped_but_genuine_names_are_kept() {
    let origin = origin();
    let content = StaticContent::from_json(SNAPSHOT.as_bytes()).expect("snapshot");
    let cache = AttachmentCache::new();
    let rewriter = CdnRewriter::new(&origin, Some(CDN), &content, &cache);

    assert_eq!(
        rewriter.rewrite_url("https://example.com/wp-content/uploads/2024/05/photo-300x200.jpg"),
        format!(
            "https://{}/example.com/wp-content/uploads/2024/05/photo.jpg?resize=300%2C200&ssl=1",
            shard_host()
        )
    );
    assert_eq!(
        rewriter.rewrite_url("https://example.com/wp-content/uploads/2024/05/banner-300x200.jpg"),
        format!(
            "https://{}/example.com/wp-content/uploads/2024/05/banner-300x200.jpg?ssl=1",
            shard_host()
        )
    );
}

#[test]
fn foreign_and_unsupported_urls_are_untouched() {
    let origin = origin();
    let content = StaticContent::empty();
    let cache = AttachmentCache::new();
    let rewriter = CdnRewriter::new(&origin, Some(CDN), &content, &cache);

    for url in [
        "https://other.org/a.jpg",
        "https://example.com/doc.pdf",
        "https://example.com/image.svg",
        "data:image/png;base64,AAAA",
    ] {
        assert_eq!(rewriter.rewrite_url(url), url);
    }
}

#[test]
fn original_query_is_preserved() {
    let origin = origin();
    let content = StaticContent::empty();
    let cache = AttachmentCache::new();
    let rewriter = CdnRewriter::new(&origin, Some(CDN), &content, &cache);

    assert_eq!(
        rewriter.rewrite_url("https://www.example.com/a.JPG?ver=3&ssl=0"),
        format!("https://{}/www.example.com/a.JPG?ver=3&ssl=0", shard_host_for("www.example.com"))
    );
}

fn shard_host_for(host: &str) -> String {
    ShardAssignment::for_host(host).hostname(CDN)
}

#[test]
fn computed_srcset_sources_keep_descriptors() {
    let origin = origin();
    let content = StaticContent::empty();
    let cache = AttachmentCache::new();
    let rewriter = CdnRewriter::new(&origin, Some(CDN), &content, &cache);

    let rewritten = rewriter.rewrite_srcset_sources(&[
        SrcsetSource {
            url: "https://example.com/a.webp".into(),
            descriptor: 'w',
            value: 640.0,
        },
        SrcsetSource {
            url: "https://other.org/b.webp".into(),
            descriptor: 'x',
            value: 2.0,
        },
    ]);
    assert_eq!(
        rewritten[0].url,
        format!("https://{}/example.com/a.webp?ssl=1", shard_host())
    );
    assert_eq!(rewritten[0].descriptor, 'w');
    assert_eq!(rewritten[1].url, "https://other.org/b.webp");
}

#[test]
fn html_fragment_round_trip() {
    let origin = origin();
    let content = StaticContent::from_json(SNAPSHOT.as_bytes()).expect("snapshot");
    let cache = AttachmentCache::new();
    let rewriter = CdnRewriter::new(&origin, Some(CDN), &content, &cache);

    let html = concat!(
        "<article><p>Intro &amp; more</p>",
        "<img src=\"/wp-content/uploads/2024/05/photo-300x200.jpg\" alt=\"Photo\">",
        "<a href=\"https://example.com/wp-content/uploads/2024/05/photo.jpg\">full</a>",
        "</article>"
    );
    let expected = format!(
        concat!(
            "<article><p>Intro &amp; more</p>",
            "<img src=\"https://{}/example.com/wp-content/uploads/2024/05/photo.jpg?resize=300%2C200&amp;ssl=1\" alt=\"Photo\">",
            "<a href=\"https://example.com/wp-content/uploads/2024/05/photo.jpg\">full</a>",
            "</article>"
        ),
        shard_host()
    );
    assert_eq!(rewrite_html(&rewriter, html), expected);
}

#[test]
fn without_cdn_domain_urls_are_only_normalized() {
    let origin = origin();
    let content = StaticContent::empty();
    let cache = AttachmentCache::new();
    let rewriter = CdnRewriter::new(&origin, None, &content, &cache);

    assert_eq!(
        rewriter.rewrite_url("/wp-content/uploads/a.png"),
        "https://example.com/wp-content/uploads/a.png"
    );
    assert_eq!(
        rewriter.dns_prefetch_hints(vec!["//fonts.example".into()]),
        vec!["//fonts.example".to_string()]
    );
}
