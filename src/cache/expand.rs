//! Expansion of a changed post into the URLs whose cached copies go stale.

use crate::domain::content::{PostRecord, PostStatus, SiteLinks};
use crate::domain::purge::PurgeTarget;
use crate::domain::site::SiteOrigin;

const TRASHED_MARKER: &str = "__trashed";

/// Targets affected by a change to `post`, in dispatch order.
///
/// Posts that are neither published nor trashed, or that have no permalink,
/// yield nothing.
pub fn expand_post_urls(
    post: &PostRecord,
    site: &SiteLinks,
    origin: &SiteOrigin,
) -> Vec<PurgeTarget> {
    let Some(permalink) = post.permalink.as_deref().filter(|link| !link.is_empty()) else {
        return Vec::new();
    };
    if !post.status.is_purge_worthy() {
        return Vec::new();
    }

    let mut urls: Vec<String> = Vec::new();
    urls.extend(post.category_links.iter().cloned());
    urls.extend(post.tag_links.iter().cloned());
    urls.extend(post.author_link.iter().cloned());
    urls.extend(post.author_feed_link.iter().cloned());
    if let Some(archive) = &post.type_archive_link {
        urls.push(archive.clone());
        urls.extend(post.type_archive_feed_link.iter().cloned());
    }

    urls.push(permalink.to_string());
    if post.status == PostStatus::Trash {
        let restored = permalink.replace(TRASHED_MARKER, "");
        let restored_feed = format!("{restored}feed/");
        urls.push(restored);
        urls.push(restored_feed);
    }

    urls.extend(post.amp_permalink.iter().cloned());
    urls.push(format!("{permalink}amp/"));

    urls.extend(site.feed_links.iter().cloned());
    urls.extend(post.comments_feed_link.iter().cloned());

    let mut targets: Vec<PurgeTarget> = urls
        .into_iter()
        .filter(|url| !url.is_empty())
        .map(PurgeTarget::exact)
        .collect();

    targets.push(origin.pattern(".*sitemap.*"));
    targets.push(origin.pattern(".*/feed/.*"));
    targets.push(origin.pattern("page/.*"));
    targets.push(origin.pattern(".*/page/.*"));
    targets.push(PurgeTarget::exact(origin.home_page()));
    if let Some(posts_page) = site.posts_page.as_deref().filter(|link| !link.is_empty()) {
        targets.push(PurgeTarget::exact(posts_page));
    }

    targets
}
