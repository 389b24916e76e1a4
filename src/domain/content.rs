//! Semantic values the content system reports about posts and the site.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

pub type PostId = u64;

/// Lifecycle status of a content entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PostStatus {
    Publish,
    Future,
    #[default]
    Draft,
    Pending,
    Private,
    Trash,
    AutoDraft,
    Inherit,
}

impl PostStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PostStatus::Publish => "publish",
            PostStatus::Future => "future",
            PostStatus::Draft => "draft",
            PostStatus::Pending => "pending",
            PostStatus::Private => "private",
            PostStatus::Trash => "trash",
            PostStatus::AutoDraft => "auto-draft",
            PostStatus::Inherit => "inherit",
        }
    }

    /// Published and trashed entities are visible (or just stopped being
    /// visible) at the edge, so their URLs need invalidating.
    pub fn is_purge_worthy(self) -> bool {
        matches!(self, PostStatus::Publish | PostStatus::Trash)
    }
}

impl FromStr for PostStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "publish" => Ok(PostStatus::Publish),
            "future" => Ok(PostStatus::Future),
            "draft" => Ok(PostStatus::Draft),
            "pending" => Ok(PostStatus::Pending),
            "private" => Ok(PostStatus::Private),
            "trash" => Ok(PostStatus::Trash),
            "auto-draft" => Ok(PostStatus::AutoDraft),
            "inherit" => Ok(PostStatus::Inherit),
            other => Err(DomainError::validation(format!(
                "unknown post status `{other}`"
            ))),
        }
    }
}

/// Everything the purge expansion needs to know about one post.
///
/// Link fields are already-resolved absolute URLs; `None` means the content
/// system has no such page for this post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostRecord {
    pub id: PostId,
    pub status: PostStatus,
    pub permalink: Option<String>,
    pub category_links: Vec<String>,
    pub tag_links: Vec<String>,
    pub author_link: Option<String>,
    pub author_feed_link: Option<String>,
    pub type_archive_link: Option<String>,
    pub type_archive_feed_link: Option<String>,
    pub comments_feed_link: Option<String>,
    pub amp_permalink: Option<String>,
}

/// Site-wide pages affected by any post change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteLinks {
    /// RDF, RSS, RSS2, Atom and comments RSS2 feed URLs.
    pub feed_links: Vec<String>,
    /// Posts page permalink when a static page is shown on the front.
    pub posts_page: Option<String>,
}
