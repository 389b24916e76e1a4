//! Content repository backed by a JSON export of the site.
//!
//! The content system is external; the command line and the server read a
//! snapshot it exports (posts, site links, attachment metadata).

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs;
use tracing::debug;

use crate::application::repos::{AttachmentRepo, ContentRepo, RepoError};
use crate::domain::content::{PostId, PostRecord, SiteLinks};
use crate::domain::image::{AttachmentId, AttachmentMeta};

use super::error::InfraError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct Snapshot {
    site: SiteLinks,
    posts: Vec<PostRecord>,
    attachments: Vec<AttachmentEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct AttachmentEntry {
    id: AttachmentId,
    meta: AttachmentMeta,
    /// Extra public URLs serving the original file.
    urls: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StaticContent {
    site: SiteLinks,
    posts: HashMap<PostId, PostRecord>,
    attachments: Vec<AttachmentEntry>,
}

impl StaticContent {
    pub fn empty() -> Self {
        Self::default()
    }

    pub async fn load(path: &Path) -> Result<Self, InfraError> {
        let bytes = fs::read(path).await?;
        Self::from_json(&bytes)
            .map_err(|err| InfraError::serialization(format!("{}: {err}", path.display())))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let snapshot: Snapshot = serde_json::from_slice(bytes)?;
        let posts = snapshot
            .posts
            .into_iter()
            .map(|post| (post.id, post))
            .collect();
        Ok(Self {
            site: snapshot.site,
            posts,
            attachments: snapshot.attachments,
        })
    }

    pub fn post_count(&self) -> usize {
        self.posts.len()
    }
}

/// Matches the original upload only; intermediate size URLs resolve to
/// nothing.
fn serves_original(entry: &AttachmentEntry, url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    if entry.urls.iter().any(|candidate| candidate == path) {
        return true;
    }
    !entry.meta.file.is_empty() && path.ends_with(&format!("/{}", entry.meta.file))
}

#[async_trait]
impl ContentRepo for StaticContent {
    async fn find_post(&self, id: PostId) -> Result<Option<PostRecord>, RepoError> {
        Ok(self.posts.get(&id).cloned())
    }

    async fn site_links(&self) -> Result<SiteLinks, RepoError> {
        Ok(self.site.clone())
    }
}

impl AttachmentRepo for StaticContent {
    fn attachment_id_for_url(&self, url: &str) -> Result<Option<AttachmentId>, RepoError> {
        let found = self
            .attachments
            .iter()
            .find(|entry| serves_original(entry, url))
            .map(|entry| entry.id);
        debug!(url, attachment = ?found, "Attachment lookup");
        Ok(found)
    }

    fn metadata(&self, id: AttachmentId) -> Result<Option<AttachmentMeta>, RepoError> {
        Ok(self
            .attachments
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.meta.clone()))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::domain::content::PostStatus;

    const SNAPSHOT: &str = r#"{
        "site": {"feed_links": ["https://example.com/feed/"]},
        "posts": [{"id": 42, "status": "publish", "permalink": "https://example.com/hello/"}],
        "attachments": [
            {"id": 7, "meta": {"file": "2024/05/banner-300x200.jpg", "width": 300, "height": 200}}
        ]
    }"#;

    #[tokio::test]
    async fn loads_posts_and_site_links() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("content.json");
        std::fs::write(&path, SNAPSHOT).expect("write");

        let content = StaticContent::load(&path).await.expect("load");
        let post = content.find_post(42).await.expect("lookup").expect("post");
        assert_eq!(post.status, PostStatus::Publish);
        assert_eq!(content.find_post(43).await.expect("lookup"), None);
        assert_eq!(
            content.site_links().await.expect("links").feed_links,
            vec!["https://example.com/feed/".to_string()]
        );
    }

    #[test]
    fn attachments_resolve_by_original_file_only() {
        let content = StaticContent::from_json(SNAPSHOT.as_bytes()).expect("parse");
        let url = "https://example.com/wp-content/uploads/2024/05/banner-300x200.jpg?v=2";
        assert_eq!(content.attachment_id_for_url(url).expect("lookup"), Some(7));
        assert_eq!(
            content
                .attachment_id_for_url("https://example.com/wp-content/uploads/2024/05/banner-150x100.jpg")
                .expect("lookup"),
            None
        );
        assert_eq!(content.metadata(7).expect("meta").map(|meta| meta.width), Some(300));
    }

    #[test]
    fn rejects_malformed_snapshot() {
        assert!(StaticContent::from_json(b"{\"posts\": 3}").is_err());
    }
}
