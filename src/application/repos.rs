//! Collaborator traits describing the content system and outbound adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::content::{PostId, PostRecord, SiteLinks};
use crate::domain::image::{AttachmentId, AttachmentMeta};
use crate::domain::purge::PurgeRequest;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("content source error: {0}")]
    Source(String),
}

impl RepoError {
    pub fn from_source(err: impl std::fmt::Display) -> Self {
        Self::Source(err.to_string())
    }
}

/// Read access to posts and site-wide links.
#[async_trait]
pub trait ContentRepo: Send + Sync {
    async fn find_post(&self, id: PostId) -> Result<Option<PostRecord>, RepoError>;

    async fn site_links(&self) -> Result<SiteLinks, RepoError>;
}

/// Attachment lookups used while rewriting image URLs.
///
/// Synchronous because the HTML rewriter calls it from inside element
/// handlers.
pub trait AttachmentRepo: Send + Sync {
    /// Attachment whose original file is served at `url`.
    fn attachment_id_for_url(&self, url: &str) -> Result<Option<AttachmentId>, RepoError>;

    fn metadata(&self, id: AttachmentId) -> Result<Option<AttachmentMeta>, RepoError>;
}

/// Short-lived credentials issued by the edge.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn purge_key(&self) -> Option<String>;

    async fn cdn_domain(&self) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReceipt {
    pub status: u16,
    pub target_count: usize,
}

#[derive(Debug, Error)]
pub enum PurgeError {
    #[error("purging is disabled")]
    Disabled,
    #[error("no purge key available")]
    MissingCredential,
    #[error("purge transport failed: {0}")]
    Transport(String),
    #[error("purge service answered with status {status}")]
    Rejected { status: u16 },
    #[error("could not encode purge payload: {0}")]
    Encode(String),
}

impl PurgeError {
    /// Failures that mean "nothing to do here" rather than "something broke".
    pub fn is_skip(&self) -> bool {
        matches!(self, PurgeError::Disabled | PurgeError::MissingCredential)
    }
}

/// Sends one batched purge to the edge.
#[async_trait]
pub trait PurgeDispatcher: Send + Sync {
    async fn dispatch(&self, request: &PurgeRequest) -> Result<DispatchReceipt, PurgeError>;
}
