//! Per-cycle memo of URL to attachment lookups.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use crate::application::repos::AttachmentRepo;
use crate::domain::image::AttachmentId;
use crate::util::lock::mutex_lock;

const SOURCE: &str = "cdn::attachments";

/// Remembers which attachment (if any) backs a URL for the rest of the cycle.
///
/// Misses and lookup failures are remembered too, so each URL reaches the
/// repository at most once.
#[derive(Debug, Default)]
pub struct AttachmentCache {
    entries: Mutex<HashMap<String, Option<AttachmentId>>>,
}

impl AttachmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, url: &str, repo: &dyn AttachmentRepo) -> Option<AttachmentId> {
        if let Some(cached) = mutex_lock(&self.entries, SOURCE, "resolve").get(url) {
            return *cached;
        }

        let resolved = match repo.attachment_id_for_url(url) {
            Ok(id) => id,
            Err(err) => {
                debug!(url, error = %err, "Attachment lookup failed");
                None
            }
        };
        mutex_lock(&self.entries, SOURCE, "insert").insert(url.to_string(), resolved);
        resolved
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
