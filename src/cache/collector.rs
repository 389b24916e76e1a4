//! Per-cycle purge collector.
//!
//! Buffers invalidation targets while a request or command runs and hands
//! them to the dispatcher exactly once when the cycle ends.

use std::collections::HashSet;
use std::fmt;

use metrics::counter;
use tracing::{debug, info, warn};

use crate::application::repos::{ContentRepo, PurgeDispatcher, RepoError};
use crate::domain::content::{PostId, PostStatus};
use crate::domain::purge::{PurgeRequest, PurgeTarget};
use crate::domain::site::SiteOrigin;

use super::expand::expand_post_urls;

const METRIC_TARGETS_RECORDED: &str = "cloudcache_purge_targets_recorded_total";
const METRIC_FLUSH: &str = "cloudcache_purge_flush_total";

/// Result of the end-of-cycle flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was recorded.
    Empty,
    /// The purge service accepted the batch.
    Dispatched { targets: usize },
    /// Purging is disabled or no credential was available.
    Skipped,
    /// The call failed; the batch is dropped.
    Failed,
}

impl FlushOutcome {
    fn as_label(self) -> &'static str {
        match self {
            FlushOutcome::Empty => "empty",
            FlushOutcome::Dispatched { .. } => "dispatched",
            FlushOutcome::Skipped => "skipped",
            FlushOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for FlushOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Collects purge targets for one processing cycle.
#[derive(Debug)]
pub struct PurgeCollector {
    origin: SiteOrigin,
    full_purge: bool,
    targets: Vec<PurgeTarget>,
    seen: HashSet<String>,
    processed_posts: HashSet<PostId>,
}

impl PurgeCollector {
    pub fn new(origin: SiteOrigin) -> Self {
        Self {
            origin,
            full_purge: false,
            targets: Vec::new(),
            seen: HashSet::new(),
            processed_posts: HashSet::new(),
        }
    }

    /// Supersede every individual target with a purge of the whole host.
    pub fn record_full_purge(&mut self) {
        if !self.full_purge {
            debug!(host = self.origin.host(), "Full purge requested");
        }
        self.full_purge = true;
    }

    pub fn is_full_purge(&self) -> bool {
        self.full_purge
    }

    /// Append `target` unless the same URL string was already recorded.
    ///
    /// Returns whether the target was new.
    pub fn record_url(&mut self, target: PurgeTarget) -> bool {
        if !self.seen.insert(target.url().to_string()) {
            return false;
        }
        counter!(METRIC_TARGETS_RECORDED).increment(1);
        self.targets.push(target);
        true
    }

    /// Record the wildcard covering everything below the home URL.
    pub fn record_site_wildcard(&mut self) {
        let target = self.origin.home_wildcard();
        self.record_url(target);
    }

    /// Expand `post_id` into its affected URLs, at most once per cycle.
    ///
    /// Returns how many new targets were recorded. A post is marked as
    /// processed before it is looked up, so a failed or empty expansion is
    /// not retried within the cycle.
    pub async fn record_post(
        &mut self,
        post_id: PostId,
        content: &dyn ContentRepo,
    ) -> Result<usize, RepoError> {
        if !self.processed_posts.insert(post_id) {
            debug!(post_id, "Post already expanded this cycle");
            return Ok(0);
        }

        let Some(post) = content.find_post(post_id).await? else {
            debug!(post_id, "Post not found; nothing to purge");
            return Ok(0);
        };
        let site = content.site_links().await?;

        let recorded = expand_post_urls(&post, &site, &self.origin)
            .into_iter()
            .filter(|target| self.record_url(target.clone()))
            .count();
        debug!(post_id, status = post.status.as_str(), recorded, "Post expanded");
        Ok(recorded)
    }

    /// Expand the post only when its status actually changed.
    pub async fn record_status_transition(
        &mut self,
        post_id: PostId,
        new_status: PostStatus,
        old_status: PostStatus,
        content: &dyn ContentRepo,
    ) -> Result<usize, RepoError> {
        if new_status == old_status {
            return Ok(0);
        }
        self.record_post(post_id, content).await
    }

    /// Targets recorded so far, in insertion order.
    pub fn pending(&self) -> &[PurgeTarget] {
        &self.targets
    }

    /// Build the request `flush` would send, if any.
    pub fn request(&self) -> Option<PurgeRequest> {
        if self.full_purge {
            return Some(PurgeRequest::new(
                self.origin.host(),
                [self.origin.full_purge_target()],
            ));
        }
        if self.targets.is_empty() {
            return None;
        }
        let host = self
            .targets
            .iter()
            .rev()
            .find_map(PurgeTarget::host)
            .unwrap_or_else(|| self.origin.host().to_string());
        Some(PurgeRequest::new(host, self.targets.iter().cloned()))
    }

    /// Send everything recorded this cycle in a single call.
    ///
    /// Consumes the collector so a cycle cannot flush twice. Failures are
    /// logged and reported in the outcome, never returned as errors.
    pub async fn flush(self, dispatcher: &dyn PurgeDispatcher) -> FlushOutcome {
        let Some(request) = self.request() else {
            debug!("Purge flush skipped: nothing recorded");
            return FlushOutcome::Empty;
        };

        let outcome = match dispatcher.dispatch(&request).await {
            Ok(receipt) => {
                info!(
                    host = request.host(),
                    targets = receipt.target_count,
                    status = receipt.status,
                    full_purge = self.full_purge,
                    "Purge dispatched"
                );
                FlushOutcome::Dispatched {
                    targets: receipt.target_count,
                }
            }
            Err(err) if err.is_skip() => {
                info!(
                    host = request.host(),
                    targets = request.len(),
                    reason = %err,
                    "Purge skipped"
                );
                FlushOutcome::Skipped
            }
            Err(err) => {
                warn!(
                    host = request.host(),
                    targets = request.len(),
                    error = %err,
                    "Purge dispatch failed"
                );
                FlushOutcome::Failed
            }
        };

        counter!(METRIC_FLUSH, "result" => outcome.as_label()).increment(1);
        outcome
    }
}
