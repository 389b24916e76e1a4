//! Routes site events to collector operations through the event table.

use tracing::debug;

use crate::application::repos::{ContentRepo, RepoError};

use super::collector::PurgeCollector;
use super::events::{EventTable, Handler, SiteEvent};

/// Applies the event table to incoming events.
#[derive(Debug, Clone, Default)]
pub struct PurgeTrigger {
    table: EventTable,
}

impl PurgeTrigger {
    pub fn new(table: EventTable) -> Self {
        Self { table }
    }

    /// Record whatever `event` invalidates into `collector`.
    ///
    /// Returns the handler that ran, or `None` for unregistered events.
    pub async fn handle(
        &self,
        event: &SiteEvent,
        collector: &mut PurgeCollector,
        content: &dyn ContentRepo,
    ) -> Result<Option<Handler>, RepoError> {
        let kind = event.kind();
        let Some(handler) = self.table.handler_for(&kind) else {
            debug!(event = %kind, "Event not registered for purging");
            return Ok(None);
        };

        match (handler, event) {
            (Handler::FullSite, _) => collector.record_site_wildcard(),
            (Handler::Post, SiteEvent::Fired { post_id: Some(id), .. }) => {
                collector.record_post(*id, content).await?;
            }
            (Handler::Post, _) => {
                debug!(event = %kind, "Post event without a post id ignored");
            }
            (
                Handler::StatusTransition,
                SiteEvent::StatusChanged {
                    post_id,
                    new_status,
                    old_status,
                },
            ) => {
                collector
                    .record_status_transition(*post_id, *new_status, *old_status, content)
                    .await?;
            }
            (Handler::StatusTransition, _) => {
                debug!(event = %kind, "Status transition without statuses ignored");
            }
        }

        debug!(event = %kind, handler = ?handler, pending = collector.pending().len(), "Event handled");
        Ok(Some(handler))
    }
}
