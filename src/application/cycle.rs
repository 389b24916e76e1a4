//! One processing cycle: events in, a single purge out.

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::application::repos::{ContentRepo, PurgeDispatcher};
use crate::cache::{FlushOutcome, Handler, PurgeCollector, PurgeTrigger, SiteEvent};
use crate::domain::purge::PurgeTarget;
use crate::domain::site::SiteOrigin;

/// Owns the collector for the lifetime of one request or command.
pub struct PurgeCycle<'a> {
    id: Uuid,
    collector: PurgeCollector,
    trigger: &'a PurgeTrigger,
    content: &'a dyn ContentRepo,
}

impl<'a> PurgeCycle<'a> {
    pub fn begin(origin: SiteOrigin, trigger: &'a PurgeTrigger, content: &'a dyn ContentRepo) -> Self {
        Self {
            id: Uuid::new_v4(),
            collector: PurgeCollector::new(origin),
            trigger,
            content,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn collector(&self) -> &PurgeCollector {
        &self.collector
    }

    /// Apply one event. Content lookup failures are logged and the event is
    /// dropped; the rest of the cycle is unaffected.
    pub async fn handle(&mut self, event: &SiteEvent) -> Option<Handler> {
        match self
            .trigger
            .handle(event, &mut self.collector, self.content)
            .await
        {
            Ok(handler) => handler,
            Err(err) => {
                warn!(
                    cycle_id = %self.id,
                    event = %event.kind(),
                    error = %err,
                    "Content lookup failed; event skipped"
                );
                None
            }
        }
    }

    pub fn purge_everything(&mut self) {
        self.collector.record_full_purge();
    }

    pub fn purge_target(&mut self, target: PurgeTarget) {
        self.collector.record_url(target);
    }

    /// Flush the collector. Runs once; the cycle is consumed.
    #[instrument(skip_all, fields(cycle_id = %self.id))]
    pub async fn finish(self, dispatcher: &dyn PurgeDispatcher) -> FlushOutcome {
        let pending = self.collector.pending().len();
        let full_purge = self.collector.is_full_purge();
        let outcome = self.collector.flush(dispatcher).await;
        info!(pending, full_purge, outcome = %outcome, "Purge cycle finished");
        outcome
    }
}
