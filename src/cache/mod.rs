//! CloudCache purge collection.
//!
//! Content events are routed through an [`EventTable`] to a per-cycle
//! [`PurgeCollector`], which sends one batched purge when the cycle ends:
//!
//! - **Post** events expand the post into its permalink, archives, feeds and
//!   the site-wide pagination/sitemap patterns.
//! - **Full-site** events record a wildcard under the home URL.
//! - A **full purge** supersedes everything with `<scheme>://<host>/.*`.

mod collector;
mod config;
mod events;
mod expand;
mod trigger;

pub use collector::{FlushOutcome, PurgeCollector};
pub use events::{
    DEFAULT_FULL_SITE_EVENTS, DEFAULT_POST_EVENTS, EventKind, EventTable, Handler, SiteEvent,
};
pub use expand::expand_post_urls;
pub use trigger::PurgeTrigger;
