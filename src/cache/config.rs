//! Event table configuration.
//!
//! The event lists are plain name lists under `[events]` in `cloudcache.toml`:
//!
//! ```toml
//! [events]
//! post = ["save_post", "edit_post"]
//! full_site = ["customize_save_after"]
//! ```

use super::events::EventTable;

impl From<&crate::config::EventSettings> for EventTable {
    fn from(settings: &crate::config::EventSettings) -> Self {
        EventTable::from_names(&settings.post, &settings.full_site)
    }
}
