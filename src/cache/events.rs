//! Content events and the table that routes them to purge handlers.

use std::collections::HashSet;
use std::fmt;

use crate::domain::content::{PostId, PostStatus};
use crate::domain::error::DomainError;

/// Lifecycle events the content system reports.
///
/// Known events have their own variant; anything else configured by name is
/// carried as `Custom` so the lists stay open-ended.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    SwitchTheme,
    AutoptimizeCachePurged,
    SavePost,
    DeletedPost,
    TrashedPost,
    EditPost,
    DeleteAttachment,
    PublishFuturePost,
    WoocommerceUpdateProduct,
    CustomizeSaveAfter,
    AcfSavePost,
    GformAfterSaveForm,
    RankMathAfterSaveSettings,
    As3cfAfterUploadAttachment,
    UpgraderProcessComplete,
    UpdateOptionBlogname,
    UpdateOptionBlogdescription,
    TransitionPostStatus,
    Custom(String),
}

const NAMED: [(EventKind, &str); 18] = [
    (EventKind::SwitchTheme, "switch_theme"),
    (EventKind::AutoptimizeCachePurged, "autoptimize_action_cachepurged"),
    (EventKind::SavePost, "save_post"),
    (EventKind::DeletedPost, "deleted_post"),
    (EventKind::TrashedPost, "trashed_post"),
    (EventKind::EditPost, "edit_post"),
    (EventKind::DeleteAttachment, "delete_attachment"),
    (EventKind::PublishFuturePost, "publish_future_post"),
    (EventKind::WoocommerceUpdateProduct, "woocommerce_update_product"),
    (EventKind::CustomizeSaveAfter, "customize_save_after"),
    (EventKind::AcfSavePost, "acf/save_post"),
    (EventKind::GformAfterSaveForm, "gform_after_save_form"),
    (EventKind::RankMathAfterSaveSettings, "rank_math/after_save_settings"),
    (EventKind::As3cfAfterUploadAttachment, "as3cf_after_upload_attachment"),
    (EventKind::UpgraderProcessComplete, "upgrader_process_complete"),
    (EventKind::UpdateOptionBlogname, "update_option_blogname"),
    (EventKind::UpdateOptionBlogdescription, "update_option_blogdescription"),
    (EventKind::TransitionPostStatus, "transition_post_status"),
];

impl EventKind {
    pub fn from_name(name: &str) -> Self {
        let name = name.trim();
        NAMED
            .iter()
            .find(|(_, known)| *known == name)
            .map(|(kind, _)| kind.clone())
            .unwrap_or_else(|| EventKind::Custom(name.to_string()))
    }

    pub fn name(&self) -> &str {
        match self {
            EventKind::Custom(name) => name,
            known => NAMED
                .iter()
                .find(|(kind, _)| kind == known)
                .map(|(_, name)| *name)
                .unwrap_or_default(),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Post events purged by default.
pub const DEFAULT_POST_EVENTS: [&str; 9] = [
    "switch_theme",
    "autoptimize_action_cachepurged",
    "save_post",
    "deleted_post",
    "trashed_post",
    "edit_post",
    "delete_attachment",
    "publish_future_post",
    "woocommerce_update_product",
];

/// Events that invalidate the whole site by default.
pub const DEFAULT_FULL_SITE_EVENTS: [&str; 7] = [
    "switch_theme",
    "autoptimize_action_cachepurged",
    "customize_save_after",
    "acf/save_post",
    "gform_after_save_form",
    "rank_math/after_save_settings",
    "as3cf_after_upload_attachment",
];

/// Full-site events registered regardless of configuration.
const ALWAYS_FULL_SITE: [EventKind; 3] = [
    EventKind::UpgraderProcessComplete,
    EventKind::UpdateOptionBlogname,
    EventKind::UpdateOptionBlogdescription,
];

/// An event as delivered by the content system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteEvent {
    Fired {
        kind: EventKind,
        post_id: Option<PostId>,
    },
    StatusChanged {
        post_id: PostId,
        new_status: PostStatus,
        old_status: PostStatus,
    },
}

impl SiteEvent {
    pub fn fired(kind: EventKind, post_id: Option<PostId>) -> Self {
        Self::Fired { kind, post_id }
    }

    /// Build an event from its name and optional arguments.
    ///
    /// `transition_post_status` needs a post id and both statuses.
    pub fn from_parts(
        name: &str,
        post_id: Option<PostId>,
        new_status: Option<PostStatus>,
        old_status: Option<PostStatus>,
    ) -> Result<Self, DomainError> {
        let kind = EventKind::from_name(name);
        if kind.name().is_empty() {
            return Err(DomainError::validation("event name is empty"));
        }
        if kind != EventKind::TransitionPostStatus {
            return Ok(Self::fired(kind, post_id));
        }
        match (post_id, new_status, old_status) {
            (Some(post_id), Some(new_status), Some(old_status)) => Ok(Self::StatusChanged {
                post_id,
                new_status,
                old_status,
            }),
            _ => Err(DomainError::validation(
                "transition_post_status needs a post id, a new status and an old status",
            )),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            SiteEvent::Fired { kind, .. } => kind.clone(),
            SiteEvent::StatusChanged { .. } => EventKind::TransitionPostStatus,
        }
    }
}

/// What the collector does in response to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    /// Expand the named post.
    Post,
    /// Record the site-wide wildcard under the home URL.
    FullSite,
    /// Expand the post when its status actually changed.
    StatusTransition,
}

/// Static routing of event kinds to handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTable {
    post: HashSet<EventKind>,
    full_site: HashSet<EventKind>,
}

impl Default for EventTable {
    fn default() -> Self {
        Self::from_names(DEFAULT_POST_EVENTS, DEFAULT_FULL_SITE_EVENTS)
    }
}

impl EventTable {
    pub fn from_names<P, F>(post_events: P, full_site_events: F) -> Self
    where
        P: IntoIterator,
        P::Item: AsRef<str>,
        F: IntoIterator,
        F::Item: AsRef<str>,
    {
        let post = post_events
            .into_iter()
            .map(|name| EventKind::from_name(name.as_ref()))
            .collect();
        let full_site = full_site_events
            .into_iter()
            .map(|name| EventKind::from_name(name.as_ref()))
            .chain(ALWAYS_FULL_SITE)
            .collect();
        Self { post, full_site }
    }

    /// Handler for `kind`, or `None` when the event is not registered.
    ///
    /// Membership in the full-site list wins over the post list.
    pub fn handler_for(&self, kind: &EventKind) -> Option<Handler> {
        if *kind == EventKind::TransitionPostStatus {
            Some(Handler::StatusTransition)
        } else if self.full_site.contains(kind) {
            Some(Handler::FullSite)
        } else if self.post.contains(kind) {
            Some(Handler::Post)
        } else {
            None
        }
    }
}
