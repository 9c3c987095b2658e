//! Note model

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::util::timestamp_ms_now;

/// A note in the local record store.
///
/// `id` is the local row id, assigned by the store on first insert and never
/// reused. `cloud_id` links the note to its remote document; it is set by
/// whichever side creates the remote document first. `needs_sync` is the dirty
/// flag: true whenever a local mutation has not yet been confirmed written to
/// the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Local row id; `None` until the store assigns one
    pub id: Option<i64>,
    /// Remote document id, when linked
    pub cloud_id: Option<String>,
    /// Note title
    pub title: String,
    /// Note body text
    pub body: String,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last modification timestamp (Unix ms), the sole conflict tie-breaker
    pub modified_at: i64,
    /// Favorite marker
    pub is_favorite: bool,
    /// Soft-delete flag
    pub is_trashed: bool,
    /// Lock marker
    pub is_locked: bool,
    /// Optional display color id
    pub color_tag: Option<i64>,
    /// Weak reference to a local category row
    pub category_id: Option<i64>,
    /// Opaque label ids, local only
    pub labels: BTreeSet<String>,
    /// Ordered local attachment file identifiers (metadata only)
    pub attachments: Vec<String>,
    /// Dirty flag: local changes not yet confirmed remotely
    pub needs_sync: bool,
    /// Principal the note belongs to
    pub owner_id: Option<String>,
}

impl Note {
    /// Create a new, locally-originated note. Starts dirty.
    #[must_use]
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        let now = timestamp_ms_now();
        Self {
            id: None,
            cloud_id: None,
            title: title.into(),
            body: body.into(),
            created_at: now,
            modified_at: now,
            is_favorite: false,
            is_trashed: false,
            is_locked: false,
            color_tag: None,
            category_id: None,
            labels: BTreeSet::new(),
            attachments: Vec::new(),
            needs_sync: true,
            owner_id: None,
        }
    }

    /// Record a local mutation: bump `modified_at` (monotone non-decreasing)
    /// and mark the note dirty.
    pub fn touch(&mut self) {
        self.modified_at = self.modified_at.max(timestamp_ms_now());
        self.needs_sync = true;
    }

    /// Body with leading/trailing whitespace removed, as compared by the
    /// duplicate resolver's exact-match rule.
    #[must_use]
    pub fn trimmed_body(&self) -> &str {
        self.body.trim()
    }

    /// Whether the note is linked to a remote document.
    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.cloud_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    /// Whether the note is visible (not soft-deleted).
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.is_trashed
    }
}
