//! Category model

use serde::{Deserialize, Serialize};

use crate::util::timestamp_ms_now;

/// A note category. Carries the same sync bookkeeping as `Note`; duplicate
/// detection is exact name match only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Local row id; `None` until the store assigns one
    pub id: Option<i64>,
    /// Remote document id, when linked
    pub cloud_id: Option<String>,
    /// Category name
    pub name: String,
    /// Optional display color id
    pub color: Option<i64>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last modification timestamp (Unix ms)
    pub modified_at: i64,
    /// Dirty flag: local changes not yet confirmed remotely
    pub needs_sync: bool,
    /// Principal the category belongs to
    pub owner_id: Option<String>,
}

impl Category {
    /// Create a new, locally-originated category. Starts dirty.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let now = timestamp_ms_now();
        Self {
            id: None,
            cloud_id: None,
            name: name.into(),
            color: None,
            created_at: now,
            modified_at: now,
            needs_sync: true,
            owner_id: None,
        }
    }

    /// Record a local mutation: bump `modified_at` and mark dirty.
    pub fn touch(&mut self) {
        self.modified_at = self.modified_at.max(timestamp_ms_now());
        self.needs_sync = true;
    }

    /// Whether the category is linked to a remote document.
    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.cloud_id.as_deref().is_some_and(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_new_starts_dirty() {
        let category = Category::new("Groceries");
        assert!(category.needs_sync);
        assert!(category.id.is_none());
        assert!(!category.is_linked());
    }
}
