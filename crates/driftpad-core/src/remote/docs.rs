//! Typed wire documents exchanged with the remote store.
//!
//! Every field is optional: remote documents written by older clients may
//! omit fields, and a partial document must still decode. Conversions to and
//! from the local models happen here and nowhere else.

use serde::{Deserialize, Serialize};

use crate::models::{Category, Note};

/// A note document as stored in the remote collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_favorite: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_in_trash: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_locked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_id: Option<i64>,
    /// Cloud id of the note's category, not a local row id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

impl NoteDoc {
    /// Encode a local note for upload.
    #[must_use]
    pub fn from_note(note: &Note, owner_id: &str, category_cloud_id: Option<String>) -> Self {
        Self {
            title: Some(note.title.clone()),
            content: Some(note.body.clone()),
            modified_date: Some(note.modified_at),
            created_date: Some(note.created_at),
            is_favorite: Some(note.is_favorite),
            is_in_trash: Some(note.is_trashed),
            is_locked: Some(note.is_locked),
            color_id: note.color_tag,
            category_id: category_cloud_id,
            owner_id: Some(owner_id.to_string()),
        }
    }

    /// Modification timestamp, defaulting to 0 for partial documents so they
    /// always lose a last-writer-wins comparison.
    #[must_use]
    pub fn modified_ms(&self) -> i64 {
        self.modified_date.unwrap_or(0)
    }

    #[must_use]
    pub fn title_text(&self) -> &str {
        self.title.as_deref().unwrap_or("")
    }

    #[must_use]
    pub fn content_text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    /// Materialize a brand-new local note from this document. The result is
    /// linked and clean.
    #[must_use]
    pub fn to_note(&self, doc_id: &str, category_local_id: Option<i64>) -> Note {
        let mut note = Note::new(self.title_text(), self.content_text());
        note.cloud_id = Some(doc_id.to_string());
        note.created_at = self.created_date.unwrap_or_else(|| self.modified_ms());
        note.modified_at = self.modified_ms();
        note.is_favorite = self.is_favorite.unwrap_or(false);
        note.is_trashed = self.is_in_trash.unwrap_or(false);
        note.is_locked = self.is_locked.unwrap_or(false);
        note.color_tag = self.color_id;
        note.category_id = category_local_id;
        note.needs_sync = false;
        note.owner_id = self.owner_id.clone();
        note
    }

    /// Overwrite a local note with this document's values (remote won the
    /// last-writer-wins comparison). When `preserve_style` is set — the local
    /// copy has unsynced changes of its own — `color_tag` and `is_favorite`
    /// keep their local values. The merged note is linked and clean.
    pub fn overwrite_note(
        &self,
        local: &mut Note,
        doc_id: &str,
        category_local_id: Option<i64>,
        preserve_style: bool,
    ) {
        local.title = self.title_text().to_string();
        local.body = self.content_text().to_string();
        if let Some(created) = self.created_date {
            local.created_at = created;
        }
        local.modified_at = self.modified_ms();
        local.is_trashed = self.is_in_trash.unwrap_or(false);
        local.is_locked = self.is_locked.unwrap_or(false);
        if !preserve_style {
            local.is_favorite = self.is_favorite.unwrap_or(false);
            local.color_tag = self.color_id;
        }
        local.category_id = category_local_id;
        local.cloud_id = Some(doc_id.to_string());
        if let Some(owner) = &self.owner_id {
            local.owner_id = Some(owner.clone());
        }
        local.needs_sync = false;
    }
}

/// A category document as stored in the remote collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

impl CategoryDoc {
    /// Encode a local category for upload.
    #[must_use]
    pub fn from_category(category: &Category, owner_id: &str) -> Self {
        Self {
            name: Some(category.name.clone()),
            color: category.color,
            modified_date: Some(category.modified_at),
            created_date: Some(category.created_at),
            owner_id: Some(owner_id.to_string()),
        }
    }

    #[must_use]
    pub fn modified_ms(&self) -> i64 {
        self.modified_date.unwrap_or(0)
    }

    #[must_use]
    pub fn name_text(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    /// Materialize a brand-new local category. Linked and clean.
    #[must_use]
    pub fn to_category(&self, doc_id: &str) -> Category {
        let mut category = Category::new(self.name_text());
        category.cloud_id = Some(doc_id.to_string());
        category.color = self.color;
        category.created_at = self.created_date.unwrap_or_else(|| self.modified_ms());
        category.modified_at = self.modified_ms();
        category.needs_sync = false;
        category.owner_id = self.owner_id.clone();
        category
    }

    /// Overwrite a local category with this document's values.
    pub fn overwrite_category(&self, local: &mut Category, doc_id: &str) {
        local.name = self.name_text().to_string();
        local.color = self.color;
        if let Some(created) = self.created_date {
            local.created_at = created;
        }
        local.modified_at = self.modified_ms();
        local.cloud_id = Some(doc_id.to_string());
        if let Some(owner) = &self.owner_id {
            local.owner_id = Some(owner.clone());
        }
        local.needs_sync = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn from_note_round_trips_fields() {
        let mut note = Note::new("Shopping", "milk eggs bread");
        note.color_tag = Some(3);
        note.is_favorite = true;

        let doc = NoteDoc::from_note(&note, "user-1", Some("cat-1".to_string()));
        assert_eq!(doc.title_text(), "Shopping");
        assert_eq!(doc.content_text(), "milk eggs bread");
        assert_eq!(doc.modified_ms(), note.modified_at);
        assert_eq!(doc.owner_id.as_deref(), Some("user-1"));
        assert_eq!(doc.category_id.as_deref(), Some("cat-1"));
    }

    #[test]
    fn to_note_is_clean_and_linked() {
        let doc = NoteDoc {
            title: Some("Shopping".to_string()),
            content: Some("milk eggs bread".to_string()),
            modified_date: Some(2000),
            created_date: Some(1000),
            ..NoteDoc::default()
        };

        let note = doc.to_note("abc", None);
        assert!(!note.needs_sync);
        assert_eq!(note.cloud_id.as_deref(), Some("abc"));
        assert_eq!(note.created_at, 1000);
        assert_eq!(note.modified_at, 2000);
    }

    #[test]
    fn overwrite_preserves_style_fields_for_dirty_local() {
        let mut local = Note::new("Old", "old body");
        local.color_tag = Some(7);
        local.is_favorite = true;

        let doc = NoteDoc {
            title: Some("New".to_string()),
            content: Some("new body".to_string()),
            modified_date: Some(9000),
            color_id: Some(1),
            is_favorite: Some(false),
            ..NoteDoc::default()
        };

        doc.overwrite_note(&mut local, "abc", None, true);
        assert_eq!(local.title, "New");
        assert_eq!(local.body, "new body");
        assert_eq!(local.color_tag, Some(7));
        assert!(local.is_favorite);
        assert!(!local.needs_sync);

        doc.overwrite_note(&mut local, "abc", None, false);
        assert_eq!(local.color_tag, Some(1));
        assert!(!local.is_favorite);
    }

    #[test]
    fn partial_document_decodes_with_defaults() {
        let doc: NoteDoc = serde_json::from_str(r#"{"title": "only title"}"#).unwrap();
        assert_eq!(doc.title_text(), "only title");
        assert_eq!(doc.modified_ms(), 0);
        assert!(doc.owner_id.is_none());
    }
}
