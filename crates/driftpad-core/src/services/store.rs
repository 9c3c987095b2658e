//! Shared store service wrapper used across clients and the sync engine.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{CategoryStore, Database, NoteStore, SqliteCategoryStore, SqliteNoteStore};
use crate::error::{Error, Result};
use crate::models::{Category, Note};

/// Thread-safe service for database and store operations.
///
/// This is the record-store surface the sync engine consumes. All operations
/// are atomic at single-record granularity; batch operations are not
/// transactional across records.
#[derive(Clone)]
pub struct StoreService {
    db: Arc<Mutex<Database>>,
}

impl StoreService {
    /// Open a store service at the given filesystem path.
    pub fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Open an in-memory store service (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Create a new note owned by `owner_id`. Starts dirty.
    pub async fn create_note(
        &self,
        title: &str,
        body: &str,
        owner_id: Option<&str>,
    ) -> Result<Note> {
        if title.trim().is_empty() && body.trim().is_empty() {
            return Err(Error::InvalidInput(
                "note title and body cannot both be empty".to_string(),
            ));
        }

        let mut note = Note::new(title, body);
        note.owner_id = owner_id.map(ToString::to_string);

        let db = self.db.lock().await;
        let store = SqliteNoteStore::new(db.connection());
        let id = store.upsert(&note)?;
        note.id = Some(id);
        Ok(note)
    }

    /// Replace a note's title and body. Bumps `modified_at` and marks dirty.
    pub async fn update_note(&self, id: i64, title: &str, body: &str) -> Result<Note> {
        let db = self.db.lock().await;
        let store = SqliteNoteStore::new(db.connection());

        let mut note = store
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("note {id}")))?;
        note.title = title.to_string();
        note.body = body.to_string();
        note.touch();
        store.upsert(&note)?;
        Ok(note)
    }

    /// Move a note to the trash (soft delete). Marks dirty so the state
    /// propagates on the next sync.
    pub async fn trash_note(&self, id: i64) -> Result<Note> {
        let db = self.db.lock().await;
        let store = SqliteNoteStore::new(db.connection());

        let mut note = store
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("note {id}")))?;
        note.is_trashed = true;
        note.touch();
        store.upsert(&note)?;
        Ok(note)
    }

    /// Fetch a note by local id.
    pub async fn get_note(&self, id: i64) -> Result<Option<Note>> {
        let db = self.db.lock().await;
        SqliteNoteStore::new(db.connection()).get(id)
    }

    /// List active notes, newest first.
    pub async fn list_notes(&self, limit: usize, offset: usize) -> Result<Vec<Note>> {
        let db = self.db.lock().await;
        SqliteNoteStore::new(db.connection()).list(limit, offset)
    }

    /// All notes with pending local changes.
    pub async fn dirty_notes(&self) -> Result<Vec<Note>> {
        let db = self.db.lock().await;
        SqliteNoteStore::new(db.connection()).dirty_notes()
    }

    /// All non-trashed notes.
    pub async fn active_notes(&self) -> Result<Vec<Note>> {
        let db = self.db.lock().await;
        SqliteNoteStore::new(db.connection()).active_notes()
    }

    /// Insert or update a note; returns the local id.
    pub async fn upsert_note(&self, note: &Note) -> Result<i64> {
        let db = self.db.lock().await;
        SqliteNoteStore::new(db.connection()).upsert(note)
    }

    /// Upsert a batch of notes; returns the number applied.
    pub async fn upsert_notes(&self, notes: &[Note]) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteNoteStore::new(db.connection()).upsert_many(notes)
    }

    /// Look up a note by its remote document id.
    pub async fn find_note_by_cloud_id(&self, cloud_id: &str) -> Result<Option<Note>> {
        let db = self.db.lock().await;
        SqliteNoteStore::new(db.connection()).find_by_cloud_id(cloud_id)
    }

    /// Record the local↔remote mapping for a note.
    pub async fn set_note_cloud_link(&self, id: i64, cloud_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        SqliteNoteStore::new(db.connection()).set_cloud_link(id, cloud_id)
    }

    /// Set or clear a note's dirty flag.
    pub async fn set_note_sync_flag(&self, id: i64, needs_sync: bool) -> Result<()> {
        let db = self.db.lock().await;
        SqliteNoteStore::new(db.connection()).set_sync_flag(id, needs_sync)
    }

    /// Hard-delete a note row.
    pub async fn delete_note_permanent(&self, id: i64) -> Result<()> {
        let db = self.db.lock().await;
        SqliteNoteStore::new(db.connection()).delete_permanent(id)
    }

    /// Create a new category owned by `owner_id`. Starts dirty.
    pub async fn create_category(&self, name: &str, owner_id: Option<&str>) -> Result<Category> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput(
                "category name cannot be empty".to_string(),
            ));
        }

        let mut category = Category::new(name);
        category.owner_id = owner_id.map(ToString::to_string);

        let db = self.db.lock().await;
        let store = SqliteCategoryStore::new(db.connection());
        let id = store.upsert(&category)?;
        category.id = Some(id);
        Ok(category)
    }

    /// Fetch a category by local id.
    pub async fn get_category(&self, id: i64) -> Result<Option<Category>> {
        let db = self.db.lock().await;
        SqliteCategoryStore::new(db.connection()).get(id)
    }

    /// List all categories, by name.
    pub async fn list_categories(&self) -> Result<Vec<Category>> {
        let db = self.db.lock().await;
        SqliteCategoryStore::new(db.connection()).list()
    }

    /// All categories with pending local changes.
    pub async fn dirty_categories(&self) -> Result<Vec<Category>> {
        let db = self.db.lock().await;
        SqliteCategoryStore::new(db.connection()).dirty_categories()
    }

    /// Insert or update a category; returns the local id.
    pub async fn upsert_category(&self, category: &Category) -> Result<i64> {
        let db = self.db.lock().await;
        SqliteCategoryStore::new(db.connection()).upsert(category)
    }

    /// Look up a category by its remote document id.
    pub async fn find_category_by_cloud_id(&self, cloud_id: &str) -> Result<Option<Category>> {
        let db = self.db.lock().await;
        SqliteCategoryStore::new(db.connection()).find_by_cloud_id(cloud_id)
    }

    /// Look up a category by exact name.
    pub async fn find_category_by_name(&self, name: &str) -> Result<Option<Category>> {
        let db = self.db.lock().await;
        SqliteCategoryStore::new(db.connection()).find_by_name(name)
    }

    /// Record the local↔remote mapping for a category.
    pub async fn set_category_cloud_link(&self, id: i64, cloud_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        SqliteCategoryStore::new(db.connection()).set_cloud_link(id, cloud_id)
    }

    /// Set or clear a category's dirty flag.
    pub async fn set_category_sync_flag(&self, id: i64, needs_sync: bool) -> Result<()> {
        let db = self.db.lock().await;
        SqliteCategoryStore::new(db.connection()).set_sync_flag(id, needs_sync)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn in_memory_create_and_list_roundtrip() {
        let service = StoreService::open_in_memory().unwrap();

        service
            .create_note("Shopping", "milk eggs bread", Some("user-1"))
            .await
            .unwrap();
        let notes = service.list_notes(10, 0).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].title, "Shopping");
        assert!(notes[0].needs_sync);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_note_rejects_empty_input() {
        let service = StoreService::open_in_memory().unwrap();
        let result = service.create_note("  ", "\n", None).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn trash_note_marks_dirty_and_hides() {
        let service = StoreService::open_in_memory().unwrap();

        let note = service.create_note("a", "b", None).await.unwrap();
        let id = note.id.unwrap();
        service.set_note_sync_flag(id, false).await.unwrap();

        let trashed = service.trash_note(id).await.unwrap();
        assert!(trashed.is_trashed);
        assert!(trashed.needs_sync);

        let visible = service.list_notes(10, 0).await.unwrap();
        assert!(visible.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_note_bumps_modified_at() {
        let service = StoreService::open_in_memory().unwrap();

        let note = service.create_note("a", "b", None).await.unwrap();
        let id = note.id.unwrap();
        let updated = service.update_note(id, "a", "b longer").await.unwrap();

        assert!(updated.modified_at >= note.modified_at);
        assert_eq!(updated.body, "b longer");
    }
}
