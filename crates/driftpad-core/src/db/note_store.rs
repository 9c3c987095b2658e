//! Note store implementation

use rusqlite::{params, Connection};

use crate::error::{Error, Result};
use crate::models::Note;

const NOTE_COLUMNS: &str = "id, cloud_id, title, body, created_at, modified_at, \
     is_favorite, is_trashed, is_locked, color_tag, category_id, labels, attachments, \
     needs_sync, owner_id";

/// Trait for note storage operations consumed by the sync engine.
///
/// Every operation is atomic at single-record granularity; `upsert_many` is
/// not transactional across records and may partially apply on failure.
pub trait NoteStore {
    /// Insert or update a note; returns the local id
    fn upsert(&self, note: &Note) -> Result<i64>;

    /// Upsert a batch of notes; returns the number applied
    fn upsert_many(&self, notes: &[Note]) -> Result<usize>;

    /// Get a note by local id
    fn get(&self, id: i64) -> Result<Option<Note>>;

    /// List active notes, newest first
    fn list(&self, limit: usize, offset: usize) -> Result<Vec<Note>>;

    /// All notes with pending local changes, including trashed ones
    fn dirty_notes(&self) -> Result<Vec<Note>>;

    /// All non-trashed notes
    fn active_notes(&self) -> Result<Vec<Note>>;

    /// Look up a note by its remote document id
    fn find_by_cloud_id(&self, cloud_id: &str) -> Result<Option<Note>>;

    /// Record the local↔remote mapping for a note
    fn set_cloud_link(&self, id: i64, cloud_id: &str) -> Result<()>;

    /// Set or clear the dirty flag
    fn set_sync_flag(&self, id: i64, needs_sync: bool) -> Result<()>;

    /// Hard-delete a note row
    fn delete_permanent(&self, id: i64) -> Result<()>;
}

/// `SQLite` implementation of `NoteStore`
pub struct SqliteNoteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteNoteStore<'a> {
    /// Create a new store with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a note from a database row
    fn parse_note(row: &rusqlite::Row<'_>) -> rusqlite::Result<Note> {
        let labels: String = row.get(11)?;
        let attachments: String = row.get(12)?;
        Ok(Note {
            id: Some(row.get(0)?),
            cloud_id: row.get(1)?,
            title: row.get(2)?,
            body: row.get(3)?,
            created_at: row.get(4)?,
            modified_at: row.get(5)?,
            is_favorite: row.get::<_, i32>(6)? != 0,
            is_trashed: row.get::<_, i32>(7)? != 0,
            is_locked: row.get::<_, i32>(8)? != 0,
            color_tag: row.get(9)?,
            category_id: row.get(10)?,
            labels: serde_json::from_str(&labels).unwrap_or_default(),
            attachments: serde_json::from_str(&attachments).unwrap_or_default(),
            needs_sync: row.get::<_, i32>(13)? != 0,
            owner_id: row.get(14)?,
        })
    }

    fn insert(&self, note: &Note) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO notes (cloud_id, title, body, created_at, modified_at,
                 is_favorite, is_trashed, is_locked, color_tag, category_id,
                 labels, attachments, needs_sync, owner_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                note.cloud_id,
                note.title,
                note.body,
                note.created_at,
                note.modified_at,
                i32::from(note.is_favorite),
                i32::from(note.is_trashed),
                i32::from(note.is_locked),
                note.color_tag,
                note.category_id,
                serde_json::to_string(&note.labels)?,
                serde_json::to_string(&note.attachments)?,
                i32::from(note.needs_sync),
                note.owner_id,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update(&self, id: i64, note: &Note) -> Result<i64> {
        let rows = self.conn.execute(
            "UPDATE notes SET cloud_id = ?, title = ?, body = ?, created_at = ?,
                 modified_at = ?, is_favorite = ?, is_trashed = ?, is_locked = ?,
                 color_tag = ?, category_id = ?, labels = ?, attachments = ?,
                 needs_sync = ?, owner_id = ?
             WHERE id = ?",
            params![
                note.cloud_id,
                note.title,
                note.body,
                note.created_at,
                note.modified_at,
                i32::from(note.is_favorite),
                i32::from(note.is_trashed),
                i32::from(note.is_locked),
                note.color_tag,
                note.category_id,
                serde_json::to_string(&note.labels)?,
                serde_json::to_string(&note.attachments)?,
                i32::from(note.needs_sync),
                note.owner_id,
                id,
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("note {id}")));
        }
        Ok(id)
    }
}

impl NoteStore for SqliteNoteStore<'_> {
    fn upsert(&self, note: &Note) -> Result<i64> {
        match note.id {
            Some(id) => self.update(id, note),
            None => self.insert(note),
        }
    }

    fn upsert_many(&self, notes: &[Note]) -> Result<usize> {
        let mut applied = 0;
        for note in notes {
            self.upsert(note)?;
            applied += 1;
        }
        Ok(applied)
    }

    fn get(&self, id: i64) -> Result<Option<Note>> {
        let result = self.conn.query_row(
            &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?"),
            params![id],
            Self::parse_note,
        );

        match result {
            Ok(note) => Ok(Some(note)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, limit: usize, offset: usize) -> Result<Vec<Note>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {NOTE_COLUMNS} FROM notes
             WHERE is_trashed = 0
             ORDER BY modified_at DESC
             LIMIT ? OFFSET ?"
        ))?;

        let notes = stmt
            .query_map(params![limit as i64, offset as i64], Self::parse_note)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(notes)
    }

    fn dirty_notes(&self) -> Result<Vec<Note>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {NOTE_COLUMNS} FROM notes
             WHERE needs_sync = 1
             ORDER BY modified_at ASC"
        ))?;

        let notes = stmt
            .query_map([], Self::parse_note)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(notes)
    }

    fn active_notes(&self) -> Result<Vec<Note>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {NOTE_COLUMNS} FROM notes
             WHERE is_trashed = 0
             ORDER BY modified_at DESC"
        ))?;

        let notes = stmt
            .query_map([], Self::parse_note)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(notes)
    }

    fn find_by_cloud_id(&self, cloud_id: &str) -> Result<Option<Note>> {
        let result = self.conn.query_row(
            &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE cloud_id = ?"),
            params![cloud_id],
            Self::parse_note,
        );

        match result {
            Ok(note) => Ok(Some(note)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_cloud_link(&self, id: i64, cloud_id: &str) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE notes SET cloud_id = ? WHERE id = ?",
            params![cloud_id, id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("note {id}")));
        }
        Ok(())
    }

    fn set_sync_flag(&self, id: i64, needs_sync: bool) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE notes SET needs_sync = ? WHERE id = ?",
            params![i32::from(needs_sync), id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("note {id}")));
        }
        Ok(())
    }

    fn delete_permanent(&self, id: i64) -> Result<()> {
        let rows = self
            .conn
            .execute("DELETE FROM notes WHERE id = ?", params![id])?;

        if rows == 0 {
            return Err(Error::NotFound(format!("note {id}")));
        }
        Ok(())
    }
}
