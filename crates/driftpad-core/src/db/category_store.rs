//! Category store implementation

use rusqlite::{params, Connection};

use crate::error::{Error, Result};
use crate::models::Category;

const CATEGORY_COLUMNS: &str =
    "id, cloud_id, name, color, created_at, modified_at, needs_sync, owner_id";

/// Trait for category storage operations consumed by the sync engine.
pub trait CategoryStore {
    /// Insert or update a category; returns the local id
    fn upsert(&self, category: &Category) -> Result<i64>;

    /// Get a category by local id
    fn get(&self, id: i64) -> Result<Option<Category>>;

    /// List all categories, by name
    fn list(&self) -> Result<Vec<Category>>;

    /// All categories with pending local changes
    fn dirty_categories(&self) -> Result<Vec<Category>>;

    /// Look up a category by its remote document id
    fn find_by_cloud_id(&self, cloud_id: &str) -> Result<Option<Category>>;

    /// Look up a category by exact name
    fn find_by_name(&self, name: &str) -> Result<Option<Category>>;

    /// Record the local↔remote mapping for a category
    fn set_cloud_link(&self, id: i64, cloud_id: &str) -> Result<()>;

    /// Set or clear the dirty flag
    fn set_sync_flag(&self, id: i64, needs_sync: bool) -> Result<()>;
}

/// `SQLite` implementation of `CategoryStore`
pub struct SqliteCategoryStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteCategoryStore<'a> {
    /// Create a new store with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_category(row: &rusqlite::Row<'_>) -> rusqlite::Result<Category> {
        Ok(Category {
            id: Some(row.get(0)?),
            cloud_id: row.get(1)?,
            name: row.get(2)?,
            color: row.get(3)?,
            created_at: row.get(4)?,
            modified_at: row.get(5)?,
            needs_sync: row.get::<_, i32>(6)? != 0,
            owner_id: row.get(7)?,
        })
    }
}

impl CategoryStore for SqliteCategoryStore<'_> {
    fn upsert(&self, category: &Category) -> Result<i64> {
        if let Some(id) = category.id {
            let rows = self.conn.execute(
                "UPDATE categories SET cloud_id = ?, name = ?, color = ?, created_at = ?,
                     modified_at = ?, needs_sync = ?, owner_id = ?
                 WHERE id = ?",
                params![
                    category.cloud_id,
                    category.name,
                    category.color,
                    category.created_at,
                    category.modified_at,
                    i32::from(category.needs_sync),
                    category.owner_id,
                    id,
                ],
            )?;

            if rows == 0 {
                return Err(Error::NotFound(format!("category {id}")));
            }
            return Ok(id);
        }

        self.conn.execute(
            "INSERT INTO categories (cloud_id, name, color, created_at, modified_at, needs_sync, owner_id)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                category.cloud_id,
                category.name,
                category.color,
                category.created_at,
                category.modified_at,
                i32::from(category.needs_sync),
                category.owner_id,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get(&self, id: i64) -> Result<Option<Category>> {
        let result = self.conn.query_row(
            &format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = ?"),
            params![id],
            Self::parse_category,
        );

        match result {
            Ok(category) => Ok(Some(category)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<Category>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories ORDER BY name ASC"
        ))?;

        let categories = stmt
            .query_map([], Self::parse_category)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(categories)
    }

    fn dirty_categories(&self) -> Result<Vec<Category>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories WHERE needs_sync = 1 ORDER BY modified_at ASC"
        ))?;

        let categories = stmt
            .query_map([], Self::parse_category)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(categories)
    }

    fn find_by_cloud_id(&self, cloud_id: &str) -> Result<Option<Category>> {
        let result = self.conn.query_row(
            &format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE cloud_id = ?"),
            params![cloud_id],
            Self::parse_category,
        );

        match result {
            Ok(category) => Ok(Some(category)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn find_by_name(&self, name: &str) -> Result<Option<Category>> {
        let result = self.conn.query_row(
            &format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE name = ? ORDER BY id ASC LIMIT 1"),
            params![name],
            Self::parse_category,
        );

        match result {
            Ok(category) => Ok(Some(category)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_cloud_link(&self, id: i64, cloud_id: &str) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE categories SET cloud_id = ? WHERE id = ?",
            params![cloud_id, id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("category {id}")));
        }
        Ok(())
    }

    fn set_sync_flag(&self, id: i64, needs_sync: bool) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE categories SET needs_sync = ? WHERE id = ?",
            params![i32::from(needs_sync), id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("category {id}")));
        }
        Ok(())
    }
}
