//! Database migrations

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|flag| flag != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: Initial schema
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            cloud_id TEXT UNIQUE,
            name TEXT NOT NULL,
            color INTEGER,
            created_at INTEGER NOT NULL,
            modified_at INTEGER NOT NULL,
            needs_sync INTEGER NOT NULL DEFAULT 1,
            owner_id TEXT
        );
        CREATE TABLE IF NOT EXISTS notes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            cloud_id TEXT UNIQUE,
            title TEXT NOT NULL DEFAULT '',
            body TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            modified_at INTEGER NOT NULL,
            is_favorite INTEGER NOT NULL DEFAULT 0,
            is_trashed INTEGER NOT NULL DEFAULT 0,
            is_locked INTEGER NOT NULL DEFAULT 0,
            color_tag INTEGER,
            category_id INTEGER REFERENCES categories(id) ON DELETE SET NULL,
            labels TEXT NOT NULL DEFAULT '[]',
            attachments TEXT NOT NULL DEFAULT '[]',
            needs_sync INTEGER NOT NULL DEFAULT 1,
            owner_id TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_notes_modified ON notes(modified_at DESC);
        CREATE INDEX IF NOT EXISTS idx_notes_trashed ON notes(is_trashed);
        CREATE INDEX IF NOT EXISTS idx_notes_category ON notes(category_id);
        INSERT INTO schema_version (version) VALUES (1);
        COMMIT;",
    )?;

    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: sync bookkeeping lookups
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
        CREATE INDEX IF NOT EXISTS idx_notes_needs_sync ON notes(needs_sync);
        CREATE INDEX IF NOT EXISTS idx_notes_owner ON notes(owner_id);
        CREATE INDEX IF NOT EXISTS idx_categories_needs_sync ON categories(needs_sync);
        CREATE INDEX IF NOT EXISTS idx_categories_owner ON categories(owner_id);
        INSERT INTO schema_version (version) VALUES (2);
        COMMIT;",
    )?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_migrations() {
        let conn = setup();
        run(&conn).unwrap();

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = setup();
        run(&conn).unwrap();
        run(&conn).unwrap(); // Should not fail

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_cloud_id_unique_constraint() {
        let conn = setup();
        run(&conn).unwrap();

        conn.execute(
            "INSERT INTO notes (cloud_id, title, body, created_at, modified_at) VALUES ('abc', 't', 'b', 1, 1)",
            [],
        )
        .unwrap();

        let duplicate = conn.execute(
            "INSERT INTO notes (cloud_id, title, body, created_at, modified_at) VALUES ('abc', 't2', 'b2', 2, 2)",
            [],
        );
        assert!(duplicate.is_err());
    }
}
