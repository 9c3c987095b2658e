//! Database layer for driftpad

mod category_store;
mod connection;
mod migrations;
mod note_store;

pub use category_store::{CategoryStore, SqliteCategoryStore};
pub use connection::Database;
pub use note_store::{NoteStore, SqliteNoteStore};
