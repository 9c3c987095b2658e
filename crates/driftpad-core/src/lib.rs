//! driftpad-core - Core library for driftpad
//!
//! This crate contains the shared models, the local record store, the remote
//! document store abstraction, and the bidirectional sync engine used by all
//! driftpad interfaces.

pub mod db;
pub mod dedup;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod session;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{Category, Note, SyncReport, SyncState, SyncStatus};
pub use services::StoreService;
pub use sync::{SyncEngine, SyncOptions};
