//! Service layer wrapping the database for async consumers.

mod store;

pub use store::StoreService;
