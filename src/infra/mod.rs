//! Storage backends.

pub mod store;

pub use store::{ExecutionStore, InMemoryStore, PruneReport, SqliteStore, StoreError};
