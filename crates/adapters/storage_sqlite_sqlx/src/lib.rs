//! # growdash-adapter-storage-sqlite-sqlx
//!
//! `SQLite` persistence adapter using [sqlx](https://docs.rs/sqlx).
//!
//! ## Responsibilities
//! - Implement `EventStore`, `CommandStore` and `OccurrenceLedger` from
//!   `growdash-app::ports`
//! - Manage `SQLite` connection pool lifecycle
//! - Run database migrations (using sqlx embedded migrations)
//! - Map between domain types and database rows
//!
//! ## Dependency rule
//! Depends on `growdash-app` (for port traits) and `growdash-domain` (for domain types).
//! The `app` and `domain` crates must never reference this adapter.

mod codec;
pub mod command_repo;
pub mod error;
pub mod event_repo;
pub mod ledger;
pub mod pool;

pub use command_repo::SqliteCommandStore;
pub use error::StorageError;
pub use event_repo::SqliteEventStore;
pub use ledger::SqliteOccurrenceLedger;
pub use pool::{Config, Database};
