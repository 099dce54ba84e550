//! PostgreSQL adapter for cla-store.
//!
//! - [`PgDocumentStore`]: the `DocumentStore` port on one JSONB table.
//! - [`PgAdvisoryLock`]: the serialization lock on transaction-scoped
//!   advisory locks, shared by every process using the same database.
//! - [`DatabaseConfig`]: pool settings from the environment.

pub mod config;
pub mod lock;
pub mod store;

pub use config::{mask_database_url, DatabaseConfig};
pub use lock::{lock_key, PgAdvisoryLock};
pub use store::PgDocumentStore;
