//! SQL-backed storage: `sqlx`-based implementations of [`super::StorageBackend`].
//!
//! The two backends share a schema shape (see `migrations/`) but differ in
//! pool type, id/timestamp column encoding, and expression-index dialect,
//! so each gets its own file rather than a shared generic impl.

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub use postgres::PostgresBackend;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;
