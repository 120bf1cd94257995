//! # assetgraph-store
//!
//! Persistence layer for an attack-surface property graph: typed
//! security-relevant entities (domains, IPs, netblocks, certificates,
//! organizations, people, services, ...), directed labelled edges between
//! them, and free-form property tags on either. Built for scanner
//! pipelines that continuously rediscover the same assets — the store
//! coalesces rediscoveries, tracks first/last-seen timestamps, and answers
//! content/type/edge/since-window queries.
//!
//! Three layers:
//!
//! 1. [`storage`] — the pluggable `StorageBackend` trait plus its
//!    `Memory`/`Sqlite`/`Postgres` implementations, operating on raw
//!    discriminator+JSON rows.
//! 2. [`graph`] — [`GraphApi`], the taxonomy-validated, deduping façade
//!    scanner pipelines actually call.
//! 3. [`cache`] — [`Cache`], a write-through layer for high-volume writers
//!    that need synchronous in-memory reads with bounded-staleness durable
//!    replay.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use assetgraph_store::{graph::GraphApi, storage::MemoryBackend, taxonomy::StaticTaxonomy};
//! use assetgraph_store::model::asset::{AssetPayload, Fqdn};
//!
//! # async fn example() -> assetgraph_store::Result<()> {
//! let taxonomy = Arc::new(StaticTaxonomy::new());
//! let graph = GraphApi::new(Arc::new(MemoryBackend::new()), taxonomy);
//!
//! let entity = graph.create_asset(AssetPayload::Fqdn(Fqdn { name: "example.com".into() })).await?;
//! println!("{entity:?}");
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod graph;
pub mod model;
pub mod storage;
pub mod taxonomy;
pub mod timestamp;

pub use cache::Cache;
pub use graph::GraphApi;
pub use storage::BackendConfig;

/// Taxonomy-validated graph API errors (spec.md §7).
///
/// No `Conflict` variant is constructed: dedup absorbs what would
/// otherwise be a unique-constraint conflict into an update, and a
/// driver-level conflict that isn't one of our own dedup races surfaces as
/// `BackendFailure`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("taxonomy violation: {0}")]
    TaxonomyViolation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[cfg(any(feature = "sqlite", feature = "postgres"))]
    #[error("backend failure: {0}")]
    BackendFailure(#[from] sqlx::Error),

    #[cfg(not(any(feature = "sqlite", feature = "postgres")))]
    #[error("backend failure: {0}")]
    BackendFailure(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// Constructors (spec.md §6's `New(dbtype, dsn)`)
// ============================================================================

use std::sync::Arc;

use storage::{MemoryBackend, PoolConfig};
use taxonomy::Taxonomy;

/// Opens a volatile in-memory-only store. Useful for tests and embedding;
/// nothing written to it survives process exit.
pub fn open_memory(taxonomy: Arc<dyn Taxonomy>) -> GraphApi<MemoryBackend> {
    GraphApi::new(Arc::new(MemoryBackend::new()), taxonomy)
}

#[cfg(feature = "sqlite")]
pub async fn open_sqlite(
    path: &str,
    pool: PoolConfig,
    taxonomy: Arc<dyn Taxonomy>,
) -> Result<GraphApi<storage::sql::SqliteBackend>> {
    let backend = storage::sql::SqliteBackend::connect(path, pool).await?;
    Ok(GraphApi::new(Arc::new(backend), taxonomy))
}

#[cfg(feature = "postgres")]
pub async fn open_postgres(
    dsn: &str,
    pool: PoolConfig,
    taxonomy: Arc<dyn Taxonomy>,
) -> Result<GraphApi<storage::sql::PostgresBackend>> {
    let backend = storage::sql::PostgresBackend::connect(dsn, pool).await?;
    Ok(GraphApi::new(Arc::new(backend), taxonomy))
}

/// Wraps any durable backend with a write-through cache (spec.md §4.3).
/// `freq` bounds how often a repeat write for the same entity/edge is
/// replayed durably.
pub fn with_cache<B: storage::StorageBackend>(
    durable: Arc<B>,
    taxonomy: Arc<dyn Taxonomy>,
    freq: std::time::Duration,
) -> Arc<Cache<B>> {
    Cache::new(durable, taxonomy, freq)
}
