//! # Storage Backend Trait
//!
//! This is the contract between the graph API and any storage engine. It
//! operates on *raw* rows — a discriminator string plus a JSON payload —
//! leaving all taxonomy-aware (de)serialization to the graph API layer
//! (spec.md §4.1/§4.2).
//!
//! ## Implementations
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | `MemoryBackend` | `memory` | Volatile; backs the write-through cache and tests |
//! | `SqliteBackend` | `sql::sqlite` | Embedded, via `sqlx` |
//! | `PostgresBackend` | `sql::postgres` | Durable production backend, via `sqlx` |

pub mod memory;
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub mod sql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use std::time::Duration;

use crate::model::{EdgeId, EdgeTagId, EntityId, EntityTagId};
use crate::Result;

pub use memory::MemoryBackend;

// ============================================================================
// Since-filter
// ============================================================================

/// A "since" time cutoff (spec.md §4.1). `Unfiltered` returns every row;
/// `At(ts)` selects rows with `last_seen >= ts`, and a query that returns
/// no rows under `At(ts)` is a `NotFound`, not an empty `Vec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Since {
    Unfiltered,
    At(DateTime<Utc>),
}

impl Since {
    pub fn from_option(ts: Option<DateTime<Utc>>) -> Self {
        match ts {
            None => Since::Unfiltered,
            Some(ts) => Since::At(ts),
        }
    }

    pub fn is_filtered(&self) -> bool {
        matches!(self, Since::At(_))
    }

    pub fn matches(&self, last_seen: DateTime<Utc>) -> bool {
        match self {
            Since::Unfiltered => true,
            Since::At(ts) => last_seen >= *ts,
        }
    }
}

// ============================================================================
// Raw rows
// ============================================================================

#[derive(Debug, Clone)]
pub struct RawEntity {
    pub id: EntityId,
    pub etype: String,
    pub content: Json,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RawEdge {
    pub id: EdgeId,
    pub etype: String,
    pub content: Json,
    pub from_entity_id: EntityId,
    pub to_entity_id: EntityId,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RawEntityTag {
    pub id: EntityTagId,
    pub ttype: String,
    pub content: Json,
    pub entity_id: EntityId,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RawEdgeTag {
    pub id: EdgeTagId,
    pub ttype: String,
    pub content: Json,
    pub edge_id: EdgeId,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

// ============================================================================
// Backend configuration
// ============================================================================

/// Connection-pool sizing (spec.md §5): ~5 open / 2 idle, 1h lifetime, 10min
/// idle timeout.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_idle: u32,
    pub max_lifetime: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_idle: 2,
            max_lifetime: Duration::from_secs(3600),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

/// Configuration for connecting to a storage backend (spec.md §6's `New`).
#[derive(Debug, Clone)]
pub enum BackendConfig {
    Memory,
    Sqlite { path: String, pool: PoolConfig },
    Postgres { dsn: String, pool: PoolConfig },
}

// ============================================================================
// Unsupported-operation error construction
// ============================================================================

// `sqlx` is only pulled in by the `sqlite`/`postgres` features; building
// with neither enabled still needs a way to report "this backend can't do
// that" from the trait's default methods, so the error's inner type
// switches with the feature set rather than referencing `sqlx::Error`
// unconditionally.
#[cfg(any(feature = "sqlite", feature = "postgres"))]
fn unsupported(msg: &str) -> crate::Error {
    crate::Error::BackendFailure(sqlx::Error::Configuration(msg.into()))
}

#[cfg(not(any(feature = "sqlite", feature = "postgres")))]
fn unsupported(msg: &str) -> crate::Error {
    crate::Error::BackendFailure(msg.to_string())
}

// ============================================================================
// StorageBackend trait
// ============================================================================

/// The universal storage contract. Any backend that implements this trait
/// can serve as the storage layer for the graph API or the cache.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    // ------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------

    /// Pure insert, no dedup — dedup is the graph API's job.
    async fn create_raw_entity(
        &self,
        etype: &str,
        content: Json,
        created_at: Option<DateTime<Utc>>,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<EntityId>;

    async fn get_raw_entity(&self, id: EntityId) -> Result<Option<RawEntity>>;

    async fn query_entities_by_content(
        &self,
        etype: &str,
        identity_key: &str,
        value: &Json,
        since: Since,
    ) -> Result<Vec<RawEntity>>;

    async fn query_entities_by_kind(&self, etype: &str, since: Since) -> Result<Vec<RawEntity>>;

    async fn update_entity_last_seen(&self, id: EntityId, ts: DateTime<Utc>) -> Result<()>;

    /// Deletes the entity and cascades to its edges and tags (I3).
    /// Returns `true` if the entity existed.
    async fn delete_entity(&self, id: EntityId) -> Result<bool>;

    // ------------------------------------------------------------------
    // Edges
    // ------------------------------------------------------------------

    async fn create_raw_edge(
        &self,
        etype: &str,
        content: Json,
        from: EntityId,
        to: EntityId,
        created_at: Option<DateTime<Utc>>,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<EdgeId>;

    async fn get_raw_edge(&self, id: EdgeId) -> Result<Option<RawEdge>>;

    async fn query_edges_from(&self, from: EntityId, since: Since) -> Result<Vec<RawEdge>>;

    async fn query_edges_to(&self, to: EntityId, since: Since) -> Result<Vec<RawEdge>>;

    async fn update_edge_last_seen(&self, id: EdgeId, ts: DateTime<Utc>) -> Result<()>;

    async fn delete_edge(&self, id: EdgeId) -> Result<bool>;

    // ------------------------------------------------------------------
    // Entity tags
    // ------------------------------------------------------------------

    async fn create_entity_tag(
        &self,
        entity_id: EntityId,
        ttype: &str,
        content: Json,
        created_at: Option<DateTime<Utc>>,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<EntityTagId>;

    async fn get_entity_tags(
        &self,
        entity_id: EntityId,
        since: Since,
    ) -> Result<Vec<RawEntityTag>>;

    async fn update_entity_tag_last_seen(&self, id: EntityTagId, ts: DateTime<Utc>) -> Result<()>;

    async fn delete_entity_tag(&self, id: EntityTagId) -> Result<bool>;

    // ------------------------------------------------------------------
    // Edge tags
    // ------------------------------------------------------------------

    async fn create_edge_tag(
        &self,
        edge_id: EdgeId,
        ttype: &str,
        content: Json,
        created_at: Option<DateTime<Utc>>,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<EdgeTagId>;

    async fn get_edge_tags(&self, edge_id: EdgeId, since: Since) -> Result<Vec<RawEdgeTag>>;

    async fn update_edge_tag_last_seen(&self, id: EdgeTagId, ts: DateTime<Utc>) -> Result<()>;

    async fn delete_edge_tag(&self, id: EdgeTagId) -> Result<bool>;

    // ------------------------------------------------------------------
    // Escape hatch — database-side traversal (spec.md §6)
    // ------------------------------------------------------------------

    /// Resolve a comma-separated set of FQDNs to IPs by traversing
    /// SRV/NS/MX, then A/AAAA, then CNAME chains, filtered by
    /// `updated_at IN [from, to]`. Implemented in the database for backends
    /// that can express the recursion; others return `Error::BackendFailure`.
    async fn names_to_addrs(
        &self,
        _csv_fqdns: &str,
        _from_ts: DateTime<Utc>,
        _to_ts: DateTime<Utc>,
    ) -> Result<Vec<(String, String)>> {
        Err(unsupported("names_to_addrs is not supported by this backend"))
    }
}
