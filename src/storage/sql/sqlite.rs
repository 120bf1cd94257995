//! `SqliteBackend` — the embedded durable backend, via `sqlx`.
//!
//! Ids and timestamps are stored as `TEXT` (UUID canonical form, RFC3339)
//! since SQLite has no native UUID or `timestamptz` type. `names_to_addrs`
//! is not implemented here — see [`super::postgres`].

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{FromRow, Row, SqlitePool};
use uuid::Uuid;

use crate::model::{EdgeId, EdgeTagId, EntityId, EntityTagId};
use crate::storage::{PoolConfig, RawEdge, RawEdgeTag, RawEntity, RawEntityTag, Since, StorageBackend};
use crate::timestamp::truncate_to_secs;
use crate::{Error, Result};

pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    pub async fn connect(path: &str, pool: PoolConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(path)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(pool.max_connections)
            .min_connections(pool.min_idle)
            .max_lifetime(pool.max_lifetime)
            .idle_timeout(pool.idle_timeout)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations/sqlite")
            .run(&pool)
            .await
            .map_err(|e| Error::BackendFailure(sqlx::Error::Configuration(Box::new(e))))?;

        Ok(Self { pool })
    }
}

fn parse_uuid(s: &str, col: &'static str) -> sqlx::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| sqlx::Error::ColumnDecode {
        index: col.to_string(),
        source: Box::new(e),
    })
}

impl<'r> FromRow<'r, SqliteRow> for RawEntity {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        let id_text: String = row.try_get("id")?;
        let content_text: String = row.try_get("content")?;
        Ok(RawEntity {
            id: EntityId(parse_uuid(&id_text, "id")?),
            etype: row.try_get("etype")?,
            content: serde_json::from_str(&content_text).map_err(|e| sqlx::Error::ColumnDecode {
                index: "content".into(),
                source: Box::new(e),
            })?,
            created_at: row.try_get("created_at")?,
            last_seen: row.try_get("last_seen")?,
        })
    }
}

impl<'r> FromRow<'r, SqliteRow> for RawEdge {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        let id_text: String = row.try_get("id")?;
        let from_text: String = row.try_get("from_entity_id")?;
        let to_text: String = row.try_get("to_entity_id")?;
        let content_text: String = row.try_get("content")?;
        Ok(RawEdge {
            id: EdgeId(parse_uuid(&id_text, "id")?),
            etype: row.try_get("etype")?,
            content: serde_json::from_str(&content_text).map_err(|e| sqlx::Error::ColumnDecode {
                index: "content".into(),
                source: Box::new(e),
            })?,
            from_entity_id: EntityId(parse_uuid(&from_text, "from_entity_id")?),
            to_entity_id: EntityId(parse_uuid(&to_text, "to_entity_id")?),
            created_at: row.try_get("created_at")?,
            last_seen: row.try_get("last_seen")?,
        })
    }
}

impl<'r> FromRow<'r, SqliteRow> for RawEntityTag {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        let id_text: String = row.try_get("id")?;
        let entity_text: String = row.try_get("entity_id")?;
        let content_text: String = row.try_get("content")?;
        Ok(RawEntityTag {
            id: EntityTagId(parse_uuid(&id_text, "id")?),
            ttype: row.try_get("ttype")?,
            content: serde_json::from_str(&content_text).map_err(|e| sqlx::Error::ColumnDecode {
                index: "content".into(),
                source: Box::new(e),
            })?,
            entity_id: EntityId(parse_uuid(&entity_text, "entity_id")?),
            created_at: row.try_get("created_at")?,
            last_seen: row.try_get("last_seen")?,
        })
    }
}

impl<'r> FromRow<'r, SqliteRow> for RawEdgeTag {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        let id_text: String = row.try_get("id")?;
        let edge_text: String = row.try_get("edge_id")?;
        let content_text: String = row.try_get("content")?;
        Ok(RawEdgeTag {
            id: EdgeTagId(parse_uuid(&id_text, "id")?),
            ttype: row.try_get("ttype")?,
            content: serde_json::from_str(&content_text).map_err(|e| sqlx::Error::ColumnDecode {
                index: "content".into(),
                source: Box::new(e),
            })?,
            edge_id: EdgeId(parse_uuid(&edge_text, "edge_id")?),
            created_at: row.try_get("created_at")?,
            last_seen: row.try_get("last_seen")?,
        })
    }
}

fn not_found_if_empty<T>(rows: Vec<T>, since: Since, what: impl FnOnce() -> String) -> Result<Vec<T>> {
    if rows.is_empty() && since.is_filtered() {
        return Err(Error::NotFound(what()));
    }
    Ok(rows)
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn create_raw_entity(
        &self,
        etype: &str,
        content: Json,
        created_at: Option<DateTime<Utc>>,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<EntityId> {
        let id = EntityId::new();
        let now = crate::timestamp::now();
        let created_at = created_at.map(truncate_to_secs).unwrap_or(now);
        let last_seen = last_seen.map(truncate_to_secs).unwrap_or(created_at);

        sqlx::query(
            "INSERT INTO entities (id, etype, content, created_at, last_seen) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.0.to_string())
        .bind(etype)
        .bind(content.to_string())
        .bind(created_at)
        .bind(last_seen)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get_raw_entity(&self, id: EntityId) -> Result<Option<RawEntity>> {
        let row = sqlx::query_as::<_, RawEntity>("SELECT * FROM entities WHERE id = ?")
            .bind(id.0.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn query_entities_by_content(
        &self,
        etype: &str,
        identity_key: &str,
        value: &Json,
        since: Since,
    ) -> Result<Vec<RawEntity>> {
        // Compare both sides through `json_extract` rather than binding a
        // stringified value: SQLite's type-affinity rules make `INTEGER = TEXT`
        // always false (e.g. the AutonomousSystem.number identity), so a raw
        // text comparison silently never matches a numeric identity value.
        // Passing the bound value through `json_extract(?, '$')` too means
        // both sides resolve to the same SQLite storage class as the stored
        // JSON scalar, whatever its type.
        let value_json_text = value.to_string();
        let path = format!("$.{identity_key}");
        let rows = match since {
            Since::Unfiltered => {
                sqlx::query_as::<_, RawEntity>(
                    "SELECT * FROM entities WHERE etype = ? AND json_extract(content, ?) = json_extract(?, '$')",
                )
                .bind(etype)
                .bind(&path)
                .bind(&value_json_text)
                .fetch_all(&self.pool)
                .await?
            }
            Since::At(ts) => {
                sqlx::query_as::<_, RawEntity>(
                    "SELECT * FROM entities WHERE etype = ? AND json_extract(content, ?) = json_extract(?, '$') AND last_seen >= ?",
                )
                .bind(etype)
                .bind(&path)
                .bind(&value_json_text)
                .bind(ts)
                .fetch_all(&self.pool)
                .await?
            }
        };
        not_found_if_empty(rows, since, || {
            format!("no {etype} with {identity_key}={value} since the requested time")
        })
    }

    async fn query_entities_by_kind(&self, etype: &str, since: Since) -> Result<Vec<RawEntity>> {
        let rows = match since {
            Since::Unfiltered => {
                sqlx::query_as::<_, RawEntity>("SELECT * FROM entities WHERE etype = ?")
                    .bind(etype)
                    .fetch_all(&self.pool)
                    .await?
            }
            Since::At(ts) => {
                sqlx::query_as::<_, RawEntity>("SELECT * FROM entities WHERE etype = ? AND last_seen >= ?")
                    .bind(etype)
                    .bind(ts)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        not_found_if_empty(rows, since, || format!("no entities of kind {etype} since the requested time"))
    }

    async fn update_entity_last_seen(&self, id: EntityId, ts: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE entities SET last_seen = ? WHERE id = ?")
            .bind(truncate_to_secs(ts))
            .bind(id.0.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("entity {id}")));
        }
        Ok(())
    }

    async fn delete_entity(&self, id: EntityId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM entities WHERE id = ?")
            .bind(id.0.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_raw_edge(
        &self,
        etype: &str,
        content: Json,
        from: EntityId,
        to: EntityId,
        created_at: Option<DateTime<Utc>>,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<EdgeId> {
        let id = EdgeId::new();
        let now = crate::timestamp::now();
        let created_at = created_at.map(truncate_to_secs).unwrap_or(now);
        let last_seen = last_seen.map(truncate_to_secs).unwrap_or(created_at);

        sqlx::query(
            "INSERT INTO edges (id, etype, content, from_entity_id, to_entity_id, created_at, last_seen)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.0.to_string())
        .bind(etype)
        .bind(content.to_string())
        .bind(from.0.to_string())
        .bind(to.0.to_string())
        .bind(created_at)
        .bind(last_seen)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get_raw_edge(&self, id: EdgeId) -> Result<Option<RawEdge>> {
        let row = sqlx::query_as::<_, RawEdge>("SELECT * FROM edges WHERE id = ?")
            .bind(id.0.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn query_edges_from(&self, from: EntityId, since: Since) -> Result<Vec<RawEdge>> {
        let rows = match since {
            Since::Unfiltered => {
                sqlx::query_as::<_, RawEdge>("SELECT * FROM edges WHERE from_entity_id = ?")
                    .bind(from.0.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
            Since::At(ts) => {
                sqlx::query_as::<_, RawEdge>(
                    "SELECT * FROM edges WHERE from_entity_id = ? AND last_seen >= ?",
                )
                .bind(from.0.to_string())
                .bind(ts)
                .fetch_all(&self.pool)
                .await?
            }
        };
        not_found_if_empty(rows, since, || format!("no outgoing edges from {from} since the requested time"))
    }

    async fn query_edges_to(&self, to: EntityId, since: Since) -> Result<Vec<RawEdge>> {
        let rows = match since {
            Since::Unfiltered => {
                sqlx::query_as::<_, RawEdge>("SELECT * FROM edges WHERE to_entity_id = ?")
                    .bind(to.0.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
            Since::At(ts) => {
                sqlx::query_as::<_, RawEdge>("SELECT * FROM edges WHERE to_entity_id = ? AND last_seen >= ?")
                    .bind(to.0.to_string())
                    .bind(ts)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        not_found_if_empty(rows, since, || format!("no incoming edges to {to} since the requested time"))
    }

    async fn update_edge_last_seen(&self, id: EdgeId, ts: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE edges SET last_seen = ? WHERE id = ?")
            .bind(truncate_to_secs(ts))
            .bind(id.0.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("edge {id}")));
        }
        Ok(())
    }

    async fn delete_edge(&self, id: EdgeId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM edges WHERE id = ?")
            .bind(id.0.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_entity_tag(
        &self,
        entity_id: EntityId,
        ttype: &str,
        content: Json,
        created_at: Option<DateTime<Utc>>,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<EntityTagId> {
        let id = EntityTagId::new();
        let now = crate::timestamp::now();
        let created_at = created_at.map(truncate_to_secs).unwrap_or(now);
        let last_seen = last_seen.map(truncate_to_secs).unwrap_or(created_at);

        sqlx::query(
            "INSERT INTO entity_tags (id, ttype, content, entity_id, created_at, last_seen)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id.0.to_string())
        .bind(ttype)
        .bind(content.to_string())
        .bind(entity_id.0.to_string())
        .bind(created_at)
        .bind(last_seen)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get_entity_tags(&self, entity_id: EntityId, since: Since) -> Result<Vec<RawEntityTag>> {
        let rows = match since {
            Since::Unfiltered => {
                sqlx::query_as::<_, RawEntityTag>("SELECT * FROM entity_tags WHERE entity_id = ?")
                    .bind(entity_id.0.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
            Since::At(ts) => {
                sqlx::query_as::<_, RawEntityTag>(
                    "SELECT * FROM entity_tags WHERE entity_id = ? AND last_seen >= ?",
                )
                .bind(entity_id.0.to_string())
                .bind(ts)
                .fetch_all(&self.pool)
                .await?
            }
        };
        not_found_if_empty(rows, since, || format!("no tags on entity {entity_id} since the requested time"))
    }

    async fn update_entity_tag_last_seen(&self, id: EntityTagId, ts: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE entity_tags SET last_seen = ? WHERE id = ?")
            .bind(truncate_to_secs(ts))
            .bind(id.0.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("entity tag {id}")));
        }
        Ok(())
    }

    async fn delete_entity_tag(&self, id: EntityTagId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM entity_tags WHERE id = ?")
            .bind(id.0.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_edge_tag(
        &self,
        edge_id: EdgeId,
        ttype: &str,
        content: Json,
        created_at: Option<DateTime<Utc>>,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<EdgeTagId> {
        let id = EdgeTagId::new();
        let now = crate::timestamp::now();
        let created_at = created_at.map(truncate_to_secs).unwrap_or(now);
        let last_seen = last_seen.map(truncate_to_secs).unwrap_or(created_at);

        sqlx::query(
            "INSERT INTO edge_tags (id, ttype, content, edge_id, created_at, last_seen)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id.0.to_string())
        .bind(ttype)
        .bind(content.to_string())
        .bind(edge_id.0.to_string())
        .bind(created_at)
        .bind(last_seen)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get_edge_tags(&self, edge_id: EdgeId, since: Since) -> Result<Vec<RawEdgeTag>> {
        let rows = match since {
            Since::Unfiltered => {
                sqlx::query_as::<_, RawEdgeTag>("SELECT * FROM edge_tags WHERE edge_id = ?")
                    .bind(edge_id.0.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
            Since::At(ts) => {
                sqlx::query_as::<_, RawEdgeTag>(
                    "SELECT * FROM edge_tags WHERE edge_id = ? AND last_seen >= ?",
                )
                .bind(edge_id.0.to_string())
                .bind(ts)
                .fetch_all(&self.pool)
                .await?
            }
        };
        not_found_if_empty(rows, since, || format!("no tags on edge {edge_id} since the requested time"))
    }

    async fn update_edge_tag_last_seen(&self, id: EdgeTagId, ts: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE edge_tags SET last_seen = ? WHERE id = ?")
            .bind(truncate_to_secs(ts))
            .bind(id.0.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("edge tag {id}")));
        }
        Ok(())
    }

    async fn delete_edge_tag(&self, id: EdgeTagId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM edge_tags WHERE id = ?")
            .bind(id.0.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // names_to_addrs: not supported, falls through to the trait default.
}
