//! `PostgresBackend` — the durable production backend, via `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Row};

use crate::model::{EdgeId, EdgeTagId, EntityId, EntityTagId};
use crate::storage::{PoolConfig, RawEdge, RawEdgeTag, RawEntity, RawEntityTag, Since, StorageBackend};
use crate::timestamp::truncate_to_secs;
use crate::{Error, Result};

pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub async fn connect(dsn: &str, pool: PoolConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(pool.max_connections)
            .min_connections(pool.min_idle)
            .max_lifetime(pool.max_lifetime)
            .idle_timeout(pool.idle_timeout)
            .connect(dsn)
            .await?;

        sqlx::migrate!("./migrations/postgres")
            .run(&pool)
            .await
            .map_err(|e| Error::BackendFailure(sqlx::Error::Configuration(Box::new(e))))?;

        Ok(Self { pool })
    }
}

impl<'r> FromRow<'r, PgRow> for RawEntity {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        Ok(RawEntity {
            id: EntityId(row.try_get("id")?),
            etype: row.try_get("etype")?,
            content: row.try_get("content")?,
            created_at: row.try_get("created_at")?,
            last_seen: row.try_get("last_seen")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for RawEdge {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        Ok(RawEdge {
            id: EdgeId(row.try_get("id")?),
            etype: row.try_get("etype")?,
            content: row.try_get("content")?,
            from_entity_id: EntityId(row.try_get("from_entity_id")?),
            to_entity_id: EntityId(row.try_get("to_entity_id")?),
            created_at: row.try_get("created_at")?,
            last_seen: row.try_get("last_seen")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for RawEntityTag {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        Ok(RawEntityTag {
            id: EntityTagId(row.try_get("id")?),
            ttype: row.try_get("ttype")?,
            content: row.try_get("content")?,
            entity_id: EntityId(row.try_get("entity_id")?),
            created_at: row.try_get("created_at")?,
            last_seen: row.try_get("last_seen")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for RawEdgeTag {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        Ok(RawEdgeTag {
            id: EdgeTagId(row.try_get("id")?),
            ttype: row.try_get("ttype")?,
            content: row.try_get("content")?,
            edge_id: EdgeId(row.try_get("edge_id")?),
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
impl StorageBackend for PostgresBackend {
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
            "INSERT INTO entities (id, etype, content, created_at, last_seen) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id.0)
        .bind(etype)
        .bind(&content)
        .bind(created_at)
        .bind(last_seen)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get_raw_entity(&self, id: EntityId) -> Result<Option<RawEntity>> {
        let row = sqlx::query_as::<_, RawEntity>("SELECT * FROM entities WHERE id = $1")
            .bind(id.0)
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
        let value_text = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
        let rows = match since {
            Since::Unfiltered => {
                sqlx::query_as::<_, RawEntity>(
                    "SELECT * FROM entities WHERE etype = $1 AND content ->> $2 = $3",
                )
                .bind(etype)
                .bind(identity_key)
                .bind(&value_text)
                .fetch_all(&self.pool)
                .await?
            }
            Since::At(ts) => {
                sqlx::query_as::<_, RawEntity>(
                    "SELECT * FROM entities WHERE etype = $1 AND content ->> $2 = $3 AND last_seen >= $4",
                )
                .bind(etype)
                .bind(identity_key)
                .bind(&value_text)
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
                sqlx::query_as::<_, RawEntity>("SELECT * FROM entities WHERE etype = $1")
                    .bind(etype)
                    .fetch_all(&self.pool)
                    .await?
            }
            Since::At(ts) => {
                sqlx::query_as::<_, RawEntity>(
                    "SELECT * FROM entities WHERE etype = $1 AND last_seen >= $2",
                )
                .bind(etype)
                .bind(ts)
                .fetch_all(&self.pool)
                .await?
            }
        };
        not_found_if_empty(rows, since, || format!("no entities of kind {etype} since the requested time"))
    }

    async fn update_entity_last_seen(&self, id: EntityId, ts: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE entities SET last_seen = $1 WHERE id = $2")
            .bind(truncate_to_secs(ts))
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("entity {id}")));
        }
        Ok(())
    }

    async fn delete_entity(&self, id: EntityId) -> Result<bool> {
        // ON DELETE CASCADE on edges/entity_tags/edge_tags handles I3.
        let result = sqlx::query("DELETE FROM entities WHERE id = $1")
            .bind(id.0)
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
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(id.0)
        .bind(etype)
        .bind(&content)
        .bind(from.0)
        .bind(to.0)
        .bind(created_at)
        .bind(last_seen)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get_raw_edge(&self, id: EdgeId) -> Result<Option<RawEdge>> {
        let row = sqlx::query_as::<_, RawEdge>("SELECT * FROM edges WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn query_edges_from(&self, from: EntityId, since: Since) -> Result<Vec<RawEdge>> {
        let rows = match since {
            Since::Unfiltered => {
                sqlx::query_as::<_, RawEdge>("SELECT * FROM edges WHERE from_entity_id = $1")
                    .bind(from.0)
                    .fetch_all(&self.pool)
                    .await?
            }
            Since::At(ts) => {
                sqlx::query_as::<_, RawEdge>(
                    "SELECT * FROM edges WHERE from_entity_id = $1 AND last_seen >= $2",
                )
                .bind(from.0)
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
                sqlx::query_as::<_, RawEdge>("SELECT * FROM edges WHERE to_entity_id = $1")
                    .bind(to.0)
                    .fetch_all(&self.pool)
                    .await?
            }
            Since::At(ts) => {
                sqlx::query_as::<_, RawEdge>(
                    "SELECT * FROM edges WHERE to_entity_id = $1 AND last_seen >= $2",
                )
                .bind(to.0)
                .bind(ts)
                .fetch_all(&self.pool)
                .await?
            }
        };
        not_found_if_empty(rows, since, || format!("no incoming edges to {to} since the requested time"))
    }

    async fn update_edge_last_seen(&self, id: EdgeId, ts: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE edges SET last_seen = $1 WHERE id = $2")
            .bind(truncate_to_secs(ts))
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("edge {id}")));
        }
        Ok(())
    }

    async fn delete_edge(&self, id: EdgeId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM edges WHERE id = $1")
            .bind(id.0)
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
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(id.0)
        .bind(ttype)
        .bind(&content)
        .bind(entity_id.0)
        .bind(created_at)
        .bind(last_seen)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get_entity_tags(&self, entity_id: EntityId, since: Since) -> Result<Vec<RawEntityTag>> {
        let rows = match since {
            Since::Unfiltered => {
                sqlx::query_as::<_, RawEntityTag>("SELECT * FROM entity_tags WHERE entity_id = $1")
                    .bind(entity_id.0)
                    .fetch_all(&self.pool)
                    .await?
            }
            Since::At(ts) => {
                sqlx::query_as::<_, RawEntityTag>(
                    "SELECT * FROM entity_tags WHERE entity_id = $1 AND last_seen >= $2",
                )
                .bind(entity_id.0)
                .bind(ts)
                .fetch_all(&self.pool)
                .await?
            }
        };
        not_found_if_empty(rows, since, || format!("no tags on entity {entity_id} since the requested time"))
    }

    async fn update_entity_tag_last_seen(&self, id: EntityTagId, ts: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE entity_tags SET last_seen = $1 WHERE id = $2")
            .bind(truncate_to_secs(ts))
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("entity tag {id}")));
        }
        Ok(())
    }

    async fn delete_entity_tag(&self, id: EntityTagId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM entity_tags WHERE id = $1")
            .bind(id.0)
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
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(id.0)
        .bind(ttype)
        .bind(&content)
        .bind(edge_id.0)
        .bind(created_at)
        .bind(last_seen)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get_edge_tags(&self, edge_id: EdgeId, since: Since) -> Result<Vec<RawEdgeTag>> {
        let rows = match since {
            Since::Unfiltered => {
                sqlx::query_as::<_, RawEdgeTag>("SELECT * FROM edge_tags WHERE edge_id = $1")
                    .bind(edge_id.0)
                    .fetch_all(&self.pool)
                    .await?
            }
            Since::At(ts) => {
                sqlx::query_as::<_, RawEdgeTag>(
                    "SELECT * FROM edge_tags WHERE edge_id = $1 AND last_seen >= $2",
                )
                .bind(edge_id.0)
                .bind(ts)
                .fetch_all(&self.pool)
                .await?
            }
        };
        not_found_if_empty(rows, since, || format!("no tags on edge {edge_id} since the requested time"))
    }

    async fn update_edge_tag_last_seen(&self, id: EdgeTagId, ts: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE edge_tags SET last_seen = $1 WHERE id = $2")
            .bind(truncate_to_secs(ts))
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("edge tag {id}")));
        }
        Ok(())
    }

    async fn delete_edge_tag(&self, id: EdgeTagId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM edge_tags WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn names_to_addrs(
        &self,
        csv_fqdns: &str,
        from_ts: DateTime<Utc>,
        to_ts: DateTime<Utc>,
    ) -> Result<Vec<(String, String)>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT fqdn, addr FROM names_to_addrs($1, $2, $3)")
                .bind(csv_fqdns)
                .bind(from_ts)
                .bind(to_ts)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }
}
