//! # Write-through cache
//!
//! A second [`GraphApi`] bound to a volatile [`MemoryBackend`], paired with
//! a pointer to the durable backend. Writes land on the in-memory replica
//! synchronously; a background drainer replays them against the durable
//! backend, coalescing repeat notifications for the same entity/edge within
//! a `freq` window (spec.md §4.3).

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::model::{
    AssetPayload, Edge, EdgeId, EdgeInput, EdgeTag, Entity, EntityId, EntityTag, PropertyPayload,
};
use crate::storage::{MemoryBackend, RawEdge, RawEntity, StorageBackend};
use crate::taxonomy::Taxonomy;
use crate::timestamp::now;
use crate::{GraphApi, Result};

type DrainJob = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

fn raw_entity_from(entity: &Entity) -> RawEntity {
    RawEntity {
        id: entity.id,
        etype: entity.asset.kind().to_string(),
        content: entity.asset.json(),
        created_at: entity.created_at,
        last_seen: entity.last_seen,
    }
}

fn raw_edge_from(edge: &Edge) -> RawEdge {
    RawEdge {
        id: edge.id,
        etype: edge.relation.relation_type().to_string(),
        content: edge.relation.json(),
        from_entity_id: edge.from_entity_id,
        to_entity_id: edge.to_entity_id,
        created_at: edge.created_at,
        last_seen: edge.last_seen,
    }
}

/// Write-through cache over any durable [`StorageBackend`].
pub struct Cache<D: StorageBackend> {
    memory: GraphApi<MemoryBackend>,
    durable: Arc<GraphApi<D>>,
    freq: Duration,
    process_start: DateTime<Utc>,
    drain_tx: mpsc::UnboundedSender<DrainJob>,
    /// `(op, key) -> last time this op was forwarded durably for this key`.
    /// Replaces the per-entity `cache_<op>` metadata tag described in
    /// spec.md §4.3 with the process-wide map the same section explicitly
    /// permits as a substitute.
    forwarded: Mutex<HashMap<(&'static str, String), DateTime<Utc>>>,
    /// `(op, key) -> last time a query of this shape was fully
    /// reconciled against the durable backend` — the `cache_find_*`
    /// counterpart of `forwarded`.
    reconciled: Mutex<HashMap<(&'static str, String), DateTime<Utc>>>,
}

impl<D: StorageBackend> Cache<D> {
    /// Wraps `durable` with a write-through cache. `freq` bounds how often
    /// a repeat write against the same key is replayed durably.
    pub fn new(durable: Arc<D>, taxonomy: Arc<dyn Taxonomy>, freq: Duration) -> Arc<Self> {
        let memory = GraphApi::new(Arc::new(MemoryBackend::new()), taxonomy.clone());
        let durable = Arc::new(GraphApi::new(durable, taxonomy));
        let (drain_tx, mut drain_rx) = mpsc::unbounded_channel::<DrainJob>();

        tokio::spawn(async move {
            while let Some(job) = drain_rx.recv().await {
                job().await;
            }
        });

        Arc::new(Self {
            memory,
            durable,
            freq,
            process_start: now(),
            drain_tx,
            forwarded: Mutex::new(HashMap::new()),
            reconciled: Mutex::new(HashMap::new()),
        })
    }

    /// Enqueues `job` on the single background drainer. Enqueue only ever
    /// holds the channel's own lock-free send path — never the cache's
    /// state mutexes — so the drainer can never deadlock against a public
    /// mutation in progress.
    fn enqueue<F>(&self, job: F)
    where
        F: FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + 'static,
    {
        let _ = self.drain_tx.send(Box::new(job));
    }

    /// Blocks until every write enqueued before this call has finished
    /// replaying against the durable backend. Gives linearizable
    /// read-after-write for callers that need it (spec.md §5).
    pub async fn barrier(&self) {
        let (tx, rx) = oneshot::channel();
        self.enqueue(move || {
            Box::pin(async move {
                let _ = tx.send(());
            })
        });
        let _ = rx.await;
    }

    fn should_forward(&self, op: &'static str, key: &str) -> bool {
        let mut forwarded = self.forwarded.lock();
        let now = now();
        let stale = match forwarded.get(&(op, key.to_string())) {
            None => true,
            Some(last) => {
                let elapsed = (now - *last).to_std().unwrap_or(Duration::ZERO);
                elapsed >= self.freq
            }
        };
        if stale {
            forwarded.insert((op, key.to_string()), now);
        }
        stale
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    pub async fn create_asset(&self, asset: AssetPayload) -> Result<Entity> {
        let entity = self.memory.create_asset(asset).await?;
        let key = format!("{}:{}", entity.asset_kind(), entity.asset.identity_value());
        if self.should_forward("CreateEntity", &key) {
            let durable = self.durable.clone();
            let asset = entity.asset.clone();
            let created_at = entity.created_at;
            let last_seen = entity.last_seen;
            self.enqueue(move || {
                Box::pin(async move {
                    if let Err(err) = durable.create_asset_at(asset, Some(created_at), Some(last_seen)).await {
                        tracing::warn!(?err, "cache drain: CreateEntity failed");
                    }
                })
            });
        }
        Ok(entity)
    }

    pub async fn link(&self, input: EdgeInput) -> Result<Edge> {
        let edge = self.memory.link(input).await?;
        let key = format!("{}-{}->{}", edge.from_entity_id, edge.relation.label(), edge.to_entity_id);
        if self.should_forward("CreateEdge", &key) {
            let durable = self.durable.clone();
            let input = EdgeInput {
                from_entity_id: edge.from_entity_id,
                to_entity_id: edge.to_entity_id,
                relation: edge.relation.clone(),
            };
            let created_at = edge.created_at;
            let last_seen = edge.last_seen;
            self.enqueue(move || {
                Box::pin(async move {
                    if let Err(err) = durable.link_at(input, Some(created_at), Some(last_seen)).await {
                        tracing::warn!(?err, "cache drain: CreateEdge failed");
                    }
                })
            });
        }
        Ok(edge)
    }

    pub async fn create_entity_tag(&self, entity_id: EntityId, property: PropertyPayload) -> Result<()> {
        let tag = self.memory.create_entity_tag(entity_id, property).await?;
        let key = format!("{entity_id}:{}:{}", tag.property.name(), tag.property.value());
        if self.should_forward("CreateEntityTag", &key) {
            let durable = self.durable.clone();
            let property = tag.property.clone();
            let created_at = tag.created_at;
            let last_seen = tag.last_seen;
            self.enqueue(move || {
                Box::pin(async move {
                    if let Err(err) = durable
                        .create_entity_tag_at(entity_id, property, Some(created_at), Some(last_seen))
                        .await
                    {
                        tracing::warn!(?err, "cache drain: CreateEntityTag failed");
                    }
                })
            });
        }
        Ok(())
    }

    pub async fn create_edge_tag(&self, edge_id: EdgeId, property: PropertyPayload) -> Result<()> {
        let tag = self.memory.create_edge_tag(edge_id, property).await?;
        let key = format!("{edge_id}:{}:{}", tag.property.name(), tag.property.value());
        if self.should_forward("CreateEdgeTag", &key) {
            let durable = self.durable.clone();
            let property = tag.property.clone();
            let created_at = tag.created_at;
            let last_seen = tag.last_seen;
            self.enqueue(move || {
                Box::pin(async move {
                    if let Err(err) = durable
                        .create_edge_tag_at(edge_id, property, Some(created_at), Some(last_seen))
                        .await
                    {
                        tracing::warn!(?err, "cache drain: CreateEdgeTag failed");
                    }
                })
            });
        }
        Ok(())
    }

    pub async fn delete_entity(&self, id: EntityId) -> Result<()> {
        self.memory.delete_entity(id).await?;
        let durable = self.durable.clone();
        self.enqueue(move || {
            Box::pin(async move {
                if let Err(err) = durable.delete_entity(id).await {
                    tracing::warn!(?err, "cache drain: DeleteEntity failed");
                }
            })
        });
        Ok(())
    }

    pub async fn delete_edge(&self, id: EdgeId) -> Result<()> {
        self.memory.delete_edge(id).await?;
        let durable = self.durable.clone();
        self.enqueue(move || {
            Box::pin(async move {
                if let Err(err) = durable.delete_edge(id).await {
                    tracing::warn!(?err, "cache drain: DeleteEdge failed");
                }
            })
        });
        Ok(())
    }

    pub async fn delete_entity_by_content(
        &self,
        kind: &str,
        identity_value: &serde_json::Value,
    ) -> Result<usize> {
        let deleted = self.memory.delete_entity_by_content(kind, identity_value).await?;
        let durable = self.durable.clone();
        let kind = kind.to_string();
        let identity_value = identity_value.clone();
        self.enqueue(move || {
            Box::pin(async move {
                if let Err(err) = durable.delete_entity_by_content(&kind, &identity_value).await {
                    tracing::warn!(?err, "cache drain: DeleteEntityByContent failed");
                }
            })
        });
        Ok(deleted)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn find_entity_by_id(&self, id: EntityId) -> Result<Entity> {
        if let Ok(entity) = self.memory.find_entity_by_id(id).await {
            return Ok(entity);
        }
        let entity = self.durable.find_entity_by_id(id).await?;
        self.memory.backend().put_raw_entity(raw_entity_from(&entity));
        Ok(entity)
    }

    pub async fn find_entities_by_content(
        &self,
        kind: &str,
        identity_value: &serde_json::Value,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Entity>> {
        let key = format!("{kind}:{identity_value}");
        let mem_result = self.memory.find_entities_by_content(kind, identity_value, since).await;

        let reconciled_after = self.reconciled.lock().get(&("FindEntitiesByContent", key.clone())).copied();
        let cache_is_final = match &mem_result {
            Ok(rows) if !rows.is_empty() => match since {
                Some(since) => since >= self.process_start,
                None => true,
            },
            _ => reconciled_after.map(|ts| Some(ts) >= since).unwrap_or(false),
        };

        if cache_is_final {
            return mem_result;
        }

        let durable_rows = self.durable.find_entities_by_content(kind, identity_value, since).await?;
        for row in &durable_rows {
            self.memory.backend().put_raw_entity(raw_entity_from(row));
        }
        self.reconciled.lock().insert(("FindEntitiesByContent", key), now());
        Ok(durable_rows)
    }

    /// Reads entities of `kind`, falling back to the durable backend when
    /// the in-memory replica can't yet answer authoritatively for the
    /// requested `since` window (spec.md §4.3's read path).
    pub async fn find_entities_by_type(&self, kind: &str, since: Option<DateTime<Utc>>) -> Result<Vec<Entity>> {
        let key = kind.to_string();
        let mem_result = self.memory.find_entities_by_type(kind, since).await;

        let reconciled_after = self.reconciled.lock().get(&("FindEntitiesByType", key.clone())).copied();
        let cache_is_final = match &mem_result {
            Ok(rows) if !rows.is_empty() => match since {
                Some(since) => since >= self.process_start,
                None => true,
            },
            _ => reconciled_after.map(|ts| Some(ts) >= since).unwrap_or(false),
        };

        if cache_is_final {
            return mem_result;
        }

        let durable_rows = self.durable.find_entities_by_type(kind, since).await?;
        for row in &durable_rows {
            self.memory.backend().put_raw_entity(raw_entity_from(row));
        }
        self.reconciled.lock().insert(("FindEntitiesByType", key), now());
        Ok(durable_rows)
    }

    pub async fn outgoing_edges(&self, entity_id: EntityId, label: Option<&str>, since: Option<DateTime<Utc>>) -> Result<Vec<Edge>> {
        let key = format!("{entity_id}:{}", label.unwrap_or("*"));
        let mem_result = self.memory.outgoing_edges(entity_id, label, since).await;

        let reconciled_after = self.reconciled.lock().get(&("OutgoingEdges", key.clone())).copied();
        let cache_is_final = match &mem_result {
            Ok(rows) if !rows.is_empty() => match since {
                Some(since) => since >= self.process_start,
                None => true,
            },
            _ => reconciled_after.map(|ts| Some(ts) >= since).unwrap_or(false),
        };

        if cache_is_final {
            return mem_result;
        }

        let durable_edges = self.durable.outgoing_edges(entity_id, label, since).await?;
        for edge in &durable_edges {
            self.memory.backend().put_raw_edge(raw_edge_from(edge));
        }
        self.reconciled.lock().insert(("OutgoingEdges", key), now());
        Ok(durable_edges)
    }

    pub async fn incoming_edges(&self, entity_id: EntityId, label: Option<&str>, since: Option<DateTime<Utc>>) -> Result<Vec<Edge>> {
        let key = format!("{entity_id}:{}", label.unwrap_or("*"));
        let mem_result = self.memory.incoming_edges(entity_id, label, since).await;

        let reconciled_after = self.reconciled.lock().get(&("IncomingEdges", key.clone())).copied();
        let cache_is_final = match &mem_result {
            Ok(rows) if !rows.is_empty() => match since {
                Some(since) => since >= self.process_start,
                None => true,
            },
            _ => reconciled_after.map(|ts| Some(ts) >= since).unwrap_or(false),
        };

        if cache_is_final {
            return mem_result;
        }

        let durable_edges = self.durable.incoming_edges(entity_id, label, since).await?;
        for edge in &durable_edges {
            self.memory.backend().put_raw_edge(raw_edge_from(edge));
        }
        self.reconciled.lock().insert(("IncomingEdges", key), now());
        Ok(durable_edges)
    }

    /// Tags have no raw-materialization path back into the memory replica
    /// (unlike entities/edges), so this is a plain read-through rather than
    /// the reconciled pattern above: memory first, durable on a miss.
    pub async fn get_entity_tags(
        &self,
        entity_id: EntityId,
        names: Option<&HashSet<String>>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<EntityTag>> {
        match self.memory.get_entity_tags(entity_id, names, since).await {
            Ok(rows) if !rows.is_empty() => Ok(rows),
            _ => self.durable.get_entity_tags(entity_id, names, since).await,
        }
    }

    pub async fn get_edge_tags(
        &self,
        edge_id: EdgeId,
        names: Option<&HashSet<String>>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<EdgeTag>> {
        match self.memory.get_edge_tags(edge_id, names, since).await {
            Ok(rows) if !rows.is_empty() => Ok(rows),
            _ => self.durable.get_edge_tags(edge_id, names, since).await,
        }
    }

    pub async fn find_entities_by_scope(
        &self,
        constraints: &[AssetPayload],
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Entity>> {
        match self.memory.find_entities_by_scope(constraints, since).await {
            Ok(rows) if !rows.is_empty() => Ok(rows),
            _ => self.durable.find_entities_by_scope(constraints, since).await,
        }
    }

    /// A database-side recursive traversal the in-memory replica has no way
    /// to execute; always answered by the durable backend directly.
    pub async fn names_to_addrs(
        &self,
        csv_fqdns: &str,
        from_ts: DateTime<Utc>,
        to_ts: DateTime<Utc>,
    ) -> Result<Vec<(String, String)>> {
        self.durable.names_to_addrs(csv_fqdns, from_ts, to_ts).await
    }

    /// Drains every enqueued write and returns the pair of graph APIs so
    /// callers shutting down can release the durable backend cleanly.
    pub async fn close(&self) {
        self.barrier().await;
    }
}
