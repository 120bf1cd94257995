//! In-memory storage backend.
//!
//! Backs the write-through cache's synchronous half and the crate's own
//! test suite. Uses `HashMap`s behind `parking_lot::RwLock`s, matching the
//! durable backends' row shapes exactly so the cache can materialize rows
//! read from the durable backend without translation.
//!
//! No real transactions: every operation takes effect immediately. Fine for
//! the cache (single writer per process, spec.md §1) and for tests, which
//! is the only place this backend is used on its own.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value as Json;

use crate::model::{EdgeId, EdgeTagId, EntityId, EntityTagId};
use crate::timestamp::truncate_to_secs;
use crate::{Error, Result};

use super::{RawEdge, RawEdgeTag, RawEntity, RawEntityTag, Since, StorageBackend};

#[derive(Default)]
struct MemoryInner {
    entities: RwLock<HashMap<EntityId, RawEntity>>,
    edges: RwLock<HashMap<EdgeId, RawEdge>>,
    entity_tags: RwLock<HashMap<EntityTagId, RawEntityTag>>,
    edge_tags: RwLock<HashMap<EdgeTagId, RawEdgeTag>>,
    /// entity_id -> outgoing edge ids
    out_adj: RwLock<HashMap<EntityId, Vec<EdgeId>>>,
    /// entity_id -> incoming edge ids
    in_adj: RwLock<HashMap<EntityId, Vec<EdgeId>>>,
    entity_tag_idx: RwLock<HashMap<EntityId, Vec<EntityTagId>>>,
    edge_tag_idx: RwLock<HashMap<EdgeId, Vec<EdgeTagId>>>,
}

/// Volatile in-memory property graph storage.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites a raw entity row under its own id, rather than
    /// minting a new one. Used only by the write-through cache to
    /// materialize a durable row into the in-memory replica without
    /// splitting it into a second, differently-identified copy.
    pub fn put_raw_entity(&self, row: RawEntity) {
        let id = row.id;
        self.inner.entities.write().insert(id, row);
        self.inner.out_adj.write().entry(id).or_default();
        self.inner.in_adj.write().entry(id).or_default();
    }

    /// Same as [`Self::put_raw_entity`] for edges; assumes both endpoints
    /// have already been (or will be) materialized.
    pub fn put_raw_edge(&self, row: RawEdge) {
        let id = row.id;
        let from = row.from_entity_id;
        let to = row.to_entity_id;
        self.inner.edges.write().insert(id, row);
        let mut out = self.inner.out_adj.write();
        let ids = out.entry(from).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
        drop(out);
        let mut inn = self.inner.in_adj.write();
        let ids = inn.entry(to).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
}

fn seen_window(
    created_at: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let now = crate::timestamp::now();
    let created = created_at.map(truncate_to_secs).unwrap_or(now);
    let last = last_seen.map(truncate_to_secs).unwrap_or(created);
    (created, last)
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn create_raw_entity(
        &self,
        etype: &str,
        content: Json,
        created_at: Option<DateTime<Utc>>,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<EntityId> {
        let id = EntityId::new();
        let (created_at, last_seen) = seen_window(created_at, last_seen);
        let row = RawEntity {
            id,
            etype: etype.to_string(),
            content,
            created_at,
            last_seen,
        };
        self.inner.entities.write().insert(id, row);
        self.inner.out_adj.write().entry(id).or_default();
        self.inner.in_adj.write().entry(id).or_default();
        Ok(id)
    }

    async fn get_raw_entity(&self, id: EntityId) -> Result<Option<RawEntity>> {
        Ok(self.inner.entities.read().get(&id).cloned())
    }

    async fn query_entities_by_content(
        &self,
        etype: &str,
        identity_key: &str,
        value: &Json,
        since: Since,
    ) -> Result<Vec<RawEntity>> {
        let rows: Vec<RawEntity> = self
            .inner
            .entities
            .read()
            .values()
            .filter(|e| e.etype == etype && e.content.get(identity_key) == Some(value))
            .filter(|e| since.matches(e.last_seen))
            .cloned()
            .collect();
        if rows.is_empty() && since.is_filtered() {
            return Err(Error::NotFound(format!(
                "no {etype} with {identity_key}={value} since the requested time"
            )));
        }
        Ok(rows)
    }

    async fn query_entities_by_kind(&self, etype: &str, since: Since) -> Result<Vec<RawEntity>> {
        let rows: Vec<RawEntity> = self
            .inner
            .entities
            .read()
            .values()
            .filter(|e| e.etype == etype)
            .filter(|e| since.matches(e.last_seen))
            .cloned()
            .collect();
        if rows.is_empty() && since.is_filtered() {
            return Err(Error::NotFound(format!(
                "no entities of kind {etype} since the requested time"
            )));
        }
        Ok(rows)
    }

    async fn update_entity_last_seen(&self, id: EntityId, ts: DateTime<Utc>) -> Result<()> {
        let mut entities = self.inner.entities.write();
        let e = entities
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("entity {id}")))?;
        e.last_seen = truncate_to_secs(ts);
        Ok(())
    }

    async fn delete_entity(&self, id: EntityId) -> Result<bool> {
        let removed = self.inner.entities.write().remove(&id);
        if removed.is_none() {
            return Ok(false);
        }

        let out_ids = self.inner.out_adj.write().remove(&id).unwrap_or_default();
        let in_ids = self.inner.in_adj.write().remove(&id).unwrap_or_default();
        let mut touched_edges = out_ids;
        touched_edges.extend(in_ids);
        touched_edges.sort_by_key(|e| e.0);
        touched_edges.dedup();

        for edge_id in touched_edges {
            self.delete_edge(edge_id).await?;
        }

        if let Some(tag_ids) = self.inner.entity_tag_idx.write().remove(&id) {
            let mut tags = self.inner.entity_tags.write();
            for tag_id in tag_ids {
                tags.remove(&tag_id);
            }
        }

        Ok(true)
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
        {
            let entities = self.inner.entities.read();
            if !entities.contains_key(&from) {
                return Err(Error::InvalidInput(format!("from entity {from} does not exist")));
            }
            if !entities.contains_key(&to) {
                return Err(Error::InvalidInput(format!("to entity {to} does not exist")));
            }
        }

        let id = EdgeId::new();
        let (created_at, last_seen) = seen_window(created_at, last_seen);
        let row = RawEdge {
            id,
            etype: etype.to_string(),
            content,
            from_entity_id: from,
            to_entity_id: to,
            created_at,
            last_seen,
        };
        self.inner.edges.write().insert(id, row);
        self.inner.out_adj.write().entry(from).or_default().push(id);
        self.inner.in_adj.write().entry(to).or_default().push(id);
        Ok(id)
    }

    async fn get_raw_edge(&self, id: EdgeId) -> Result<Option<RawEdge>> {
        Ok(self.inner.edges.read().get(&id).cloned())
    }

    async fn query_edges_from(&self, from: EntityId, since: Since) -> Result<Vec<RawEdge>> {
        let ids = self.inner.out_adj.read().get(&from).cloned().unwrap_or_default();
        let edges = self.inner.edges.read();
        let rows: Vec<RawEdge> = ids
            .iter()
            .filter_map(|id| edges.get(id))
            .filter(|e| since.matches(e.last_seen))
            .cloned()
            .collect();
        if rows.is_empty() && since.is_filtered() {
            return Err(Error::NotFound(format!(
                "no outgoing edges from {from} since the requested time"
            )));
        }
        Ok(rows)
    }

    async fn query_edges_to(&self, to: EntityId, since: Since) -> Result<Vec<RawEdge>> {
        let ids = self.inner.in_adj.read().get(&to).cloned().unwrap_or_default();
        let edges = self.inner.edges.read();
        let rows: Vec<RawEdge> = ids
            .iter()
            .filter_map(|id| edges.get(id))
            .filter(|e| since.matches(e.last_seen))
            .cloned()
            .collect();
        if rows.is_empty() && since.is_filtered() {
            return Err(Error::NotFound(format!(
                "no incoming edges to {to} since the requested time"
            )));
        }
        Ok(rows)
    }

    async fn update_edge_last_seen(&self, id: EdgeId, ts: DateTime<Utc>) -> Result<()> {
        let mut edges = self.inner.edges.write();
        let e = edges
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("edge {id}")))?;
        e.last_seen = truncate_to_secs(ts);
        Ok(())
    }

    async fn delete_edge(&self, id: EdgeId) -> Result<bool> {
        let removed = self.inner.edges.write().remove(&id);
        let Some(edge) = removed else {
            return Ok(false);
        };

        if let Some(ids) = self.inner.out_adj.write().get_mut(&edge.from_entity_id) {
            ids.retain(|e| *e != id);
        }
        if let Some(ids) = self.inner.in_adj.write().get_mut(&edge.to_entity_id) {
            ids.retain(|e| *e != id);
        }
        if let Some(tag_ids) = self.inner.edge_tag_idx.write().remove(&id) {
            let mut tags = self.inner.edge_tags.write();
            for tag_id in tag_ids {
                tags.remove(&tag_id);
            }
        }
        Ok(true)
    }

    async fn create_entity_tag(
        &self,
        entity_id: EntityId,
        ttype: &str,
        content: Json,
        created_at: Option<DateTime<Utc>>,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<EntityTagId> {
        if !self.inner.entities.read().contains_key(&entity_id) {
            return Err(Error::InvalidInput(format!("entity {entity_id} does not exist")));
        }
        let id = EntityTagId::new();
        let (created_at, last_seen) = seen_window(created_at, last_seen);
        let row = RawEntityTag {
            id,
            ttype: ttype.to_string(),
            content,
            entity_id,
            created_at,
            last_seen,
        };
        self.inner.entity_tags.write().insert(id, row);
        self.inner
            .entity_tag_idx
            .write()
            .entry(entity_id)
            .or_default()
            .push(id);
        Ok(id)
    }

    async fn get_entity_tags(&self, entity_id: EntityId, since: Since) -> Result<Vec<RawEntityTag>> {
        let ids = self
            .inner
            .entity_tag_idx
            .read()
            .get(&entity_id)
            .cloned()
            .unwrap_or_default();
        let tags = self.inner.entity_tags.read();
        let rows: Vec<RawEntityTag> = ids
            .iter()
            .filter_map(|id| tags.get(id))
            .filter(|t| since.matches(t.last_seen))
            .cloned()
            .collect();
        if rows.is_empty() && since.is_filtered() {
            return Err(Error::NotFound(format!(
                "no tags on entity {entity_id} since the requested time"
            )));
        }
        Ok(rows)
    }

    async fn update_entity_tag_last_seen(&self, id: EntityTagId, ts: DateTime<Utc>) -> Result<()> {
        let mut tags = self.inner.entity_tags.write();
        let t = tags
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("entity tag {id}")))?;
        t.last_seen = truncate_to_secs(ts);
        Ok(())
    }

    async fn delete_entity_tag(&self, id: EntityTagId) -> Result<bool> {
        let removed = self.inner.entity_tags.write().remove(&id);
        let Some(tag) = removed else { return Ok(false) };
        if let Some(ids) = self.inner.entity_tag_idx.write().get_mut(&tag.entity_id) {
            ids.retain(|t| *t != id);
        }
        Ok(true)
    }

    async fn create_edge_tag(
        &self,
        edge_id: EdgeId,
        ttype: &str,
        content: Json,
        created_at: Option<DateTime<Utc>>,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<EdgeTagId> {
        if !self.inner.edges.read().contains_key(&edge_id) {
            return Err(Error::InvalidInput(format!("edge {edge_id} does not exist")));
        }
        let id = EdgeTagId::new();
        let (created_at, last_seen) = seen_window(created_at, last_seen);
        let row = RawEdgeTag {
            id,
            ttype: ttype.to_string(),
            content,
            edge_id,
            created_at,
            last_seen,
        };
        self.inner.edge_tags.write().insert(id, row);
        self.inner.edge_tag_idx.write().entry(edge_id).or_default().push(id);
        Ok(id)
    }

    async fn get_edge_tags(&self, edge_id: EdgeId, since: Since) -> Result<Vec<RawEdgeTag>> {
        let ids = self
            .inner
            .edge_tag_idx
            .read()
            .get(&edge_id)
            .cloned()
            .unwrap_or_default();
        let tags = self.inner.edge_tags.read();
        let rows: Vec<RawEdgeTag> = ids
            .iter()
            .filter_map(|id| tags.get(id))
            .filter(|t| since.matches(t.last_seen))
            .cloned()
            .collect();
        if rows.is_empty() && since.is_filtered() {
            return Err(Error::NotFound(format!(
                "no tags on edge {edge_id} since the requested time"
            )));
        }
        Ok(rows)
    }

    async fn update_edge_tag_last_seen(&self, id: EdgeTagId, ts: DateTime<Utc>) -> Result<()> {
        let mut tags = self.inner.edge_tags.write();
        let t = tags
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("edge tag {id}")))?;
        t.last_seen = truncate_to_secs(ts);
        Ok(())
    }

    async fn delete_edge_tag(&self, id: EdgeTagId) -> Result<bool> {
        let removed = self.inner.edge_tags.write().remove(&id);
        let Some(tag) = removed else { return Ok(false) };
        if let Some(ids) = self.inner.edge_tag_idx.write().get_mut(&tag.edge_id) {
            ids.retain(|t| *t != id);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_and_get_entity() {
        let db = MemoryBackend::new();
        let id = db
            .create_raw_entity("FQDN", json!({"name": "www.example.com"}), None, None)
            .await
            .unwrap();
        let row = db.get_raw_entity(id).await.unwrap().unwrap();
        assert_eq!(row.etype, "FQDN");
        assert_eq!(row.created_at, row.last_seen);
    }

    #[tokio::test]
    async fn content_lookup_filters_by_kind_and_key() {
        let db = MemoryBackend::new();
        db.create_raw_entity("FQDN", json!({"name": "a.com"}), None, None)
            .await
            .unwrap();
        db.create_raw_entity("FQDN", json!({"name": "b.com"}), None, None)
            .await
            .unwrap();

        let rows = db
            .query_entities_by_content("FQDN", "name", &json!("a.com"), Since::Unfiltered)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn since_filter_empty_is_not_found() {
        let db = MemoryBackend::new();
        db.create_raw_entity("FQDN", json!({"name": "a.com"}), None, None)
            .await
            .unwrap();
        let far_future = crate::timestamp::now() + chrono::Duration::days(365);
        let err = db
            .query_entities_by_kind("FQDN", Since::At(far_future))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_entity_cascades_edges_and_tags() {
        let db = MemoryBackend::new();
        let a = db
            .create_raw_entity("FQDN", json!({"name": "a.com"}), None, None)
            .await
            .unwrap();
        let b = db
            .create_raw_entity("IPAddress", json!({"address": "1.2.3.4"}), None, None)
            .await
            .unwrap();
        let edge = db
            .create_raw_edge("BasicDNSRelation", json!({}), a, b, None, None)
            .await
            .unwrap();
        db.create_entity_tag(a, "SimpleProperty", json!({"name": "x", "value": "y"}), None, None)
            .await
            .unwrap();

        assert!(db.delete_entity(a).await.unwrap());
        assert!(db.get_raw_entity(a).await.unwrap().is_none());
        assert!(db.get_raw_edge(edge).await.unwrap().is_none());
        assert!(db.get_raw_entity(b).await.unwrap().is_some());
    }
}
