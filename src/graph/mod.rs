//! # Graph API
//!
//! The taxonomy-aware layer above [`crate::storage::StorageBackend`]. This
//! is where the dedup (I1/I4/I6), last-seen advancement (I2), cascade
//! delete (I3), and taxonomy validation (I5) invariants actually live — the
//! storage backend only ever sees raw discriminator+JSON rows.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::model::{
    AssetPayload, Edge, EdgeId, EdgeInput, EdgeTag, EdgeTagId, Entity, EntityId, EntityTag, EntityTagId,
    PropertyPayload, RelationPayload,
};
use crate::storage::{RawEdge, RawEdgeTag, RawEntity, RawEntityTag, Since, StorageBackend};
use crate::taxonomy::Taxonomy;
use crate::timestamp::now;
use crate::{Error, Result};

fn entity_from_raw(raw: RawEntity) -> Result<Entity> {
    Ok(Entity {
        id: raw.id,
        created_at: raw.created_at,
        last_seen: raw.last_seen,
        asset: AssetPayload::from_kind_json(&raw.etype, raw.content)?,
    })
}

fn edge_from_raw(raw: RawEdge) -> Result<Edge> {
    Ok(Edge {
        id: raw.id,
        created_at: raw.created_at,
        last_seen: raw.last_seen,
        from_entity_id: raw.from_entity_id,
        to_entity_id: raw.to_entity_id,
        relation: RelationPayload::from_kind_json(&raw.etype, raw.content)?,
    })
}

fn entity_tag_from_raw(raw: RawEntityTag) -> Result<EntityTag> {
    Ok(EntityTag {
        id: raw.id,
        created_at: raw.created_at,
        last_seen: raw.last_seen,
        entity_id: raw.entity_id,
        property: PropertyPayload::from_json(raw.content)?,
    })
}

fn edge_tag_from_raw(raw: RawEdgeTag) -> Result<EdgeTag> {
    Ok(EdgeTag {
        id: raw.id,
        created_at: raw.created_at,
        last_seen: raw.last_seen,
        edge_id: raw.edge_id,
        property: PropertyPayload::from_json(raw.content)?,
    })
}

/// Taxonomy-validated, deduping property graph API over a pluggable
/// storage backend (spec.md §4.2).
pub struct GraphApi<B: StorageBackend> {
    backend: Arc<B>,
    taxonomy: Arc<dyn Taxonomy>,
}

impl<B: StorageBackend> GraphApi<B> {
    pub fn new(backend: Arc<B>, taxonomy: Arc<dyn Taxonomy>) -> Self {
        Self { backend, taxonomy }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    // ------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------

    /// Create or, if an entity with the same `(kind, identity value)`
    /// already exists, advance its `last_seen` and return it unchanged
    /// otherwise (I1/I2).
    pub async fn create_asset(&self, asset: AssetPayload) -> Result<Entity> {
        self.create_asset_at(asset, None, None).await
    }

    /// Same as [`Self::create_asset`], but lets the caller pin
    /// `created_at`/`last_seen` — used by the write-through cache when
    /// replaying a buffered write against the durable backend so the
    /// durable row carries the original observation time, not replay time.
    pub async fn create_asset_at(
        &self,
        asset: AssetPayload,
        created_at: Option<DateTime<Utc>>,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<Entity> {
        let kind = asset.kind();
        let identity_key = asset.identity_key();
        let identity_value = asset.identity_value();

        let existing = self
            .backend
            .query_entities_by_content(kind, identity_key, &identity_value, Since::Unfiltered)
            .await?;

        if let Some(row) = existing.into_iter().next() {
            let ts = last_seen.unwrap_or_else(now).max(row.last_seen);
            self.backend.update_entity_last_seen(row.id, ts).await?;
            let mut row = row;
            row.last_seen = ts;
            return entity_from_raw(row);
        }

        let id = self
            .backend
            .create_raw_entity(kind, asset.json(), created_at, last_seen)
            .await?;
        let row = self
            .backend
            .get_raw_entity(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("entity {id} vanished after creation")))?;
        entity_from_raw(row)
    }

    pub async fn find_entity_by_id(&self, id: EntityId) -> Result<Entity> {
        let row = self
            .backend
            .get_raw_entity(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("entity {id}")))?;
        entity_from_raw(row)
    }

    pub async fn find_entities_by_content(
        &self,
        kind: &str,
        identity_value: &serde_json::Value,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Entity>> {
        let identity_key = AssetPayload::identity_key_for_kind(kind)?;
        let rows = self
            .backend
            .query_entities_by_content(kind, identity_key, identity_value, Since::from_option(since))
            .await?;
        rows.into_iter().map(entity_from_raw).collect()
    }

    pub async fn find_entities_by_type(
        &self,
        kind: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Entity>> {
        let rows = self
            .backend
            .query_entities_by_kind(kind, Since::from_option(since))
            .await?;
        rows.into_iter().map(entity_from_raw).collect()
    }

    pub async fn delete_entity(&self, id: EntityId) -> Result<()> {
        if !self.backend.delete_entity(id).await? {
            return Err(Error::NotFound(format!("entity {id}")));
        }
        Ok(())
    }

    /// Deletes every entity matching `(kind, identity value)`. The
    /// dedup invariant (I1) guarantees there is at most one, but a
    /// backend populated out of band could carry duplicates; deleting
    /// them all is the fail-safe choice (see DESIGN.md).
    pub async fn delete_entity_by_content(
        &self,
        kind: &str,
        identity_value: &serde_json::Value,
    ) -> Result<usize> {
        let matches = self
            .find_entities_by_content(kind, identity_value, None)
            .await?;
        if matches.is_empty() {
            return Err(Error::NotFound(format!("{kind} with identity {identity_value}")));
        }
        let mut deleted = 0;
        for entity in matches {
            if self.backend.delete_entity(entity.id).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    // ------------------------------------------------------------------
    // Edges
    // ------------------------------------------------------------------

    /// Validate, taxonomy-check, dedup, and either create a new edge or
    /// advance the last-seen time of a matching existing one (I4/I5).
    pub async fn link(&self, input: EdgeInput) -> Result<Edge> {
        self.link_at(input, None, None).await
    }

    pub async fn link_at(
        &self,
        input: EdgeInput,
        created_at: Option<DateTime<Utc>>,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<Edge> {
        let from = self
            .backend
            .get_raw_entity(input.from_entity_id)
            .await?
            .ok_or_else(|| Error::InvalidInput(format!("FromEntity {} is missing", input.from_entity_id)))?;
        let to = self
            .backend
            .get_raw_entity(input.to_entity_id)
            .await?
            .ok_or_else(|| Error::InvalidInput(format!("ToEntity {} is missing", input.to_entity_id)))?;

        let label = input.relation.label();
        let subtype = input.relation.subtype();
        if !self
            .taxonomy
            .valid_relationship(&from.etype, label, subtype, &to.etype)
            .await
        {
            return Err(Error::TaxonomyViolation(format!(
                "{} -[{label}]-> {} is not an admitted relationship",
                from.etype, to.etype
            )));
        }

        let outgoing = self
            .backend
            .query_edges_from(from.id, Since::Unfiltered)
            .await
            .unwrap_or_default();

        let duplicate = outgoing.into_iter().find(|e| {
            e.to_entity_id == to.id
                && e.etype == input.relation.relation_type()
                && RelationPayload::from_kind_json(&e.etype, e.content.clone())
                    .map(|r| r == input.relation)
                    .unwrap_or(false)
        });

        if let Some(row) = duplicate {
            let ts = last_seen.unwrap_or_else(now).max(row.last_seen);
            self.backend.update_edge_last_seen(row.id, ts).await?;
            let mut row = row;
            row.last_seen = ts;
            return edge_from_raw(row);
        }

        let id = self
            .backend
            .create_raw_edge(
                input.relation.relation_type(),
                input.relation.json(),
                from.id,
                to.id,
                created_at,
                last_seen,
            )
            .await?;
        let row = self
            .backend
            .get_raw_edge(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("edge {id} vanished after creation")))?;
        edge_from_raw(row)
    }

    pub async fn outgoing_edges(
        &self,
        entity_id: EntityId,
        label: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Edge>> {
        let rows = self
            .backend
            .query_edges_from(entity_id, Since::from_option(since))
            .await?;
        filter_by_label(rows, label)?.into_iter().map(edge_from_raw).collect()
    }

    pub async fn incoming_edges(
        &self,
        entity_id: EntityId,
        label: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Edge>> {
        let rows = self
            .backend
            .query_edges_to(entity_id, Since::from_option(since))
            .await?;
        filter_by_label(rows, label)?.into_iter().map(edge_from_raw).collect()
    }

    pub async fn delete_edge(&self, id: EdgeId) -> Result<()> {
        if !self.backend.delete_edge(id).await? {
            return Err(Error::NotFound(format!("edge {id}")));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Entity tags
    // ------------------------------------------------------------------

    pub async fn create_entity_tag(
        &self,
        entity_id: EntityId,
        property: PropertyPayload,
    ) -> Result<EntityTag> {
        self.create_entity_tag_at(entity_id, property, None, None).await
    }

    pub async fn create_entity_tag_at(
        &self,
        entity_id: EntityId,
        property: PropertyPayload,
        created_at: Option<DateTime<Utc>>,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<EntityTag> {
        let existing = self
            .backend
            .get_entity_tags(entity_id, Since::Unfiltered)
            .await
            .unwrap_or_default();

        let duplicate = existing.into_iter().find(|t| {
            t.ttype == property.property_type()
                && PropertyPayload::from_json(t.content.clone())
                    .map(|p| p.name() == property.name() && p.value() == property.value())
                    .unwrap_or(false)
        });

        if let Some(row) = duplicate {
            let ts = last_seen.unwrap_or_else(now).max(row.last_seen);
            self.backend.update_entity_tag_last_seen(row.id, ts).await?;
            let mut row = row;
            row.last_seen = ts;
            return entity_tag_from_raw(row);
        }

        let id = self
            .backend
            .create_entity_tag(entity_id, property.property_type(), property.json(), created_at, last_seen)
            .await?;
        let row = self
            .backend
            .get_entity_tags(entity_id, Since::Unfiltered)
            .await?
            .into_iter()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::NotFound(format!("entity tag {id} vanished after creation")))?;
        entity_tag_from_raw(row)
    }

    pub async fn get_entity_tags(
        &self,
        entity_id: EntityId,
        names: Option<&HashSet<String>>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<EntityTag>> {
        let rows = self
            .backend
            .get_entity_tags(entity_id, Since::from_option(since))
            .await?;
        rows.into_iter()
            .map(entity_tag_from_raw)
            .filter(|t| match (t, names) {
                (Ok(t), Some(names)) => names.contains(t.property.name()),
                _ => true,
            })
            .collect()
    }

    pub async fn delete_entity_tag(&self, id: EntityTagId) -> Result<()> {
        if !self.backend.delete_entity_tag(id).await? {
            return Err(Error::NotFound(format!("entity tag {id}")));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Edge tags
    // ------------------------------------------------------------------

    pub async fn create_edge_tag(&self, edge_id: EdgeId, property: PropertyPayload) -> Result<EdgeTag> {
        self.create_edge_tag_at(edge_id, property, None, None).await
    }

    pub async fn create_edge_tag_at(
        &self,
        edge_id: EdgeId,
        property: PropertyPayload,
        created_at: Option<DateTime<Utc>>,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<EdgeTag> {
        let existing = self
            .backend
            .get_edge_tags(edge_id, Since::Unfiltered)
            .await
            .unwrap_or_default();

        let duplicate = existing.into_iter().find(|t| {
            t.ttype == property.property_type()
                && PropertyPayload::from_json(t.content.clone())
                    .map(|p| p.name() == property.name() && p.value() == property.value())
                    .unwrap_or(false)
        });

        if let Some(row) = duplicate {
            let ts = last_seen.unwrap_or_else(now).max(row.last_seen);
            self.backend.update_edge_tag_last_seen(row.id, ts).await?;
            let mut row = row;
            row.last_seen = ts;
            return edge_tag_from_raw(row);
        }

        let id = self
            .backend
            .create_edge_tag(edge_id, property.property_type(), property.json(), created_at, last_seen)
            .await?;
        let row = self
            .backend
            .get_edge_tags(edge_id, Since::Unfiltered)
            .await?
            .into_iter()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::NotFound(format!("edge tag {id} vanished after creation")))?;
        edge_tag_from_raw(row)
    }

    pub async fn get_edge_tags(
        &self,
        edge_id: EdgeId,
        names: Option<&HashSet<String>>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<EdgeTag>> {
        let rows = self.backend.get_edge_tags(edge_id, Since::from_option(since)).await?;
        rows.into_iter()
            .map(edge_tag_from_raw)
            .filter(|t| match (t, names) {
                (Ok(t), Some(names)) => names.contains(t.property.name()),
                _ => true,
            })
            .collect()
    }

    pub async fn delete_edge_tag(&self, id: EdgeTagId) -> Result<()> {
        if !self.backend.delete_edge_tag(id).await? {
            return Err(Error::NotFound(format!("edge tag {id}")));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scope expansion (spec.md §4.2 edge case)
    // ------------------------------------------------------------------

    /// Resolves each seed `constraints` value to its entity (by kind +
    /// identity), then unions the one-hop in/out neighborhood of every
    /// resolved seed, filtered by `since`. For an `Fqdn` seed, also pulls in
    /// any `EmailAddress` entity whose address ends in `@<fqdn name>` even
    /// though it isn't linked by an edge — the scope-widening rule scanners
    /// use to pull in addresses scoped to a domain (spec.md §4.2).
    pub async fn find_entities_by_scope(
        &self,
        constraints: &[AssetPayload],
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Entity>> {
        let mut seeds = Vec::new();
        for constraint in constraints {
            if let Ok(matches) = self
                .find_entities_by_content(constraint.kind(), &constraint.identity_value(), None)
                .await
            {
                seeds.extend(matches);
            }
        }
        if seeds.is_empty() {
            return Err(Error::NotFound(
                "no entities resolved from the supplied scope constraints".into(),
            ));
        }

        let mut seen: HashSet<EntityId> = seeds.iter().map(|e| e.id).collect();
        let mut out = Vec::new();

        for seed in &seeds {
            for row in self
                .backend
                .query_edges_from(seed.id, Since::from_option(since))
                .await
                .unwrap_or_default()
            {
                if seen.insert(row.to_entity_id) {
                    out.push(entity_from_raw(self.backend.get_raw_entity(row.to_entity_id).await?.ok_or_else(
                        || Error::NotFound(format!("entity {}", row.to_entity_id)),
                    )?)?);
                }
            }
            for row in self
                .backend
                .query_edges_to(seed.id, Since::from_option(since))
                .await
                .unwrap_or_default()
            {
                if seen.insert(row.from_entity_id) {
                    out.push(entity_from_raw(
                        self.backend
                            .get_raw_entity(row.from_entity_id)
                            .await?
                            .ok_or_else(|| Error::NotFound(format!("entity {}", row.from_entity_id)))?,
                    )?);
                }
            }

            if let AssetPayload::Fqdn(fqdn) = &seed.asset {
                let suffix = format!("@{}", fqdn.name);
                for email in self.find_entities_by_type("EmailAddress", since).await.unwrap_or_default() {
                    if let AssetPayload::EmailAddress(addr) = &email.asset {
                        if addr.address.ends_with(&suffix) && seen.insert(email.id) {
                            out.push(email);
                        }
                    }
                }
            }
        }

        if out.is_empty() {
            return Err(Error::NotFound("no entities in scope of the supplied constraints".into()));
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Database-side traversal (spec.md §6)
    // ------------------------------------------------------------------

    pub async fn names_to_addrs(
        &self,
        csv_fqdns: &str,
        from_ts: DateTime<Utc>,
        to_ts: DateTime<Utc>,
    ) -> Result<Vec<(String, String)>> {
        self.backend.names_to_addrs(csv_fqdns, from_ts, to_ts).await
    }
}

fn filter_by_label(rows: Vec<RawEdge>, label: Option<&str>) -> Result<Vec<RawEdge>> {
    match label {
        None => Ok(rows),
        Some(label) => {
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                let relation = RelationPayload::from_kind_json(&row.etype, row.content.clone())?;
                if relation.label() == label {
                    out.push(row);
                }
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::asset::{EmailAddress, Fqdn, IpAddress};
    use crate::model::relation::{BasicDnsRelation, DnsRrHeader};
    use crate::storage::MemoryBackend;
    use crate::taxonomy::StaticTaxonomy;

    fn graph() -> GraphApi<MemoryBackend> {
        let taxonomy = StaticTaxonomy::new().admit("Fqdn", "a_record", Some("A"), "IpAddress");
        GraphApi::new(Arc::new(MemoryBackend::new()), Arc::new(taxonomy))
    }

    #[tokio::test]
    async fn create_asset_dedups_on_identity() {
        let g = graph();
        let a = g
            .create_asset(AssetPayload::Fqdn(Fqdn { name: "www.example.com".into() }))
            .await
            .unwrap();
        let b = g
            .create_asset(AssetPayload::Fqdn(Fqdn { name: "www.example.com".into() }))
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn link_rejects_unadmitted_relationship() {
        let g = graph();
        let a = g
            .create_asset(AssetPayload::Fqdn(Fqdn { name: "www.example.com".into() }))
            .await
            .unwrap();
        let b = g
            .create_asset(AssetPayload::IpAddress(IpAddress {
                address: "1.2.3.4".into(),
                version: Some("4".into()),
            }))
            .await
            .unwrap();

        let relation = RelationPayload::BasicDnsRelation {
            label: "ptr_record".into(),
            relation: BasicDnsRelation {
                header: DnsRrHeader { rr_type: "PTR".into(), ttl: None },
            },
        };
        let err = g
            .link(EdgeInput { from_entity_id: a.id, to_entity_id: b.id, relation })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TaxonomyViolation(_)));
    }

    #[tokio::test]
    async fn link_dedups_matching_edges() {
        let g = graph();
        let a = g
            .create_asset(AssetPayload::Fqdn(Fqdn { name: "www.example.com".into() }))
            .await
            .unwrap();
        let b = g
            .create_asset(AssetPayload::IpAddress(IpAddress {
                address: "1.2.3.4".into(),
                version: Some("4".into()),
            }))
            .await
            .unwrap();

        let relation = RelationPayload::BasicDnsRelation {
            label: "a_record".into(),
            relation: BasicDnsRelation {
                header: DnsRrHeader { rr_type: "A".into(), ttl: Some(300) },
            },
        };
        let e1 = g
            .link(EdgeInput { from_entity_id: a.id, to_entity_id: b.id, relation: relation.clone() })
            .await
            .unwrap();
        let e2 = g
            .link(EdgeInput { from_entity_id: a.id, to_entity_id: b.id, relation })
            .await
            .unwrap();
        assert_eq!(e1.id, e2.id);
    }

    #[tokio::test]
    async fn scope_expansion_includes_matching_email() {
        let g = graph();
        g.create_asset(AssetPayload::Fqdn(Fqdn { name: "example.com".into() }))
            .await
            .unwrap();
        g.create_asset(AssetPayload::EmailAddress(EmailAddress {
            address: "security@example.com".into(),
        }))
        .await
        .unwrap();

        let constraints = [AssetPayload::Fqdn(Fqdn { name: "example.com".into() })];
        let scope = g.find_entities_by_scope(&constraints, None).await.unwrap();
        assert!(scope.iter().any(|e| matches!(&e.asset, AssetPayload::EmailAddress(a) if a.address == "security@example.com")));
    }
}
