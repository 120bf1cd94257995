//! Edge — a typed directed relationship, persisted as a row in `edges`.

use chrono::{DateTime, Utc};

use super::ids::{EdgeId, EntityId};
use super::relation::RelationPayload;

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub id: EdgeId,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub from_entity_id: EntityId,
    pub to_entity_id: EntityId,
    pub relation: RelationPayload,
}

/// Input to [`crate::graph::GraphApi::link`] — endpoints are entities
/// already resolved by the caller (not payloads), matching spec.md's
/// "reject if ... FromEntity, ToEntity ... are missing".
#[derive(Debug, Clone)]
pub struct EdgeInput {
    pub from_entity_id: EntityId,
    pub to_entity_id: EntityId,
    pub relation: RelationPayload,
}
