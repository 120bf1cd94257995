//! EntityTag / EdgeTag — typed property annotations on an entity or edge.

use chrono::{DateTime, Utc};

use super::ids::{EdgeId, EdgeTagId, EntityId, EntityTagId};
use super::property::PropertyPayload;

#[derive(Debug, Clone, PartialEq)]
pub struct EntityTag {
    pub id: EntityTagId,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub entity_id: EntityId,
    pub property: PropertyPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeTag {
    pub id: EdgeTagId,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub edge_id: EdgeId,
    pub property: PropertyPayload,
}
