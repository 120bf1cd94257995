//! Entity — a typed asset, persisted as a row in `entities`.

use chrono::{DateTime, Utc};

use super::asset::AssetPayload;
use super::ids::EntityId;

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub asset: AssetPayload,
}

impl Entity {
    pub fn asset_kind(&self) -> &'static str {
        self.asset.kind()
    }
}
