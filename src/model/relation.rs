//! Relation variants — the typed payload carried by an [`crate::model::edge::Edge`].
//!
//! Every relation exposes a `label()` (used for dedup-by-label scans and for
//! the taxonomy lookup `(from.kind, label, subtype, to.kind)`) and a
//! `relation_type()` discriminator stored as `edges.etype`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleRelation {
    pub name: String,
}

/// Shared DNS resource-record header carried by every DNS relation variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsRrHeader {
    pub rr_type: String,
    pub ttl: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicDnsRelation {
    pub header: DnsRrHeader,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefDnsRelation {
    pub header: DnsRrHeader,
    pub preference: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SrvDnsRelation {
    pub header: DnsRrHeader,
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortRelation {
    pub port_number: u16,
    pub protocol: Option<String>,
}

/// A closed sum type over every relation kind the taxonomy admits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum RelationPayload {
    SimpleRelation(SimpleRelation),
    BasicDnsRelation { label: String, relation: BasicDnsRelation },
    PrefDnsRelation { label: String, relation: PrefDnsRelation },
    SrvDnsRelation { label: String, relation: SrvDnsRelation },
    PortRelation { label: String, relation: PortRelation },
}

impl RelationPayload {
    /// The relation's label — used in taxonomy lookups and edge scans.
    pub fn label(&self) -> &str {
        match self {
            RelationPayload::SimpleRelation(r) => &r.name,
            RelationPayload::BasicDnsRelation { label, .. } => label,
            RelationPayload::PrefDnsRelation { label, .. } => label,
            RelationPayload::SrvDnsRelation { label, .. } => label,
            RelationPayload::PortRelation { label, .. } => label,
        }
    }

    /// The relation subtype consulted by the taxonomy (e.g. the DNS RR
    /// type, or "port" for `PortRelation`). `SimpleRelation` has no subtype.
    pub fn subtype(&self) -> Option<&str> {
        match self {
            RelationPayload::SimpleRelation(_) => None,
            RelationPayload::BasicDnsRelation { relation, .. } => Some(&relation.header.rr_type),
            RelationPayload::PrefDnsRelation { relation, .. } => Some(&relation.header.rr_type),
            RelationPayload::SrvDnsRelation { relation, .. } => Some(&relation.header.rr_type),
            RelationPayload::PortRelation { .. } => Some("port"),
        }
    }

    /// The discriminator stored in `edges.etype`.
    pub fn relation_type(&self) -> &'static str {
        match self {
            RelationPayload::SimpleRelation(_) => "SimpleRelation",
            RelationPayload::BasicDnsRelation { .. } => "BasicDNSRelation",
            RelationPayload::PrefDnsRelation { .. } => "PrefDNSRelation",
            RelationPayload::SrvDnsRelation { .. } => "SRVDNSRelation",
            RelationPayload::PortRelation { .. } => "PortRelation",
        }
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("relation payload serializes")
    }

    pub fn from_kind_json(kind: &str, json: serde_json::Value) -> crate::Result<Self> {
        // The `kind`/`payload` tagging round-trips through the same enum,
        // so a plain deserialize reproduces the original variant as long as
        // the stored `etype` agrees with the tag. We re-validate the
        // discriminator to catch storage corruption early.
        let value: RelationPayload = serde_json::from_value(json)?;
        if value.relation_type() != kind {
            return Err(crate::Error::InvalidInput(format!(
                "relation payload tag mismatch: etype={kind:?} payload kind={:?}",
                value.relation_type()
            )));
        }
        Ok(value)
    }
}
