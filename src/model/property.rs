//! Property variants — typed metadata attached to an entity or an edge.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleProperty {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnProperty {
    pub name: String,
    pub cve_id: String,
    pub severity: Option<String>,
}

/// A closed sum type over every property kind the taxonomy admits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum PropertyPayload {
    SimpleProperty(SimpleProperty),
    VulnProperty(VulnProperty),
}

impl PropertyPayload {
    pub fn name(&self) -> &str {
        match self {
            PropertyPayload::SimpleProperty(p) => &p.name,
            PropertyPayload::VulnProperty(p) => &p.name,
        }
    }

    /// The value used for dedup (I6). `VulnProperty` dedups on its CVE id.
    pub fn value(&self) -> &str {
        match self {
            PropertyPayload::SimpleProperty(p) => &p.value,
            PropertyPayload::VulnProperty(p) => &p.cve_id,
        }
    }

    pub fn property_type(&self) -> &'static str {
        match self {
            PropertyPayload::SimpleProperty(_) => "SimpleProperty",
            PropertyPayload::VulnProperty(_) => "VulnProperty",
        }
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("property payload serializes")
    }

    pub fn from_json(json: serde_json::Value) -> crate::Result<Self> {
        Ok(serde_json::from_value(json)?)
    }
}
