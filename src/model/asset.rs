//! Asset variants — the closed, taxonomy-defined set of entity payloads.
//!
//! Each variant is a tagged value: a discriminator string (`kind()`) plus a
//! JSON record, with a single "identity key" field used for content lookup
//! and dedup (I1). New variants are added here and nowhere else — the
//! `(kind, payload-shape)` mapping is a closed table next to the taxonomy.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::Error;

macro_rules! asset_variants {
    ($($variant:ident { $($field:ident : $ty:ty),* $(,)? } identity = $identity:ident),+ $(,)?) => {
        $(
            #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
            pub struct $variant {
                $(pub $field: $ty,)*
            }
        )+

        /// A closed sum type over every asset kind the taxonomy admits.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(tag = "kind", content = "payload")]
        pub enum AssetPayload {
            $($variant($variant),)+
        }

        impl AssetPayload {
            /// The discriminator string stored in `entities.etype`.
            pub fn kind(&self) -> &'static str {
                match self {
                    $(AssetPayload::$variant(_) => stringify!($variant),)+
                }
            }

            /// The value of this variant's single identity-key field,
            /// used for content lookup (I1) and dedup.
            pub fn identity_value(&self) -> Json {
                match self {
                    $(AssetPayload::$variant(v) => serde_json::to_value(&v.$identity)
                        .expect("identity field serializes"),)+
                }
            }

            /// The name of the identity-key field for this kind, as it
            /// appears in the JSON payload (used to build the partial
            /// expression index predicate `payload->>'<key>'`).
            pub fn identity_key(&self) -> &'static str {
                match self {
                    $(AssetPayload::$variant(_) => stringify!($identity),)+
                }
            }

            /// The full JSON encoding of this variant's payload.
            pub fn json(&self) -> Json {
                match self {
                    $(AssetPayload::$variant(v) => serde_json::to_value(v)
                        .expect("asset payload serializes"),)+
                }
            }

            /// Rebuild a variant from a discriminator + raw JSON payload, as
            /// read back from storage.
            pub fn from_kind_json(kind: &str, json: Json) -> crate::Result<Self> {
                match kind {
                    $(stringify!($variant) => Ok(AssetPayload::$variant(
                        serde_json::from_value(json)?,
                    )),)+
                    other => Err(Error::InvalidInput(format!("unknown asset kind {other:?}"))),
                }
            }

            /// The identity key for a given discriminator, without an
            /// instance in hand — used when building content-lookup queries.
            pub fn identity_key_for_kind(kind: &str) -> crate::Result<&'static str> {
                match kind {
                    $(stringify!($variant) => Ok(stringify!($identity)),)+
                    other => Err(Error::InvalidInput(format!("unknown asset kind {other:?}"))),
                }
            }

            /// All discriminator strings the taxonomy admits.
            pub fn all_kinds() -> &'static [&'static str] {
                &[$(stringify!($variant),)+]
            }
        }
    };
}

asset_variants! {
    Fqdn { name: String } identity = name,
    IpAddress { address: String, version: Option<String> } identity = address,
    Netblock { cidr: String } identity = cidr,
    AutonomousSystem { number: u32 } identity = number,
    AutnumRecord { handle: String, name: Option<String>, whois_server: Option<String> } identity = handle,
    IpNetRecord { handle: String, cidr: Option<String>, whois_server: Option<String> } identity = handle,
    DomainRecord {
        domain: String,
        whois_server: Option<String>,
        created_date: Option<String>,
        updated_date: Option<String>,
        expiration_date: Option<String>,
    } identity = domain,
    Organization { name: String } identity = name,
    Person { full_name: String } identity = full_name,
    Phone { e164: String } identity = e164,
    EmailAddress { address: String } identity = address,
    Location { address: String } identity = address,
    ContactRecord { discovered_at: String } identity = discovered_at,
    TlsCertificate { serial_number: String, subject_common_name: Option<String> } identity = serial_number,
    Url { raw: String } identity = raw,
    Service { identifier: String, banner: Option<String> } identity = identifier,
    File { url: String, content_type: Option<String> } identity = url,
    Account { id: String, platform: Option<String> } identity = id,
    FundsTransfer { reference_id: String } identity = reference_id,
    Identifier { unique_id: String, id_type: Option<String> } identity = unique_id,
    Product { name: String } identity = name,
    ProductRelease { name: String } identity = name,
    Fingerprint { value: String, fingerprint_type: Option<String> } identity = value,
    SocketAddress { address: String } identity = address,
    NetworkEndpoint { address: String } identity = address,
    RirOrganization { rir_id: String, name: Option<String> } identity = rir_id,
}
