//! End-to-end scenarios against `MemoryBackend`, mirroring spec.md §8:
//! dedup, last-seen advance, taxonomy rejection, cascade delete, scope
//! expansion.

use std::sync::Arc;

use assetgraph_store::graph::GraphApi;
use assetgraph_store::model::asset::{AssetPayload, EmailAddress, Fqdn, IpAddress, Netblock};
use assetgraph_store::model::edge::EdgeInput;
use assetgraph_store::model::property::{PropertyPayload, SimpleProperty};
use assetgraph_store::model::relation::{BasicDnsRelation, DnsRrHeader, RelationPayload};
use assetgraph_store::storage::MemoryBackend;
use assetgraph_store::taxonomy::StaticTaxonomy;
use assetgraph_store::Error;

fn dns_taxonomy() -> Arc<StaticTaxonomy> {
    Arc::new(
        StaticTaxonomy::new()
            .admit("Fqdn", "a_record", Some("A"), "IpAddress")
            .admit("Netblock", "contains", None, "IpAddress"),
    )
}

fn a_record(ttl: Option<u32>) -> RelationPayload {
    RelationPayload::BasicDnsRelation {
        label: "a_record".into(),
        relation: BasicDnsRelation {
            header: DnsRrHeader { rr_type: "A".into(), ttl },
        },
    }
}

#[tokio::test]
async fn reinserting_an_fqdn_dedups_and_advances_last_seen() {
    let graph = GraphApi::new(Arc::new(MemoryBackend::new()), dns_taxonomy());

    let first = graph
        .create_asset(AssetPayload::Fqdn(Fqdn { name: "www.example.com".into() }))
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    let second = graph
        .create_asset(AssetPayload::Fqdn(Fqdn { name: "www.example.com".into() }))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.created_at, second.created_at);
    assert!(second.last_seen >= first.last_seen);
}

#[tokio::test]
async fn relinking_the_same_relation_dedups_by_deep_equality() {
    let graph = GraphApi::new(Arc::new(MemoryBackend::new()), dns_taxonomy());

    let fqdn = graph
        .create_asset(AssetPayload::Fqdn(Fqdn { name: "www.example.com".into() }))
        .await
        .unwrap();
    let ip = graph
        .create_asset(AssetPayload::IpAddress(IpAddress {
            address: "93.184.216.34".into(),
            version: Some("4".into()),
        }))
        .await
        .unwrap();

    let e1 = graph
        .link(EdgeInput {
            from_entity_id: fqdn.id,
            to_entity_id: ip.id,
            relation: a_record(Some(300)),
        })
        .await
        .unwrap();

    // Same shape, different TTL -> not a deep-equal duplicate, creates a new edge.
    let e2 = graph
        .link(EdgeInput {
            from_entity_id: fqdn.id,
            to_entity_id: ip.id,
            relation: a_record(Some(600)),
        })
        .await
        .unwrap();
    assert_ne!(e1.id, e2.id);

    // Exact resubmission of e1's relation dedups against it.
    let e3 = graph
        .link(EdgeInput {
            from_entity_id: fqdn.id,
            to_entity_id: ip.id,
            relation: a_record(Some(300)),
        })
        .await
        .unwrap();
    assert_eq!(e1.id, e3.id);
}

#[tokio::test]
async fn taxonomy_rejects_unadmitted_edge_shape() {
    let graph = GraphApi::new(Arc::new(MemoryBackend::new()), dns_taxonomy());

    let ip_a = graph
        .create_asset(AssetPayload::IpAddress(IpAddress { address: "1.1.1.1".into(), version: Some("4".into()) }))
        .await
        .unwrap();
    let ip_b = graph
        .create_asset(AssetPayload::IpAddress(IpAddress { address: "1.1.1.2".into(), version: Some("4".into()) }))
        .await
        .unwrap();

    let err = graph
        .link(EdgeInput { from_entity_id: ip_a.id, to_entity_id: ip_b.id, relation: a_record(None) })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TaxonomyViolation(_)));
}

#[tokio::test]
async fn link_rejects_missing_endpoints() {
    let graph = GraphApi::new(Arc::new(MemoryBackend::new()), dns_taxonomy());
    let fqdn = graph
        .create_asset(AssetPayload::Fqdn(Fqdn { name: "www.example.com".into() }))
        .await
        .unwrap();

    let bogus = assetgraph_store::model::ids::EntityId::new();
    let err = graph
        .link(EdgeInput { from_entity_id: fqdn.id, to_entity_id: bogus, relation: a_record(None) })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn deleting_a_netblock_cascades_its_edges_and_tags() {
    let graph = GraphApi::new(Arc::new(MemoryBackend::new()), dns_taxonomy());

    let netblock = graph
        .create_asset(AssetPayload::Netblock(Netblock { cidr: "93.184.216.0/24".into() }))
        .await
        .unwrap();
    let ip = graph
        .create_asset(AssetPayload::IpAddress(IpAddress { address: "93.184.216.34".into(), version: Some("4".into()) }))
        .await
        .unwrap();

    let edge = graph
        .link(EdgeInput {
            from_entity_id: netblock.id,
            to_entity_id: ip.id,
            relation: RelationPayload::SimpleRelation(assetgraph_store::model::relation::SimpleRelation {
                name: "contains".into(),
            }),
        })
        .await
        .unwrap();

    graph
        .create_entity_tag(
            netblock.id,
            PropertyPayload::SimpleProperty(SimpleProperty { name: "source".into(), value: "rdap".into() }),
        )
        .await
        .unwrap();

    graph.delete_entity(netblock.id).await.unwrap();

    assert!(matches!(graph.find_entity_by_id(netblock.id).await, Err(Error::NotFound(_))));
    assert!(graph.find_entity_by_id(edge.to_entity_id).await.is_ok());
    let outgoing = graph.outgoing_edges(ip.id, None, None).await;
    assert!(outgoing.is_err() || outgoing.unwrap().is_empty());
}

#[tokio::test]
async fn since_filter_with_no_matches_is_not_found() {
    let graph = GraphApi::new(Arc::new(MemoryBackend::new()), dns_taxonomy());
    graph
        .create_asset(AssetPayload::Fqdn(Fqdn { name: "www.example.com".into() }))
        .await
        .unwrap();

    let far_future = assetgraph_store::timestamp::now() + chrono::Duration::days(1);
    let err = graph.find_entities_by_type("Fqdn", Some(far_future)).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn scope_expansion_pulls_in_addresses_scoped_to_a_domain() {
    let graph = GraphApi::new(Arc::new(MemoryBackend::new()), dns_taxonomy());
    graph
        .create_asset(AssetPayload::Fqdn(Fqdn { name: "example.com".into() }))
        .await
        .unwrap();
    graph
        .create_asset(AssetPayload::EmailAddress(EmailAddress { address: "abuse@example.com".into() }))
        .await
        .unwrap();
    graph
        .create_asset(AssetPayload::EmailAddress(EmailAddress { address: "abuse@other.com".into() }))
        .await
        .unwrap();

    let constraints = [AssetPayload::Fqdn(Fqdn { name: "example.com".into() })];
    let scope = graph.find_entities_by_scope(&constraints, None).await.unwrap();
    let emails: Vec<_> = scope
        .iter()
        .filter_map(|e| match &e.asset {
            AssetPayload::EmailAddress(a) => Some(a.address.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(emails, vec!["abuse@example.com"]);
}
