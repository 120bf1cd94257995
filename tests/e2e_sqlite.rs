//! Exercises `SqliteBackend` against an in-memory database: migrations run,
//! the partial expression indexes don't reject inserts, and dedup/since
//! semantics match the in-memory backend (spec.md §10).

#![cfg(feature = "sqlite")]

use std::sync::Arc;
use std::time::Duration;

use assetgraph_store::graph::GraphApi;
use assetgraph_store::model::asset::{AssetPayload, AutonomousSystem, Fqdn, IpAddress};
use assetgraph_store::model::edge::EdgeInput;
use assetgraph_store::model::relation::{BasicDnsRelation, DnsRrHeader, RelationPayload};
use assetgraph_store::storage::sql::SqliteBackend;
use assetgraph_store::storage::PoolConfig;
use assetgraph_store::taxonomy::StaticTaxonomy;
use assetgraph_store::Error;

fn single_connection_pool() -> PoolConfig {
    PoolConfig {
        max_connections: 1,
        min_idle: 1,
        max_lifetime: Duration::from_secs(3600),
        idle_timeout: Duration::from_secs(600),
    }
}

async fn open() -> SqliteBackend {
    SqliteBackend::connect("sqlite::memory:", single_connection_pool())
        .await
        .expect("migrations run against an in-memory database")
}

#[tokio::test]
async fn migrations_run_and_fqdn_dedup_holds() {
    let backend = open().await;
    let taxonomy = Arc::new(StaticTaxonomy::new().admit("Fqdn", "a_record", Some("A"), "IpAddress"));
    let graph = GraphApi::new(Arc::new(backend), taxonomy);

    let a = graph
        .create_asset(AssetPayload::Fqdn(Fqdn { name: "www.example.com".into() }))
        .await
        .unwrap();
    let b = graph
        .create_asset(AssetPayload::Fqdn(Fqdn { name: "www.example.com".into() }))
        .await
        .unwrap();
    assert_eq!(a.id, b.id);
}

#[tokio::test]
async fn content_lookup_uses_the_partial_expression_index_path() {
    let backend = open().await;
    let taxonomy = Arc::new(StaticTaxonomy::new());
    let graph = GraphApi::new(Arc::new(backend), taxonomy);

    graph
        .create_asset(AssetPayload::IpAddress(IpAddress { address: "93.184.216.34".into(), version: Some("4".into()) }))
        .await
        .unwrap();
    graph
        .create_asset(AssetPayload::IpAddress(IpAddress { address: "93.184.216.35".into(), version: Some("4".into()) }))
        .await
        .unwrap();

    let found = graph
        .find_entities_by_content("IpAddress", &serde_json::json!("93.184.216.34"), None)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert!(matches!(&found[0].asset, AssetPayload::IpAddress(ip) if ip.address == "93.184.216.34"));
}

#[tokio::test]
async fn numeric_identity_dedups_and_is_findable_by_content() {
    let backend = open().await;
    let taxonomy = Arc::new(StaticTaxonomy::new());
    let graph = GraphApi::new(Arc::new(backend), taxonomy);

    let a = graph
        .create_asset(AssetPayload::AutonomousSystem(AutonomousSystem { number: 64512 }))
        .await
        .unwrap();
    let b = graph
        .create_asset(AssetPayload::AutonomousSystem(AutonomousSystem { number: 64512 }))
        .await
        .unwrap();
    assert_eq!(a.id, b.id);

    let found = graph
        .find_entities_by_content("AutonomousSystem", &serde_json::json!(64512), None)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert!(matches!(&found[0].asset, AssetPayload::AutonomousSystem(asn) if asn.number == 64512));
}

#[tokio::test]
async fn since_filter_empty_result_is_not_found() {
    let backend = open().await;
    let taxonomy = Arc::new(StaticTaxonomy::new());
    let graph = GraphApi::new(Arc::new(backend), taxonomy);

    graph
        .create_asset(AssetPayload::Fqdn(Fqdn { name: "www.example.com".into() }))
        .await
        .unwrap();

    let far_future = assetgraph_store::timestamp::now() + chrono::Duration::days(1);
    let err = graph.find_entities_by_type("Fqdn", Some(far_future)).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn names_to_addrs_is_unsupported_on_sqlite() {
    let backend = open().await;
    let taxonomy = Arc::new(StaticTaxonomy::new());
    let graph = GraphApi::new(Arc::new(backend), taxonomy);

    let now = assetgraph_store::timestamp::now();
    let err = graph.names_to_addrs("www.example.com", now, now).await.unwrap_err();
    assert!(matches!(err, Error::BackendFailure(_)));
}

#[tokio::test]
async fn cascade_delete_removes_edges_and_tags() {
    let backend = open().await;
    let taxonomy = Arc::new(
        StaticTaxonomy::new().admit("Fqdn", "a_record", Some("A"), "IpAddress"),
    );
    let graph = GraphApi::new(Arc::new(backend), taxonomy);

    let fqdn = graph
        .create_asset(AssetPayload::Fqdn(Fqdn { name: "www.example.com".into() }))
        .await
        .unwrap();
    let ip = graph
        .create_asset(AssetPayload::IpAddress(IpAddress { address: "93.184.216.34".into(), version: Some("4".into()) }))
        .await
        .unwrap();
    let relation = RelationPayload::BasicDnsRelation {
        label: "a_record".into(),
        relation: BasicDnsRelation { header: DnsRrHeader { rr_type: "A".into(), ttl: Some(300) } },
    };
    graph
        .link(EdgeInput { from_entity_id: fqdn.id, to_entity_id: ip.id, relation })
        .await
        .unwrap();

    graph.delete_entity(fqdn.id).await.unwrap();

    assert!(graph.outgoing_edges(fqdn.id, None, None).await.is_err() || graph.outgoing_edges(fqdn.id, None, None).await.unwrap().is_empty());
    assert!(graph.find_entity_by_id(ip.id).await.is_ok());
}
