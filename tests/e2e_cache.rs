//! Write-through cache scenarios from spec.md §8: a burst of writes must be
//! visible through the cache immediately, and fully reconciled against the
//! durable backend after a `barrier()`.

use std::sync::Arc;
use std::time::Duration;

use assetgraph_store::model::asset::{AssetPayload, Fqdn, IpAddress};
use assetgraph_store::model::edge::EdgeInput;
use assetgraph_store::model::relation::{BasicDnsRelation, DnsRrHeader, RelationPayload};
use assetgraph_store::storage::MemoryBackend;
use assetgraph_store::taxonomy::StaticTaxonomy;
use assetgraph_store::{Cache, GraphApi};

fn taxonomy() -> Arc<StaticTaxonomy> {
    Arc::new(StaticTaxonomy::new().admit("Fqdn", "a_record", Some("A"), "IpAddress"))
}

#[tokio::test]
async fn burst_of_writes_is_visible_before_and_after_barrier() {
    let durable = Arc::new(MemoryBackend::new());
    let cache = Cache::new(durable.clone(), taxonomy(), Duration::from_secs(300));

    for i in 0..100 {
        cache
            .create_asset(AssetPayload::Fqdn(Fqdn { name: format!("host{i}.example.com") }))
            .await
            .unwrap();
    }

    let from_cache = cache.find_entities_by_type("Fqdn", None).await.unwrap();
    assert_eq!(from_cache.len(), 100);

    cache.barrier().await;

    let durable_graph = GraphApi::new(durable, taxonomy());
    let from_durable = durable_graph.find_entities_by_type("Fqdn", None).await.unwrap();
    assert_eq!(from_durable.len(), 100);
}

#[tokio::test]
async fn repeated_writes_within_freq_window_coalesce_to_one_durable_replay() {
    let durable = Arc::new(MemoryBackend::new());
    let cache = Cache::new(durable.clone(), taxonomy(), Duration::from_secs(300));

    for _ in 0..10 {
        cache
            .create_asset(AssetPayload::Fqdn(Fqdn { name: "www.example.com".into() }))
            .await
            .unwrap();
    }
    cache.barrier().await;

    let durable_graph = GraphApi::new(durable, taxonomy());
    let rows = durable_graph.find_entities_by_type("Fqdn", None).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn cache_rejects_unadmitted_relationship_without_touching_durable() {
    let durable = Arc::new(MemoryBackend::new());
    let cache = Cache::new(durable.clone(), taxonomy(), Duration::from_secs(300));

    let a = cache
        .create_asset(AssetPayload::IpAddress(IpAddress { address: "1.1.1.1".into(), version: Some("4".into()) }))
        .await
        .unwrap();
    let b = cache
        .create_asset(AssetPayload::IpAddress(IpAddress { address: "1.1.1.2".into(), version: Some("4".into()) }))
        .await
        .unwrap();

    let relation = RelationPayload::BasicDnsRelation {
        label: "a_record".into(),
        relation: BasicDnsRelation { header: DnsRrHeader { rr_type: "A".into(), ttl: None } },
    };
    let err = cache
        .link(EdgeInput { from_entity_id: a.id, to_entity_id: b.id, relation })
        .await
        .unwrap_err();
    assert!(matches!(err, assetgraph_store::Error::TaxonomyViolation(_)));

    cache.barrier().await;
    let durable_graph = GraphApi::new(durable, taxonomy());
    assert!(durable_graph.outgoing_edges(a.id, None, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn deleting_through_the_cache_replays_durably() {
    let durable = Arc::new(MemoryBackend::new());
    let cache = Cache::new(durable.clone(), taxonomy(), Duration::from_secs(300));

    let entity = cache
        .create_asset(AssetPayload::Fqdn(Fqdn { name: "stale.example.com".into() }))
        .await
        .unwrap();
    cache.barrier().await;

    cache.delete_entity(entity.id).await.unwrap();
    cache.barrier().await;

    let durable_graph = GraphApi::new(durable, taxonomy());
    assert!(durable_graph.find_entity_by_id(entity.id).await.is_err());
}
