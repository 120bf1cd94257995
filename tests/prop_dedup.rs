//! Property tests for the quantified invariants in spec.md §7: repeated
//! `create_asset` calls for the same identity are idempotent on id, and
//! `last_seen` only ever advances.

use std::sync::Arc;

use assetgraph_store::graph::GraphApi;
use assetgraph_store::model::asset::{AssetPayload, Fqdn};
use assetgraph_store::storage::MemoryBackend;
use assetgraph_store::taxonomy::StaticTaxonomy;
use proptest::prelude::*;

fn graph() -> GraphApi<MemoryBackend> {
    GraphApi::new(Arc::new(MemoryBackend::new()), Arc::new(StaticTaxonomy::new()))
}

fn valid_label() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,15}\\.(com|net|org)"
}

proptest! {
    #[test]
    fn repeated_creation_of_the_same_fqdn_always_dedups_to_one_id(name in valid_label(), repeats in 1usize..8) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let g = graph();
            let mut ids = Vec::new();
            for _ in 0..repeats {
                let entity = g
                    .create_asset(AssetPayload::Fqdn(Fqdn { name: name.clone() }))
                    .await
                    .unwrap();
                ids.push(entity.id);
            }
            prop_assert!(ids.windows(2).all(|w| w[0] == w[1]));
            Ok(())
        })?;
    }

    #[test]
    fn last_seen_never_goes_backwards_across_repeated_creation(name in valid_label(), repeats in 2usize..8) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let g = graph();
            let mut last_seen = None;
            for _ in 0..repeats {
                let entity = g
                    .create_asset(AssetPayload::Fqdn(Fqdn { name: name.clone() }))
                    .await
                    .unwrap();
                if let Some(prev) = last_seen {
                    prop_assert!(entity.last_seen >= prev);
                }
                last_seen = Some(entity.last_seen);
            }
            Ok(())
        })?;
    }

    #[test]
    fn distinct_names_never_collide_on_id(a in valid_label(), b in valid_label()) {
        prop_assume!(a != b);
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let g = graph();
            let ea = g.create_asset(AssetPayload::Fqdn(Fqdn { name: a })).await.unwrap();
            let eb = g.create_asset(AssetPayload::Fqdn(Fqdn { name: b })).await.unwrap();
            prop_assert_ne!(ea.id, eb.id);
            Ok(())
        })?;
    }
}
