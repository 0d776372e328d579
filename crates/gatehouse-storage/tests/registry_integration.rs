//! Integration tests for the credential registry.
//!
//! Exercises concurrent saves against one registry and the load/save
//! round-trip of both persisted stores.
//!
//! Run with: cargo test --package gatehouse-storage --test registry_integration

use gatehouse_core::{CardId, Credential};
use gatehouse_storage::{BlockMap, CredentialMap, CredentialRegistry, StoragePaths};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

fn credential_map(cards: &[u64]) -> CredentialMap {
    cards
        .iter()
        .map(|c| {
            let card = CardId::new(*c);
            (card.to_string(), Credential::new(card, format!("u-{c}"), format!("User {c}")))
        })
        .collect()
}

#[tokio::test]
async fn test_concurrent_upserts_all_persist() {
    let dir = TempDir::new().unwrap();
    let paths = StoragePaths::new(dir.path());
    let registry = Arc::new(CredentialRegistry::open(&paths).await.unwrap());

    const NUM_CONCURRENT_TASKS: u64 = 20;
    let handles: Vec<_> = (0..NUM_CONCURRENT_TASKS)
        .map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move {
                let card = CardId::new(1000 + i);
                registry
                    .upsert_credential(card, Credential::new(card, format!("u-{i}"), "User"))
                    .await
            })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        result.unwrap().unwrap();
    }

    let reopened = CredentialRegistry::open(&paths).await.unwrap();
    assert_eq!(reopened.credentials().ids().len(), NUM_CONCURRENT_TASKS as usize);
    assert_eq!(registry.credentials().ids(), reopened.credentials().ids());
}

#[tokio::test]
async fn test_readers_never_see_a_partial_set() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(CredentialRegistry::open(&StoragePaths::new(dir.path())).await.unwrap());

    let even: Vec<u64> = (0..50).map(|i| i * 2).collect();
    let odd: Vec<u64> = (0..50).map(|i| i * 2 + 1).collect();
    let even_set: HashSet<CardId> = even.iter().copied().map(CardId::new).collect();
    let odd_set: HashSet<CardId> = odd.iter().copied().map(CardId::new).collect();
    registry.save_credentials(credential_map(&even)).await.unwrap();

    let writer = {
        let registry = registry.clone();
        tokio::spawn(async move {
            for round in 0..20 {
                let cards = if round % 2 == 0 { &odd } else { &even };
                registry.save_credentials(credential_map(cards)).await.unwrap();
            }
        })
    };

    while !writer.is_finished() {
        let snapshot = registry.credentials();
        assert!(snapshot.ids() == &even_set || snapshot.ids() == &odd_set);
        tokio::task::yield_now().await;
    }
    writer.await.unwrap();
}

#[tokio::test]
async fn test_block_list_survives_restart() {
    let dir = TempDir::new().unwrap();
    let paths = StoragePaths::new(dir.path());

    {
        let registry = CredentialRegistry::open(&paths).await.unwrap();
        registry.set_blocked(CardId::new(777), true).await.unwrap();
    }

    let registry = CredentialRegistry::open(&paths).await.unwrap();
    assert!(registry.is_blocked(CardId::new(777)));
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// save(load(x)) == x for the allow-list, and the lookup set equals the
    /// integer keys of what was just saved.
    #[test]
    fn prop_credentials_round_trip(
        cards in prop::collection::btree_set(any::<u64>(), 0..20),
        junk in prop::collection::btree_set("[a-z]{1,6}", 0..3),
    ) {
        let dir = TempDir::new().unwrap();
        let rt = runtime();
        let mut map = credential_map(&cards.iter().copied().collect::<Vec<_>>());
        for key in &junk {
            map.insert(key.clone(), Credential::new(CardId::new(0), "x", "Junk"));
        }

        let (loaded, ids) = rt.block_on(async {
            let registry = CredentialRegistry::open(&StoragePaths::new(dir.path())).await.unwrap();
            registry.save_credentials(map.clone()).await.unwrap();
            let ids = registry.credentials().ids().clone();
            let loaded = registry.load_credentials().await.unwrap();
            registry.save_credentials(loaded.clone()).await.unwrap();
            (registry.load_credentials().await.unwrap(), ids)
        });

        prop_assert_eq!(&loaded, &map);
        let expected: HashSet<CardId> = cards.iter().copied().map(CardId::new).collect();
        prop_assert_eq!(ids, expected);
    }

    /// save(load(x)) == x for the block-list; only `true` entries are in the set.
    #[test]
    fn prop_block_list_round_trip(entries in prop::collection::btree_map(any::<u64>(), any::<bool>(), 0..20)) {
        let dir = TempDir::new().unwrap();
        let rt = runtime();
        let map: BlockMap = entries.iter().map(|(k, v)| (k.to_string(), *v)).collect();

        let (loaded, ids) = rt.block_on(async {
            let registry = CredentialRegistry::open(&StoragePaths::new(dir.path())).await.unwrap();
            registry.save_block_list(map.clone()).await.unwrap();
            (registry.load_block_list().await.unwrap(), registry.block_list().ids().clone())
        });

        prop_assert_eq!(&loaded, &map);
        let expected: HashSet<CardId> = entries
            .iter()
            .filter(|(_, blocked)| **blocked)
            .map(|(k, _)| CardId::new(*k))
            .collect();
        prop_assert_eq!(ids, expected);
    }
}
