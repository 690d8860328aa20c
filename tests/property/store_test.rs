// tests/property/store_test.rs

//! Property-based tests for `AttributeStore` invariants that should hold
//! regardless of how many nodes/attributes are involved.

use clattrd::core::store::{AttributeId, AttributeStore, ClearFailureFilter, NodeIdentity, UpsertOptions};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        ..ProptestConfig::default()
    })]

    #[test]
    fn erase_peer_removes_exactly_that_nodes_values(
        node_names in prop::collection::hash_set("[a-z]{1,8}", 2..10),
        target_index in 0usize..10,
    ) {
        let node_names: Vec<String> = node_names.into_iter().collect();
        prop_assume!(!node_names.is_empty());
        let target = &node_names[target_index % node_names.len()];

        let mut store = AttributeStore::new();
        let id = AttributeId::from("shared-attr");
        for name in &node_names {
            let node = NodeIdentity::named(name.clone());
            store.upsert(&id, &node, Some("v"), &UpsertOptions::default()).unwrap();
        }

        store.erase_peer(target);

        let attr = store.lookup(&id).unwrap();
        prop_assert!(!attr.values.contains_key(target));
        for name in &node_names {
            if name != target {
                prop_assert!(attr.values.contains_key(name));
            }
        }
    }

    #[test]
    fn identical_consecutive_values_never_mark_changed(
        value in "[a-zA-Z0-9]{1,16}"
    ) {
        let mut store = AttributeStore::new();
        let id = AttributeId::from("stable-attr");
        let node = NodeIdentity::named("node1");

        let first = store.upsert(&id, &node, Some(&value), &UpsertOptions::default()).unwrap();
        prop_assert!(first.value_changed);

        let second = store.upsert(&id, &node, Some(&value), &UpsertOptions::default()).unwrap();
        prop_assert!(!second.value_changed);
    }

    #[test]
    fn delete_matching_only_removes_fail_count_shaped_ids(
        resources in prop::collection::vec("[a-z]{1,8}", 1..8),
    ) {
        let mut store = AttributeStore::new();
        let node = NodeIdentity::named("node1");
        let unrelated = AttributeId::from("region");
        store.upsert(&unrelated, &node, Some("east"), &UpsertOptions::default()).unwrap();

        for r in &resources {
            let id = AttributeId::from(format!("fail-count-{r}"));
            store.upsert(&id, &node, Some("1"), &UpsertOptions::default()).unwrap();
        }

        let removed = store.delete_matching(ClearFailureFilter::AnyResource).unwrap();

        prop_assert_eq!(removed.len(), resources.len());
        prop_assert!(store.lookup(&unrelated).is_some());
        for r in &resources {
            let id = AttributeId::from(format!("fail-count-{r}"));
            prop_assert!(store.lookup(&id).is_none());
        }
    }
}
