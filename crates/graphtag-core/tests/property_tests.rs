//! # Property-Based Tests
//!
//! Invariants that must hold for arbitrary transaction shapes:
//! - round trip: every identified entity resolves back through the index
//! - uniqueness: a duplicate claim is always rejected, whatever the value
//! - idempotence: re-running the backfill never changes anything

use graphtag_core::{
    DEFAULT_NODE_INDEX, EntityRef, MemoryGraph, SequenceGenerator, TagConfiguration, TagModule,
    TagTransaction, UuidGenerator,
};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

fn store_with_module(generator: Arc<dyn graphtag_core::IdentifierGenerator>) -> MemoryGraph {
    let mut graph = MemoryGraph::new();
    graph.register_module(Arc::new(TagModule::with_generator(
        "UIDM",
        TagConfiguration::new(),
        generator,
    )));
    graph
}

proptest! {
    /// Every node created in one transaction ends up with a distinct
    /// identifier, and the index maps each identifier back to its node.
    #[test]
    fn round_trip_holds_for_any_batch_size(count in 1usize..50) {
        let mut graph = store_with_module(Arc::new(UuidGenerator));

        let mut tx = graph.begin();
        let nodes: Vec<EntityRef> = (0..count).map(|_| tx.create_node()).collect();
        tx.commit().expect("commit");

        let mut seen = BTreeSet::new();
        for node in nodes {
            let id = graph
                .entity_property(node, "uuid")
                .expect("identifier present")
                .to_string();
            prop_assert!(seen.insert(id.clone()), "identifier assigned twice");
            prop_assert_eq!(graph.index_lookup(DEFAULT_NODE_INDEX, &id), Some(node));
        }
        prop_assert_eq!(graph.index_size(DEFAULT_NODE_INDEX), count);
    }

    /// Claiming an already-owned identifier is rejected no matter what the
    /// value looks like, and the store is left exactly as it was.
    #[test]
    fn duplicate_claims_are_always_rejected(value in "[a-z0-9]{1,24}") {
        let mut graph = store_with_module(Arc::new(SequenceGenerator::new("u")));

        let mut tx = graph.begin();
        let a = tx.create_node();
        tx.set_property(a, "uuid", &value).expect("set");
        tx.commit().expect("commit");

        let mut tx = graph.begin();
        let b = tx.create_node();
        tx.set_property(b, "uuid", &value).expect("set");
        prop_assert!(tx.commit().is_err());

        prop_assert_eq!(graph.node_count(), 1);
        prop_assert_eq!(graph.index_lookup(DEFAULT_NODE_INDEX, &value), Some(a));
    }

    /// Backfill is idempotent: a second run tags nothing and changes no
    /// identifier, whatever the store size.
    #[test]
    fn backfill_is_idempotent(count in 1u64..200) {
        let mut graph = MemoryGraph::new();
        let mut tx = graph.begin();
        for _ in 0..count {
            tx.create_node();
        }
        tx.commit().expect("commit");

        let module = TagModule::with_generator(
            "UIDM",
            TagConfiguration::new(),
            Arc::new(SequenceGenerator::new("u")),
        );

        let first = module.initialize(&mut graph).expect("initialize");
        prop_assert_eq!(first.entities_tagged as u64, count);

        let before: Vec<_> = (0..count)
            .map(|id| graph.entity_property(EntityRef::node(id), "uuid").map(str::to_string))
            .collect();

        let second = module.initialize(&mut graph).expect("re-initialize");
        prop_assert_eq!(second.entities_tagged, 0);

        let after: Vec<_> = (0..count)
            .map(|id| graph.entity_property(EntityRef::node(id), "uuid").map(str::to_string))
            .collect();
        prop_assert_eq!(before, after);
    }

    /// Writes to properties other than the managed one never veto a commit.
    #[test]
    fn unmanaged_properties_stay_mutable(key in "[a-z]{1,12}", value in "[a-z0-9]{0,24}") {
        prop_assume!(key != "uuid");

        let mut graph = store_with_module(Arc::new(SequenceGenerator::new("u")));

        let mut tx = graph.begin();
        let node = tx.create_node();
        tx.commit().expect("commit");

        let mut tx = graph.begin();
        tx.set_property(node, &key, &value).expect("set");
        prop_assert!(tx.commit().is_ok());
        prop_assert_eq!(graph.entity_property(node, "uuid"), Some("u1"));
    }
}
