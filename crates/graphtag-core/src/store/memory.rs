//! # In-Memory Reference Store
//!
//! A `BTreeMap`-backed graph store with single-writer transactions.
//!
//! All data structures use `BTreeMap` for deterministic ordering. A
//! transaction is an overlay over committed state: staged creates,
//! deletes, property writes, and index mutations live in the overlay
//! until commit and vanish with the transaction if it is dropped or
//! vetoed. Entity ids double as the stable enumeration order (creation
//! order), which is what the batch initializer walks.

use crate::module::TagModule;
use crate::store::{EdgeRecord, HostStore, KindChanges, TagTransaction};
use crate::types::{
    Change, EntityKind, EntityRef, EntitySnapshot, Identifier, PropertyBag, TagError,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::warn;

// =============================================================================
// STORE
// =============================================================================

/// The in-memory graph store.
#[derive(Default)]
pub struct MemoryGraph {
    nodes: BTreeMap<u64, PropertyBag>,
    edges: BTreeMap<u64, EdgeRecord>,
    indexes: BTreeMap<String, BTreeMap<String, EntityRef>>,
    next_node_id: u64,
    next_edge_id: u64,
    modules: Vec<Arc<TagModule>>,
}

impl MemoryGraph {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a module. From now on every transaction opened with
    /// [`MemoryGraph::begin`] passes through the module's pre-commit hook.
    pub fn register_module(&mut self, module: Arc<TagModule>) {
        self.modules.push(module);
    }

    /// Open a transaction. Committing it runs all registered modules.
    pub fn begin(&mut self) -> MemoryTransaction<'_> {
        self.transaction(true)
    }

    fn transaction(&mut self, run_modules: bool) -> MemoryTransaction<'_> {
        let next_node_id = self.next_node_id;
        let next_edge_id = self.next_edge_id;
        MemoryTransaction {
            graph: self,
            run_modules,
            next_node_id,
            next_edge_id,
            overlay: BTreeMap::new(),
            created: BTreeSet::new(),
            before: BTreeMap::new(),
            index_overlay: BTreeMap::new(),
            node_changes: KindChanges::default(),
            edge_changes: KindChanges::default(),
        }
    }

    /// Read a property of a committed entity.
    #[must_use]
    pub fn entity_property(&self, entity: EntityRef, key: &str) -> Option<&str> {
        let bag = match entity.kind {
            EntityKind::Node => self.nodes.get(&entity.id),
            EntityKind::Edge => self.edges.get(&entity.id).map(|r| &r.properties),
        };
        bag.and_then(|b| b.get(key)).map(String::as_str)
    }

    /// Check whether a committed entity exists.
    #[must_use]
    pub fn contains(&self, entity: EntityRef) -> bool {
        match entity.kind {
            EntityKind::Node => self.nodes.contains_key(&entity.id),
            EntityKind::Edge => self.edges.contains_key(&entity.id),
        }
    }

    /// Number of committed nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of committed edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Look up a committed index entry.
    #[must_use]
    pub fn index_lookup(&self, namespace: &str, identifier: &str) -> Option<EntityRef> {
        self.indexes.get(namespace)?.get(identifier).copied()
    }

    /// Number of committed entries in an index namespace.
    #[must_use]
    pub fn index_size(&self, namespace: &str) -> usize {
        self.indexes.get(namespace).map_or(0, BTreeMap::len)
    }
}

impl std::fmt::Debug for MemoryGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGraph")
            .field("nodes", &self.nodes.len())
            .field("edges", &self.edges.len())
            .field("modules", &self.modules.len())
            .finish_non_exhaustive()
    }
}

impl HostStore for MemoryGraph {
    fn entity_ids(&self, kind: EntityKind) -> Result<Vec<u64>, TagError> {
        Ok(match kind {
            EntityKind::Node => self.nodes.keys().copied().collect(),
            EntityKind::Edge => self.edges.keys().copied().collect(),
        })
    }

    fn internal_transaction(
        &mut self,
        work: &mut dyn FnMut(&mut dyn TagTransaction) -> Result<(), TagError>,
    ) -> Result<(), TagError> {
        let mut tx = self.transaction(false);
        work(&mut tx)?;
        tx.commit()
    }
}

// =============================================================================
// TRANSACTION
// =============================================================================

/// Staged state of one entity inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingEntity {
    Node {
        properties: PropertyBag,
    },
    Edge {
        from: u64,
        to: u64,
        properties: PropertyBag,
    },
}

impl PendingEntity {
    fn properties(&self) -> &PropertyBag {
        match self {
            Self::Node { properties } | Self::Edge { properties, .. } => properties,
        }
    }

    fn properties_mut(&mut self) -> &mut PropertyBag {
        match self {
            Self::Node { properties } | Self::Edge { properties, .. } => properties,
        }
    }

    fn endpoints(&self) -> Option<(u64, u64)> {
        match self {
            Self::Node { .. } => None,
            Self::Edge { from, to, .. } => Some((*from, *to)),
        }
    }
}

/// A single in-flight transaction over a [`MemoryGraph`].
///
/// Holds the store exclusively borrowed for its lifetime (single writer,
/// like the redb backend). Dropping the transaction discards everything.
pub struct MemoryTransaction<'g> {
    graph: &'g mut MemoryGraph,
    run_modules: bool,
    next_node_id: u64,
    next_edge_id: u64,
    /// Staged entity state: `Some` = live (created or modified),
    /// `None` = deleted. Entities absent here are untouched.
    overlay: BTreeMap<EntityRef, Option<PendingEntity>>,
    created: BTreeSet<EntityRef>,
    /// First-touch snapshots of pre-existing entities.
    before: BTreeMap<EntityRef, PendingEntity>,
    /// Staged index mutations: `Some` = put, `None` = tombstone.
    index_overlay: BTreeMap<(String, String), Option<EntityRef>>,
    node_changes: KindChanges,
    edge_changes: KindChanges,
}

impl MemoryTransaction<'_> {
    /// Create a node with an empty property bag.
    pub fn create_node(&mut self) -> EntityRef {
        let entity = EntityRef::node(self.next_node_id);
        self.next_node_id = self.next_node_id.saturating_add(1);
        self.overlay.insert(
            entity,
            Some(PendingEntity::Node {
                properties: PropertyBag::new(),
            }),
        );
        self.created.insert(entity);
        entity
    }

    /// Create an edge between two live nodes.
    pub fn create_edge(&mut self, from: u64, to: u64) -> Result<EntityRef, TagError> {
        for node in [from, to] {
            if !self.is_live(EntityRef::node(node)) {
                return Err(TagError::EntityNotFound(EntityRef::node(node)));
            }
        }
        let entity = EntityRef::edge(self.next_edge_id);
        self.next_edge_id = self.next_edge_id.saturating_add(1);
        self.overlay.insert(
            entity,
            Some(PendingEntity::Edge {
                from,
                to,
                properties: PropertyBag::new(),
            }),
        );
        self.created.insert(entity);
        Ok(entity)
    }

    /// Remove a property from a live entity.
    pub fn remove_property(&mut self, entity: EntityRef, key: &str) -> Result<(), TagError> {
        self.touch(entity)?.properties_mut().remove(key);
        Ok(())
    }

    /// Delete a live entity. Deleting a node also deletes its incident
    /// edges. Deleting an entity created in this same transaction leaves
    /// no trace in the change-set.
    pub fn delete(&mut self, entity: EntityRef) -> Result<(), TagError> {
        if !self.is_live(entity) {
            return Err(TagError::EntityNotFound(entity));
        }

        if entity.kind == EntityKind::Node {
            for edge in self.incident_edges(entity.id) {
                self.delete(edge)?;
            }
        }

        if self.created.remove(&entity) {
            self.overlay.remove(&entity);
        } else {
            if !self.before.contains_key(&entity) {
                if let Some(state) = self.committed_state(entity) {
                    self.before.insert(entity, state);
                }
            }
            self.overlay.insert(entity, None);
        }
        Ok(())
    }

    /// Commit: build the change-set, run registered modules (unless this
    /// is a store-internal transaction), then apply the overlay. A module
    /// error rolls everything back — staged entity state, staged property
    /// writes, and staged index mutations alike.
    pub fn commit(mut self) -> Result<(), TagError> {
        self.build_change_lists();

        if self.run_modules {
            let modules = self.graph.modules.clone();
            for module in &modules {
                if let Err(e) = module.before_commit(&mut self) {
                    warn!(module = module.module_id(), error = %e, "commit vetoed; transaction rolled back");
                    return Err(e);
                }
            }
        }

        self.apply();
        Ok(())
    }

    /// Discard the transaction. Equivalent to dropping it.
    pub fn rollback(self) {
        drop(self);
    }

    fn is_live(&self, entity: EntityRef) -> bool {
        match self.overlay.get(&entity) {
            Some(state) => state.is_some(),
            None => self.graph.contains(entity),
        }
    }

    fn committed_state(&self, entity: EntityRef) -> Option<PendingEntity> {
        match entity.kind {
            EntityKind::Node => self.graph.nodes.get(&entity.id).map(|bag| PendingEntity::Node {
                properties: bag.clone(),
            }),
            EntityKind::Edge => self.graph.edges.get(&entity.id).map(|r| PendingEntity::Edge {
                from: r.from,
                to: r.to,
                properties: r.properties.clone(),
            }),
        }
    }

    /// Current state of a live entity, loading it into the overlay on
    /// first touch so the before-snapshot is captured exactly once.
    fn touch(&mut self, entity: EntityRef) -> Result<&mut PendingEntity, TagError> {
        if !self.overlay.contains_key(&entity) {
            let Some(state) = self.committed_state(entity) else {
                return Err(TagError::EntityNotFound(entity));
            };
            self.before.insert(entity, state.clone());
            self.overlay.insert(entity, Some(state));
        }
        match self.overlay.get_mut(&entity) {
            Some(Some(state)) => Ok(state),
            _ => Err(TagError::EntityNotFound(entity)),
        }
    }

    fn incident_edges(&self, node_id: u64) -> Vec<EntityRef> {
        let mut result = BTreeSet::new();
        for (id, record) in &self.graph.edges {
            if record.from == node_id || record.to == node_id {
                let edge = EntityRef::edge(*id);
                if self.is_live(edge) {
                    result.insert(edge);
                }
            }
        }
        for (entity, state) in &self.overlay {
            if let Some(pending) = state {
                if let Some((from, to)) = pending.endpoints() {
                    if from == node_id || to == node_id {
                        result.insert(*entity);
                    }
                }
            }
        }
        result.into_iter().collect()
    }

    fn build_change_lists(&mut self) {
        let Self {
            overlay,
            created,
            before,
            node_changes,
            edge_changes,
            ..
        } = self;

        for (&entity, state) in overlay.iter() {
            let lists = match entity.kind {
                EntityKind::Node => &mut *node_changes,
                EntityKind::Edge => &mut *edge_changes,
            };
            match state {
                Some(pending) => {
                    let snapshot = EntitySnapshot::new(entity, pending.properties().clone());
                    if created.contains(&entity) {
                        lists.created.push(snapshot);
                    } else if let Some(prior) = before.get(&entity) {
                        if prior.properties() != pending.properties() {
                            lists.changed.push(Change::new(
                                EntitySnapshot::new(entity, prior.properties().clone()),
                                snapshot,
                            ));
                        }
                    }
                }
                None => {
                    if let Some(prior) = before.get(&entity) {
                        lists
                            .deleted
                            .push(EntitySnapshot::new(entity, prior.properties().clone()));
                    }
                }
            }
        }
    }

    fn apply(mut self) {
        let overlay = std::mem::take(&mut self.overlay);
        for (entity, state) in overlay {
            match (entity.kind, state) {
                (EntityKind::Node, Some(pending)) => {
                    self.graph
                        .nodes
                        .insert(entity.id, pending.properties().clone());
                }
                (EntityKind::Node, None) => {
                    self.graph.nodes.remove(&entity.id);
                }
                (EntityKind::Edge, Some(pending)) => {
                    if let Some((from, to)) = pending.endpoints() {
                        self.graph.edges.insert(
                            entity.id,
                            EdgeRecord {
                                from,
                                to,
                                properties: pending.properties().clone(),
                            },
                        );
                    }
                }
                (EntityKind::Edge, None) => {
                    self.graph.edges.remove(&entity.id);
                }
            }
        }

        let index_overlay = std::mem::take(&mut self.index_overlay);
        for ((namespace, key), value) in index_overlay {
            let index = self.graph.indexes.entry(namespace).or_default();
            match value {
                Some(entity) => {
                    index.insert(key, entity);
                }
                None => {
                    index.remove(&key);
                }
            }
        }

        self.graph.next_node_id = self.next_node_id;
        self.graph.next_edge_id = self.next_edge_id;
    }

    fn kind_changes(&self, kind: EntityKind) -> &KindChanges {
        match kind {
            EntityKind::Node => &self.node_changes,
            EntityKind::Edge => &self.edge_changes,
        }
    }
}

impl TagTransaction for MemoryTransaction<'_> {
    fn created(&self, kind: EntityKind) -> &[EntitySnapshot] {
        &self.kind_changes(kind).created
    }

    fn deleted(&self, kind: EntityKind) -> &[EntitySnapshot] {
        &self.kind_changes(kind).deleted
    }

    fn changed(&self, kind: EntityKind) -> &[Change<EntitySnapshot>] {
        &self.kind_changes(kind).changed
    }

    fn property(&self, entity: EntityRef, key: &str) -> Result<Option<String>, TagError> {
        match self.snapshot(entity)? {
            Some(snapshot) => Ok(snapshot.properties.get(key).cloned()),
            None => Err(TagError::EntityNotFound(entity)),
        }
    }

    fn snapshot(&self, entity: EntityRef) -> Result<Option<EntitySnapshot>, TagError> {
        match self.overlay.get(&entity) {
            Some(Some(pending)) => Ok(Some(EntitySnapshot::new(
                entity,
                pending.properties().clone(),
            ))),
            Some(None) => Ok(None),
            None => Ok(self
                .committed_state(entity)
                .map(|state| EntitySnapshot::new(entity, state.properties().clone()))),
        }
    }

    fn set_property(&mut self, entity: EntityRef, key: &str, value: &str) -> Result<(), TagError> {
        self.touch(entity)?
            .properties_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn index_put(
        &mut self,
        namespace: &str,
        identifier: &Identifier,
        entity: EntityRef,
    ) -> Result<(), TagError> {
        self.index_overlay.insert(
            (namespace.to_string(), identifier.as_str().to_string()),
            Some(entity),
        );
        Ok(())
    }

    fn index_remove(&mut self, namespace: &str, identifier: &Identifier) -> Result<(), TagError> {
        self.index_overlay.insert(
            (namespace.to_string(), identifier.as_str().to_string()),
            None,
        );
        Ok(())
    }

    fn index_get(
        &self,
        namespace: &str,
        identifier: &Identifier,
    ) -> Result<Option<EntityRef>, TagError> {
        if let Some(staged) = self
            .index_overlay
            .get(&(namespace.to_string(), identifier.as_str().to_string()))
        {
            return Ok(*staged);
        }
        Ok(self.graph.index_lookup(namespace, identifier.as_str()))
    }
}

impl std::fmt::Debug for MemoryTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransaction")
            .field("staged_entities", &self.overlay.len())
            .field("staged_index_ops", &self.index_overlay.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_commit_persists_node() {
        let mut graph = MemoryGraph::new();
        let node = {
            let mut tx = graph.begin();
            let node = tx.create_node();
            tx.set_property(node, "name", "alice").expect("set");
            tx.commit().expect("commit");
            node
        };

        assert!(graph.contains(node));
        assert_eq!(graph.entity_property(node, "name"), Some("alice"));
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn dropped_transaction_leaves_no_trace() {
        let mut graph = MemoryGraph::new();
        {
            let mut tx = graph.begin();
            let node = tx.create_node();
            tx.set_property(node, "name", "ghost").expect("set");
            tx.rollback();
        }
        assert_eq!(graph.node_count(), 0);
    }

    #[test]
    fn entity_ids_are_creation_ordered() {
        let mut graph = MemoryGraph::new();
        let mut tx = graph.begin();
        for _ in 0..5 {
            tx.create_node();
        }
        tx.commit().expect("commit");

        assert_eq!(
            graph.entity_ids(EntityKind::Node).expect("ids"),
            vec![0, 1, 2, 3, 4]
        );
    }

    #[test]
    fn deleting_node_cascades_to_incident_edges() {
        let mut graph = MemoryGraph::new();
        let mut tx = graph.begin();
        let a = tx.create_node();
        let b = tx.create_node();
        tx.create_edge(a.id, b.id).expect("edge");
        tx.commit().expect("commit");
        assert_eq!(graph.edge_count(), 1);

        let mut tx = graph.begin();
        tx.delete(a).expect("delete");
        tx.commit().expect("commit");

        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn created_then_deleted_entity_vanishes_from_change_set() {
        let mut graph = MemoryGraph::new();
        let mut tx = graph.begin();
        let node = tx.create_node();
        tx.delete(node).expect("delete");
        tx.build_change_lists();

        assert!(tx.created(EntityKind::Node).is_empty());
        assert!(tx.deleted(EntityKind::Node).is_empty());
    }

    #[test]
    fn change_list_carries_before_and_after() {
        let mut graph = MemoryGraph::new();
        let mut tx = graph.begin();
        let node = tx.create_node();
        tx.set_property(node, "name", "before").expect("set");
        tx.commit().expect("commit");

        let mut tx = graph.begin();
        tx.set_property(node, "name", "after").expect("set");
        tx.build_change_lists();

        let changed = tx.changed(EntityKind::Node);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].previous.property("name"), Some("before"));
        assert_eq!(changed[0].current.property("name"), Some("after"));
    }

    #[test]
    fn untouched_entities_do_not_appear_changed() {
        let mut graph = MemoryGraph::new();
        let mut tx = graph.begin();
        let node = tx.create_node();
        tx.set_property(node, "name", "same").expect("set");
        tx.commit().expect("commit");

        let mut tx = graph.begin();
        // Write the identical value: no net change.
        tx.set_property(node, "name", "same").expect("set");
        tx.build_change_lists();
        assert!(tx.changed(EntityKind::Node).is_empty());
    }

    #[test]
    fn index_overlay_is_transactional() {
        let mut graph = MemoryGraph::new();
        {
            let mut tx = graph.begin();
            tx.index_put("ns", &Identifier::new("u1"), EntityRef::node(0))
                .expect("put");
            assert_eq!(
                tx.index_get("ns", &Identifier::new("u1")).expect("get"),
                Some(EntityRef::node(0))
            );
            // Dropped: the entry must not survive.
        }
        assert_eq!(graph.index_lookup("ns", "u1"), None);

        let mut tx = graph.begin();
        tx.index_put("ns", &Identifier::new("u1"), EntityRef::node(0))
            .expect("put");
        tx.commit().expect("commit");
        assert_eq!(graph.index_lookup("ns", "u1"), Some(EntityRef::node(0)));
    }

    #[test]
    fn edge_creation_requires_live_endpoints() {
        let mut graph = MemoryGraph::new();
        let mut tx = graph.begin();
        let a = tx.create_node();
        let result = tx.create_edge(a.id, 999);
        assert!(matches!(result, Err(TagError::EntityNotFound(_))));
    }
}
