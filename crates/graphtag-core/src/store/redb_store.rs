//! # redb-backed Reference Store
//!
//! A disk-backed graph store using the redb embedded database.
//!
//! Entity property bags are postcard blobs; the identifier index is a
//! plain `(namespace, identifier) -> entity` table living in the same
//! database. Every transaction — user writes, module property writes,
//! and index mutations — is one redb write transaction, so a vetoed
//! commit aborts data and index together and an uncommitted identifier
//! is never visible to concurrent readers (redb MVCC, single writer).

use crate::module::TagModule;
use crate::store::{EdgeRecord, HostStore, KindChanges, TagTransaction};
use crate::types::{
    Change, EntityKind, EntityRef, EntitySnapshot, Identifier, PropertyBag, TagError,
};
use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition,
    WriteTransaction,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Table for nodes: node id -> serialized property bag.
const NODES: TableDefinition<u64, &[u8]> = TableDefinition::new("nodes");

/// Table for edges: edge id -> serialized [`EdgeRecord`].
const EDGES: TableDefinition<u64, &[u8]> = TableDefinition::new("edges");

/// Table for the identifier index: (namespace, identifier) -> entity,
/// the entity encoded as (kind code, id).
const IDENTIFIERS: TableDefinition<(&str, &str), (u8, u64)> = TableDefinition::new("identifiers");

/// Table for metadata: key string -> value u64 (id counters).
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const fn kind_code(kind: EntityKind) -> u8 {
    match kind {
        EntityKind::Node => 0,
        EntityKind::Edge => 1,
    }
}

fn kind_from_code(code: u8) -> Result<EntityKind, TagError> {
    match code {
        0 => Ok(EntityKind::Node),
        1 => Ok(EntityKind::Edge),
        other => Err(TagError::Serialization(format!(
            "unknown entity kind code {other}"
        ))),
    }
}

// =============================================================================
// STORE
// =============================================================================

/// A disk-backed graph store using redb.
pub struct RedbGraph {
    db: Database,
    next_node_id: u64,
    next_edge_id: u64,
    modules: Vec<Arc<TagModule>>,
}

impl std::fmt::Debug for RedbGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbGraph")
            .field("next_node_id", &self.next_node_id)
            .field("next_edge_id", &self.next_edge_id)
            .field("modules", &self.modules.len())
            .finish_non_exhaustive()
    }
}

impl RedbGraph {
    /// Open or create a graph database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TagError> {
        let db =
            Database::create(path.as_ref()).map_err(|e| TagError::Storage(e.to_string()))?;

        // Initialize tables if they don't exist
        {
            let write_txn = db
                .begin_write()
                .map_err(|e| TagError::Storage(e.to_string()))?;
            let _ = write_txn
                .open_table(NODES)
                .map_err(|e| TagError::Storage(e.to_string()))?;
            let _ = write_txn
                .open_table(EDGES)
                .map_err(|e| TagError::Storage(e.to_string()))?;
            let _ = write_txn
                .open_table(IDENTIFIERS)
                .map_err(|e| TagError::Storage(e.to_string()))?;
            let _ = write_txn
                .open_table(METADATA)
                .map_err(|e| TagError::Storage(e.to_string()))?;
            write_txn
                .commit()
                .map_err(|e| TagError::Storage(e.to_string()))?;
        }

        // Load id counters
        let read_txn = db
            .begin_read()
            .map_err(|e| TagError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(METADATA)
            .map_err(|e| TagError::Storage(e.to_string()))?;
        let next_node_id = table
            .get("next_node_id")
            .map_err(|e| TagError::Storage(e.to_string()))?
            .map(|v| v.value())
            .unwrap_or(0);
        let next_edge_id = table
            .get("next_edge_id")
            .map_err(|e| TagError::Storage(e.to_string()))?
            .map(|v| v.value())
            .unwrap_or(0);

        Ok(Self {
            db,
            next_node_id,
            next_edge_id,
            modules: Vec::new(),
        })
    }

    /// Attach a module. From now on every transaction opened with
    /// [`RedbGraph::begin`] passes through the module's pre-commit hook.
    pub fn register_module(&mut self, module: Arc<TagModule>) {
        self.modules.push(module);
    }

    /// Open a transaction. Committing it runs all registered modules.
    pub fn begin(&mut self) -> Result<RedbTransaction<'_>, TagError> {
        self.transaction(true)
    }

    fn transaction(&mut self, run_modules: bool) -> Result<RedbTransaction<'_>, TagError> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| TagError::Storage(e.to_string()))?;
        let next_node_id = self.next_node_id;
        let next_edge_id = self.next_edge_id;
        Ok(RedbTransaction {
            graph: self,
            txn,
            run_modules,
            next_node_id,
            next_edge_id,
            created: BTreeSet::new(),
            before: BTreeMap::new(),
            deleted: BTreeMap::new(),
            node_changes: KindChanges::default(),
            edge_changes: KindChanges::default(),
        })
    }

    /// Read a property of a committed entity.
    pub fn entity_property(
        &self,
        entity: EntityRef,
        key: &str,
    ) -> Result<Option<String>, TagError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| TagError::Storage(e.to_string()))?;
        let bag = match entity.kind {
            EntityKind::Node => {
                let table = read_txn
                    .open_table(NODES)
                    .map_err(|e| TagError::Storage(e.to_string()))?;
                match table
                    .get(entity.id)
                    .map_err(|e| TagError::Storage(e.to_string()))?
                {
                    Some(data) => Some(
                        postcard::from_bytes::<PropertyBag>(data.value())
                            .map_err(|e| TagError::Serialization(e.to_string()))?,
                    ),
                    None => None,
                }
            }
            EntityKind::Edge => {
                let table = read_txn
                    .open_table(EDGES)
                    .map_err(|e| TagError::Storage(e.to_string()))?;
                match table
                    .get(entity.id)
                    .map_err(|e| TagError::Storage(e.to_string()))?
                {
                    Some(data) => Some(
                        postcard::from_bytes::<EdgeRecord>(data.value())
                            .map_err(|e| TagError::Serialization(e.to_string()))?
                            .properties,
                    ),
                    None => None,
                }
            }
        };
        Ok(bag.and_then(|b| b.get(key).cloned()))
    }

    /// Look up a committed index entry.
    pub fn index_lookup(
        &self,
        namespace: &str,
        identifier: &str,
    ) -> Result<Option<EntityRef>, TagError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| TagError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(IDENTIFIERS)
            .map_err(|e| TagError::Storage(e.to_string()))?;
        match table
            .get((namespace, identifier))
            .map_err(|e| TagError::Storage(e.to_string()))?
        {
            Some(guard) => {
                let (code, id) = guard.value();
                Ok(Some(EntityRef {
                    kind: kind_from_code(code)?,
                    id,
                }))
            }
            None => Ok(None),
        }
    }

    /// Number of committed entries in an index namespace.
    pub fn index_size(&self, namespace: &str) -> Result<usize, TagError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| TagError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(IDENTIFIERS)
            .map_err(|e| TagError::Storage(e.to_string()))?;
        let mut count = 0;
        for entry in table
            .iter()
            .map_err(|e| TagError::Storage(e.to_string()))?
        {
            let (key, _) = entry.map_err(|e| TagError::Storage(e.to_string()))?;
            if key.value().0 == namespace {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Number of committed nodes.
    pub fn node_count(&self) -> Result<usize, TagError> {
        self.table_len(NODES)
    }

    /// Number of committed edges.
    pub fn edge_count(&self) -> Result<usize, TagError> {
        self.table_len(EDGES)
    }

    fn table_len(&self, table: TableDefinition<u64, &[u8]>) -> Result<usize, TagError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| TagError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(table)
            .map_err(|e| TagError::Storage(e.to_string()))?;
        let len = table
            .len()
            .map_err(|e| TagError::Storage(e.to_string()))?;
        Ok(usize::try_from(len).unwrap_or(usize::MAX))
    }
}

impl HostStore for RedbGraph {
    fn entity_ids(&self, kind: EntityKind) -> Result<Vec<u64>, TagError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| TagError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(match kind {
                EntityKind::Node => NODES,
                EntityKind::Edge => EDGES,
            })
            .map_err(|e| TagError::Storage(e.to_string()))?;

        let mut ids = Vec::new();
        for entry in table
            .iter()
            .map_err(|e| TagError::Storage(e.to_string()))?
        {
            let (key, _) = entry.map_err(|e| TagError::Storage(e.to_string()))?;
            ids.push(key.value());
        }
        Ok(ids)
    }

    fn internal_transaction(
        &mut self,
        work: &mut dyn FnMut(&mut dyn TagTransaction) -> Result<(), TagError>,
    ) -> Result<(), TagError> {
        let mut tx = self.transaction(false)?;
        work(&mut tx)?;
        tx.commit()
    }
}

// =============================================================================
// TRANSACTION
// =============================================================================

/// A single in-flight write transaction over a [`RedbGraph`].
///
/// Writes go straight into the open redb write transaction; reads within
/// the transaction observe them. Dropping the transaction aborts it and
/// every staged write — data and index entries alike — vanishes.
pub struct RedbTransaction<'g> {
    graph: &'g mut RedbGraph,
    txn: WriteTransaction,
    run_modules: bool,
    next_node_id: u64,
    next_edge_id: u64,
    created: BTreeSet<EntityRef>,
    /// First-touch property bags of pre-existing modified entities.
    before: BTreeMap<EntityRef, PropertyBag>,
    /// Transaction-start property bags of pre-existing deleted entities.
    deleted: BTreeMap<EntityRef, PropertyBag>,
    node_changes: KindChanges,
    edge_changes: KindChanges,
}

impl RedbTransaction<'_> {
    /// Create a node with an empty property bag.
    pub fn create_node(&mut self) -> Result<EntityRef, TagError> {
        let entity = EntityRef::node(self.next_node_id);
        self.next_node_id = self.next_node_id.saturating_add(1);
        self.store_node(entity.id, &PropertyBag::new())?;
        self.created.insert(entity);
        Ok(entity)
    }

    /// Create an edge between two live nodes.
    pub fn create_edge(&mut self, from: u64, to: u64) -> Result<EntityRef, TagError> {
        for node in [from, to] {
            if self.load_node(node)?.is_none() {
                return Err(TagError::EntityNotFound(EntityRef::node(node)));
            }
        }
        let entity = EntityRef::edge(self.next_edge_id);
        self.next_edge_id = self.next_edge_id.saturating_add(1);
        self.store_edge(
            entity.id,
            &EdgeRecord {
                from,
                to,
                properties: PropertyBag::new(),
            },
        )?;
        self.created.insert(entity);
        Ok(entity)
    }

    /// Remove a property from a live entity.
    pub fn remove_property(&mut self, entity: EntityRef, key: &str) -> Result<(), TagError> {
        let mut bag = self
            .load_bag(entity)?
            .ok_or(TagError::EntityNotFound(entity))?;
        self.capture_before(entity, &bag);
        bag.remove(key);
        self.store_bag(entity, &bag)
    }

    /// Delete a live entity. Deleting a node also deletes its incident
    /// edges. Deleting an entity created in this same transaction leaves
    /// no trace in the change-set.
    pub fn delete(&mut self, entity: EntityRef) -> Result<(), TagError> {
        let Some(bag) = self.load_bag(entity)? else {
            return Err(TagError::EntityNotFound(entity));
        };

        if entity.kind == EntityKind::Node {
            for edge_id in self.incident_edges(entity.id)? {
                self.delete(EntityRef::edge(edge_id))?;
            }
        }

        match entity.kind {
            EntityKind::Node => {
                let mut table = self
                    .txn
                    .open_table(NODES)
                    .map_err(|e| TagError::Storage(e.to_string()))?;
                table
                    .remove(entity.id)
                    .map_err(|e| TagError::Storage(e.to_string()))?;
            }
            EntityKind::Edge => {
                let mut table = self
                    .txn
                    .open_table(EDGES)
                    .map_err(|e| TagError::Storage(e.to_string()))?;
                table
                    .remove(entity.id)
                    .map_err(|e| TagError::Storage(e.to_string()))?;
            }
        }

        if self.created.remove(&entity) {
            return Ok(());
        }
        let original = self.before.remove(&entity).unwrap_or(bag);
        self.deleted.insert(entity, original);
        Ok(())
    }

    /// Commit: build the change-set, run registered modules (unless this
    /// is a store-internal transaction), then commit the redb write
    /// transaction. A module error drops the transaction, aborting every
    /// staged write.
    pub fn commit(mut self) -> Result<(), TagError> {
        self.build_change_lists()?;

        if self.run_modules {
            let modules = self.graph.modules.clone();
            for module in &modules {
                if let Err(e) = module.before_commit(&mut self) {
                    warn!(module = module.module_id(), error = %e, "commit vetoed; transaction rolled back");
                    return Err(e);
                }
            }
        }

        {
            let mut table = self
                .txn
                .open_table(METADATA)
                .map_err(|e| TagError::Storage(e.to_string()))?;
            table
                .insert("next_node_id", self.next_node_id)
                .map_err(|e| TagError::Storage(e.to_string()))?;
            table
                .insert("next_edge_id", self.next_edge_id)
                .map_err(|e| TagError::Storage(e.to_string()))?;
        }

        let Self {
            graph,
            txn,
            next_node_id,
            next_edge_id,
            ..
        } = self;
        txn.commit()
            .map_err(|e| TagError::Storage(e.to_string()))?;

        // Update in-memory counters only after successful commit.
        graph.next_node_id = next_node_id;
        graph.next_edge_id = next_edge_id;
        Ok(())
    }

    /// Discard the transaction. Equivalent to dropping it.
    pub fn rollback(self) {
        drop(self);
    }

    fn capture_before(&mut self, entity: EntityRef, bag: &PropertyBag) {
        if !self.created.contains(&entity) && !self.before.contains_key(&entity) {
            self.before.insert(entity, bag.clone());
        }
    }

    fn load_node(&self, id: u64) -> Result<Option<PropertyBag>, TagError> {
        let table = self
            .txn
            .open_table(NODES)
            .map_err(|e| TagError::Storage(e.to_string()))?;
        match table
            .get(id)
            .map_err(|e| TagError::Storage(e.to_string()))?
        {
            Some(data) => Ok(Some(
                postcard::from_bytes(data.value())
                    .map_err(|e| TagError::Serialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    fn load_edge(&self, id: u64) -> Result<Option<EdgeRecord>, TagError> {
        let table = self
            .txn
            .open_table(EDGES)
            .map_err(|e| TagError::Storage(e.to_string()))?;
        match table
            .get(id)
            .map_err(|e| TagError::Storage(e.to_string()))?
        {
            Some(data) => Ok(Some(
                postcard::from_bytes(data.value())
                    .map_err(|e| TagError::Serialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    fn load_bag(&self, entity: EntityRef) -> Result<Option<PropertyBag>, TagError> {
        match entity.kind {
            EntityKind::Node => self.load_node(entity.id),
            EntityKind::Edge => Ok(self.load_edge(entity.id)?.map(|r| r.properties)),
        }
    }

    fn store_node(&mut self, id: u64, bag: &PropertyBag) -> Result<(), TagError> {
        let bytes =
            postcard::to_allocvec(bag).map_err(|e| TagError::Serialization(e.to_string()))?;
        let mut table = self
            .txn
            .open_table(NODES)
            .map_err(|e| TagError::Storage(e.to_string()))?;
        table
            .insert(id, bytes.as_slice())
            .map_err(|e| TagError::Storage(e.to_string()))?;
        Ok(())
    }

    fn store_edge(&mut self, id: u64, record: &EdgeRecord) -> Result<(), TagError> {
        let bytes =
            postcard::to_allocvec(record).map_err(|e| TagError::Serialization(e.to_string()))?;
        let mut table = self
            .txn
            .open_table(EDGES)
            .map_err(|e| TagError::Storage(e.to_string()))?;
        table
            .insert(id, bytes.as_slice())
            .map_err(|e| TagError::Storage(e.to_string()))?;
        Ok(())
    }

    fn store_bag(&mut self, entity: EntityRef, bag: &PropertyBag) -> Result<(), TagError> {
        match entity.kind {
            EntityKind::Node => self.store_node(entity.id, bag),
            EntityKind::Edge => {
                let mut record = self
                    .load_edge(entity.id)?
                    .ok_or(TagError::EntityNotFound(entity))?;
                record.properties = bag.clone();
                self.store_edge(entity.id, &record)
            }
        }
    }

    fn incident_edges(&self, node_id: u64) -> Result<Vec<u64>, TagError> {
        let table = self
            .txn
            .open_table(EDGES)
            .map_err(|e| TagError::Storage(e.to_string()))?;
        let mut ids = Vec::new();
        for entry in table
            .iter()
            .map_err(|e| TagError::Storage(e.to_string()))?
        {
            let (key, value) = entry.map_err(|e| TagError::Storage(e.to_string()))?;
            let record: EdgeRecord = postcard::from_bytes(value.value())
                .map_err(|e| TagError::Serialization(e.to_string()))?;
            if record.from == node_id || record.to == node_id {
                ids.push(key.value());
            }
        }
        Ok(ids)
    }

    fn build_change_lists(&mut self) -> Result<(), TagError> {
        let created: Vec<EntityRef> = self.created.iter().copied().collect();
        for entity in created {
            if let Some(bag) = self.load_bag(entity)? {
                self.kind_changes_mut(entity.kind)
                    .created
                    .push(EntitySnapshot::new(entity, bag));
            }
        }

        let deleted: Vec<(EntityRef, PropertyBag)> = self
            .deleted
            .iter()
            .map(|(entity, bag)| (*entity, bag.clone()))
            .collect();
        for (entity, bag) in deleted {
            self.kind_changes_mut(entity.kind)
                .deleted
                .push(EntitySnapshot::new(entity, bag));
        }

        let touched: Vec<(EntityRef, PropertyBag)> = self
            .before
            .iter()
            .map(|(entity, bag)| (*entity, bag.clone()))
            .collect();
        for (entity, prior) in touched {
            if let Some(current) = self.load_bag(entity)? {
                if current != prior {
                    self.kind_changes_mut(entity.kind).changed.push(Change::new(
                        EntitySnapshot::new(entity, prior),
                        EntitySnapshot::new(entity, current),
                    ));
                }
            }
        }

        Ok(())
    }

    fn kind_changes(&self, kind: EntityKind) -> &KindChanges {
        match kind {
            EntityKind::Node => &self.node_changes,
            EntityKind::Edge => &self.edge_changes,
        }
    }

    fn kind_changes_mut(&mut self, kind: EntityKind) -> &mut KindChanges {
        match kind {
            EntityKind::Node => &mut self.node_changes,
            EntityKind::Edge => &mut self.edge_changes,
        }
    }
}

impl TagTransaction for RedbTransaction<'_> {
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
        match self.load_bag(entity)? {
            Some(bag) => Ok(bag.get(key).cloned()),
            None => Err(TagError::EntityNotFound(entity)),
        }
    }

    fn snapshot(&self, entity: EntityRef) -> Result<Option<EntitySnapshot>, TagError> {
        Ok(self
            .load_bag(entity)?
            .map(|bag| EntitySnapshot::new(entity, bag)))
    }

    fn set_property(&mut self, entity: EntityRef, key: &str, value: &str) -> Result<(), TagError> {
        let mut bag = self
            .load_bag(entity)?
            .ok_or(TagError::EntityNotFound(entity))?;
        self.capture_before(entity, &bag);
        bag.insert(key.to_string(), value.to_string());
        self.store_bag(entity, &bag)
    }

    fn index_put(
        &mut self,
        namespace: &str,
        identifier: &Identifier,
        entity: EntityRef,
    ) -> Result<(), TagError> {
        let mut table = self
            .txn
            .open_table(IDENTIFIERS)
            .map_err(|e| TagError::Storage(e.to_string()))?;
        table
            .insert(
                (namespace, identifier.as_str()),
                (kind_code(entity.kind), entity.id),
            )
            .map_err(|e| TagError::Storage(e.to_string()))?;
        Ok(())
    }

    fn index_remove(&mut self, namespace: &str, identifier: &Identifier) -> Result<(), TagError> {
        let mut table = self
            .txn
            .open_table(IDENTIFIERS)
            .map_err(|e| TagError::Storage(e.to_string()))?;
        table
            .remove((namespace, identifier.as_str()))
            .map_err(|e| TagError::Storage(e.to_string()))?;
        Ok(())
    }

    fn index_get(
        &self,
        namespace: &str,
        identifier: &Identifier,
    ) -> Result<Option<EntityRef>, TagError> {
        let table = self
            .txn
            .open_table(IDENTIFIERS)
            .map_err(|e| TagError::Storage(e.to_string()))?;
        match table
            .get((namespace, identifier.as_str()))
            .map_err(|e| TagError::Storage(e.to_string()))?
        {
            Some(guard) => {
                let (code, id) = guard.value();
                Ok(Some(EntityRef {
                    kind: kind_from_code(code)?,
                    id,
                }))
            }
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for RedbTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbTransaction")
            .field("created", &self.created.len())
            .field("deleted", &self.deleted.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================
