//! # Host Store Interface
//!
//! The traits the identity engine is programmed against, plus two
//! reference stores implementing them:
//!
//! - [`MemoryGraph`]: in-memory, `BTreeMap`-backed, deterministic ordering
//! - [`RedbGraph`]: disk-backed via redb, ACID, crash safe
//!
//! An embedder with its own graph store implements [`TagTransaction`] for
//! its pending-transaction view and [`HostStore`] for the store handle;
//! the engine, commit hook, and batch initializer then work unchanged.

pub mod memory;
pub mod redb_store;

pub use memory::{MemoryGraph, MemoryTransaction};
pub use redb_store::{RedbGraph, RedbTransaction};

use crate::types::{Change, EntityKind, EntityRef, EntitySnapshot, Identifier, PropertyBag, TagError};
use serde::{Deserialize, Serialize};

/// An edge's stored form: endpoints plus its property bag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    /// Source node id.
    pub from: u64,
    /// Target node id.
    pub to: u64,
    /// The edge's properties.
    pub properties: PropertyBag,
}

/// Change lists for one entity kind, built by a backend at the
/// pre-commit point and served through [`TagTransaction`].
#[derive(Debug, Clone, Default)]
pub(crate) struct KindChanges {
    pub(crate) created: Vec<EntitySnapshot>,
    pub(crate) deleted: Vec<EntitySnapshot>,
    pub(crate) changed: Vec<Change<EntitySnapshot>>,
}

// =============================================================================
// TRANSACTION VIEW
// =============================================================================

/// Mutable view of one in-flight host transaction.
///
/// This is what the commit hook and the assignment engine see: the
/// transaction's change-set, property access on pending entities, and the
/// identifier index scoped by namespace. Every mutation made through this
/// trait is staged inside the host transaction — committed with it,
/// discarded with it.
///
/// ## Visibility
///
/// Reads (`property`, `snapshot`, `index_get`) observe committed state
/// overlaid with this transaction's own staged writes. Staged state is
/// never visible to other transactions before commit.
pub trait TagTransaction {
    /// Entities created in this transaction, in creation order.
    /// Populated once the transaction enters its pre-commit phase.
    fn created(&self, kind: EntityKind) -> &[EntitySnapshot];

    /// Pre-existing entities deleted in this transaction, with their
    /// final property bags. Populated at the pre-commit phase.
    fn deleted(&self, kind: EntityKind) -> &[EntitySnapshot];

    /// Pre-existing entities whose properties changed in this
    /// transaction, as before/after pairs. Populated at the pre-commit
    /// phase. Created and deleted entities never appear here.
    fn changed(&self, kind: EntityKind) -> &[Change<EntitySnapshot>];

    /// Read one property of a live entity through the transaction.
    fn property(&self, entity: EntityRef, key: &str) -> Result<Option<String>, TagError>;

    /// Snapshot a live entity through the transaction. `None` if the
    /// entity does not exist or was deleted in this transaction.
    fn snapshot(&self, entity: EntityRef) -> Result<Option<EntitySnapshot>, TagError>;

    /// Write one property of a live entity, staged in the transaction.
    fn set_property(&mut self, entity: EntityRef, key: &str, value: &str) -> Result<(), TagError>;

    /// Stage an index entry: identifier -> entity, in the given namespace.
    fn index_put(
        &mut self,
        namespace: &str,
        identifier: &Identifier,
        entity: EntityRef,
    ) -> Result<(), TagError>;

    /// Stage removal of an index entry. No-op if the entry is absent.
    fn index_remove(&mut self, namespace: &str, identifier: &Identifier) -> Result<(), TagError>;

    /// Look up an index entry, observing entries staged in this
    /// transaction as well as committed ones.
    fn index_get(
        &self,
        namespace: &str,
        identifier: &Identifier,
    ) -> Result<Option<EntityRef>, TagError>;
}

// =============================================================================
// STORE HANDLE
// =============================================================================

/// Store-level operations the batch initializer needs.
pub trait HostStore {
    /// All entity ids of a kind in stable enumeration order (creation
    /// order in the reference stores). Snapshot at call time; entities
    /// created afterwards are covered by the commit hook instead.
    fn entity_ids(&self, kind: EntityKind) -> Result<Vec<u64>, TagError>;

    /// Run one unit of work inside its own transaction and commit it.
    /// Attached modules are NOT invoked for this transaction; it is the
    /// store-internal path used during module initialization. An `Err`
    /// from the work discards the whole transaction and is returned.
    fn internal_transaction(
        &mut self,
        work: &mut dyn FnMut(&mut dyn TagTransaction) -> Result<(), TagError>,
    ) -> Result<(), TagError>;
}
