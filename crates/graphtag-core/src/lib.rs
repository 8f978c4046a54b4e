//! # graphtag-core
//!
//! Transactional unique-identifier assignment for graph stores.
//!
//! Every qualifying entity (node or edge) gets one permanent, globally
//! unique string identifier under a configurable property (default
//! `uuid`). An identifier → entity index is kept in lockstep with the
//! store's commits, and any transaction that removes or rewrites an
//! assigned identifier is vetoed before it takes effect.
//!
//! ## Architecture
//!
//! - [`AssignmentEngine`] — assigns, retracts, and validates identifiers;
//!   the single source of truth for the uniqueness invariant
//! - [`TagModule`] — the packaged engine a store attaches; exposes the
//!   pre-commit hook and one-time initialization
//! - [`BatchInitializer`] — backfills pre-existing entities in bounded
//!   batches, each batch its own transaction
//! - [`MemoryGraph`] / [`RedbGraph`] — reference host stores (in-memory
//!   and redb-persistent) implementing the host-facing traits
//!
//! Inclusion policy and identifier generation are injected capabilities
//! ([`InclusionPolicy`], [`IdentifierGenerator`]); the engine decides
//! neither eligibility nor identifier shape itself.
//!
//! ## Architectural Constraints
//!
//! - Synchronous: the engine runs inside the host's commit path and
//!   spawns no threads of its own
//! - Transactional: index mutations ride the host transaction; a vetoed
//!   or aborted transaction leaves no partial assignment behind
//! - No repair: tampering with an identifier aborts the transaction;
//!   the engine never "fixes" data

// =============================================================================
// MODULES
// =============================================================================

pub mod backfill;
pub mod config;
pub mod engine;
pub mod generator;
pub mod module;
pub mod policy;
pub mod store;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{
    Change, EntityKind, EntityRef, EntitySnapshot, Identifier, PropertyBag, TagError,
};

// =============================================================================
// RE-EXPORTS: Engine & Module
// =============================================================================

pub use backfill::{BackfillReport, BatchInitializer, DEFAULT_BATCH_SIZE};
pub use config::{
    DEFAULT_EDGE_INDEX, DEFAULT_IDENTIFIER_PROPERTY, DEFAULT_NODE_INDEX, INITIALIZE_ALWAYS,
    TagConfiguration,
};
pub use engine::AssignmentEngine;
pub use generator::{IdentifierGenerator, SequenceGenerator, UuidGenerator};
pub use module::{DEFAULT_MODULE_ID, TagModule};
pub use policy::{IncludeAll, InclusionPolicy, NodesOnly};

// =============================================================================
// RE-EXPORTS: Host Stores
// =============================================================================

pub use store::{
    EdgeRecord, HostStore, MemoryGraph, MemoryTransaction, RedbGraph, RedbTransaction,
    TagTransaction,
};
