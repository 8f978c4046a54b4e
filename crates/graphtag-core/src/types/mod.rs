//! # Core Type Definitions
//!
//! This module contains all core types for the graphtag identity layer:
//! - Entity addressing (`EntityKind`, `EntityRef`)
//! - The managed identifier (`Identifier`)
//! - Transaction-visible entity state (`EntitySnapshot`, `Change`)
//! - Error types (`TagError`)
//!
//! ## Ordering Guarantees
//!
//! All identifier-carrying types implement `Ord` so they can key
//! `BTreeMap`/`BTreeSet` deterministically. Property bags are `BTreeMap`s,
//! never `HashMap`s, so iteration order is stable.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// A property bag: string keys to string values, deterministically ordered.
pub type PropertyBag = BTreeMap<String, String>;

// =============================================================================
// ENTITY ADDRESSING
// =============================================================================

/// The two kinds of graph entity. Each kind has its own index namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// A vertex in the graph.
    Node,
    /// A directed connection between two nodes.
    Edge,
}

impl EntityKind {
    /// Lowercase name, used in log fields and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Edge => "edge",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to an entity in the host store: its kind plus the
/// host-assigned id, which is unique within the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// Which namespace the entity lives in.
    pub kind: EntityKind,
    /// The host-assigned id within that namespace.
    pub id: u64,
}

impl EntityRef {
    /// Reference a node by id.
    #[must_use]
    pub const fn node(id: u64) -> Self {
        Self {
            kind: EntityKind::Node,
            id,
        }
    }

    /// Reference an edge by id.
    #[must_use]
    pub const fn edge(id: u64) -> Self {
        Self {
            kind: EntityKind::Edge,
            id,
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

// =============================================================================
// IDENTIFIER
// =============================================================================

/// The managed identifier value: an opaque string, generated once per
/// entity and immutable from then on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identifier(pub String);

impl Identifier {
    /// Create an identifier from a string.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// TRANSACTION-VISIBLE ENTITY STATE
// =============================================================================

/// A point-in-time view of one entity: its reference plus its property bag.
///
/// Change-sets hand these to the commit hook; the inclusion policy decides
/// on them. Snapshots are owned copies and never alias live store state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// The entity this snapshot describes.
    pub reference: EntityRef,
    /// The entity's properties at snapshot time.
    pub properties: PropertyBag,
}

impl EntitySnapshot {
    /// Create a snapshot from a reference and a property bag.
    #[must_use]
    pub const fn new(reference: EntityRef, properties: PropertyBag) -> Self {
        Self {
            reference,
            properties,
        }
    }

    /// Look up a property value.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Check whether a property is present.
    #[must_use]
    pub fn has_property(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }
}

/// Before/after pair for an entity changed within one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change<T> {
    /// State at transaction start.
    pub previous: T,
    /// State at the pre-commit point.
    pub current: T,
}

impl<T> Change<T> {
    /// Pair up a before and an after state.
    #[must_use]
    pub const fn new(previous: T, current: T) -> Self {
        Self { previous, current }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors raised by the identity layer.
///
/// The first three variants are integrity violations: deliberate rollback
/// signals that the host must translate into a transaction abort. The
/// remaining variants are systemic failures surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    /// A different entity already owns the identifier being claimed.
    #[error(
        "another entity with identifier {identifier} already exists ({owner}); refusing it for {claimant}"
    )]
    DuplicateIdentifier {
        /// The contested identifier value.
        identifier: Identifier,
        /// The entity the index already maps the identifier to.
        owner: EntityRef,
        /// The entity that tried to claim it.
        claimant: EntityRef,
    },

    /// A changed entity lost its identifier property.
    #[error("removing the {property} property from {entity} is not allowed")]
    IdentifierRemoved {
        /// The offending entity.
        entity: EntityRef,
        /// The managed property name.
        property: String,
    },

    /// A changed entity's identifier value differs from before.
    #[error("modifying the {property} property of {entity} is not allowed")]
    IdentifierMutated {
        /// The offending entity.
        entity: EntityRef,
        /// The managed property name.
        property: String,
    },

    /// An operation referenced an entity the store does not hold.
    #[error("entity not found: {0}")]
    EntityNotFound(EntityRef),

    /// A storage collaborator failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl TagError {
    /// Whether this error is an integrity violation, i.e. a deliberate
    /// rollback of the offending transaction rather than a systemic
    /// failure. The batch initializer scopes these to a single batch.
    #[must_use]
    pub const fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateIdentifier { .. }
                | Self::IdentifierRemoved { .. }
                | Self::IdentifierMutated { .. }
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================
