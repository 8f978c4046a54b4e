//! # Module Configuration
//!
//! Immutable configuration for the identity module.
//!
//! Configuration is a plain value: `with_*` builders return a new
//! configuration copying every other field, never mutating in place.
//! Construct one at module attach time and treat it as frozen.

use crate::policy::{InclusionPolicy, NodesOnly};
use crate::types::EntityKind;
use std::sync::Arc;

/// Default name of the managed property on every entity.
pub const DEFAULT_IDENTIFIER_PROPERTY: &str = "uuid";

/// Default index namespace for node identifiers.
pub const DEFAULT_NODE_INDEX: &str = "uuid_node_auto_index";

/// Default index namespace for edge identifiers.
pub const DEFAULT_EDGE_INDEX: &str = "uuid_relationship_auto_index";

/// Watermark meaning "backfill covers every pre-existing entity".
pub const INITIALIZE_ALWAYS: u64 = u64::MAX;

/// Immutable configuration for a [`crate::module::TagModule`].
///
/// Equality is structural over the scalar fields; the inclusion policy is
/// a capability object and does not participate in comparisons.
#[derive(Clone)]
pub struct TagConfiguration {
    identifier_property: String,
    node_index_name: String,
    edge_index_name: String,
    initialize_until: u64,
    inclusion_policy: Arc<dyn InclusionPolicy>,
}

impl TagConfiguration {
    /// Default configuration: property `uuid`, the two default index
    /// namespaces, full backfill coverage, and the [`NodesOnly`] policy
    /// (all nodes included, all edges excluded).
    #[must_use]
    pub fn new() -> Self {
        Self {
            identifier_property: DEFAULT_IDENTIFIER_PROPERTY.to_string(),
            node_index_name: DEFAULT_NODE_INDEX.to_string(),
            edge_index_name: DEFAULT_EDGE_INDEX.to_string(),
            initialize_until: INITIALIZE_ALWAYS,
            inclusion_policy: Arc::new(NodesOnly),
        }
    }

    /// Name of the managed property on entities.
    #[must_use]
    pub fn identifier_property(&self) -> &str {
        &self.identifier_property
    }

    /// Index namespace for node identifiers.
    #[must_use]
    pub fn node_index_name(&self) -> &str {
        &self.node_index_name
    }

    /// Index namespace for edge identifiers.
    #[must_use]
    pub fn edge_index_name(&self) -> &str {
        &self.edge_index_name
    }

    /// Index namespace for the given entity kind.
    #[must_use]
    pub fn index_name(&self, kind: EntityKind) -> &str {
        match kind {
            EntityKind::Node => &self.node_index_name,
            EntityKind::Edge => &self.edge_index_name,
        }
    }

    /// Entity-id watermark up to which the backfill runs.
    #[must_use]
    pub const fn initialize_until(&self) -> u64 {
        self.initialize_until
    }

    /// The inclusion policy deciding which entities participate.
    #[must_use]
    pub fn inclusion_policy(&self) -> &dyn InclusionPolicy {
        self.inclusion_policy.as_ref()
    }

    /// New configuration with a different managed property name.
    #[must_use]
    pub fn with_identifier_property(mut self, property: impl Into<String>) -> Self {
        self.identifier_property = property.into();
        self
    }

    /// New configuration with a different node index namespace.
    #[must_use]
    pub fn with_node_index_name(mut self, name: impl Into<String>) -> Self {
        self.node_index_name = name.into();
        self
    }

    /// New configuration with a different edge index namespace.
    #[must_use]
    pub fn with_edge_index_name(mut self, name: impl Into<String>) -> Self {
        self.edge_index_name = name.into();
        self
    }

    /// New configuration with a different backfill watermark. Entities
    /// with ids above the watermark are skipped during initialization
    /// (they still get identifiers when a later transaction touches them).
    #[must_use]
    pub fn with_initialize_until(mut self, watermark: u64) -> Self {
        self.initialize_until = watermark;
        self
    }

    /// New configuration with a different inclusion policy.
    #[must_use]
    pub fn with_inclusion_policy(mut self, policy: Arc<dyn InclusionPolicy>) -> Self {
        self.inclusion_policy = policy;
        self
    }
}

impl Default for TagConfiguration {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for TagConfiguration {
    fn eq(&self, other: &Self) -> bool {
        self.identifier_property == other.identifier_property
            && self.node_index_name == other.node_index_name
            && self.edge_index_name == other.edge_index_name
            && self.initialize_until == other.initialize_until
    }
}

impl Eq for TagConfiguration {}

impl std::fmt::Debug for TagConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagConfiguration")
            .field("identifier_property", &self.identifier_property)
            .field("node_index_name", &self.node_index_name)
            .field("edge_index_name", &self.edge_index_name)
            .field("initialize_until", &self.initialize_until)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================
