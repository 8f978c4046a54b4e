//! # Identity Module
//!
//! The packaged engine a host store attaches: module id, configuration,
//! generator, and the pre-commit entry point.
//!
//! ## Lifecycle
//!
//! 1. Construct the module with its configuration.
//! 2. Run [`TagModule::initialize`] once to backfill pre-existing data.
//! 3. Register the module with the store; from then on every committing
//!    transaction passes through [`TagModule::before_commit`], which may
//!    veto it by returning an error.
//!
//! Initialization happens before registration, so backfill transactions
//! are never intercepted by the hook they are preparing the ground for.

use crate::backfill::{BackfillReport, BatchInitializer};
use crate::config::TagConfiguration;
use crate::engine::AssignmentEngine;
use crate::generator::{IdentifierGenerator, UuidGenerator};
use crate::store::{HostStore, TagTransaction};
use crate::types::{EntityKind, TagError};
use std::sync::Arc;

/// Default module id.
pub const DEFAULT_MODULE_ID: &str = "UIDM";

/// The identity module: owns the engine and reacts to store lifecycle
/// events. One module instance serves one store.
pub struct TagModule {
    module_id: String,
    engine: AssignmentEngine,
}

impl TagModule {
    /// Construct a module with the default id and the default
    /// [`UuidGenerator`].
    #[must_use]
    pub fn new(config: TagConfiguration) -> Self {
        Self::with_generator(DEFAULT_MODULE_ID, config, Arc::new(UuidGenerator))
    }

    /// Construct a module with an explicit id and generator.
    #[must_use]
    pub fn with_generator(
        module_id: impl Into<String>,
        config: TagConfiguration,
        generator: Arc<dyn IdentifierGenerator>,
    ) -> Self {
        Self {
            module_id: module_id.into(),
            engine: AssignmentEngine::new(config, generator),
        }
    }

    /// This module's id.
    #[must_use]
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// The module's configuration.
    #[must_use]
    pub fn configuration(&self) -> &TagConfiguration {
        self.engine.configuration()
    }

    /// Backfill identifiers for entities that existed before this module
    /// was attached. Runs node batches to completion, then edge batches,
    /// each batch in its own transaction. See [`BatchInitializer`].
    pub fn initialize(&self, store: &mut dyn HostStore) -> Result<BackfillReport, TagError> {
        BatchInitializer::new(&self.engine).run(store)
    }

    /// Process one committing transaction. Called by the store once per
    /// transaction, synchronously, in its pre-commit phase.
    ///
    /// Per entity kind (nodes first, then edges):
    /// 1. assign identifiers to created entities the policy includes;
    /// 2. retract index entries for deleted entities (policy-independent);
    /// 3. validate that changed entities the policy includes still carry
    ///    their identifier unmodified.
    ///
    /// The first error aborts: remaining steps are skipped and the caller
    /// must discard the whole transaction, including anything this pass
    /// already staged for other entities.
    pub fn before_commit(&self, tx: &mut dyn TagTransaction) -> Result<(), TagError> {
        let policy = self.configuration().inclusion_policy();

        for kind in [EntityKind::Node, EntityKind::Edge] {
            let created = tx.created(kind).to_vec();
            for entity in &created {
                if policy.include(entity) {
                    self.engine.assign(tx, entity.reference)?;
                }
            }

            let deleted = tx.deleted(kind).to_vec();
            for entity in &deleted {
                self.engine.retract(tx, entity)?;
            }

            let changed = tx.changed(kind).to_vec();
            for change in &changed {
                if policy.include(&change.current) {
                    self.engine.validate_unchanged(change)?;
                }
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for TagModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagModule")
            .field("module_id", &self.module_id)
            .field("config", self.configuration())
            .finish_non_exhaustive()
    }
}
