//! # Batch Initializer
//!
//! One-time backfill: guarantees that the invariant "every policy-included
//! entity carries an identifier" also holds for entities created before
//! the module was attached.
//!
//! The walk is resumable by construction: assignment is idempotent, so a
//! partially failed run can simply be repeated until the report comes back
//! clean.

use crate::engine::AssignmentEngine;
use crate::store::HostStore;
use crate::types::{EntityKind, EntityRef, TagError};
use tracing::{info, warn};

/// Entities per backfill transaction.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Outcome of one initialization run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Batch transactions that committed.
    pub batches_committed: usize,
    /// Batch transactions rolled back on an integrity violation.
    pub batches_rolled_back: usize,
    /// Entities that received a new identifier across committed batches.
    pub entities_tagged: usize,
}

impl BackfillReport {
    /// Whether every batch committed. A `false` report means the run
    /// should be repeated once the offending data is repaired.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.batches_rolled_back == 0
    }
}

/// Walks all existing entities of a store in fixed-size batches, each
/// batch one independent transaction, and assigns identifiers.
pub struct BatchInitializer<'e> {
    engine: &'e AssignmentEngine,
    batch_size: usize,
}

impl<'e> BatchInitializer<'e> {
    /// Initializer with the default batch size.
    #[must_use]
    pub const fn new(engine: &'e AssignmentEngine) -> Self {
        Self {
            engine,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Override the batch size. Values below 1 are clamped to 1.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = if batch_size == 0 { 1 } else { batch_size };
        self
    }

    /// Run the backfill: node batches to completion, then edge batches.
    ///
    /// An integrity violation rolls back only its batch; the walk
    /// continues and the report counts the rollback. A systemic failure
    /// (storage, serialization) aborts the whole run with the error.
    pub fn run(&self, store: &mut dyn HostStore) -> Result<BackfillReport, TagError> {
        let mut report = BackfillReport::default();

        for kind in [EntityKind::Node, EntityKind::Edge] {
            self.run_kind(store, kind, &mut report)?;
        }

        info!(
            batches_committed = report.batches_committed,
            batches_rolled_back = report.batches_rolled_back,
            entities_tagged = report.entities_tagged,
            "backfill finished"
        );

        Ok(report)
    }

    fn run_kind(
        &self,
        store: &mut dyn HostStore,
        kind: EntityKind,
        report: &mut BackfillReport,
    ) -> Result<(), TagError> {
        let watermark = self.engine.configuration().initialize_until();
        let mut ids = store.entity_ids(kind)?;
        ids.retain(|id| *id <= watermark);

        for batch in ids.chunks(self.batch_size) {
            let mut tagged_in_batch = 0usize;

            let result = store.internal_transaction(&mut |tx| {
                tagged_in_batch = 0;
                for &id in batch {
                    let entity = EntityRef { kind, id };
                    // The entity may have vanished between enumeration
                    // and this batch's transaction.
                    let Some(snapshot) = tx.snapshot(entity)? else {
                        continue;
                    };
                    if !self
                        .engine
                        .configuration()
                        .inclusion_policy()
                        .include(&snapshot)
                    {
                        continue;
                    }
                    let fresh = !snapshot
                        .has_property(self.engine.configuration().identifier_property());
                    self.engine.assign(tx, entity)?;
                    if fresh {
                        tagged_in_batch += 1;
                    }
                }
                Ok(())
            });

            match result {
                Ok(()) => {
                    report.batches_committed += 1;
                    report.entities_tagged += tagged_in_batch;
                }
                Err(e) if e.is_integrity_violation() => {
                    warn!(%kind, error = %e, "backfill batch rolled back");
                    report.batches_rolled_back += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_is_clamped_to_at_least_one() {
        let engine = AssignmentEngine::new(
            crate::config::TagConfiguration::new(),
            std::sync::Arc::new(crate::generator::SequenceGenerator::new("u")),
        );
        let initializer = BatchInitializer::new(&engine).with_batch_size(0);
        assert_eq!(initializer.batch_size, 1);
    }

    #[test]
    fn empty_report_is_complete() {
        assert!(BackfillReport::default().is_complete());
        let failed = BackfillReport {
            batches_rolled_back: 1,
            ..BackfillReport::default()
        };
        assert!(!failed.is_complete());
    }
}
