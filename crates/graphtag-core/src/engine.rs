//! # Assignment Engine
//!
//! The single source of truth for the uniqueness invariant.
//!
//! Every identifier that enters the store goes through [`AssignmentEngine::assign`];
//! every identifier that leaves it goes through [`AssignmentEngine::retract`].
//! All effects are staged on the caller's transaction view and share its fate.

use crate::config::TagConfiguration;
use crate::generator::IdentifierGenerator;
use crate::store::TagTransaction;
use crate::types::{Change, EntityRef, EntitySnapshot, Identifier, TagError};
use std::sync::Arc;
use tracing::debug;

/// Assigns and validates identifiers, keeping the index consistent.
pub struct AssignmentEngine {
    config: TagConfiguration,
    generator: Arc<dyn IdentifierGenerator>,
}

impl AssignmentEngine {
    /// Create an engine over a configuration and a generator.
    #[must_use]
    pub fn new(config: TagConfiguration, generator: Arc<dyn IdentifierGenerator>) -> Self {
        Self { config, generator }
    }

    /// Ensure the entity carries an identifier and an index entry.
    ///
    /// - No identifier yet: generate one, write the property, index it.
    /// - Identifier already present (backfill of imported data, or a
    ///   second pass in the same transaction): consult the index. If the
    ///   identifier is unclaimed or claimed by this same entity, the entry
    ///   is (re)inserted — idempotent, not a conflict. If a different
    ///   entity owns it, nothing is written and the transaction must abort.
    ///
    /// The caller is responsible for having applied the inclusion policy.
    pub fn assign(&self, tx: &mut dyn TagTransaction, entity: EntityRef) -> Result<(), TagError> {
        let property = self.config.identifier_property();
        let namespace = self.config.index_name(entity.kind);

        match tx.property(entity, property)? {
            None => {
                let identifier = self.generator.next_identifier();
                tx.set_property(entity, property, identifier.as_str())?;
                tx.index_put(namespace, &identifier, entity)?;
                debug!(%entity, %identifier, "assigned identifier");
            }
            Some(value) => {
                let identifier = Identifier::new(value);
                match tx.index_get(namespace, &identifier)? {
                    Some(owner) if owner != entity => {
                        return Err(TagError::DuplicateIdentifier {
                            identifier,
                            owner,
                            claimant: entity,
                        });
                    }
                    _ => tx.index_put(namespace, &identifier, entity)?,
                }
            }
        }

        Ok(())
    }

    /// Remove the index entry for a deleted entity's identifier.
    /// Idempotent: an entity that never carried the property, or whose
    /// entry is already gone, retracts to a no-op.
    pub fn retract(
        &self,
        tx: &mut dyn TagTransaction,
        entity: &EntitySnapshot,
    ) -> Result<(), TagError> {
        if let Some(value) = entity.property(self.config.identifier_property()) {
            let namespace = self.config.index_name(entity.reference.kind);
            tx.index_remove(namespace, &Identifier::new(value))?;
            debug!(entity = %entity.reference, identifier = value, "retracted identifier");
        }
        Ok(())
    }

    /// Validate that a changed entity still carries its identifier,
    /// unmodified. Pure check; stages nothing.
    pub fn validate_unchanged(
        &self,
        change: &Change<EntitySnapshot>,
    ) -> Result<(), TagError> {
        let property = self.config.identifier_property();

        let Some(current) = change.current.property(property) else {
            return Err(TagError::IdentifierRemoved {
                entity: change.current.reference,
                property: property.to_string(),
            });
        };

        if change.previous.property(property) != Some(current) {
            return Err(TagError::IdentifierMutated {
                entity: change.current.reference,
                property: property.to_string(),
            });
        }

        Ok(())
    }

    /// The configuration this engine runs under.
    #[must_use]
    pub fn configuration(&self) -> &TagConfiguration {
        &self.config
    }
}

impl std::fmt::Debug for AssignmentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssignmentEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================
