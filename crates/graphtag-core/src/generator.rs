//! # Identifier Generator
//!
//! Produces new identifier values on demand.
//!
//! The generator is an injected capability with a single-method contract:
//! each call returns a value this process has not returned before
//! (collision probability negligible, not formally zero). The engine
//! treats it as stateless and never retries a generated value.

use crate::types::Identifier;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Source of new identifier values.
pub trait IdentifierGenerator: Send + Sync {
    /// Produce the next identifier.
    fn next_identifier(&self) -> Identifier;
}

/// Default generator: random version-4 UUIDs in compact hex form
/// (no hyphens), e.g. `67e5504410b1426f9247bb680e5fe0c8`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdentifierGenerator for UuidGenerator {
    fn next_identifier(&self) -> Identifier {
        Identifier::new(Uuid::new_v4().simple().to_string())
    }
}

/// Deterministic generator: a fixed prefix plus a monotonically
/// increasing counter. Useful in tests and reproducible imports, where
/// random identifiers would make assertions impossible.
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl SequenceGenerator {
    /// Create a generator producing `<prefix><n>` for n = 1, 2, 3, ...
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl IdentifierGenerator for SequenceGenerator {
    fn next_identifier(&self) -> Identifier {
        let n = self.counter.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        Identifier::new(format!("{}{}", self.prefix, n))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn uuid_generator_produces_distinct_compact_values() {
        let generator = UuidGenerator;
        let mut seen = BTreeSet::new();

        for _ in 0..100 {
            let id = generator.next_identifier();
            assert_eq!(id.as_str().len(), 32);
            assert!(!id.as_str().contains('-'));
            assert!(seen.insert(id));
        }
    }

    #[test]
    fn sequence_generator_counts_up() {
        let generator = SequenceGenerator::new("u");
        assert_eq!(generator.next_identifier().as_str(), "u1");
        assert_eq!(generator.next_identifier().as_str(), "u2");
        assert_eq!(generator.next_identifier().as_str(), "u3");
    }
}
