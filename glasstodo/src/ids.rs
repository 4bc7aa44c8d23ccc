//! Identifier generation strategies for new tasks.
//!
//! The store never mints ids itself; it asks an [`IdGenerator`]. Production
//! code uses [`UuidIdGenerator`] (UUID v7: time-ordered with random bits, so
//! two calls in the same millisecond still differ). Tests inject
//! [`SequentialIdGenerator`] for predictable ids.

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

use glasstodo_proto::TodoId;

/// Source of fresh task identifiers.
///
/// Implementations must never return the same id twice within a process.
pub trait IdGenerator: Send + Sync {
    /// Returns a new identifier.
    fn next_id(&self) -> TodoId;
}

/// Generates UUID v7 identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn next_id(&self) -> TodoId {
        TodoId::from_uuid(Uuid::now_v7())
    }
}

/// Generates `<prefix><n>` identifiers from an atomic counter, starting at 1.
#[derive(Debug)]
pub struct SequentialIdGenerator {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIdGenerator {
    /// Creates a generator producing `prefix1`, `prefix2`, ...
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl Default for SequentialIdGenerator {
    fn default() -> Self {
        Self::new("todo-")
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> TodoId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        TodoId::new(format!("{}{n}", self.prefix))
    }
}
