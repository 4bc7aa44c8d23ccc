//! In-memory task collection management.
//!
//! [`TodoStore`] owns the ordered collection and is the only code allowed to
//! mutate it. Every operation keeps the collection invariants: unique ids,
//! trimmed non-empty text, newest tasks first.

pub mod manager;

pub use manager::TodoStore;

use chrono::NaiveDate;
use thiserror::Error;

use glasstodo_proto::{Category, Priority};

/// Errors that can occur during store operations.
///
/// Only caller misuse surfaces here. Unknown ids and blank text are silent
/// no-ops, never errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A reorder index does not address an element of the collection.
    #[error("index {index} out of range for collection of length {len}")]
    IndexOutOfRange {
        /// The offending index.
        index: usize,
        /// Collection length at the time of the call.
        len: usize,
    },
}

/// A partial update of a task's editable fields.
///
/// `None` leaves a field untouched. For `due_date`, `Some(None)` clears the
/// date.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoPatch {
    pub text: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub category: Option<Category>,
    pub due_date: Option<Option<NaiveDate>>,
}

impl TodoPatch {
    /// Returns `true` if the patch changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.category.is_none()
            && self.due_date.is_none()
    }
}
