//! Persisted schema definitions for `glasstodo`.
//!
//! Everything that crosses the storage boundary lives here: the task record,
//! its identifiers and timestamps, and the JSON codec that reads and writes
//! the collection envelope.

pub mod codec;
pub mod todo;

pub use codec::{CodecError, Decoded};
pub use todo::{Category, Priority, Timestamp, Todo, TodoExtras, TodoId};
