//! JSON codec for the persisted collection envelope.
//!
//! The envelope is a JSON array of [`Todo`] objects. Decoding is defensive:
//! the array itself must parse, but individual elements that fail shape
//! validation are dropped and counted rather than failing the whole value.

use std::collections::HashSet;

use serde_json::Value;

use crate::todo::Todo;

/// Error type for collection encode/decode operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The raw value is not valid JSON.
    #[error("stored value is not valid JSON: {0}")]
    Parse(String),
    /// The raw value is JSON but not an array.
    #[error("expected a JSON array of tasks, found {found}")]
    NotAnArray {
        /// JSON type name of the value that was found.
        found: &'static str,
    },
    /// The collection could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result of decoding a stored collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    /// Records that passed validation, in stored order.
    pub todos: Vec<Todo>,
    /// Number of elements discarded (malformed or duplicate id).
    pub dropped: usize,
}

/// Encodes a collection as compact JSON, the form written to storage.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if serialization fails.
pub fn encode_collection(todos: &[Todo]) -> Result<String, CodecError> {
    serde_json::to_string(todos).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a collection as JSON indented by two spaces, for backups.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if serialization fails.
pub fn encode_pretty(todos: &[Todo]) -> Result<String, CodecError> {
    serde_json::to_string_pretty(todos).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a stored collection, keeping every element that validates.
///
/// An element is kept when it is an object with a string `id`, a string
/// `text` (or `title`) that is non-empty after trimming, a boolean
/// `completed`, and a parseable `createdAt` if one is present. When two
/// elements share an id, the first one wins.
///
/// # Errors
///
/// Returns [`CodecError::Parse`] if `raw` is not JSON and
/// [`CodecError::NotAnArray`] if it is JSON of another type.
pub fn decode_collection(raw: &str) -> Result<Decoded, CodecError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| CodecError::Parse(e.to_string()))?;
    let elements = match value {
        Value::Array(elements) => elements,
        other => {
            return Err(CodecError::NotAnArray {
                found: json_type_name(&other),
            });
        }
    };

    let total = elements.len();
    let mut seen = HashSet::with_capacity(total);
    let todos: Vec<Todo> = elements
        .into_iter()
        .filter_map(|element| serde_json::from_value::<Todo>(element).ok())
        .filter(|todo| seen.insert(todo.id.clone()))
        .collect();

    Ok(Decoded {
        dropped: total - todos.len(),
        todos,
    })
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
