//! Key-value storage abstraction for persisted collections.
//!
//! Defines the [`KeyValueStore`] trait that persistence backends satisfy.
//! Concrete implementations include:
//! - [`memory::MemoryStorage`]: an in-process storage area shared by
//!   several tab handles, with optional quota, used by tests and embedders
//! - [`file::FileStorage`]: one file per key in a directory, shared between
//!   processes and watched for outside changes

pub mod file;
pub mod memory;

use tokio::sync::broadcast;

/// Capacity of the per-handle change notification channel.
pub(crate) const EVENT_BUFFER: usize = 64;

/// A change made to a key by someone other than the observing handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    /// Key that changed.
    pub key: String,
    /// Raw value after the change, or `None` if the key was removed.
    pub new_value: Option<String>,
}

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The write would exceed the space available to the storage area.
    #[error("storage quota exceeded while writing {key}")]
    QuotaExceeded {
        /// Key being written.
        key: String,
    },

    /// The backend is disabled or refuses access.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// An underlying I/O error occurred.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Async string key-value store with change notifications.
///
/// Mirrors the browser `localStorage` contract: values are opaque strings,
/// a `set` overwrites, and [`watch`](KeyValueStore::watch) reports only
/// changes made through *other* handles, never the caller's own writes.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored at `key`, or `None` if absent.
    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<String>, StorageError>> + Send;

    /// Store `value` at `key`, replacing any previous value.
    fn set(
        &self,
        key: &str,
        value: &str,
    ) -> impl std::future::Future<Output = Result<(), StorageError>> + Send;

    /// Delete `key`. Removing an absent key succeeds.
    fn remove(&self, key: &str)
    -> impl std::future::Future<Output = Result<(), StorageError>> + Send;

    /// Subscribe to changes made outside this handle.
    fn watch(&self) -> broadcast::Receiver<StorageEvent>;
}
