//! Durable storage of the task collection under a single key.
//!
//! [`PersistenceAdapter`] wraps any [`KeyValueStore`] and is deliberately
//! forgiving about what it reads:
//!
//! - A missing key, unreadable storage, invalid JSON or a non-array value
//!   all load as an empty collection (with a warning), never as an error.
//! - Elements that fail shape validation are dropped one by one.
//! - Failed writes are reported as `false` so callers can keep working in
//!   memory.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized -> Loading -> Ready
//!                          -> DegradedNoStorage
//! ```
//!
//! Saves are refused until the first load has completed, so an empty
//! in-memory collection can never clobber existing data. Only
//! [`reload`](PersistenceAdapter::reload) re-enters `Loading`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use glasstodo_proto::Todo;
use glasstodo_proto::codec::{self, CodecError};

use crate::storage::KeyValueStore;
use crate::view::Stats;

/// Key under which the collection is stored by default.
pub const STORAGE_KEY: &str = "glassmorphism-todos";

/// Sentinel key written and removed by [`PersistenceAdapter::is_available`].
pub const PROBE_KEY: &str = "__storage_test__";

/// Lifecycle state of a [`PersistenceAdapter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// Created, nothing read yet.
    Uninitialized,
    /// The initial (or an explicit re-) load is in progress.
    Loading,
    /// Storage is usable; saves are accepted.
    Ready,
    /// Storage could not be used; loads return nothing and saves fail.
    DegradedNoStorage,
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Loading => write!(f, "loading"),
            Self::Ready => write!(f, "ready"),
            Self::DegradedNoStorage => write!(f, "degraded (no storage)"),
        }
    }
}

/// Errors returned by [`PersistenceAdapter::import_all`].
///
/// An import either commits its whole valid subset or nothing at all.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// The text is not a JSON array.
    #[error("import data is not a task list: {0}")]
    Invalid(#[from] CodecError),

    /// The array contained no element that passed validation.
    #[error("no valid tasks found in import data")]
    NoValidTodos,

    /// The adapter is not in the `Ready` state.
    #[error("storage is not ready ({0})")]
    NotReady(AdapterState),

    /// Writing the imported collection failed.
    #[error("imported tasks could not be saved")]
    SaveFailed,
}

/// Counts and size of the stored collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub total: usize,
    pub completed: usize,
    pub active: usize,
    /// Length in bytes of the serialized collection.
    pub storage_size: usize,
}

/// Reads and writes the task collection through a [`KeyValueStore`].
pub struct PersistenceAdapter<S: KeyValueStore + 'static> {
    storage: Arc<S>,
    key: String,
    state: AdapterState,
}

impl<S: KeyValueStore + 'static> std::fmt::Debug for PersistenceAdapter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceAdapter")
            .field("key", &self.key)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<S: KeyValueStore + 'static> PersistenceAdapter<S> {
    /// Creates an adapter using [`STORAGE_KEY`].
    #[must_use]
    pub fn new(storage: Arc<S>) -> Self {
        Self::with_key(storage, STORAGE_KEY)
    }

    /// Creates an adapter storing the collection under `key`.
    pub fn with_key(storage: Arc<S>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
            state: AdapterState::Uninitialized,
        }
    }

    /// Returns the storage key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> AdapterState {
        self.state
    }

    /// Returns the underlying storage handle.
    #[must_use]
    pub const fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Performs the initial load, moving to `Ready` or `DegradedNoStorage`.
    ///
    /// Returns the loaded collection (empty when degraded).
    pub async fn initialize(&mut self) -> Vec<Todo> {
        if self.state != AdapterState::Uninitialized {
            debug!(key = %self.key, state = %self.state, "adapter already initialized, reloading");
        }
        self.reload().await
    }

    /// Re-probes storage and reads the collection again.
    pub async fn reload(&mut self) -> Vec<Todo> {
        self.state = AdapterState::Loading;
        if !self.is_available().await {
            self.state = AdapterState::DegradedNoStorage;
            warn!(key = %self.key, "storage unavailable, continuing without persistence");
            return Vec::new();
        }
        let todos = self.read().await;
        self.state = AdapterState::Ready;
        info!(key = %self.key, count = todos.len(), "loaded tasks from storage");
        todos
    }

    /// Reads and validates the stored collection.
    ///
    /// Never fails: anything unusable reads as an empty collection. In the
    /// degraded state storage is not touched at all.
    pub async fn load(&self) -> Vec<Todo> {
        if self.state == AdapterState::DegradedNoStorage {
            return Vec::new();
        }
        self.read().await
    }

    async fn read(&self) -> Vec<Todo> {
        match self.storage.get(&self.key).await {
            Ok(Some(raw)) => decode_stored(&self.key, &raw).unwrap_or_default(),
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(key = %self.key, error = %err, "failed to read tasks from storage");
                Vec::new()
            }
        }
    }

    /// Writes the full collection, overwriting the previous value.
    ///
    /// Returns `false` if the adapter is not `Ready`, or if the write fails
    /// (quota exceeded, storage disabled, I/O error).
    pub async fn save(&self, todos: &[Todo]) -> bool {
        if self.state != AdapterState::Ready {
            debug!(key = %self.key, state = %self.state, "save refused");
            return false;
        }
        let raw = match codec::encode_collection(todos) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(key = %self.key, error = %err, "failed to serialize tasks");
                return false;
            }
        };
        match self.storage.set(&self.key, &raw).await {
            Ok(()) => {
                debug!(key = %self.key, count = todos.len(), bytes = raw.len(), "saved tasks");
                true
            }
            Err(err) => {
                warn!(key = %self.key, error = %err, "failed to save tasks to storage");
                false
            }
        }
    }

    /// Registers `callback` for changes to the key made outside this handle.
    ///
    /// Each new value is parsed and validated like [`load`](Self::load); the
    /// callback runs only when parsing succeeds. Removal of the key is
    /// ignored. Dropping the returned [`Subscription`] (or calling
    /// [`Subscription::unsubscribe`]) stops all further callbacks.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: FnMut(Vec<Todo>) + Send + 'static,
    {
        let mut rx = self.storage.watch();
        let storage = Arc::clone(&self.storage);
        let key = self.key.clone();
        let shared = Arc::new(SubscriberShared {
            active: AtomicBool::new(true),
            callback: Mutex::new(Box::new(callback)),
        });
        let task_shared = Arc::clone(&shared);

        let task = tokio::spawn(async move {
            loop {
                let raw = match rx.recv().await {
                    Ok(event) if event.key == key => match event.new_value {
                        Some(raw) => raw,
                        None => continue,
                    },
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(key = %key, skipped, "missed storage events, re-reading current value");
                        match storage.get(&key).await {
                            Ok(Some(raw)) => raw,
                            _ => continue,
                        }
                    }
                    Err(RecvError::Closed) => break,
                };
                if let Some(todos) = decode_stored(&key, &raw) {
                    task_shared.deliver(todos);
                }
            }
        });

        Subscription {
            shared,
            task: Some(task),
        }
    }

    /// Returns the stored collection as JSON indented by two spaces.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Serialization`] if serialization fails.
    pub async fn export_all(&self) -> Result<String, CodecError> {
        codec::encode_pretty(&self.load().await)
    }

    /// Replaces the stored collection with the valid records in `text`.
    ///
    /// Returns the records that were committed.
    ///
    /// # Errors
    ///
    /// Fails without writing anything if `text` is not a JSON array, if no
    /// element survives validation, if the adapter is not `Ready`, or if
    /// the write fails.
    pub async fn import_all(&self, text: &str) -> Result<Vec<Todo>, ImportError> {
        let decoded = codec::decode_collection(text)?;
        if decoded.todos.is_empty() {
            return Err(ImportError::NoValidTodos);
        }
        if self.state != AdapterState::Ready {
            return Err(ImportError::NotReady(self.state));
        }
        if !self.save(&decoded.todos).await {
            return Err(ImportError::SaveFailed);
        }
        info!(
            key = %self.key,
            imported = decoded.todos.len(),
            dropped = decoded.dropped,
            "imported tasks"
        );
        Ok(decoded.todos)
    }

    /// Probes storage by writing and removing [`PROBE_KEY`].
    pub async fn is_available(&self) -> bool {
        if let Err(err) = self.storage.set(PROBE_KEY, PROBE_KEY).await {
            debug!(error = %err, "storage probe write failed");
            return false;
        }
        if let Err(err) = self.storage.remove(PROBE_KEY).await {
            debug!(error = %err, "storage probe cleanup failed");
            return false;
        }
        true
    }

    /// Removes the stored collection entirely.
    ///
    /// Returns `false` if the adapter is not `Ready` or removal fails.
    pub async fn clear_all(&self) -> bool {
        if self.state != AdapterState::Ready {
            return false;
        }
        match self.storage.remove(&self.key).await {
            Ok(()) => true,
            Err(err) => {
                warn!(key = %self.key, error = %err, "failed to clear tasks from storage");
                false
            }
        }
    }

    /// Returns counts and serialized size of the stored collection.
    pub async fn storage_stats(&self) -> StorageStats {
        let todos = self.load().await;
        let stats = Stats::of(&todos);
        StorageStats {
            total: stats.total,
            completed: stats.completed,
            active: stats.active,
            storage_size: codec::encode_collection(&todos).map_or(0, |raw| raw.len()),
        }
    }
}

/// Decodes a raw stored value, logging instead of failing.
fn decode_stored(key: &str, raw: &str) -> Option<Vec<Todo>> {
    match codec::decode_collection(raw) {
        Ok(decoded) => {
            if decoded.dropped > 0 {
                debug!(key = %key, dropped = decoded.dropped, "discarded invalid stored tasks");
            }
            Some(decoded.todos)
        }
        Err(err) => {
            warn!(key = %key, error = %err, "invalid task data in storage, ignoring");
            None
        }
    }
}

type Callback = Box<dyn FnMut(Vec<Todo>) + Send>;

struct SubscriberShared {
    active: AtomicBool,
    callback: Mutex<Callback>,
}

impl SubscriberShared {
    fn deliver(&self, todos: Vec<Todo>) {
        let mut callback = self.callback.lock();
        if self.active.load(Ordering::Acquire) {
            callback(todos);
        }
    }
}

/// Handle to a storage change subscription.
///
/// Releasing it waits for a callback that is already running, then
/// guarantees the callback is never invoked again. The callback must not
/// release its own subscription.
#[must_use = "dropping a Subscription cancels it immediately"]
pub struct Subscription {
    shared: Arc<SubscriberShared>,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// Returns `true` until the subscription is released.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Cancels the subscription. Equivalent to dropping it.
    pub fn unsubscribe(self) {
        drop(self);
    }

    fn release(&mut self) {
        {
            let _in_flight = self.shared.callback.lock();
            self.shared.active.store(false, Ordering::Release);
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
