//! A task collection bound to persistent storage.
//!
//! [`TodoSession`] owns one [`TodoStore`] and one [`PersistenceAdapter`].
//! It can only be obtained through [`TodoSession::open`], which completes
//! the initial load first, so nothing is ever written before existing data
//! has been read. Each mutating call saves at most once, and only when the
//! store actually changed; taking `&mut self` keeps every mutation and its
//! save together, in call order.
//!
//! Changes made by other tabs arrive on a latest-value channel and are
//! folded in by [`apply_external_changes`](TodoSession::apply_external_changes)
//! or [`next_external_change`](TodoSession::next_external_change). They are
//! never written back.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use glasstodo_proto::codec::{self, CodecError};
use glasstodo_proto::{Todo, TodoExtras, TodoId};

use crate::ids::{IdGenerator, UuidIdGenerator};
use crate::persistence::{
    AdapterState, ImportError, PersistenceAdapter, STORAGE_KEY, StorageStats, Subscription,
};
use crate::storage::KeyValueStore;
use crate::store::{StoreError, TodoPatch, TodoStore};
use crate::view::{Filter, Stats};

/// Options for [`TodoSession::open`].
#[derive(Clone)]
pub struct SessionOptions {
    /// Storage key for the collection.
    pub key: String,
    /// Identifier strategy for new tasks.
    pub ids: Arc<dyn IdGenerator>,
    /// Initial filter.
    pub filter: Filter,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            key: STORAGE_KEY.to_string(),
            ids: Arc::new(UuidIdGenerator),
            filter: Filter::All,
        }
    }
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("key", &self.key)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

/// An open task collection kept in step with storage.
pub struct TodoSession<S: KeyValueStore + 'static> {
    store: TodoStore,
    adapter: PersistenceAdapter<S>,
    filter: Filter,
    external_tx: watch::Sender<Option<Vec<Todo>>>,
    external_rx: watch::Receiver<Option<Vec<Todo>>>,
    subscription: Option<Subscription>,
    last_save_failed: bool,
}

impl<S: KeyValueStore + 'static> std::fmt::Debug for TodoSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TodoSession")
            .field("store", &self.store)
            .field("adapter", &self.adapter)
            .field("filter", &self.filter)
            .field("last_save_failed", &self.last_save_failed)
            .finish_non_exhaustive()
    }
}

impl<S: KeyValueStore + 'static> TodoSession<S> {
    /// Loads the collection from `storage` and starts listening for changes
    /// made by other tabs.
    ///
    /// Never fails: if storage is unusable the session opens empty, in the
    /// degraded state, and works in memory only.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub async fn open(storage: Arc<S>, options: SessionOptions) -> Self {
        let SessionOptions { key, ids, filter } = options;
        let mut adapter = PersistenceAdapter::with_key(storage, key);
        let loaded = adapter.initialize().await;

        let mut store = TodoStore::with_id_generator(ids);
        let dropped = store.replace_all(loaded);
        if dropped > 0 {
            debug!(dropped, "discarded unusable tasks on open");
        }

        let (external_tx, external_rx) = watch::channel(None);
        let mut session = Self {
            store,
            adapter,
            filter,
            external_tx,
            external_rx,
            subscription: None,
            last_save_failed: false,
        };
        session.ensure_subscribed();
        info!(
            key = %session.adapter.key(),
            state = %session.adapter.state(),
            count = session.store.len(),
            "session opened"
        );
        session
    }

    fn ensure_subscribed(&mut self) {
        if self.subscription.is_some() || self.adapter.state() != AdapterState::Ready {
            return;
        }
        let tx = self.external_tx.clone();
        self.subscription = Some(self.adapter.subscribe(move |todos| {
            tx.send_replace(Some(todos));
        }));
    }

    async fn persist_if_changed(&mut self, before: u64) {
        if self.store.revision() == before {
            return;
        }
        let saved = self.adapter.save(self.store.todos()).await;
        if !saved && !self.last_save_failed {
            warn!(key = %self.adapter.key(), "changes are kept in memory only");
        }
        self.last_save_failed = !saved;
    }

    // --- Mutations ---

    /// Adds a task at the front. Returns `None` if `text` is blank.
    pub async fn create(&mut self, text: &str, extras: Option<TodoExtras>) -> Option<TodoId> {
        let before = self.store.revision();
        let id = self.store.create(text, extras);
        self.persist_if_changed(before).await;
        id
    }

    /// Flips a task's completion state.
    pub async fn toggle(&mut self, id: &TodoId) -> bool {
        let before = self.store.revision();
        let changed = self.store.toggle(id);
        self.persist_if_changed(before).await;
        changed
    }

    /// Replaces a task's text.
    pub async fn edit(&mut self, id: &TodoId, new_text: &str) -> bool {
        let before = self.store.revision();
        let changed = self.store.edit(id, new_text);
        self.persist_if_changed(before).await;
        changed
    }

    /// Applies a partial update to a task.
    pub async fn update(&mut self, id: &TodoId, patch: TodoPatch) -> bool {
        let before = self.store.revision();
        let changed = self.store.update(id, patch);
        self.persist_if_changed(before).await;
        changed
    }

    /// Removes a task.
    pub async fn delete(&mut self, id: &TodoId) -> bool {
        let before = self.store.revision();
        let changed = self.store.delete(id);
        self.persist_if_changed(before).await;
        changed
    }

    /// Removes every completed task and returns how many were removed.
    pub async fn clear_completed(&mut self) -> usize {
        let before = self.store.revision();
        let removed = self.store.clear_completed();
        self.persist_if_changed(before).await;
        removed
    }

    /// Completes every task, or reopens them all if all are complete.
    pub async fn toggle_all(&mut self) -> bool {
        let before = self.store.revision();
        let changed = self.store.toggle_all();
        self.persist_if_changed(before).await;
        changed
    }

    /// Moves the task at `from` to position `to`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::IndexOutOfRange`] if either index is out of
    /// range; nothing is changed or saved in that case.
    pub async fn reorder(&mut self, from: usize, to: usize) -> Result<(), StoreError> {
        let before = self.store.revision();
        self.store.reorder(from, to)?;
        self.persist_if_changed(before).await;
        Ok(())
    }

    /// Replaces the stored collection with the valid records in `text` and
    /// installs them. Returns the number of records imported.
    ///
    /// # Errors
    ///
    /// See [`PersistenceAdapter::import_all`]. On error the session is
    /// unchanged.
    pub async fn import_all(&mut self, text: &str) -> Result<usize, ImportError> {
        let imported = self.adapter.import_all(text).await?;
        let count = imported.len();
        self.store.replace_all(imported);
        self.last_save_failed = false;
        Ok(count)
    }

    /// Removes the stored collection and empties the session.
    ///
    /// Returns `false` (leaving the session unchanged) if storage could not
    /// be cleared.
    pub async fn clear_all(&mut self) -> bool {
        if !self.adapter.clear_all().await {
            return false;
        }
        self.store.replace_all(Vec::new());
        true
    }

    /// Re-reads storage, replacing the in-memory collection.
    ///
    /// This is also how a degraded session retries storage.
    pub async fn reload(&mut self) {
        let loaded = self.adapter.reload().await;
        self.store.replace_all(loaded);
        self.last_save_failed = false;
        self.external_rx.mark_unchanged();
        self.ensure_subscribed();
    }

    // --- External changes ---

    /// Installs the latest collection written by another tab, if one
    /// arrived since the last call. Returns `true` if the store changed.
    pub fn apply_external_changes(&mut self) -> bool {
        if !self.external_rx.has_changed().unwrap_or(false) {
            return false;
        }
        self.install_external()
    }

    fn install_external(&mut self) -> bool {
        let Some(todos) = self.external_rx.borrow_and_update().clone() else {
            return false;
        };
        let dropped = self.store.replace_all(todos);
        debug!(
            count = self.store.len(),
            dropped,
            "applied external change"
        );
        true
    }

    /// Waits for another tab to change the collection, then applies it.
    ///
    /// Returns `false` if no further changes can arrive (the session is
    /// degraded or has been closed).
    pub async fn next_external_change(&mut self) -> bool {
        if self.subscription.is_none() {
            return false;
        }
        loop {
            if self.external_rx.changed().await.is_err() {
                return false;
            }
            if self.install_external() {
                return true;
            }
        }
    }

    /// Stops listening for external changes.
    pub fn close(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        info!(key = %self.adapter.key(), "session closed");
    }

    // --- Queries ---

    /// Tasks matching the current filter, in collection order.
    #[must_use]
    pub fn visible(&self) -> Vec<&Todo> {
        self.store.filtered_view(self.filter)
    }

    /// Returns the current filter.
    #[must_use]
    pub const fn filter(&self) -> Filter {
        self.filter
    }

    /// Changes the filter. Filters are never persisted.
    pub const fn set_filter(&mut self, filter: Filter) {
        self.filter = filter;
    }

    #[must_use]
    pub fn stats(&self) -> Stats {
        self.store.stats()
    }

    #[must_use]
    pub fn all_completed(&self) -> bool {
        self.store.all_completed()
    }

    /// Read access to the underlying store.
    #[must_use]
    pub const fn store(&self) -> &TodoStore {
        &self.store
    }

    /// Returns the adapter's lifecycle state.
    #[must_use]
    pub const fn state(&self) -> AdapterState {
        self.adapter.state()
    }

    /// `true` if storage is unusable or the most recent save failed.
    #[must_use]
    pub fn persistence_degraded(&self) -> bool {
        self.last_save_failed || self.adapter.state() != AdapterState::Ready
    }

    /// The in-memory collection as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Serialization`] if serialization fails.
    pub fn export_all(&self) -> Result<String, CodecError> {
        codec::encode_pretty(self.store.todos())
    }

    /// Counts and serialized size of the stored collection.
    pub async fn storage_stats(&self) -> StorageStats {
        self.adapter.storage_stats().await
    }
}
