//! `glasstodo`: task list manager with key-value persistence and
//! cross-tab synchronization.

pub mod config;
pub mod ids;
pub mod persistence;
pub mod session;
pub mod storage;
pub mod store;
pub mod view;

pub use persistence::{AdapterState, ImportError, PersistenceAdapter, StorageStats, Subscription};
pub use session::{SessionOptions, TodoSession};
pub use storage::{KeyValueStore, StorageError, StorageEvent};
pub use store::{StoreError, TodoPatch, TodoStore};
pub use view::{Filter, Stats};
