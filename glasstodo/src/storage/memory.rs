//! In-memory storage area with tab handles.
//!
//! A [`MemoryStorage`] is one handle ("tab") onto a shared storage area.
//! [`tab`](MemoryStorage::tab) opens another handle on the same area; a
//! write through one handle is delivered as a [`StorageEvent`] to every
//! other handle, the way a browser fires `storage` events in sibling tabs.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::{EVENT_BUFFER, KeyValueStore, StorageError, StorageEvent};

/// State shared by every tab of one storage area.
#[derive(Debug)]
struct Area {
    entries: Mutex<HashMap<String, String>>,
    /// Event senders of the live tabs, by tab id.
    tabs: Mutex<Vec<(u64, broadcast::Sender<StorageEvent>)>>,
    next_tab: AtomicU64,
    /// Maximum total bytes of keys plus values, if limited.
    quota: Option<usize>,
    disabled: AtomicBool,
}

impl Area {
    fn check_enabled(&self) -> Result<(), StorageError> {
        if self.disabled.load(Ordering::Acquire) {
            return Err(StorageError::Unavailable(
                "storage is disabled for this area".to_string(),
            ));
        }
        Ok(())
    }

    fn notify_others(&self, origin: u64, event: &StorageEvent) {
        for (tab, tx) in self.tabs.lock().iter() {
            if *tab != origin {
                // No receivers just means nobody in that tab is listening.
                let _ = tx.send(event.clone());
            }
        }
    }
}

/// One handle onto an in-memory storage area.
#[derive(Debug)]
pub struct MemoryStorage {
    area: Arc<Area>,
    tab_id: u64,
    events: broadcast::Sender<StorageEvent>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Creates a new, empty, unlimited storage area and returns its first tab.
    #[must_use]
    pub fn new() -> Self {
        Self::with_area(None)
    }

    /// Creates a new, empty storage area limited to `bytes` of keys plus
    /// values, and returns its first tab.
    #[must_use]
    pub fn with_quota(bytes: usize) -> Self {
        Self::with_area(Some(bytes))
    }

    fn with_area(quota: Option<usize>) -> Self {
        let area = Arc::new(Area {
            entries: Mutex::new(HashMap::new()),
            tabs: Mutex::new(Vec::new()),
            next_tab: AtomicU64::new(0),
            quota,
            disabled: AtomicBool::new(false),
        });
        Self::attach(area)
    }

    fn attach(area: Arc<Area>) -> Self {
        let tab_id = area.next_tab.fetch_add(1, Ordering::Relaxed);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        area.tabs.lock().push((tab_id, events.clone()));
        Self {
            area,
            tab_id,
            events,
        }
    }

    /// Opens another tab on the same storage area.
    #[must_use]
    pub fn tab(&self) -> Self {
        Self::attach(Arc::clone(&self.area))
    }

    /// Disables or re-enables the whole area. While disabled every
    /// operation fails with [`StorageError::Unavailable`].
    pub fn set_disabled(&self, disabled: bool) {
        self.area.disabled.store(disabled, Ordering::Release);
    }

    /// Total bytes of keys plus values currently stored in the area.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.area
            .entries
            .lock()
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

impl Drop for MemoryStorage {
    fn drop(&mut self) {
        let tab_id = self.tab_id;
        self.area.tabs.lock().retain(|(id, _)| *id != tab_id);
    }
}

impl KeyValueStore for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.area.check_enabled()?;
        Ok(self.area.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.area.check_enabled()?;
        {
            let mut entries = self.area.entries.lock();
            if let Some(quota) = self.area.quota {
                let others: usize = entries
                    .iter()
                    .filter(|(k, _)| k.as_str() != key)
                    .map(|(k, v)| k.len() + v.len())
                    .sum();
                if others + key.len() + value.len() > quota {
                    return Err(StorageError::QuotaExceeded {
                        key: key.to_string(),
                    });
                }
            }
            let previous = entries.insert(key.to_string(), value.to_string());
            drop(entries);
            if previous.as_deref() == Some(value) {
                return Ok(());
            }
        }
        self.area.notify_others(
            self.tab_id,
            &StorageEvent {
                key: key.to_string(),
                new_value: Some(value.to_string()),
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.area.check_enabled()?;
        let removed = self.area.entries.lock().remove(key);
        if removed.is_some() {
            self.area.notify_others(
                self.tab_id,
                &StorageEvent {
                    key: key.to_string(),
                    new_value: None,
                },
            );
        }
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}
