//! Directory-backed storage shared between processes.
//!
//! Each key lives in `<dir>/<encoded key>.json`, where the key is
//! percent-encoded so distinct keys never share a file. Writes go to a
//! temporary file that is then renamed over the target, so readers never
//! observe a partial value.
//!
//! Once [`KeyValueStore::watch`] is called, a [`notify`] watcher on the
//! directory wakes a background task that rescans it and reports values that
//! differ from what this handle last read or wrote. Writes by other
//! processes show up as [`StorageEvent`]s while the handle's own writes stay
//! silent. If the platform watcher cannot be started, the task falls back to
//! rescanning on a fixed interval.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use super::{EVENT_BUFFER, KeyValueStore, StorageError, StorageEvent};

/// Default interval between directory scans when no watcher is available.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

const FILE_EXTENSION: &str = "json";

/// Bytes kept verbatim in file stems; everything else, `%` included, is
/// percent-encoded.
const STEM_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'.').remove(b'_').remove(b'-');

/// How the handle learns about changes made by other processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDetection {
    /// Platform file watcher, polling only if it fails to start.
    Watch,
    /// Rescan on a fixed interval (e.g. on network filesystems that do not
    /// deliver change notifications).
    Poll,
}

#[derive(Debug)]
struct Inner {
    dir: PathBuf,
    /// Last value seen per key (`None` = known absent).
    known: Mutex<HashMap<String, Option<String>>>,
    /// Serializes writes against scans so a scan never sees a half-recorded
    /// self-write.
    io_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<StorageEvent>,
}

/// Background change detection. Dropping it stops the watcher.
struct Monitor {
    task: JoinHandle<()>,
    watcher: Option<RecommendedWatcher>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("running", &!self.task.is_finished())
            .field("watching", &self.watcher.is_some())
            .finish()
    }
}

/// Storage handle over a directory of per-key files.
#[derive(Debug)]
pub struct FileStorage {
    inner: Arc<Inner>,
    detection: ChangeDetection,
    poll_interval: Duration,
    monitor: Mutex<Option<Monitor>>,
}

impl FileStorage {
    /// Opens (creating if needed) a storage directory that watches for
    /// outside changes, polling every `poll_interval` only if the watcher
    /// cannot be started.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>, poll_interval: Duration) -> Result<Self, StorageError> {
        Self::with_detection(dir, ChangeDetection::Watch, poll_interval)
    }

    /// Opens a storage directory with an explicit change detection mode.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the directory cannot be created.
    pub fn with_detection(
        dir: impl Into<PathBuf>,
        detection: ChangeDetection,
        poll_interval: Duration,
    ) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(map_io_error)?;
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Ok(Self {
            inner: Arc::new(Inner {
                dir,
                known: Mutex::new(HashMap::new()),
                io_lock: tokio::sync::Mutex::new(()),
                events,
            }),
            detection,
            poll_interval,
            monitor: Mutex::new(None),
        })
    }

    /// Returns the storage directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Returns the file that holds `key`.
    #[must_use]
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.inner.path_for(key)
    }

    /// Returns `true` while a platform watcher (rather than the poller)
    /// drives change detection.
    #[must_use]
    pub fn is_watching(&self) -> bool {
        self.monitor
            .lock()
            .as_ref()
            .is_some_and(|m| m.watcher.is_some() && !m.task.is_finished())
    }

    /// Starts change detection if it is not running yet.
    fn ensure_monitor(&self) {
        let mut monitor = self.monitor.lock();
        if monitor.as_ref().is_some_and(|m| !m.task.is_finished()) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("no tokio runtime available, external storage changes will not be observed");
            return;
        };
        let inner = Arc::downgrade(&self.inner);
        let dir = &self.inner.dir;

        if self.detection == ChangeDetection::Watch {
            let (tx, rx) = mpsc::channel(1);
            match create_watcher(dir, tx) {
                Ok(watcher) => {
                    *monitor = Some(Monitor {
                        task: handle.spawn(watch_loop(inner, rx)),
                        watcher: Some(watcher),
                    });
                    debug!(dir = %dir.display(), "watching storage directory");
                    return;
                }
                Err(err) => {
                    warn!(
                        dir = %dir.display(),
                        error = %err,
                        "file watcher unavailable, polling storage directory instead"
                    );
                }
            }
        }

        let interval = self.poll_interval;
        *monitor = Some(Monitor {
            task: handle.spawn(poll_loop(inner, interval)),
            watcher: None,
        });
        debug!(dir = %dir.display(), ?interval, "started storage poller");
    }
}

impl Drop for FileStorage {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.task.abort();
        }
    }
}

impl Inner {
    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{FILE_EXTENSION}", file_stem_for(key)))
    }

    /// Compares the directory against `known` and emits events for every
    /// difference. On the first scan, keys never seen before are recorded
    /// silently so pre-existing files do not look like fresh changes.
    async fn scan(&self, first: bool) -> Result<(), StorageError> {
        let _guard = self.io_lock.lock().await;

        let mut on_disk = HashMap::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != FILE_EXTENSION) {
                continue;
            }
            let Some(key) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(key_for_stem)
            else {
                continue;
            };
            match tokio::fs::read_to_string(&path).await {
                Ok(contents) => {
                    on_disk.insert(key, contents);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(map_io_error(e)),
            }
        }

        let mut changes = Vec::new();
        {
            let mut known = self.known.lock();
            for (key, contents) in &on_disk {
                let unchanged = known
                    .get(key)
                    .map(|previous| previous.as_deref() == Some(contents.as_str()));
                match unchanged {
                    Some(true) => {}
                    None if first => {
                        known.insert(key.clone(), Some(contents.clone()));
                    }
                    _ => {
                        known.insert(key.clone(), Some(contents.clone()));
                        changes.push(StorageEvent {
                            key: key.clone(),
                            new_value: Some(contents.clone()),
                        });
                    }
                }
            }

            for (key, value) in known.iter_mut() {
                if value.is_some() && !on_disk.contains_key(key) {
                    *value = None;
                    changes.push(StorageEvent {
                        key: key.clone(),
                        new_value: None,
                    });
                }
            }
        }

        for event in changes {
            debug!(key = %event.key, removed = event.new_value.is_none(), "external storage change");
            let _ = self.events.send(event);
        }
        Ok(())
    }
}

impl KeyValueStore for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.inner.io_lock.lock().await;
        let value = match tokio::fs::read_to_string(self.inner.path_for(key)).await {
            Ok(contents) => Some(contents),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(map_io_error(e)),
        };
        self.inner.known.lock().insert(key.to_string(), value.clone());
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.inner.io_lock.lock().await;
        let path = self.inner.path_for(key);
        let tmp_path = path.with_extension(format!("{FILE_EXTENSION}.tmp"));

        let write = async {
            tokio::fs::write(&tmp_path, value).await?;
            tokio::fs::rename(&tmp_path, &path).await
        };
        if let Err(e) = write.await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(match e.kind() {
                ErrorKind::StorageFull | ErrorKind::QuotaExceeded => StorageError::QuotaExceeded {
                    key: key.to_string(),
                },
                _ => map_io_error(e),
            });
        }

        self.inner
            .known
            .lock()
            .insert(key.to_string(), Some(value.to_string()));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.inner.io_lock.lock().await;
        match tokio::fs::remove_file(self.inner.path_for(key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(map_io_error(e)),
        }
        self.inner.known.lock().insert(key.to_string(), None);
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<StorageEvent> {
        let rx = self.inner.events.subscribe();
        self.ensure_monitor();
        rx
    }
}

/// Creates a non-recursive watcher on `dir` whose callback only signals
/// `wake`; the rescan itself runs on the tokio task.
fn create_watcher(dir: &Path, wake: mpsc::Sender<()>) -> notify::Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| handle_notify_event(res, &wake),
        Config::default(),
    )?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

fn handle_notify_event(res: notify::Result<Event>, wake: &mpsc::Sender<()>) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "storage watcher error");
            return;
        }
    };
    trace!(kind = ?event.kind, paths = ?event.paths, "storage watcher event");

    // Reads made by a scan must not wake the next one.
    let relevant = match event.kind {
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Any => true,
        EventKind::Modify(kind) => !matches!(kind, ModifyKind::Metadata(_)),
        _ => false,
    };
    let touches_value = event
        .paths
        .iter()
        .any(|p| p.extension().is_some_and(|ext| ext == FILE_EXTENSION));

    if relevant && touches_value {
        // A full channel already holds a pending rescan.
        let _ = wake.try_send(());
    }
}

async fn watch_loop(inner: Weak<Inner>, mut wake: mpsc::Receiver<()>) {
    if !rescan(&inner, true).await {
        return;
    }
    while wake.recv().await.is_some() {
        if !rescan(&inner, false).await {
            break;
        }
    }
}

async fn poll_loop(inner: Weak<Inner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut first = true;
    loop {
        ticker.tick().await;
        if !rescan(&inner, first).await {
            break;
        }
        first = false;
    }
}

/// Scans once. Returns `false` once the storage handle is gone.
async fn rescan(inner: &Weak<Inner>, first: bool) -> bool {
    let Some(inner) = inner.upgrade() else {
        return false;
    };
    if let Err(err) = inner.scan(first).await {
        warn!(dir = %inner.dir.display(), error = %err, "storage scan failed");
    }
    true
}

/// Maps a key to a file stem, percent-encoding anything outside
/// `[A-Za-z0-9._-]`.
fn file_stem_for(key: &str) -> String {
    utf8_percent_encode(key, STEM_ENCODE_SET).to_string()
}

/// Inverse of [`file_stem_for`]. Stems it would never produce (such as
/// hand-made file names with spaces) map to no key.
fn key_for_stem(stem: &str) -> Option<String> {
    let key = percent_decode_str(stem).decode_utf8().ok()?.into_owned();
    (file_stem_for(&key) == stem).then_some(key)
}

fn map_io_error(e: std::io::Error) -> StorageError {
    match e.kind() {
        ErrorKind::PermissionDenied | ErrorKind::ReadOnlyFilesystem => {
            StorageError::Unavailable(e.to_string())
        }
        _ => StorageError::Io(e),
    }
}
