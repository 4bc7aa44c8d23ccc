//! Integration tests for the persistence adapter.
//!
//! Covers defensive loading of corrupted or legacy data, import/export,
//! quota and availability failures, and the adapter lifecycle over both
//! in-memory and file-backed storage.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use glasstodo::persistence::{AdapterState, ImportError, PersistenceAdapter, STORAGE_KEY};
use glasstodo::storage::KeyValueStore;
use glasstodo::storage::file::FileStorage;
use glasstodo::storage::memory::MemoryStorage;
use glasstodo_proto::{Priority, Timestamp, Todo, TodoId};

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

fn make_todo(id: &str, text: &str, completed: bool) -> Todo {
    let mut todo = Todo::new(TodoId::new(id), text, Timestamp::from_millis(1_700_000_000_000).unwrap());
    todo.completed = completed;
    todo
}

async fn ready(storage: &Arc<MemoryStorage>) -> PersistenceAdapter<MemoryStorage> {
    let mut adapter = PersistenceAdapter::new(Arc::clone(storage));
    adapter.initialize().await;
    assert_eq!(adapter.state(), AdapterState::Ready);
    adapter
}

// --- load ---

#[tokio::test]
async fn missing_key_loads_empty() {
    let storage = Arc::new(MemoryStorage::new());
    let adapter = ready(&storage).await;
    assert!(adapter.load().await.is_empty());
}

#[tokio::test]
async fn corrupted_value_loads_empty_and_store_stays_usable() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set(STORAGE_KEY, "{not json").await.unwrap();

    let mut adapter = PersistenceAdapter::new(Arc::clone(&storage));
    assert!(adapter.initialize().await.is_empty());
    assert_eq!(adapter.state(), AdapterState::Ready);

    assert!(adapter.save(&[make_todo("1", "fresh start", false)]).await);
    assert_eq!(adapter.load().await.len(), 1);
}

#[tokio::test]
async fn invalid_elements_are_dropped_individually() {
    let storage = Arc::new(MemoryStorage::new());
    let raw = json!([
        {"id": "1", "text": "valid", "completed": false, "createdAt": "2024-01-01T00:00:00.000Z"},
        {"id": "2", "text": "", "completed": false},
        {"id": "3", "text": "no flag"},
        {"id": 4, "text": "numeric id", "completed": true},
        {"id": "5", "text": "bad date", "completed": false, "createdAt": "yesterday"},
        "just a string",
        {"id": "6", "title": "legacy title", "completed": true},
        {"id": "1", "text": "duplicate id", "completed": false}
    ]);
    storage.set(STORAGE_KEY, &raw.to_string()).await.unwrap();

    let adapter = ready(&storage).await;
    let todos = adapter.load().await;
    let texts: Vec<_> = todos.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(texts, ["valid", "legacy title"]);
}

#[tokio::test]
async fn unknown_extended_values_are_ignored_but_kept() {
    let storage = Arc::new(MemoryStorage::new());
    let raw = json!([{
        "id": "1",
        "text": "task",
        "completed": false,
        "priority": "urgent",
        "category": "work",
        "dueDate": "not a date"
    }]);
    storage.set(STORAGE_KEY, &raw.to_string()).await.unwrap();

    let adapter = ready(&storage).await;
    let todos = adapter.load().await;
    assert_eq!(todos.len(), 1);
    assert_eq!(todos[0].priority, None);
    assert_eq!(todos[0].category.map(|c| c.to_string()).as_deref(), Some("work"));
    assert_eq!(todos[0].due_date, None);

    assert!(adapter.save(&todos).await);
    let saved: Value = serde_json::from_str(&storage.get(STORAGE_KEY).await.unwrap().unwrap()).unwrap();
    assert_eq!(saved[0]["priority"], "urgent");
    assert_eq!(saved[0]["dueDate"], "not a date");
}

// --- save ---

#[tokio::test]
async fn save_then_load_round_trips() {
    let storage = Arc::new(MemoryStorage::new());
    let adapter = ready(&storage).await;
    let mut todos = vec![make_todo("a", "first", false), make_todo("b", "second", true)];
    todos[1].priority = Some(Priority::High);

    assert!(adapter.save(&todos).await);
    assert_eq!(adapter.load().await, todos);
}

#[tokio::test]
async fn saving_what_was_loaded_is_idempotent() {
    let storage = Arc::new(MemoryStorage::new());
    let adapter = ready(&storage).await;
    assert!(adapter.save(&[make_todo("a", "x", false), make_todo("b", "y", true)]).await);
    let first = storage.get(STORAGE_KEY).await.unwrap();

    let loaded = adapter.load().await;
    assert!(adapter.save(&loaded).await);
    assert_eq!(storage.get(STORAGE_KEY).await.unwrap(), first);
}

#[tokio::test]
async fn saving_loaded_data_keeps_what_other_clients_wrote() {
    let storage = Arc::new(MemoryStorage::new());
    let seeded = json!([
        {
            "id": "1700000000000",
            "text": "Buy milk",
            "completed": false,
            "createdAt": "2024-01-01T00:00:00.000Z",
            "updatedAt": "2024-01-02T00:00:00.000Z",
            "completedAt": null
        },
        {
            "id": "1700000000001",
            "text": "Call plumber",
            "completed": true,
            "createdAt": "2024-01-03T00:00:00.000Z",
            "completedAt": "2024-01-04T00:00:00.000Z",
            "priority": "urgent",
            "reminder": {"at": "09:00", "repeat": false}
        }
    ]);
    storage.set(STORAGE_KEY, &seeded.to_string()).await.unwrap();

    let adapter = ready(&storage).await;
    let loaded = adapter.load().await;
    assert_eq!(loaded.len(), 2);
    assert!(adapter.save(&loaded).await);

    let raw = storage.get(STORAGE_KEY).await.unwrap().unwrap();
    let stored: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(stored, seeded);
}

#[tokio::test]
async fn persisted_envelope_uses_camel_case_and_iso_timestamps() {
    let storage = Arc::new(MemoryStorage::new());
    let adapter = ready(&storage).await;
    assert!(adapter.save(&[make_todo("a", "x", false)]).await);

    let raw = storage.get(STORAGE_KEY).await.unwrap().unwrap();
    let value: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(
        value,
        json!([{
            "id": "a",
            "text": "x",
            "completed": false,
            "createdAt": "2023-11-14T22:13:20.000Z"
        }])
    );
}

#[tokio::test]
async fn quota_exceeded_reports_false_and_keeps_previous_value() {
    let storage = Arc::new(MemoryStorage::with_quota(200));
    let adapter = ready(&storage).await;
    assert!(adapter.save(&[make_todo("a", "small", false)]).await);
    let before = storage.get(STORAGE_KEY).await.unwrap();

    let big: Vec<Todo> = (0..20)
        .map(|i| make_todo(&format!("id-{i}"), "a fairly long task description", false))
        .collect();
    assert!(!adapter.save(&big).await);
    assert_eq!(storage.get(STORAGE_KEY).await.unwrap(), before);
}

// --- availability and lifecycle ---

#[tokio::test]
async fn unavailable_storage_degrades() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set_disabled(true);

    let mut adapter = PersistenceAdapter::new(Arc::clone(&storage));
    assert!(!adapter.is_available().await);
    assert!(adapter.initialize().await.is_empty());
    assert_eq!(adapter.state(), AdapterState::DegradedNoStorage);
    assert!(!adapter.save(&[make_todo("a", "x", false)]).await);
    assert!(!adapter.clear_all().await);
}

#[tokio::test]
async fn reload_recovers_after_storage_returns() {
    let storage = Arc::new(MemoryStorage::new());
    let other_tab = storage.tab();
    other_tab
        .set(STORAGE_KEY, &json!([{"id": "1", "text": "kept", "completed": false}]).to_string())
        .await
        .unwrap();
    storage.set_disabled(true);

    let mut adapter = PersistenceAdapter::new(Arc::clone(&storage));
    adapter.initialize().await;
    assert_eq!(adapter.state(), AdapterState::DegradedNoStorage);

    storage.set_disabled(false);
    let todos = adapter.reload().await;
    assert_eq!(adapter.state(), AdapterState::Ready);
    assert_eq!(todos.len(), 1);
}

// --- export / import ---

#[tokio::test]
async fn export_is_pretty_printed_with_two_spaces() {
    let storage = Arc::new(MemoryStorage::new());
    let adapter = ready(&storage).await;
    assert!(adapter.save(&[make_todo("a", "x", false)]).await);

    let exported = adapter.export_all().await.unwrap();
    assert!(exported.starts_with("[\n  {\n    \"id\": \"a\""));
}

#[tokio::test]
async fn import_keeps_valid_subset() {
    let storage = Arc::new(MemoryStorage::new());
    let adapter = ready(&storage).await;
    let text = json!([
        {"id": "1", "text": "one", "completed": false},
        {"id": "2", "text": "two", "completed": true},
        {"id": "3", "text": "  ", "completed": false},
        {"text": "no id", "completed": false},
        42
    ])
    .to_string();

    let imported = adapter.import_all(&text).await.unwrap();
    assert_eq!(imported.len(), 2);
    assert_eq!(adapter.load().await, imported);
}

#[tokio::test]
async fn failed_import_leaves_storage_untouched() {
    let storage = Arc::new(MemoryStorage::new());
    let adapter = ready(&storage).await;
    assert!(adapter.save(&[make_todo("a", "keep me", false)]).await);
    let before = storage.get(STORAGE_KEY).await.unwrap();

    assert!(matches!(
        adapter.import_all("not json").await,
        Err(ImportError::Invalid(_))
    ));
    assert!(matches!(
        adapter.import_all(r#"{"id":"1"}"#).await,
        Err(ImportError::Invalid(_))
    ));
    assert!(matches!(
        adapter.import_all(r#"[{"text":""}]"#).await,
        Err(ImportError::NoValidTodos)
    ));
    assert_eq!(storage.get(STORAGE_KEY).await.unwrap(), before);
}

#[tokio::test]
async fn import_before_initialize_is_refused() {
    let storage = Arc::new(MemoryStorage::new());
    let adapter = PersistenceAdapter::new(Arc::clone(&storage));
    let result = adapter
        .import_all(r#"[{"id":"1","text":"x","completed":false}]"#)
        .await;
    assert!(matches!(
        result,
        Err(ImportError::NotReady(AdapterState::Uninitialized))
    ));
}

// --- stats and clearing ---

#[tokio::test]
async fn storage_stats_and_clear_all() {
    let storage = Arc::new(MemoryStorage::new());
    let adapter = ready(&storage).await;
    assert!(
        adapter
            .save(&[
                make_todo("a", "x", false),
                make_todo("b", "y", true),
                make_todo("c", "z", true)
            ])
            .await
    );

    let stats = adapter.storage_stats().await;
    assert_eq!((stats.total, stats.active, stats.completed), (3, 1, 2));
    assert!(stats.storage_size > 0);

    assert!(adapter.clear_all().await);
    assert_eq!(adapter.storage_stats().await.total, 0);
}

// --- file storage ---

#[tokio::test]
async fn file_storage_persists_across_handles() {
    let dir = tempfile::tempdir().unwrap();
    {
        let storage = Arc::new(FileStorage::open(dir.path(), Duration::from_millis(50)).unwrap());
        let mut adapter = PersistenceAdapter::new(storage);
        adapter.initialize().await;
        assert!(adapter.save(&[make_todo("a", "survives restart", false)]).await);
    }

    let storage = Arc::new(FileStorage::open(dir.path(), Duration::from_millis(50)).unwrap());
    let mut adapter = PersistenceAdapter::new(Arc::clone(&storage));
    let todos = adapter.initialize().await;
    assert_eq!(todos.len(), 1);
    assert_eq!(todos[0].text, "survives restart");
    assert!(storage.path_for(STORAGE_KEY).exists());
}
