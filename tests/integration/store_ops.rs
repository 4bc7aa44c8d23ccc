//! Integration tests for the task collection manager.
//!
//! Walks the store through the scenarios a presentation layer drives:
//! creating, completing, editing, filtering, bulk operations and
//! drag-and-drop reordering.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::similar_names)]

use std::sync::Arc;

use chrono::NaiveDate;
use glasstodo::ids::SequentialIdGenerator;
use glasstodo::store::{StoreError, TodoPatch, TodoStore};
use glasstodo::view::{Filter, Stats};
use glasstodo_proto::{Category, Priority, TodoExtras, TodoId};

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

/// Creates a store that hands out `todo-1`, `todo-2`, ...
fn make_store() -> TodoStore {
    TodoStore::with_id_generator(Arc::new(SequentialIdGenerator::default()))
}

/// Creates a store holding the given texts, the first text at the front.
fn store_with(texts: &[&str]) -> (TodoStore, Vec<TodoId>) {
    let mut store = make_store();
    let mut ids: Vec<TodoId> = texts
        .iter()
        .rev()
        .map(|text| store.create(text, None).expect("non-empty text"))
        .collect();
    ids.reverse();
    (store, ids)
}

fn texts(store: &TodoStore) -> Vec<&str> {
    store.todos().iter().map(|t| t.text.as_str()).collect()
}

// --- full workflow ---

#[test]
fn create_complete_and_clear_leaves_empty_list() {
    let mut store = make_store();
    let id = store.create("Buy milk", None).unwrap();
    assert!(store.toggle(&id));

    assert_eq!(
        store.stats(),
        Stats {
            total: 1,
            active: 0,
            completed: 1,
        }
    );
    assert_eq!(store.clear_completed(), 1);
    assert!(store.is_empty());
    assert_eq!(store.stats(), Stats::default());
}

// --- create ---

#[test]
fn create_trims_and_prepends() {
    let mut store = make_store();
    let first = store.create("  Buy milk  ", None).unwrap();
    let second = store.create("Walk dog", None).unwrap();

    assert_eq!(texts(&store), ["Walk dog", "Buy milk"]);
    let milk = store.get(&first).unwrap();
    assert_eq!(milk.text, "Buy milk");
    assert!(!milk.completed);
    assert!(milk.updated_at.is_none());
    assert_ne!(first, second);
    assert_eq!(
        store.stats(),
        Stats {
            total: 2,
            active: 2,
            completed: 0
        }
    );
}

#[test]
fn create_blank_text_is_ignored() {
    let mut store = make_store();
    store.create("kept", None).unwrap();
    let revision = store.revision();

    assert!(store.create("   ", None).is_none());
    assert!(store.create("", None).is_none());
    assert_eq!(store.len(), 1);
    assert_eq!(store.revision(), revision);
}

#[test]
fn create_with_extras_fills_every_attribute() {
    let mut store = make_store();
    let due = NaiveDate::from_ymd_opt(2025, 6, 30);
    let id = store
        .create(
            "File taxes",
            Some(TodoExtras {
                description: "  before the deadline ".to_string(),
                priority: Priority::High,
                due_date: due,
                ..TodoExtras::default()
            }),
        )
        .unwrap();

    let todo = store.get(&id).unwrap();
    assert_eq!(todo.description.as_deref(), Some("before the deadline"));
    assert_eq!(todo.priority, Some(Priority::High));
    assert_eq!(todo.category, Some(Category::Personal));
    assert_eq!(todo.due_date, due);
}

// --- toggle / edit / update / delete ---

#[test]
fn toggle_twice_restores_completion() {
    let (mut store, ids) = store_with(&["a", "b"]);

    assert!(store.toggle(&ids[0]));
    let done = store.get(&ids[0]).unwrap();
    assert!(done.completed);
    assert!(done.completed_at.is_some());
    assert!(done.updated_at.is_some());

    assert!(store.toggle(&ids[0]));
    let reopened = store.get(&ids[0]).unwrap();
    assert!(!reopened.completed);
    assert!(reopened.completed_at.is_none());
}

#[test]
fn missing_ids_are_silent_no_ops() {
    let (mut store, _) = store_with(&["a"]);
    let before = store.snapshot();
    let ghost = TodoId::new("ghost");

    assert!(!store.toggle(&ghost));
    assert!(!store.edit(&ghost, "x"));
    assert!(!store.delete(&ghost));
    assert!(!store.update(
        &ghost,
        TodoPatch {
            priority: Some(Priority::Low),
            ..TodoPatch::default()
        }
    ));
    assert!(Arc::ptr_eq(&before, &store.snapshot()));
}

#[test]
fn edit_preserves_identity_fields() {
    let (mut store, ids) = store_with(&["draft"]);
    store.toggle(&ids[0]);
    let before = store.get(&ids[0]).unwrap().clone();

    assert!(store.edit(&ids[0], "  final  "));
    let after = store.get(&ids[0]).unwrap();
    assert_eq!(after.text, "final");
    assert_eq!(after.id, before.id);
    assert_eq!(after.created_at, before.created_at);
    assert!(after.completed);

    assert!(!store.edit(&ids[0], "   "));
    assert_eq!(store.get(&ids[0]).unwrap().text, "final");
}

#[test]
fn editing_to_the_same_text_changes_nothing() {
    let (mut store, ids) = store_with(&["draft"]);
    store.edit(&ids[0], "final");
    let before = store.get(&ids[0]).unwrap().clone();
    let revision = store.revision();

    assert!(!store.edit(&ids[0], "  final "));
    assert_eq!(store.get(&ids[0]).unwrap(), &before);
    assert_eq!(store.revision(), revision);
}

#[test]
fn update_sets_and_clears_due_date() {
    let (mut store, ids) = store_with(&["task"]);
    let due = NaiveDate::from_ymd_opt(2030, 1, 1);

    assert!(store.update(
        &ids[0],
        TodoPatch {
            due_date: Some(due),
            category: Some(Category::Work),
            ..TodoPatch::default()
        }
    ));
    let todo = store.get(&ids[0]).unwrap();
    assert_eq!(todo.due_date, due);
    assert_eq!(todo.category, Some(Category::Work));

    assert!(store.update(
        &ids[0],
        TodoPatch {
            due_date: Some(None),
            ..TodoPatch::default()
        }
    ));
    assert!(store.get(&ids[0]).unwrap().due_date.is_none());
}

#[test]
fn delete_removes_only_that_task() {
    let (mut store, ids) = store_with(&["a", "b", "c"]);
    assert!(store.delete(&ids[1]));
    assert_eq!(texts(&store), ["a", "c"]);
}

// --- filters and bulk operations ---

#[test]
fn filtered_views_partition_the_collection() {
    let (mut store, ids) = store_with(&["a", "b", "c", "d"]);
    store.toggle(&ids[1]);
    store.toggle(&ids[3]);

    let active: Vec<_> = store
        .filtered_view(Filter::Active)
        .iter()
        .map(|t| t.text.as_str())
        .collect();
    let completed: Vec<_> = store
        .filtered_view(Filter::Completed)
        .iter()
        .map(|t| t.text.as_str())
        .collect();

    assert_eq!(active, ["a", "c"]);
    assert_eq!(completed, ["b", "d"]);
    assert_eq!(store.filtered_view(Filter::All).len(), 4);
}

#[test]
fn clear_completed_keeps_active_in_order() {
    let (mut store, ids) = store_with(&["a", "b", "c"]);
    store.toggle(&ids[1]);

    assert_eq!(store.clear_completed(), 1);
    assert_eq!(texts(&store), ["a", "c"]);
    assert_eq!(store.clear_completed(), 0);
}

#[test]
fn toggle_all_completes_then_reopens() {
    let (mut store, ids) = store_with(&["a", "b", "c"]);
    store.toggle(&ids[0]);

    assert!(store.toggle_all());
    assert!(store.all_completed());
    assert_eq!(store.stats().completed, 3);

    assert!(store.toggle_all());
    assert_eq!(store.stats().active, 3);
    assert!(!store.all_completed());
}

#[test]
fn toggle_all_on_empty_collection_does_nothing() {
    let mut store = make_store();
    assert!(!store.toggle_all());
    assert_eq!(store.revision(), 0);
    assert!(!store.all_completed());
}

// --- reorder ---

#[test]
fn reorder_moves_forward_and_backward() {
    let (mut store, _) = store_with(&["A", "B", "C", "D"]);

    store.reorder(0, 2).unwrap();
    assert_eq!(texts(&store), ["B", "C", "A", "D"]);

    store.reorder(3, 0).unwrap();
    assert_eq!(texts(&store), ["D", "B", "C", "A"]);
}

#[test]
fn reorder_out_of_range_is_rejected() {
    let (mut store, _) = store_with(&["A", "B"]);
    let revision = store.revision();

    assert_eq!(
        store.reorder(0, 2),
        Err(StoreError::IndexOutOfRange { index: 2, len: 2 })
    );
    assert_eq!(
        store.reorder(5, 0),
        Err(StoreError::IndexOutOfRange { index: 5, len: 2 })
    );
    assert_eq!(store.revision(), revision);
    assert_eq!(texts(&store), ["A", "B"]);
}

// --- snapshots ---

#[test]
fn snapshots_are_immutable() {
    let (mut store, ids) = store_with(&["a"]);
    let old = store.snapshot();
    store.toggle(&ids[0]);

    assert!(!old[0].completed);
    assert!(store.todos()[0].completed);
}
