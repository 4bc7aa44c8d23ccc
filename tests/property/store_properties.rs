//! Property-based tests for the task store.
//!
//! Uses proptest to verify, for arbitrary operation sequences:
//! 1. Ids stay unique and every text stays trimmed and non-empty.
//! 2. The active and completed views partition the collection in order.
//! 3. Stats always agree with the collection.
//! 4. Toggling twice restores the collection's completion state.
//! 5. Reorder is a permutation moving exactly one element.

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;

use glasstodo::ids::SequentialIdGenerator;
use glasstodo::store::TodoStore;
use glasstodo::view::Filter;
use glasstodo_proto::TodoId;

/// One store operation, with indices resolved against the current length.
#[derive(Debug, Clone)]
enum Op {
    Create(String),
    Toggle(usize),
    Edit(usize, String),
    Delete(usize),
    ClearCompleted,
    ToggleAll,
    Reorder(usize, usize),
}

/// Strategy for task text, including blank and padded strings.
fn arb_text() -> impl Strategy<Value = String> {
    prop_oneof![
        3 => "[ ]{0,2}[a-z][a-z ]{0,12}[ ]{0,2}",
        1 => "[ ]{0,4}",
    ]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => arb_text().prop_map(Op::Create),
        3 => any::<usize>().prop_map(Op::Toggle),
        1 => (any::<usize>(), arb_text()).prop_map(|(i, t)| Op::Edit(i, t)),
        1 => any::<usize>().prop_map(Op::Delete),
        1 => Just(Op::ClearCompleted),
        1 => Just(Op::ToggleAll),
        1 => (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Op::Reorder(a, b)),
    ]
}

fn make_store() -> TodoStore {
    TodoStore::with_id_generator(Arc::new(SequentialIdGenerator::default()))
}

fn id_at(store: &TodoStore, i: usize) -> TodoId {
    store.todos()[i % store.len()].id.clone()
}

fn apply(store: &mut TodoStore, op: &Op) {
    let len = store.len();
    match op {
        Op::Create(text) => {
            store.create(text, None);
        }
        Op::Toggle(i) if len > 0 => {
            let id = id_at(store, *i);
            store.toggle(&id);
        }
        Op::Edit(i, text) if len > 0 => {
            let id = id_at(store, *i);
            store.edit(&id, text);
        }
        Op::Delete(i) if len > 0 => {
            let id = id_at(store, *i);
            store.delete(&id);
        }
        Op::ClearCompleted => {
            store.clear_completed();
        }
        Op::ToggleAll => {
            store.toggle_all();
        }
        Op::Reorder(from, to) if len > 0 => {
            let _ = store.reorder(from % len, to % len);
        }
        _ => {}
    }
}

fn build(ops: &[Op]) -> TodoStore {
    let mut store = make_store();
    for op in ops {
        apply(&mut store, op);
    }
    store
}

proptest! {
    #[test]
    fn collection_invariants_hold(ops in prop::collection::vec(arb_op(), 0..60)) {
        let store = build(&ops);
        let mut seen = HashSet::new();
        for todo in store.todos() {
            prop_assert!(seen.insert(todo.id.clone()), "duplicate id {}", todo.id);
            prop_assert!(!todo.text.is_empty());
            prop_assert_eq!(todo.text.trim(), todo.text.as_str());
            prop_assert_eq!(todo.completed_at.is_some(), todo.completed);
        }
    }

    #[test]
    fn views_partition_collection(ops in prop::collection::vec(arb_op(), 0..60)) {
        let store = build(&ops);
        let active = store.filtered_view(Filter::Active);
        let completed = store.filtered_view(Filter::Completed);
        let all = store.filtered_view(Filter::All);

        prop_assert_eq!(active.len() + completed.len(), all.len());
        prop_assert!(active.iter().all(|t| !t.completed));
        prop_assert!(completed.iter().all(|t| t.completed));

        // Both views are subsequences of the full collection.
        for view in [&active, &completed] {
            let positions: Vec<usize> = view
                .iter()
                .map(|t| store.todos().iter().position(|x| x.id == t.id).unwrap_or(usize::MAX))
                .collect();
            prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn stats_agree_with_collection(ops in prop::collection::vec(arb_op(), 0..60)) {
        let store = build(&ops);
        let stats = store.stats();
        prop_assert_eq!(stats.total, store.len());
        prop_assert_eq!(stats.active + stats.completed, stats.total);
        prop_assert_eq!(stats.completed, store.todos().iter().filter(|t| t.completed).count());
        prop_assert_eq!(store.all_completed(), stats.total > 0 && stats.active == 0);
    }

    #[test]
    fn double_toggle_restores_completion(
        ops in prop::collection::vec(arb_op(), 1..40),
        pick in any::<usize>(),
    ) {
        let mut store = build(&ops);
        prop_assume!(!store.is_empty());
        let before: Vec<bool> = store.todos().iter().map(|t| t.completed).collect();
        let id = store.todos()[pick % store.len()].id.clone();

        prop_assert!(store.toggle(&id));
        prop_assert!(store.toggle(&id));
        let after: Vec<bool> = store.todos().iter().map(|t| t.completed).collect();
        prop_assert_eq!(before, after);
    }

    #[test]
    fn reorder_moves_exactly_one_element(
        count in 1usize..12,
        from in any::<usize>(),
        to in any::<usize>(),
    ) {
        let mut store = make_store();
        for i in 0..count {
            store.create(&format!("task {i}"), None);
        }
        let (from, to) = (from % count, to % count);
        let before: Vec<_> = store.todos().iter().map(|t| t.id.clone()).collect();

        prop_assert!(store.reorder(from, to).is_ok());
        let after: Vec<_> = store.todos().iter().map(|t| t.id.clone()).collect();

        prop_assert_eq!(&after[to], &before[from]);
        let mut rest_before = before.clone();
        rest_before.remove(from);
        let mut rest_after = after.clone();
        rest_after.remove(to);
        prop_assert_eq!(rest_before, rest_after);
    }

    #[test]
    fn out_of_range_reorder_is_rejected(count in 0usize..8, extra in 0usize..8) {
        let mut store = make_store();
        for i in 0..count {
            store.create(&format!("task {i}"), None);
        }
        let revision = store.revision();
        prop_assert!(store.reorder(count + extra, 0).is_err());
        prop_assert_eq!(store.revision(), revision);
    }
}
