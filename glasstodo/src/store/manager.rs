//! Task store for collection CRUD, ordering and derived views.
//!
//! `TodoStore` provides the application-layer interface the presentation
//! layer calls into. Mutations install a fresh collection snapshot and bump
//! [`revision`](TodoStore::revision), so callers detect changes by comparing
//! revisions instead of diffing contents.

use std::collections::HashSet;
use std::sync::Arc;

use glasstodo_proto::{Timestamp, Todo, TodoExtras, TodoId};

use super::{StoreError, TodoPatch};
use crate::ids::{IdGenerator, UuidIdGenerator};
use crate::view::{Filter, Stats};

/// Owns the ordered task collection.
pub struct TodoStore {
    /// Current snapshot, newest first. Replaced wholesale on every mutation.
    todos: Arc<Vec<Todo>>,
    /// Incremented once per effective mutation.
    revision: u64,
    /// Source of ids for new tasks.
    ids: Arc<dyn IdGenerator>,
}

impl Default for TodoStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TodoStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TodoStore")
            .field("len", &self.todos.len())
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}

impl TodoStore {
    /// Creates an empty store that mints UUID v7 ids.
    #[must_use]
    pub fn new() -> Self {
        Self::with_id_generator(Arc::new(UuidIdGenerator))
    }

    /// Creates an empty store using the given id strategy.
    #[must_use]
    pub fn with_id_generator(ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            todos: Arc::new(Vec::new()),
            revision: 0,
            ids,
        }
    }

    /// Creates a task and prepends it to the collection.
    ///
    /// `text` is trimmed; if nothing is left the call is a no-op and returns
    /// `None`. When `extras` is given, every extended attribute is set,
    /// defaults filling the gaps.
    pub fn create(&mut self, text: &str, extras: Option<TodoExtras>) -> Option<TodoId> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let id = self.fresh_id();
        let mut todo = Todo::new(id.clone(), text, Timestamp::now());
        if let Some(extras) = extras {
            todo = todo.with_extras(extras);
        }

        let mut next = Vec::with_capacity(self.todos.len() + 1);
        next.push(todo);
        next.extend(self.todos.iter().cloned());
        self.commit(next);
        Some(id)
    }

    /// Flips the completion flag of a task.
    ///
    /// Returns `false` (and changes nothing) if no task has this id.
    pub fn toggle(&mut self, id: &TodoId) -> bool {
        let Some(index) = self.position(id) else {
            return false;
        };
        let now = Timestamp::now();
        let mut next = self.todos.as_ref().clone();
        let completed = !next[index].completed;
        next[index].set_completed(completed, now);
        self.commit(next);
        true
    }

    /// Replaces a task's text with the trimmed `new_text`.
    ///
    /// No-op if the id is unknown or the trimmed text is empty. Saving text
    /// identical to the current text is also a no-op on purpose: the task
    /// keeps its `updatedAt`, the revision does not move, and nothing is
    /// saved, the same as closing the editor without changes. Never alters
    /// `id`, `createdAt` or `completed`.
    pub fn edit(&mut self, id: &TodoId, new_text: &str) -> bool {
        self.update(
            id,
            TodoPatch {
                text: Some(new_text.to_string()),
                ..TodoPatch::default()
            },
        )
    }

    /// Applies a partial update to a task.
    ///
    /// No-op if the id is unknown, the patch is empty, the patch carries
    /// text that is blank after trimming, or nothing would change.
    pub fn update(&mut self, id: &TodoId, patch: TodoPatch) -> bool {
        if patch.is_empty() {
            return false;
        }
        let text = match patch.text.as_deref().map(str::trim) {
            Some("") => return false,
            other => other.map(str::to_string),
        };
        let Some(index) = self.position(id) else {
            return false;
        };

        let mut updated = self.todos[index].clone();
        if let Some(text) = text {
            updated.text = text;
        }
        if let Some(description) = patch.description {
            updated.set_description(description.trim().to_string());
        }
        if let Some(priority) = patch.priority {
            updated.set_priority(priority);
        }
        if let Some(category) = patch.category {
            updated.set_category(category);
        }
        if let Some(due_date) = patch.due_date {
            updated.set_due_date(due_date);
        }
        if updated == self.todos[index] {
            return false;
        }
        updated.updated_at = Some(Timestamp::now());

        let mut next = self.todos.as_ref().clone();
        next[index] = updated;
        self.commit(next);
        true
    }

    /// Removes a task. Returns `false` if no task has this id.
    pub fn delete(&mut self, id: &TodoId) -> bool {
        if self.position(id).is_none() {
            return false;
        }
        let next = self.todos.iter().filter(|t| t.id != *id).cloned().collect();
        self.commit(next);
        true
    }

    /// Removes every completed task, returning how many were removed.
    pub fn clear_completed(&mut self) -> usize {
        let removed = self.todos.iter().filter(|t| t.completed).count();
        if removed > 0 {
            let next = self.todos.iter().filter(|t| !t.completed).cloned().collect();
            self.commit(next);
        }
        removed
    }

    /// Marks every task active if all are completed, otherwise marks every
    /// task completed.
    ///
    /// An empty collection is left alone and `false` is returned.
    pub fn toggle_all(&mut self) -> bool {
        if self.todos.is_empty() {
            return false;
        }
        let target = !self.all_completed();
        let now = Timestamp::now();
        let next = self
            .todos
            .iter()
            .cloned()
            .map(|mut todo| {
                if todo.completed != target {
                    todo.set_completed(target, now);
                }
                todo
            })
            .collect();
        self.commit(next);
        true
    }

    /// Moves the element at `from` to position `to`, shifting the elements
    /// in between. The relative order of all other elements is preserved.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::IndexOutOfRange`] if either index is not a
    /// valid position in the current collection.
    pub fn reorder(&mut self, from: usize, to: usize) -> Result<(), StoreError> {
        let len = self.todos.len();
        for index in [from, to] {
            if index >= len {
                return Err(StoreError::IndexOutOfRange { index, len });
            }
        }
        if from == to {
            return Ok(());
        }
        let mut next = self.todos.as_ref().clone();
        let moved = next.remove(from);
        next.insert(to, moved);
        self.commit(next);
        Ok(())
    }

    /// Installs a collection read from storage or received from another tab.
    ///
    /// Records with blank text and later duplicates of an id are dropped;
    /// the number dropped is returned. The text of kept records is trimmed.
    pub fn replace_all(&mut self, todos: Vec<Todo>) -> usize {
        let total = todos.len();
        let mut seen = HashSet::with_capacity(total);
        let next: Vec<Todo> = todos
            .into_iter()
            .filter_map(|mut todo| {
                let trimmed = todo.text.trim();
                if trimmed.is_empty() || !seen.insert(todo.id.clone()) {
                    return None;
                }
                if trimmed.len() != todo.text.len() {
                    todo.text = trimmed.to_string();
                }
                Some(todo)
            })
            .collect();
        let dropped = total - next.len();
        self.commit(next);
        dropped
    }

    /// Returns the tasks matching `filter`, in collection order.
    #[must_use]
    pub fn filtered_view(&self, filter: Filter) -> Vec<&Todo> {
        self.todos.iter().filter(|t| filter.matches(t)).collect()
    }

    /// Returns total, active and completed counts.
    #[must_use]
    pub fn stats(&self) -> Stats {
        Stats::of(&self.todos)
    }

    /// Returns `true` if the collection is non-empty and every task is
    /// completed.
    #[must_use]
    pub fn all_completed(&self) -> bool {
        !self.todos.is_empty() && self.todos.iter().all(|t| t.completed)
    }

    /// Looks up a task by id.
    #[must_use]
    pub fn get(&self, id: &TodoId) -> Option<&Todo> {
        self.todos.iter().find(|t| t.id == *id)
    }

    /// Returns the whole collection, newest first.
    #[must_use]
    pub fn todos(&self) -> &[Todo] {
        &self.todos
    }

    /// Returns a shared handle to the current snapshot.
    ///
    /// The snapshot is never mutated; a later mutation installs a new one.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<Todo>> {
        Arc::clone(&self.todos)
    }

    /// Number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.todos.len()
    }

    /// Returns `true` if there are no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.todos.is_empty()
    }

    /// Number of effective mutations since the store was created.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    fn position(&self, id: &TodoId) -> Option<usize> {
        self.todos.iter().position(|t| t.id == *id)
    }

    /// Draws ids until one is not already in the collection. Ids loaded from
    /// storage may come from another generator, so collisions are possible.
    fn fresh_id(&self) -> TodoId {
        loop {
            let id = self.ids.next_id();
            if self.position(&id).is_none() {
                return id;
            }
            tracing::debug!(id = %id, "generated id already in use, drawing another");
        }
    }

    fn commit(&mut self, next: Vec<Todo>) {
        self.todos = Arc::new(next);
        self.revision += 1;
    }
}
