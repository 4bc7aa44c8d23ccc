//! Task record types for the persisted collection.
//!
//! A [`Todo`] is stored as a flat camelCase JSON object. The base fields
//! (`id`, `text`, `completed`, `createdAt`) are always present; the
//! timestamps of later mutations and the extended attributes (description,
//! priority, category, due date) are optional and omitted when unset.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::de::{self, DeserializeOwned};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Opaque identifier of a task, unique within a collection.
///
/// Identifiers read from storage are arbitrary strings; identifiers minted
/// locally come from an injected generator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TodoId(String);

impl TodoId {
    /// Wraps an existing identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates an identifier from a UUID (hyphenated form).
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TodoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TodoId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A UTC instant with millisecond precision.
///
/// Serialized in the same shape as JavaScript's `Date.toISOString()`
/// (`2024-05-01T09:30:00.000Z`) so stored collections stay byte-stable
/// across a load/save cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current instant truncated to milliseconds.
    #[must_use]
    pub fn now() -> Self {
        let now = Utc::now();
        Self(DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    ///
    /// Returns `None` if the value is outside chrono's representable range.
    #[must_use]
    pub fn from_millis(millis: i64) -> Option<Self> {
        DateTime::from_timestamp_millis(millis).map(Self)
    }

    /// Returns milliseconds since the UNIX epoch.
    #[must_use]
    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Returns the underlying chrono value.
    #[must_use]
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DateTime::parse_from_rfc3339(s).map(|dt| Self(dt.with_timezone(&Utc)))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Error returned when parsing a [`Priority`] or [`Category`] name fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownVariant {
    /// Which enumeration was being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

/// Task priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

impl FromStr for Priority {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(UnknownVariant {
                kind: "priority",
                value: s.to_string(),
            }),
        }
    }
}

/// Task category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    Personal,
    Work,
    Shopping,
    Health,
    Other,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Personal => write!(f, "personal"),
            Self::Work => write!(f, "work"),
            Self::Shopping => write!(f, "shopping"),
            Self::Health => write!(f, "health"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl FromStr for Category {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "personal" => Ok(Self::Personal),
            "work" => Ok(Self::Work),
            "shopping" => Ok(Self::Shopping),
            "health" => Ok(Self::Health),
            "other" => Ok(Self::Other),
            _ => Err(UnknownVariant {
                kind: "category",
                value: s.to_string(),
            }),
        }
    }
}

/// Extended attributes supplied when creating a task from the detailed form.
///
/// Fields left at their defaults still end up on the record: a task created
/// with extras always carries all four attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoExtras {
    /// Free-form description, trimmed before storing (may be empty).
    pub description: String,
    /// Priority, `medium` unless set.
    pub priority: Priority,
    /// Category, `personal` unless set.
    pub category: Category,
    /// Optional due date.
    pub due_date: Option<NaiveDate>,
}

/// A single task record.
///
/// Reading is forgiving: optional attributes whose stored value cannot be
/// understood (including an explicit `null`) and keys this version does not
/// know are kept verbatim in [`Todo::extra`] and written back unchanged, so a
/// load/save cycle never loses data written by another client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "StoredTodo")]
pub struct Todo {
    /// Stable identifier.
    pub id: TodoId,
    /// Trimmed, non-empty task text. Older records may call it `title`.
    pub text: String,
    /// Completion flag.
    pub completed: bool,
    /// Creation instant. Records missing it are stamped at load time.
    pub created_at: Timestamp,
    /// Instant of the last edit or toggle.
    pub updated_at: Option<Timestamp>,
    /// Instant the task was last marked completed; cleared when reopened.
    pub completed_at: Option<Timestamp>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub category: Option<Category>,
    pub due_date: Option<NaiveDate>,
    /// Stored values passed through untouched, keyed by their JSON name.
    ///
    /// An entry named after an optional attribute is only written while that
    /// attribute is unset.
    pub extra: Map<String, Value>,
}

const UPDATED_AT: &str = "updatedAt";
const COMPLETED_AT: &str = "completedAt";
const DESCRIPTION: &str = "description";
const PRIORITY: &str = "priority";
const CATEGORY: &str = "category";
const DUE_DATE: &str = "dueDate";

impl Todo {
    /// Creates an active task with only the base fields set.
    ///
    /// The caller is responsible for passing already-trimmed, non-empty text.
    pub fn new(id: TodoId, text: impl Into<String>, created_at: Timestamp) -> Self {
        Self {
            id,
            text: text.into(),
            completed: false,
            created_at,
            updated_at: None,
            completed_at: None,
            description: None,
            priority: None,
            category: None,
            due_date: None,
            extra: Map::new(),
        }
    }

    /// Attaches the extended attributes, filling every one of them.
    #[must_use]
    pub fn with_extras(mut self, extras: TodoExtras) -> Self {
        self.set_description(extras.description.trim().to_string());
        self.set_priority(extras.priority);
        self.set_category(extras.category);
        self.set_due_date(extras.due_date);
        self
    }

    /// Sets the completion flag, maintaining `completedAt` and `updatedAt`.
    pub fn set_completed(&mut self, completed: bool, now: Timestamp) {
        self.completed = completed;
        self.completed_at = completed.then_some(now);
        self.updated_at = Some(now);
        self.extra.remove(COMPLETED_AT);
        self.extra.remove(UPDATED_AT);
    }

    pub fn set_description(&mut self, description: String) {
        self.description = Some(description);
        self.extra.remove(DESCRIPTION);
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = Some(priority);
        self.extra.remove(PRIORITY);
    }

    pub fn set_category(&mut self, category: Category) {
        self.category = Some(category);
        self.extra.remove(CATEGORY);
    }

    /// Sets or clears the due date. Clearing also drops an unreadable stored
    /// value, so the key disappears on the next save.
    pub fn set_due_date(&mut self, due_date: Option<NaiveDate>) {
        self.due_date = due_date;
        self.extra.remove(DUE_DATE);
    }

    /// Returns `true` if the task is not completed.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.completed
    }

    /// Returns `true` if the task has a due date strictly before `today`
    /// and is still active.
    #[must_use]
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.is_active() && self.due_date.is_some_and(|due| due < today)
    }

    /// Whether `key` is written from a typed field rather than from `extra`.
    fn shadows(&self, key: &str) -> bool {
        match key {
            "id" | "text" | "title" | "completed" | "createdAt" => true,
            UPDATED_AT => self.updated_at.is_some(),
            COMPLETED_AT => self.completed_at.is_some(),
            DESCRIPTION => self.description.is_some(),
            PRIORITY => self.priority.is_some(),
            CATEGORY => self.category.is_some(),
            DUE_DATE => self.due_date.is_some(),
            _ => false,
        }
    }
}

impl Serialize for Todo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("text", &self.text)?;
        map.serialize_entry("completed", &self.completed)?;
        map.serialize_entry("createdAt", &self.created_at)?;
        if let Some(updated_at) = &self.updated_at {
            map.serialize_entry(UPDATED_AT, updated_at)?;
        }
        if let Some(completed_at) = &self.completed_at {
            map.serialize_entry(COMPLETED_AT, completed_at)?;
        }
        if let Some(description) = &self.description {
            map.serialize_entry(DESCRIPTION, description)?;
        }
        if let Some(priority) = &self.priority {
            map.serialize_entry(PRIORITY, priority)?;
        }
        if let Some(category) = &self.category {
            map.serialize_entry(CATEGORY, category)?;
        }
        if let Some(due_date) = &self.due_date {
            map.serialize_entry(DUE_DATE, due_date)?;
        }
        for (key, value) in &self.extra {
            if !self.shadows(key) {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}

/// Wire shape of a record: the required fields, with everything else
/// collected for lenient decoding.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredTodo {
    id: TodoId,
    #[serde(alias = "title", deserialize_with = "non_empty_text")]
    text: String,
    completed: bool,
    #[serde(default = "Timestamp::now")]
    created_at: Timestamp,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl From<StoredTodo> for Todo {
    fn from(stored: StoredTodo) -> Self {
        let mut rest = stored.rest;
        Self {
            id: stored.id,
            text: stored.text,
            completed: stored.completed,
            created_at: stored.created_at,
            updated_at: take_lenient(&mut rest, UPDATED_AT),
            completed_at: take_lenient(&mut rest, COMPLETED_AT),
            description: take_lenient(&mut rest, DESCRIPTION),
            priority: take_lenient(&mut rest, PRIORITY),
            category: take_lenient(&mut rest, CATEGORY),
            due_date: take_lenient(&mut rest, DUE_DATE),
            extra: rest,
        }
    }
}

/// Rejects text that is empty after trimming and stores the trimmed form.
fn non_empty_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let raw = String::deserialize(deserializer)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(de::Error::custom("task text is empty"));
    }
    Ok(trimmed.to_string())
}

/// Optional attributes never invalidate a record: a value of the wrong
/// shape reads as absent and stays in `rest` untouched.
fn take_lenient<T: DeserializeOwned>(rest: &mut Map<String, Value>, key: &str) -> Option<T> {
    let parsed = T::deserialize(rest.get(key)?).ok()?;
    rest.remove(key);
    Some(parsed)
}
