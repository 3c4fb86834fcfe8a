//! Task and user records.
//!
//! Records are plain data. Identity of a [`Task`] is its [`TaskId`]; the
//! [`TaskStore`](crate::store::TaskStore) keeps exactly one record per id.
//! A [`User`]'s id equals the authentication key of the person it
//! describes.
//!
//! On the remote side the id is the document id and is not repeated in the
//! document body; [`FromDocument`] and [`Task::to_document_data`] handle the
//! conversion at that boundary.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::identity::Role;
use crate::remote::Document;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// The id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Stable identifier of a task, assigned at creation.
    TaskId
);

string_id!(
    /// Stable identifier of a user; equals the authentication key.
    UserId
);

impl TaskId {
    /// A fresh random (v4 UUID) id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Progress of a task: not started, in progress, done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not picked up yet.
    #[default]
    NotStarted,
    /// Being worked on.
    InProgress,
    /// Finished.
    Done,
}

impl TaskStatus {
    /// All statuses in progression order.
    pub const ALL: [TaskStatus; 3] = [Self::NotStarted, Self::InProgress, Self::Done];

    /// The next status in the progression. `Done` stays `Done`.
    ///
    /// # Examples
    ///
    /// ```
    /// use office_sync::TaskStatus;
    ///
    /// assert_eq!(TaskStatus::NotStarted.advance(), TaskStatus::InProgress);
    /// assert_eq!(TaskStatus::Done.advance(), TaskStatus::Done);
    /// ```
    pub fn advance(self) -> Self {
        match self {
            Self::NotStarted => Self::InProgress,
            Self::InProgress | Self::Done => Self::Done,
        }
    }

    /// Returns `true` for `Done`.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Urgency of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Whenever.
    Low,
    /// Normal.
    #[default]
    Medium,
    /// Urgent.
    High,
}

/// A task assigned to a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique, stable id.
    pub id: TaskId,
    /// Short title.
    pub title: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
    /// Progress.
    #[serde(default)]
    pub status: TaskStatus,
    /// Urgency.
    #[serde(default)]
    pub priority: Priority,
    /// The user the task is assigned to.
    pub assignee_id: UserId,
    /// The user who created the task.
    pub created_by: UserId,
    /// Optional due date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Builds a record from `new` under `id`, stamped with the current time.
    pub fn from_new(id: TaskId, new: NewTask) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: new.title,
            description: new.description,
            status: new.status,
            priority: new.priority,
            assignee_id: new.assignee_id,
            created_by: new.created_by,
            due_date: new.due_date,
            created_at: now,
            updated_at: now,
        }
    }

    /// Document body for the remote store (the id is the document id).
    pub fn to_document_data(&self) -> Value {
        to_document_data(self)
    }

    /// Returns `true` if the task is assigned to `user`.
    pub fn is_assigned_to(&self, user: &UserId) -> bool {
        &self.assignee_id == user
    }
}

/// A task before it has an id.
///
/// # Examples
///
/// ```
/// use office_sync::{NewTask, Priority};
///
/// let new = NewTask::new("Quarterly report", "bob")
///     .with_description("Collect numbers from finance")
///     .with_priority(Priority::High)
///     .created_by("admin");
/// assert_eq!(new.assignee_id.as_str(), "bob");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    /// Short title.
    pub title: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
    /// Initial progress.
    #[serde(default)]
    pub status: TaskStatus,
    /// Urgency.
    #[serde(default)]
    pub priority: Priority,
    /// The user the task is assigned to.
    pub assignee_id: UserId,
    /// The user creating the task.
    pub created_by: UserId,
    /// Optional due date.
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

impl NewTask {
    /// A not-started, medium-priority task assigned to `assignee`.
    ///
    /// `created_by` defaults to the assignee until set.
    pub fn new(title: impl Into<String>, assignee: impl Into<UserId>) -> Self {
        let assignee_id = assignee.into();
        Self {
            title: title.into(),
            description: String::new(),
            status: TaskStatus::NotStarted,
            priority: Priority::Medium,
            created_by: assignee_id.clone(),
            assignee_id,
            due_date: None,
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the initial status.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the due date.
    pub fn with_due_date(mut self, due: NaiveDate) -> Self {
        self.due_date = Some(due);
        self
    }

    /// Sets the creator.
    pub fn created_by(mut self, creator: impl Into<UserId>) -> Self {
        self.created_by = creator.into();
        self
    }
}

/// A person who can sign in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Equals the authentication key.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Contact address.
    pub email: String,
    /// Role; immutable once the user exists.
    pub role: Role,
    /// Avatar reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl User {
    /// Document body for the remote store.
    pub fn to_document_data(&self) -> Value {
        to_document_data(self)
    }
}

/// Decoding of remote documents into records.
pub trait FromDocument: Sized + Send + Sync + 'static {
    /// Builds `Self` from a document, using its id where the type needs one.
    ///
    /// # Errors
    ///
    /// Returns the decoder error if the body does not match the type.
    fn from_document(doc: Document) -> Result<Self, serde_json::Error>;
}

/// Deserializes a document body with its id injected as the `id` field.
fn decode_with_id<T: DeserializeOwned>(doc: Document) -> Result<T, serde_json::Error> {
    let mut data = doc.data;
    if let Value::Object(fields) = &mut data {
        fields.insert("id".to_string(), Value::String(doc.id));
    }
    serde_json::from_value(data)
}

fn to_document_data<T: Serialize>(record: &T) -> Value {
    let mut data = serde_json::to_value(record).unwrap_or(Value::Null);
    if let Value::Object(fields) = &mut data {
        fields.remove("id");
    }
    data
}

impl FromDocument for Task {
    fn from_document(doc: Document) -> Result<Self, serde_json::Error> {
        decode_with_id(doc)
    }
}

impl FromDocument for User {
    fn from_document(doc: Document) -> Result<Self, serde_json::Error> {
        decode_with_id(doc)
    }
}

/// A document decoded into `T` alongside its id.
#[derive(Debug, Clone, PartialEq)]
pub struct WithId<T> {
    /// Document id.
    pub id: String,
    /// Decoded body.
    pub data: T,
}

impl<T: DeserializeOwned + Send + Sync + 'static> FromDocument for WithId<T> {
    fn from_document(doc: Document) -> Result<Self, serde_json::Error> {
        Ok(Self {
            data: serde_json::from_value(doc.data)?,
            id: doc.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample_task() -> Task {
        Task::from_new(
            TaskId::from("t-1"),
            NewTask::new("Write summary", "alice").created_by("root"),
        )
    }

    #[test]
    fn generated_ids_are_distinct() {
        assert_ne!(TaskId::generate(), TaskId::generate());
    }

    #[test]
    fn document_data_omits_id() {
        let data = sample_task().to_document_data();
        assert!(data.get("id").is_none());
        assert_eq!(data["assignee_id"], json!("alice"));
        assert_eq!(data["status"], json!("not_started"));
    }

    #[test]
    fn task_decodes_from_document() {
        let task = sample_task();
        let doc = Document::new("t-1", task.to_document_data());
        let decoded = Task::from_document(doc).unwrap();
        assert_eq!(decoded, task);
    }

    #[test]
    fn task_decode_applies_defaults() {
        let doc = Document::new(
            "t-2",
            json!({
                "title": "Minimal",
                "assignee_id": "bob",
                "created_by": "root",
                "created_at": "2025-01-01T00:00:00Z",
                "updated_at": "2025-01-01T00:00:00Z"
            }),
        );
        let task = Task::from_document(doc).unwrap();
        assert_eq!(task.id.as_str(), "t-2");
        assert_eq!(task.status, TaskStatus::NotStarted);
        assert_eq!(task.priority, Priority::Medium);
        assert!(task.description.is_empty());
    }

    #[test]
    fn user_decode_rejects_unknown_role() {
        let doc = Document::new(
            "carol",
            json!({"name": "Carol", "email": "c@example.com", "role": "owner"}),
        );
        assert!(User::from_document(doc).is_err());
    }

    #[test]
    fn with_id_keeps_document_id() {
        let doc = Document::new("x", json!({"n": 1}));
        let decoded = WithId::<Value>::from_document(doc).unwrap();
        assert_eq!(decoded.id, "x");
        assert_eq!(decoded.data, json!({"n": 1}));
    }

    #[test]
    fn status_progression() {
        assert_eq!(TaskStatus::InProgress.advance(), TaskStatus::Done);
        assert!(TaskStatus::Done.is_done());
        assert_eq!(TaskStatus::ALL.len(), 3);
    }
}
