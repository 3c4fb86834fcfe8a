//! Typed description of an operation rejected by access policy.
//!
//! A [`PermissionError`] is built exactly once, at the point where the
//! remote layer reports a denial, and is never mutated afterwards. It names
//! the resource path, the [`Operation`] that was attempted and, for
//! write-class operations, the payload that was rejected.
//!
//! The error renders the request as JSON so that whoever ends up surfacing
//! it (a log line, a toast, an error boundary) can show exactly what was
//! denied:
//!
//! ```text
//! missing or insufficient permissions: the following request was denied by access policy:
//! {"path":"tasks/t-1","operation":"update","requestResourceData":{"status":"done"}}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of remote operation that was attempted.
///
/// `Get` and `List` are reads; `Create`, `Update` and `Delete` are writes
/// and carry the rejected payload in [`PermissionError::payload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Read of a single document.
    Get,
    /// Read of a collection query.
    List,
    /// Creation of a new document.
    Create,
    /// Modification of an existing document.
    Update,
    /// Removal of a document.
    Delete,
}

impl Operation {
    /// Returns `true` for `Create`, `Update` and `Delete`.
    ///
    /// # Examples
    ///
    /// ```
    /// use office_sync::Operation;
    ///
    /// assert!(Operation::Update.is_write());
    /// assert!(!Operation::List.is_write());
    /// ```
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "get"),
            Self::List => write!(f, "list"),
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// An operation denied by access-policy evaluation.
///
/// Fields are private so the value stays exactly as it was constructed;
/// channel subscribers receive it behind an `Arc`.
///
/// # Examples
///
/// ```
/// use office_sync::{Operation, PermissionError};
/// use serde_json::json;
///
/// let read = PermissionError::new("tasks", Operation::List);
/// assert_eq!(read.path(), "tasks");
/// assert!(read.payload().is_none());
///
/// let write = PermissionError::with_payload(
///     "tasks/t-1",
///     Operation::Update,
///     json!({ "status": "done" }),
/// );
/// assert_eq!(write.payload(), Some(&json!({ "status": "done" })));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionError {
    path: String,
    operation: Operation,
    #[serde(rename = "requestResourceData", skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
}

impl PermissionError {
    /// Creates a denial without a payload.
    pub fn new(path: impl Into<String>, operation: Operation) -> Self {
        Self {
            path: path.into(),
            operation,
            payload: None,
        }
    }

    /// Creates a denial carrying the rejected payload.
    ///
    /// Read operations never carry payloads; for `Get` and `List` the
    /// payload is dropped.
    pub fn with_payload(path: impl Into<String>, operation: Operation, payload: Value) -> Self {
        Self {
            path: path.into(),
            operation,
            payload: operation.is_write().then_some(payload),
        }
    }

    /// Resource path the denied operation targeted.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The denied operation.
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Snapshot of the rejected write payload, if any.
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// The denied request as a JSON value for diagnostics.
    pub fn request(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl fmt::Display for PermissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "missing or insufficient permissions: the following request was denied by access policy:\n{}",
            self.request()
        )
    }
}

impl std::error::Error for PermissionError {}
