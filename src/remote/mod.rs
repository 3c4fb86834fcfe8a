//! Remote document-store collaborator.
//!
//! # Architecture
//!
//! The synchronization layer never talks to a wire protocol directly. It
//! sees a [`RemoteStore`]:
//!
//! 1. **Listening** -- [`RemoteStore::listen`] attaches a live listener for a
//!    [`Locator`] and returns a [`ListenerRegistration`]. The store calls
//!    `on_snapshot` with every new [`Snapshot`] and `on_error` at most once
//!    when the listener fails; a failed listener delivers nothing further.
//! 2. **Writing** -- `set`, `update`, `add` and `delete` are async and
//!    report failures as [`RemoteError`].
//!
//! [`RemoteError::PermissionDenied`] is reserved for access-policy
//! rejections. Every other variant is a transport or state failure and must
//! not be reported as a permission error.
//!
//! # Implementations
//!
//! - [`MemoryRemote`](memory::MemoryRemote) -- in-process store with an
//!   [`AccessPolicy`](policy::AccessPolicy), used for local runs and tests.
//! - [`ManualRemote`](manual::ManualRemote) -- scripted remote whose
//!   callbacks are fired by the test itself, including after removal.

pub mod manual;
pub mod memory;
pub mod policy;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::locator::{DocumentRef, Locator};

/// A document as delivered by the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Document id (last path segment).
    pub id: String,
    /// Document fields.
    pub data: Value,
}

impl Document {
    /// Creates a document.
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }
}

/// Remote state delivered to a listener.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    /// Result of a collection query, in query order.
    Collection(Vec<Document>),
    /// A single document; `None` when it does not exist.
    Document(Option<Document>),
}

/// Failures reported by the remote store.
///
/// # Examples
///
/// ```
/// use office_sync::remote::RemoteError;
///
/// let denied = RemoteError::PermissionDenied { message: "rules".to_string() };
/// assert!(denied.is_denial());
///
/// let offline = RemoteError::Unavailable { message: "offline".to_string() };
/// assert!(!offline.is_denial());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Rejected by access-policy evaluation.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Message from the policy layer.
        message: String,
    },

    /// An update targeted a document that does not exist.
    #[error("document not found: {path}")]
    NotFound {
        /// Path of the missing document.
        path: String,
    },

    /// The backend is unreachable.
    #[error("remote unavailable: {message}")]
    Unavailable {
        /// Human-readable description.
        message: String,
    },

    /// Any other transport failure (timeouts, protocol errors).
    #[error("transport error: {message}")]
    Transport {
        /// Human-readable description.
        message: String,
    },
}

impl RemoteError {
    /// Returns `true` only for access-policy denials.
    pub fn is_denial(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }
}

/// Callback receiving snapshots.
pub type SnapshotCallback = Box<dyn Fn(Snapshot) + Send + Sync>;

/// Callback receiving the terminal listener failure.
pub type ErrorCallback = Box<dyn Fn(RemoteError) + Send + Sync>;

/// Handle that unregisters a live listener.
///
/// [`remove`](Self::remove) is idempotent and also runs on drop.
#[must_use = "dropping the registration removes the listener"]
pub struct ListenerRegistration {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

impl ListenerRegistration {
    /// Wraps the function that unregisters the listener.
    pub fn new<F>(detach: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// A registration with nothing to remove (e.g. the listener failed on attach).
    pub fn noop() -> Self {
        Self { detach: None }
    }

    /// Unregisters the listener; later calls do nothing.
    pub fn remove(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }

    /// Returns `true` until [`remove`](Self::remove) has run.
    pub fn is_attached(&self) -> bool {
        self.detach.is_some()
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Document-store interface used by bindings and writers.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; callbacks may be invoked from any
/// thread.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Attaches a live listener for `locator`.
    fn listen(
        &self,
        locator: &Locator,
        on_snapshot: SnapshotCallback,
        on_error: ErrorCallback,
    ) -> ListenerRegistration;

    /// Writes `data` to `doc`. With `merge`, top-level fields are merged into
    /// an existing document instead of replacing it.
    async fn set(&self, doc: &DocumentRef, data: Value, merge: bool) -> Result<(), RemoteError>;

    /// Merges `patch` into an existing document.
    ///
    /// # Errors
    ///
    /// [`RemoteError::NotFound`] if the document does not exist.
    async fn update(&self, doc: &DocumentRef, patch: Value) -> Result<(), RemoteError>;

    /// Creates a document with a generated id in `collection`.
    async fn add(&self, collection: &str, data: Value) -> Result<DocumentRef, RemoteError>;

    /// Removes a document. Removing a missing document succeeds.
    async fn delete(&self, doc: &DocumentRef) -> Result<(), RemoteError>;
}

/// Merges the top-level fields of `patch` into `target`.
///
/// Non-object values replace `target` outright.
pub(crate) fn merge_fields(target: &mut Value, patch: Value) {
    match (target.as_object_mut(), patch) {
        (Some(existing), Value::Object(fields)) => {
            for (key, value) in fields {
                existing.insert(key, value);
            }
        },
        (_, patch) => *target = patch,
    }
}
