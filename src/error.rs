//! Crate-level error type.
//!
//! [`Error`] covers the failures the synchronization layer surfaces to its
//! callers directly. Remote failures keep their own classification in
//! [`RemoteError`]; access-policy denials carry the full
//! [`PermissionError`] so callers can inspect the rejected request.

use std::sync::Arc;

use crate::config::ConfigError;
use crate::model::TaskId;
use crate::permission::PermissionError;
use crate::remote::RemoteError;

/// Errors returned by store, binding and configuration operations.
///
/// # Examples
///
/// ```
/// use office_sync::{Error, TaskId};
///
/// let err = Error::UnknownTask {
///     task_id: TaskId::from("missing"),
/// };
/// assert!(err.to_string().contains("missing"));
/// assert!(err.is_contract_violation());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `update` or `remove` named a task the store does not hold.
    #[error("unknown task: {task_id}")]
    UnknownTask {
        /// The identifier that did not match any record.
        task_id: TaskId,
    },

    /// `insert` tried to add a second record under an existing identifier.
    #[error("duplicate task: {task_id}")]
    DuplicateTask {
        /// The identifier that is already present.
        task_id: TaskId,
    },

    /// The remote layer rejected the operation because of access policy.
    #[error(transparent)]
    PermissionDenied(Arc<PermissionError>),

    /// Any other failure reported by the remote document store.
    #[error("remote failure: {0}")]
    Remote(#[from] RemoteError),

    /// A snapshot document could not be decoded into the requested type.
    #[error("failed to decode document {path}: {message}")]
    Decode {
        /// Path of the offending document.
        path: String,
        /// Decoder message.
        message: String,
    },

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// Returns `true` if this error is an access-policy denial.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }

    /// Returns `true` for caller programming errors (unknown or duplicate ids).
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::UnknownTask { .. } | Self::DuplicateTask { .. })
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
