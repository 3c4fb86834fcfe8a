//! Non-blocking remote writes.
//!
//! [`RemoteWriter`] spawns each write on the tokio runtime and returns a
//! [`PendingWrite`] immediately. The caller may await it or drop it; either
//! way a denial is turned into a [`PermissionError`] carrying the rejected
//! payload and published on the [`ErrorChannel`]. Other failures are only
//! logged.
//!
//! Denials are tagged as follows:
//!
//! | call     | operation |
//! |----------|-----------|
//! | `set`    | `create` (`update` when merging) |
//! | `update` | `update`  |
//! | `add`    | `create`  |
//! | `delete` | `delete`  |

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::channel::{ErrorChannel, ErrorEvent};
use crate::error::{Error, Result};
use crate::locator::DocumentRef;
use crate::permission::{Operation, PermissionError};
use crate::remote::{RemoteError, RemoteStore};

/// A write running in the background.
#[derive(Debug)]
#[must_use = "dropping a PendingWrite does not cancel it; await it to observe the outcome"]
pub struct PendingWrite<T> {
    handle: Option<JoinHandle<Result<T>>>,
}

impl<T: Send + 'static> PendingWrite<T> {
    /// Waits for the write to finish.
    ///
    /// # Errors
    ///
    /// The write's own error, or [`RemoteError::Unavailable`] if it never
    /// ran (no runtime, or the task was aborted).
    pub async fn wait(self) -> Result<T> {
        let Some(handle) = self.handle else {
            return Err(Error::Remote(RemoteError::Unavailable {
                message: "no tokio runtime to run the write".to_string(),
            }));
        };
        match handle.await {
            Ok(result) => result,
            Err(join) => Err(Error::Remote(RemoteError::Unavailable {
                message: format!("write task failed: {join}"),
            })),
        }
    }

    /// Returns `true` once the write has completed.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

/// Fire-and-forget writes against a [`RemoteStore`].
#[derive(Clone)]
pub struct RemoteWriter {
    remote: Arc<dyn RemoteStore>,
    channel: ErrorChannel,
}

impl std::fmt::Debug for RemoteWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteWriter")
            .field("channel", &self.channel)
            .finish()
    }
}

impl RemoteWriter {
    /// Writer publishing denials on `channel`.
    pub fn new(remote: Arc<dyn RemoteStore>, channel: ErrorChannel) -> Self {
        Self { remote, channel }
    }

    /// Writes `data` to `doc`, replacing it unless `merge` is set.
    pub fn set(&self, doc: DocumentRef, data: Value, merge: bool) -> PendingWrite<()> {
        let operation = if merge {
            Operation::Update
        } else {
            Operation::Create
        };
        let remote = Arc::clone(&self.remote);
        let path = doc.path();
        let payload = data.clone();
        self.spawn(operation, path, payload, async move {
            remote.set(&doc, data, merge).await
        })
    }

    /// Merges `patch` into the existing document `doc`.
    pub fn update(&self, doc: DocumentRef, patch: Value) -> PendingWrite<()> {
        let remote = Arc::clone(&self.remote);
        let path = doc.path();
        let payload = patch.clone();
        self.spawn(Operation::Update, path, payload, async move {
            remote.update(&doc, patch).await
        })
    }

    /// Adds a document with a generated id to `collection`.
    pub fn add(&self, collection: impl Into<String>, data: Value) -> PendingWrite<DocumentRef> {
        let remote = Arc::clone(&self.remote);
        let collection = collection.into();
        let path = collection.clone();
        let payload = data.clone();
        self.spawn(Operation::Create, path, payload, async move {
            remote.add(&collection, data).await
        })
    }

    /// Deletes `doc`.
    pub fn delete(&self, doc: DocumentRef) -> PendingWrite<()> {
        let remote = Arc::clone(&self.remote);
        let path = doc.path();
        self.spawn(Operation::Delete, path, Value::Null, async move {
            remote.delete(&doc).await
        })
    }

    fn spawn<T, F>(
        &self,
        operation: Operation,
        path: String,
        payload: Value,
        write: F,
    ) -> PendingWrite<T>
    where
        T: Send + 'static,
        F: Future<Output = std::result::Result<T, RemoteError>> + Send + 'static,
    {
        let Ok(runtime) = Handle::try_current() else {
            tracing::error!(path = %path, %operation, "no tokio runtime; write dropped");
            return PendingWrite { handle: None };
        };

        let channel = self.channel.clone();
        let handle = runtime.spawn(async move {
            match write.await {
                Ok(value) => {
                    tracing::debug!(path = %path, %operation, "write applied");
                    Ok(value)
                },
                Err(err) if err.is_denial() => {
                    let denial = Arc::new(if operation == Operation::Delete {
                        PermissionError::new(path, operation)
                    } else {
                        PermissionError::with_payload(path, operation, payload)
                    });
                    channel.publish(ErrorEvent::PermissionDenied(Arc::clone(&denial)));
                    Err(Error::PermissionDenied(denial))
                },
                Err(err) => {
                    tracing::warn!(path = %path, %operation, error = %err, "write failed");
                    Err(Error::Remote(err))
                },
            }
        });
        PendingWrite {
            handle: Some(handle),
        }
    }
}
