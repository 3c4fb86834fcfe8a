//! Scripted remote store for tests and development.
//!
//! [`ManualRemote`] never produces snapshots on its own. The test fires
//! them with [`emit`](ManualRemote::emit) / [`fail`](ManualRemote::fail),
//! addressing listeners by attach order. Callbacks stay reachable after a
//! listener is removed, so a test can replay a callback that was already in
//! flight when the consumer detached.
//!
//! Writes are recorded and succeed unless a failure was queued with
//! [`fail_next_write`](ManualRemote::fail_next_write).
//!
//! **Never use `ManualRemote` in production.**
//!
//! # Examples
//!
//! ```
//! use office_sync::locator::CollectionQuery;
//! use office_sync::remote::manual::ManualRemote;
//! use office_sync::remote::{RemoteStore, Snapshot};
//!
//! let remote = ManualRemote::new();
//! let mut registration = remote.listen(
//!     &CollectionQuery::new("tasks").into(),
//!     Box::new(|_snapshot| {}),
//!     Box::new(|_err| {}),
//! );
//! assert_eq!(remote.active_count(), 1);
//!
//! registration.remove();
//! assert_eq!(remote.active_count(), 0);
//! assert!(remote.is_removed(0));
//!
//! // The old callback can still be fired to simulate a late delivery.
//! assert!(remote.emit(0, Snapshot::Collection(vec![])));
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use super::{
    ErrorCallback, ListenerRegistration, RemoteError, RemoteStore, Snapshot, SnapshotCallback,
};
use crate::locator::{DocumentRef, Locator};

struct ManualListener {
    locator: Locator,
    on_snapshot: SnapshotCallback,
    on_error: ErrorCallback,
    removed: AtomicBool,
}

/// Kind of a recorded write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// `set`, with its merge flag.
    Set {
        /// Whether fields were merged.
        merge: bool,
    },
    /// `update`.
    Update,
    /// `add`.
    Add,
    /// `delete`.
    Delete,
}

/// A write received by [`ManualRemote`].
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    /// Kind of write.
    pub kind: WriteKind,
    /// Target document path.
    pub path: String,
    /// Payload, for everything but deletes.
    pub data: Option<Value>,
    /// Whether the write succeeded.
    pub succeeded: bool,
}

/// Remote store driven by the test.
#[derive(Default)]
pub struct ManualRemote {
    listeners: Mutex<Vec<Arc<ManualListener>>>,
    writes: Mutex<Vec<WriteRecord>>,
    write_failures: Mutex<VecDeque<RemoteError>>,
}

impl std::fmt::Debug for ManualRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualRemote")
            .field("listeners", &self.listen_count())
            .field("active", &self.active_count())
            .finish()
    }
}

impl ManualRemote {
    /// A remote with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    fn listener(&self, index: usize) -> Option<Arc<ManualListener>> {
        self.listeners.lock().get(index).cloned()
    }

    /// Number of `listen` calls so far.
    pub fn listen_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Number of listeners not yet removed.
    pub fn active_count(&self) -> usize {
        self.listeners
            .lock()
            .iter()
            .filter(|l| !l.removed.load(Ordering::SeqCst))
            .count()
    }

    /// Locator of the listener attached `index`-th.
    pub fn locator(&self, index: usize) -> Option<Locator> {
        self.listener(index).map(|l| l.locator.clone())
    }

    /// Returns `true` if the listener was removed (or never existed).
    pub fn is_removed(&self, index: usize) -> bool {
        self.listener(index)
            .is_none_or(|l| l.removed.load(Ordering::SeqCst))
    }

    /// Fires the snapshot callback of listener `index`, removed or not.
    ///
    /// Returns `false` if there is no such listener.
    pub fn emit(&self, index: usize, snapshot: Snapshot) -> bool {
        match self.listener(index) {
            Some(listener) => {
                (listener.on_snapshot)(snapshot);
                true
            },
            None => false,
        }
    }

    /// Fires the error callback of listener `index`, removed or not.
    pub fn fail(&self, index: usize, err: RemoteError) -> bool {
        match self.listener(index) {
            Some(listener) => {
                (listener.on_error)(err);
                true
            },
            None => false,
        }
    }

    /// Fires the snapshot callback of the most recent listener.
    pub fn emit_latest(&self, snapshot: Snapshot) -> bool {
        let count = self.listen_count();
        count > 0 && self.emit(count - 1, snapshot)
    }

    /// Queues a failure for the next write.
    pub fn fail_next_write(&self, err: RemoteError) {
        self.write_failures.lock().push_back(err);
    }

    /// Writes received so far.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.writes.lock().clone()
    }

    fn record(&self, kind: WriteKind, path: String, data: Option<Value>) -> Result<(), RemoteError> {
        let failure = self.write_failures.lock().pop_front();
        self.writes.lock().push(WriteRecord {
            kind,
            path,
            data,
            succeeded: failure.is_none(),
        });
        failure.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl RemoteStore for ManualRemote {
    fn listen(
        &self,
        locator: &Locator,
        on_snapshot: SnapshotCallback,
        on_error: ErrorCallback,
    ) -> ListenerRegistration {
        let listener = Arc::new(ManualListener {
            locator: locator.clone(),
            on_snapshot,
            on_error,
            removed: AtomicBool::new(false),
        });
        self.listeners.lock().push(Arc::clone(&listener));
        ListenerRegistration::new(move || {
            listener.removed.store(true, Ordering::SeqCst);
        })
    }

    async fn set(&self, doc: &DocumentRef, data: Value, merge: bool) -> Result<(), RemoteError> {
        self.record(WriteKind::Set { merge }, doc.path(), Some(data))
    }

    async fn update(&self, doc: &DocumentRef, patch: Value) -> Result<(), RemoteError> {
        self.record(WriteKind::Update, doc.path(), Some(patch))
    }

    async fn add(&self, collection: &str, data: Value) -> Result<DocumentRef, RemoteError> {
        let doc = DocumentRef::new(collection, Uuid::new_v4().simple().to_string());
        self.record(WriteKind::Add, doc.path(), Some(data))?;
        Ok(doc)
    }

    async fn delete(&self, doc: &DocumentRef) -> Result<(), RemoteError> {
        self.record(WriteKind::Delete, doc.path(), None)
    }
}
