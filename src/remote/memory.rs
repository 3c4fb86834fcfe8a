//! In-process remote store with access-policy evaluation.
//!
//! [`MemoryRemote`] keeps collections in a `DashMap<String, IndexMap<..>>`
//! (insertion order is query order unless the query sorts). Every listen
//! and write is checked against an [`AccessPolicy`] for the identity set
//! with [`MemoryRemote::set_auth`].
//!
//! # Delivery
//!
//! - `listen` delivers the initial snapshot before returning.
//! - Every successful write re-delivers to the live listeners of the
//!   touched collection (document listeners only for the touched id).
//! - Changing the identity re-evaluates live listeners; listeners that are
//!   no longer allowed receive one `PermissionDenied` and are dropped.
//!
//! No map guard is held while callbacks run, so callbacks may call back
//! into the store.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use office_sync::locator::CollectionQuery;
//! use office_sync::remote::memory::MemoryRemote;
//! use office_sync::remote::{RemoteStore, Snapshot};
//! use serde_json::json;
//!
//! let remote = MemoryRemote::new();
//! remote.seed("tasks", "t-1", json!({"title": "Plan offsite"}));
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//! let _registration = remote.listen(
//!     &CollectionQuery::new("tasks").into(),
//!     Box::new(move |snapshot| sink.lock().push(snapshot)),
//!     Box::new(|_err| {}),
//! );
//! assert!(matches!(&seen.lock()[0], Snapshot::Collection(docs) if docs.len() == 1));
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use uuid::Uuid;

use super::policy::{AccessPolicy, AccessRequest, AllowAll};
use super::{
    merge_fields, Document, ErrorCallback, ListenerRegistration, RemoteError, RemoteStore,
    Snapshot, SnapshotCallback,
};
use crate::identity::Identity;
use crate::locator::{DocumentRef, Locator};
use crate::permission::Operation;

struct Listener {
    locator: Locator,
    on_snapshot: SnapshotCallback,
    on_error: ErrorCallback,
}

struct Inner {
    collections: DashMap<String, IndexMap<String, Value>>,
    listeners: DashMap<u64, Arc<Listener>>,
    next_listener: AtomicU64,
    policy: Box<dyn AccessPolicy>,
    auth: RwLock<Option<Identity>>,
    listen_failures: Mutex<VecDeque<RemoteError>>,
    write_failures: Mutex<VecDeque<RemoteError>>,
}

/// Thread-safe in-memory document store.
pub struct MemoryRemote {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MemoryRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRemote")
            .field("collections", &self.inner.collections.len())
            .field("listeners", &self.inner.listeners.len())
            .finish()
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// An empty store that allows everything.
    pub fn new() -> Self {
        Self::with_policy(AllowAll)
    }

    /// An empty store enforcing `policy`.
    pub fn with_policy(policy: impl AccessPolicy + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                collections: DashMap::new(),
                listeners: DashMap::new(),
                next_listener: AtomicU64::new(1),
                policy: Box::new(policy),
                auth: RwLock::new(None),
                listen_failures: Mutex::new(VecDeque::new()),
                write_failures: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Sets the identity policy checks run against and re-evaluates live
    /// listeners.
    pub fn set_auth(&self, identity: Option<Identity>) {
        *self.inner.auth.write() = identity;

        let listeners: Vec<(u64, Arc<Listener>)> = self
            .inner
            .listeners
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        for (id, listener) in listeners {
            if let Err(err) = self.inner.check_read(&listener.locator) {
                self.inner.listeners.remove(&id);
                tracing::debug!(listener = id, locator = %listener.locator, "listener revoked");
                (listener.on_error)(err);
            }
        }
    }

    /// Writes a document without policy checks (administrative seeding).
    pub fn seed(&self, collection: &str, id: &str, data: Value) {
        self.inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data);
        self.inner.notify(collection, id);
    }

    /// Current body of a document.
    pub fn document(&self, collection: &str, id: &str) -> Option<Value> {
        self.inner
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id).cloned())
    }

    /// Number of documents in `collection`.
    pub fn collection_len(&self, collection: &str) -> usize {
        self.inner
            .collections
            .get(collection)
            .map_or(0, |docs| docs.len())
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Makes the next `listen` fail with `err` instead of attaching.
    pub fn fail_next_listen(&self, err: RemoteError) {
        self.inner.listen_failures.lock().push_back(err);
    }

    /// Makes the next write fail with `err`.
    pub fn fail_next_write(&self, err: RemoteError) {
        self.inner.write_failures.lock().push_back(err);
    }
}

fn denied(operation: Operation, path: &str) -> RemoteError {
    RemoteError::PermissionDenied {
        message: format!("{operation} on {path} rejected by access policy"),
    }
}

impl Inner {
    fn check(&self, request: AccessRequest<'_>, path: &str) -> Result<(), RemoteError> {
        if self.policy.allows(&request) {
            Ok(())
        } else {
            tracing::debug!(path, operation = %request.operation, "access policy denied request");
            Err(denied(request.operation, path))
        }
    }

    fn check_read(&self, locator: &Locator) -> Result<(), RemoteError> {
        let auth = self.auth.read().clone();
        match locator {
            Locator::Collection(query) => self.check(
                AccessRequest {
                    auth: auth.as_ref(),
                    operation: Operation::List,
                    collection: query.collection(),
                    document_id: None,
                    query: Some(query),
                    existing: None,
                    incoming: None,
                },
                query.collection(),
            ),
            Locator::Document(doc) => {
                let existing = self.get(doc);
                self.check(
                    AccessRequest {
                        auth: auth.as_ref(),
                        operation: Operation::Get,
                        collection: doc.collection(),
                        document_id: Some(doc.id()),
                        query: None,
                        existing: existing.as_ref(),
                        incoming: None,
                    },
                    &doc.path(),
                )
            },
        }
    }

    fn check_write(
        &self,
        operation: Operation,
        doc: &DocumentRef,
        existing: Option<&Value>,
        incoming: Option<&Value>,
    ) -> Result<(), RemoteError> {
        if let Some(err) = self.write_failures.lock().pop_front() {
            return Err(err);
        }
        let auth = self.auth.read().clone();
        self.check(
            AccessRequest {
                auth: auth.as_ref(),
                operation,
                collection: doc.collection(),
                document_id: Some(doc.id()),
                query: None,
                existing,
                incoming,
            },
            &doc.path(),
        )
    }

    fn get(&self, doc: &DocumentRef) -> Option<Value> {
        self.collections
            .get(doc.collection())
            .and_then(|docs| docs.get(doc.id()).cloned())
    }

    fn snapshot(&self, locator: &Locator) -> Snapshot {
        match locator {
            Locator::Collection(query) => {
                let documents = match self.collections.get(query.collection()) {
                    Some(docs) => {
                        let rows: Vec<(&str, &Value)> =
                            docs.iter().map(|(id, data)| (id.as_str(), data)).collect();
                        query
                            .apply(rows)
                            .into_iter()
                            .map(|(id, data)| Document::new(id, data.clone()))
                            .collect()
                    },
                    None => Vec::new(),
                };
                Snapshot::Collection(documents)
            },
            Locator::Document(doc) => {
                Snapshot::Document(self.get(doc).map(|data| Document::new(doc.id(), data)))
            },
        }
    }

    fn notify(&self, collection: &str, id: &str) {
        let targets: Vec<Arc<Listener>> = self
            .listeners
            .iter()
            .filter(|entry| match &entry.value().locator {
                Locator::Collection(query) => query.collection() == collection,
                Locator::Document(doc) => doc.collection() == collection && doc.id() == id,
            })
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for listener in targets {
            let snapshot = self.snapshot(&listener.locator);
            (listener.on_snapshot)(snapshot);
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    fn listen(
        &self,
        locator: &Locator,
        on_snapshot: SnapshotCallback,
        on_error: ErrorCallback,
    ) -> ListenerRegistration {
        let injected = self.inner.listen_failures.lock().pop_front();
        if let Some(err) = injected.or_else(|| self.inner.check_read(locator).err()) {
            on_error(err);
            return ListenerRegistration::noop();
        }

        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        let listener = Arc::new(Listener {
            locator: locator.clone(),
            on_snapshot,
            on_error,
        });
        self.inner.listeners.insert(id, Arc::clone(&listener));
        tracing::debug!(listener = id, %locator, "listener attached");

        (listener.on_snapshot)(self.inner.snapshot(locator));

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        ListenerRegistration::new(move || {
            if let Some(inner) = weak.upgrade() {
                if inner.listeners.remove(&id).is_some() {
                    tracing::debug!(listener = id, "listener removed");
                }
            }
        })
    }

    async fn set(&self, doc: &DocumentRef, data: Value, merge: bool) -> Result<(), RemoteError> {
        let existing = self.inner.get(doc);
        let operation = if existing.is_some() {
            Operation::Update
        } else {
            Operation::Create
        };
        self.inner
            .check_write(operation, doc, existing.as_ref(), Some(&data))?;

        let stored = match (existing, merge) {
            (Some(mut current), true) => {
                merge_fields(&mut current, data);
                current
            },
            _ => data,
        };
        self.inner
            .collections
            .entry(doc.collection().to_string())
            .or_default()
            .insert(doc.id().to_string(), stored);
        self.inner.notify(doc.collection(), doc.id());
        Ok(())
    }

    async fn update(&self, doc: &DocumentRef, patch: Value) -> Result<(), RemoteError> {
        let existing = self.inner.get(doc);
        self.inner
            .check_write(Operation::Update, doc, existing.as_ref(), Some(&patch))?;
        let Some(mut current) = existing else {
            return Err(RemoteError::NotFound { path: doc.path() });
        };
        merge_fields(&mut current, patch);
        self.inner
            .collections
            .entry(doc.collection().to_string())
            .or_default()
            .insert(doc.id().to_string(), current);
        self.inner.notify(doc.collection(), doc.id());
        Ok(())
    }

    async fn add(&self, collection: &str, data: Value) -> Result<DocumentRef, RemoteError> {
        let doc = DocumentRef::new(collection, Uuid::new_v4().simple().to_string());
        self.inner
            .check_write(Operation::Create, &doc, None, Some(&data))?;
        self.inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(doc.id().to_string(), data);
        self.inner.notify(collection, doc.id());
        Ok(doc)
    }

    async fn delete(&self, doc: &DocumentRef) -> Result<(), RemoteError> {
        let existing = self.inner.get(doc);
        self.inner
            .check_write(Operation::Delete, doc, existing.as_ref(), None)?;
        let removed = self
            .inner
            .collections
            .get_mut(doc.collection())
            .and_then(|mut docs| docs.shift_remove(doc.id()));
        if removed.is_some() {
            self.inner.notify(doc.collection(), doc.id());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;
    use crate::locator::CollectionQuery;
    use crate::remote::policy::OfficePolicy;
    use serde_json::json;

    type Log = Arc<Mutex<Vec<Result<Snapshot, RemoteError>>>>;

    fn attach(remote: &MemoryRemote, locator: Locator) -> (Log, ListenerRegistration) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let snapshots = Arc::clone(&log);
        let errors = Arc::clone(&log);
        let registration = remote.listen(
            &locator,
            Box::new(move |s| snapshots.lock().push(Ok(s))),
            Box::new(move |e| errors.lock().push(Err(e))),
        );
        (log, registration)
    }

    fn ids(snapshot: &Snapshot) -> Vec<String> {
        match snapshot {
            Snapshot::Collection(docs) => docs.iter().map(|d| d.id.clone()).collect(),
            Snapshot::Document(doc) => doc.iter().map(|d| d.id.clone()).collect(),
        }
    }

    #[tokio::test]
    async fn writes_redeliver_to_collection_listeners() {
        let remote = MemoryRemote::new();
        let (log, _registration) = attach(&remote, CollectionQuery::new("tasks").into());

        remote
            .set(&DocumentRef::new("tasks", "a"), json!({"n": 1}), false)
            .await
            .unwrap();
        remote.add("tasks", json!({"n": 2})).await.unwrap();

        let log = log.lock();
        assert_eq!(log.len(), 3);
        assert!(matches!(&log[0], Ok(s) if ids(s).is_empty()));
        assert!(matches!(&log[2], Ok(s) if ids(s).len() == 2));
    }

    #[tokio::test]
    async fn document_listener_ignores_other_documents() {
        let remote = MemoryRemote::new();
        let (log, _registration) = attach(&remote, DocumentRef::new("users", "alice").into());

        remote
            .set(&DocumentRef::new("users", "bob"), json!({}), false)
            .await
            .unwrap();
        assert_eq!(log.lock().len(), 1);

        remote
            .set(&DocumentRef::new("users", "alice"), json!({"name": "A"}), false)
            .await
            .unwrap();
        assert_eq!(log.lock().len(), 2);
    }

    #[tokio::test]
    async fn removed_listener_receives_nothing() {
        let remote = MemoryRemote::new();
        let (log, mut registration) = attach(&remote, CollectionQuery::new("tasks").into());
        registration.remove();
        assert_eq!(remote.listener_count(), 0);

        remote.add("tasks", json!({})).await.unwrap();
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn denied_listen_reports_permission_error() {
        let remote = MemoryRemote::with_policy(OfficePolicy::new("tasks", "users"));
        remote.set_auth(Some(Identity::new("alice", Role::Employee)));

        let (log, registration) = attach(&remote, CollectionQuery::new("tasks").into());
        assert!(!registration.is_attached());
        assert_eq!(remote.listener_count(), 0);
        assert!(matches!(&log.lock()[0], Err(e) if e.is_denial()));
    }

    #[test]
    fn sign_out_revokes_listeners() {
        let remote = MemoryRemote::with_policy(OfficePolicy::new("tasks", "users"));
        remote.set_auth(Some(Identity::new("root", Role::Admin)));
        let (log, _registration) = attach(&remote, CollectionQuery::new("users").into());

        remote.set_auth(None);
        assert_eq!(remote.listener_count(), 0);
        let log = log.lock();
        assert_eq!(log.len(), 2);
        assert!(matches!(&log[1], Err(e) if e.is_denial()));
    }

    #[test]
    fn injected_listen_failure_is_not_a_denial() {
        let remote = MemoryRemote::new();
        remote.fail_next_listen(RemoteError::Unavailable {
            message: "offline".into(),
        });
        let (log, _registration) = attach(&remote, CollectionQuery::new("tasks").into());
        assert!(matches!(&log.lock()[0], Err(e) if !e.is_denial()));
    }

    #[tokio::test]
    async fn update_requires_existing_document() {
        let remote = MemoryRemote::new();
        let result = remote
            .update(&DocumentRef::new("tasks", "nope"), json!({"x": 1}))
            .await;
        assert_eq!(
            result,
            Err(RemoteError::NotFound {
                path: "tasks/nope".into()
            })
        );
    }

    #[tokio::test]
    async fn merge_set_keeps_other_fields() {
        let remote = MemoryRemote::new();
        let doc = DocumentRef::new("users", "bob");
        remote.seed("users", "bob", json!({"name": "Bob", "role": "employee"}));
        remote.set(&doc, json!({"name": "Robert"}), true).await.unwrap();
        assert_eq!(
            remote.document("users", "bob"),
            Some(json!({"name": "Robert", "role": "employee"}))
        );
    }

    #[tokio::test]
    async fn delete_removes_document() {
        let remote = MemoryRemote::new();
        remote.seed("tasks", "t", json!({}));
        remote.delete(&DocumentRef::new("tasks", "t")).await.unwrap();
        assert_eq!(remote.collection_len("tasks"), 0);
        remote.delete(&DocumentRef::new("tasks", "t")).await.unwrap();
    }
}
