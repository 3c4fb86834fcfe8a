//! Subscription engine: live local mirrors of remote locators.
//!
//! A [`Binding`] owns at most one remote listener and publishes its state
//! through a `tokio::sync::watch` channel, so every reader sees either the
//! previous or the next [`BindingState`], never a partial update.
//!
//! # Lifecycle
//!
//! ```text
//! retarget(None)      -> idle      (loading=false, value=None, no listener)
//! retarget(Some(L))   -> loading   (loading=true,  value=None, listener on L)
//! first snapshot      -> attached  (loading=false, value=Some(..))
//! denial / failure    -> failed    (loading=false, value=None, error=Some(..))
//! detach / drop       -> listener removed; late callbacks are discarded
//! ```
//!
//! Retargeting to a different locator removes the old listener before the
//! new one is attached. Retargeting to an equal locator is a no-op.
//!
//! # Generations
//!
//! Each attachment gets a generation number. Remote callbacks carry the
//! generation they were registered under and are applied only while it is
//! still current; the check and the state update happen under one lock, so
//! a callback racing a detach is either fully applied before it or dropped.
//!
//! # Denials
//!
//! A denial builds a [`PermissionError`] tagged with the locator's
//! operation (`list` for queries, `get` for documents), stores it on the
//! binding and publishes it once on the [`ErrorChannel`]. Other remote
//! failures only set the local error.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::channel::{ErrorChannel, ErrorEvent};
use crate::error::Error;
use crate::locator::{CollectionQuery, DocumentRef, Locator};
use crate::model::FromDocument;
use crate::permission::PermissionError;
use crate::remote::{ListenerRegistration, RemoteError, RemoteStore, Snapshot};

/// Why a binding has no value.
#[derive(Debug, Clone, PartialEq)]
pub enum BindingError {
    /// The remote layer denied the read.
    PermissionDenied(Arc<PermissionError>),
    /// Transport or other non-policy failure.
    Remote(RemoteError),
    /// A snapshot did not decode into the bound type.
    Decode {
        /// Locator path.
        path: String,
        /// Decoder message.
        message: String,
    },
}

impl BindingError {
    /// Returns `true` for access-policy denials.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

impl From<BindingError> for Error {
    fn from(err: BindingError) -> Self {
        match err {
            BindingError::PermissionDenied(denial) => Error::PermissionDenied(denial),
            BindingError::Remote(remote) => Error::Remote(remote),
            BindingError::Decode { path, message } => Error::Decode { path, message },
        }
    }
}

/// Observable state of a binding.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingState<V> {
    /// Last decoded snapshot; `None` while unset.
    pub value: Option<V>,
    /// `true` until the first snapshot or failure after attaching.
    pub loading: bool,
    /// Last failure, cleared by the next snapshot.
    pub error: Option<BindingError>,
}

impl<V> BindingState<V> {
    fn idle() -> Self {
        Self {
            value: None,
            loading: false,
            error: None,
        }
    }

    fn pending() -> Self {
        Self {
            value: None,
            loading: true,
            error: None,
        }
    }
}

/// A type a snapshot can be decoded into.
///
/// Implemented for `Vec<T>` (collection queries) and `Option<T>` (single
/// documents, `None` when the document does not exist).
pub trait SnapshotShape: Clone + Send + Sync + 'static {
    /// Decodes `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns a message when the snapshot kind does not match the shape or
    /// a document does not decode.
    fn decode(snapshot: Snapshot) -> Result<Self, String>;
}

impl<T: FromDocument + Clone> SnapshotShape for Vec<T> {
    fn decode(snapshot: Snapshot) -> Result<Self, String> {
        match snapshot {
            Snapshot::Collection(documents) => documents
                .into_iter()
                .map(|doc| {
                    let id = doc.id.clone();
                    T::from_document(doc).map_err(|e| format!("document {id}: {e}"))
                })
                .collect(),
            Snapshot::Document(_) => {
                Err("expected a collection snapshot, got a document".to_string())
            },
        }
    }
}

impl<T: FromDocument + Clone> SnapshotShape for Option<T> {
    fn decode(snapshot: Snapshot) -> Result<Self, String> {
        match snapshot {
            Snapshot::Document(Some(doc)) => {
                let id = doc.id.clone();
                T::from_document(doc)
                    .map(Some)
                    .map_err(|e| format!("document {id}: {e}"))
            },
            Snapshot::Document(None) => Ok(None),
            Snapshot::Collection(_) => {
                Err("expected a document snapshot, got a collection".to_string())
            },
        }
    }
}

struct Shared<V> {
    state: watch::Sender<BindingState<V>>,
    generation: Mutex<u64>,
}

impl<V> Shared<V> {
    /// Starts a new generation and resets the state; returns the generation.
    fn begin(&self, state: BindingState<V>) -> u64 {
        let mut generation = self.generation.lock();
        *generation += 1;
        self.state.send_replace(state);
        *generation
    }

    /// Applies `update` if `generation` is still current.
    fn apply(&self, generation: u64, update: impl FnOnce(&mut BindingState<V>)) -> bool {
        let current = self.generation.lock();
        if *current != generation {
            return false;
        }
        self.state.send_modify(update);
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        *self.generation.lock() == generation
    }

    /// Invalidates the current generation.
    fn retire(&self) {
        let mut generation = self.generation.lock();
        *generation += 1;
        self.state.send_if_modified(|state| std::mem::replace(&mut state.loading, false));
    }
}

struct Attachment {
    locator: Locator,
    registration: ListenerRegistration,
}

/// A live mirror of one locator's remote state.
///
/// Dropping the binding detaches it.
pub struct Binding<V: SnapshotShape> {
    shared: Arc<Shared<V>>,
    remote: Arc<dyn RemoteStore>,
    channel: ErrorChannel,
    active: Mutex<Option<Attachment>>,
}

impl<V: SnapshotShape> std::fmt::Debug for Binding<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("locator", &self.locator())
            .field("loading", &self.shared.state.borrow().loading)
            .finish()
    }
}

impl<V: SnapshotShape> Binding<V> {
    fn new(remote: Arc<dyn RemoteStore>, channel: ErrorChannel) -> Self {
        let (state, _rx) = watch::channel(BindingState::idle());
        Self {
            shared: Arc::new(Shared {
                state,
                generation: Mutex::new(0),
            }),
            remote,
            channel,
            active: Mutex::new(None),
        }
    }

    /// Current state.
    pub fn state(&self) -> BindingState<V> {
        self.shared.state.borrow().clone()
    }

    /// Current value, if any.
    pub fn value(&self) -> Option<V> {
        self.shared.state.borrow().value.clone()
    }

    /// Returns `true` while waiting for the first snapshot.
    pub fn is_loading(&self) -> bool {
        self.shared.state.borrow().loading
    }

    /// Last failure, if any.
    pub fn error(&self) -> Option<BindingError> {
        self.shared.state.borrow().error.clone()
    }

    /// A receiver notified on every state change, across retargets.
    pub fn watch(&self) -> watch::Receiver<BindingState<V>> {
        self.shared.state.subscribe()
    }

    /// The locator currently attached.
    pub fn locator(&self) -> Option<Locator> {
        self.active.lock().as_ref().map(|a| a.locator.clone())
    }

    /// Returns `true` while a remote listener is registered.
    pub fn is_attached(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|a| a.registration.is_attached())
    }

    /// Waits until the binding is no longer loading and returns the state.
    pub async fn settled(&self) -> BindingState<V> {
        let mut rx = self.watch();
        let settled = match rx.wait_for(|state| !state.loading).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        settled
    }

    /// Points the binding at `locator`.
    ///
    /// An equal locator keeps the current attachment. Otherwise the old
    /// listener is removed first; `None` leaves the binding idle.
    pub fn retarget(&self, locator: Option<Locator>) {
        let previous = {
            let mut active = self.active.lock();
            if active.as_ref().map(|a| &a.locator) == locator.as_ref() {
                if locator.is_none() {
                    self.shared.begin(BindingState::idle());
                }
                return;
            }
            active.take()
        };

        let Some(locator) = locator else {
            self.shared.begin(BindingState::idle());
            if let Some(mut previous) = previous {
                previous.registration.remove();
                tracing::debug!(locator = %previous.locator, "binding cleared");
            }
            return;
        };

        let generation = self.shared.begin(BindingState::pending());
        if let Some(mut previous) = previous {
            previous.registration.remove();
            tracing::debug!(from = %previous.locator, to = %locator, "binding retargeted");
        }

        let registration = self.remote.listen(
            &locator,
            snapshot_callback(Arc::downgrade(&self.shared), generation, locator.path()),
            error_callback(
                Arc::downgrade(&self.shared),
                generation,
                self.channel.clone(),
                &locator,
            ),
        );

        let mut active = self.active.lock();
        if self.shared.is_current(generation) {
            tracing::debug!(%locator, generation, "binding attached");
            *active = Some(Attachment {
                locator,
                registration,
            });
        } else {
            drop(active);
            drop(registration);
        }
    }

    /// Removes the remote listener. Idempotent.
    ///
    /// The last value stays readable; callbacks still in flight for the old
    /// listener are discarded.
    pub fn detach(&self) {
        let attachment = self.active.lock().take();
        self.shared.retire();
        let Some(mut attachment) = attachment else {
            return;
        };
        attachment.registration.remove();
        tracing::debug!(locator = %attachment.locator, "binding detached");
    }
}

impl<V: SnapshotShape> Drop for Binding<V> {
    fn drop(&mut self) {
        self.detach();
    }
}

fn snapshot_callback<V: SnapshotShape>(
    shared: Weak<Shared<V>>,
    generation: u64,
    path: String,
) -> Box<dyn Fn(Snapshot) + Send + Sync> {
    Box::new(move |snapshot| {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let decoded = V::decode(snapshot);
        let applied = shared.apply(generation, |state| {
            state.loading = false;
            match decoded {
                Ok(value) => {
                    state.value = Some(value);
                    state.error = None;
                },
                Err(message) => {
                    tracing::warn!(path = %path, %message, "snapshot failed to decode");
                    state.value = None;
                    state.error = Some(BindingError::Decode {
                        path: path.clone(),
                        message,
                    });
                },
            }
        });
        if !applied {
            tracing::trace!(path = %path, generation, "discarded snapshot for retired binding");
        }
    })
}

fn error_callback<V: SnapshotShape>(
    shared: Weak<Shared<V>>,
    generation: u64,
    channel: ErrorChannel,
    locator: &Locator,
) -> Box<dyn Fn(RemoteError) + Send + Sync> {
    let path = locator.path();
    let operation = locator.operation();
    Box::new(move |err| {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let failure = if err.is_denial() {
            BindingError::PermissionDenied(Arc::new(PermissionError::new(path.clone(), operation)))
        } else {
            tracing::warn!(path = %path, error = %err, "listener failed");
            BindingError::Remote(err)
        };

        let applied = shared.apply(generation, |state| {
            state.value = None;
            state.loading = false;
            state.error = Some(failure.clone());
        });
        if !applied {
            tracing::trace!(path = %path, generation, "discarded failure for retired binding");
            return;
        }
        if let BindingError::PermissionDenied(denial) = failure {
            channel.publish(ErrorEvent::PermissionDenied(denial));
        }
    })
}

/// Creates bindings against one remote store and error channel.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use office_sync::binding::SubscriptionEngine;
/// use office_sync::locator::CollectionQuery;
/// use office_sync::remote::memory::MemoryRemote;
/// use office_sync::{ErrorChannel, Task};
///
/// let engine = SubscriptionEngine::new(Arc::new(MemoryRemote::new()), ErrorChannel::new());
///
/// let idle = engine.collection::<Task>(None);
/// assert!(!idle.is_loading());
/// assert!(idle.value().is_none());
///
/// let live = engine.collection::<Task>(Some(CollectionQuery::new("tasks")));
/// assert_eq!(live.value(), Some(vec![]));
/// ```
#[derive(Clone)]
pub struct SubscriptionEngine {
    remote: Arc<dyn RemoteStore>,
    channel: ErrorChannel,
}

impl std::fmt::Debug for SubscriptionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionEngine")
            .field("channel", &self.channel)
            .finish()
    }
}

impl SubscriptionEngine {
    /// Engine publishing denials on `channel`.
    pub fn new(remote: Arc<dyn RemoteStore>, channel: ErrorChannel) -> Self {
        Self { remote, channel }
    }

    /// Binds `locator`; `None` yields an idle binding with no listener.
    pub fn subscribe<V: SnapshotShape>(&self, locator: Option<Locator>) -> Binding<V> {
        let binding = Binding::new(Arc::clone(&self.remote), self.channel.clone());
        binding.retarget(locator);
        binding
    }

    /// Binds a collection query.
    pub fn collection<T: FromDocument + Clone>(
        &self,
        query: Option<CollectionQuery>,
    ) -> Binding<Vec<T>> {
        self.subscribe(query.map(Locator::from))
    }

    /// Binds a single document.
    pub fn document<T: FromDocument + Clone>(
        &self,
        doc: Option<DocumentRef>,
    ) -> Binding<Option<T>> {
        self.subscribe(doc.map(Locator::from))
    }

    /// The channel denials are published on.
    pub fn channel(&self) -> &ErrorChannel {
        &self.channel
    }

    /// The remote store bindings attach to.
    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }
}
