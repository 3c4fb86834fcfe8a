//! Publish/subscribe bus for structured failure events.
//!
//! The component that detects a failure is rarely the one that should show
//! it. Bindings and remote writes publish on an [`ErrorChannel`]; a small,
//! fixed set of handlers registered at start-up decide what to do with each
//! event.
//!
//! # Dispatch
//!
//! - [`publish`](ErrorChannel::publish) runs every handler registered at the
//!   moment of the call, synchronously and in registration order.
//! - A handler that panics is logged and skipped; the remaining handlers
//!   still run and the publisher never observes the panic.
//! - The handler list is snapshotted before dispatch, so registering or
//!   deregistering during a dispatch only affects later publications.
//! - There is no buffering. A handler registered after an event was
//!   published never sees that event.
//!
//! # Lifecycle
//!
//! Channels are ordinary values. Create one at application start, clone it
//! into every publisher, and call [`clear`](ErrorChannel::clear) at shutdown.
//! Tests create their own isolated instances.
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use office_sync::{ErrorChannel, ErrorEvent, Operation, PermissionError};
//!
//! let channel = ErrorChannel::new();
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&seen);
//! let guard = channel.subscribe(move |_event: &ErrorEvent| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! channel.publish_permission(PermissionError::new("tasks", Operation::List));
//! assert_eq!(seen.load(Ordering::SeqCst), 1);
//!
//! guard.unsubscribe();
//! channel.publish_permission(PermissionError::new("tasks", Operation::List));
//! assert_eq!(seen.load(Ordering::SeqCst), 1);
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::permission::PermissionError;

/// A failure routed through the [`ErrorChannel`].
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum ErrorEvent {
    /// A remote operation was rejected by access policy.
    PermissionDenied(Arc<PermissionError>),
}

impl ErrorEvent {
    /// Returns the permission error carried by this event, if any.
    pub fn permission_error(&self) -> Option<&Arc<PermissionError>> {
        match self {
            Self::PermissionDenied(err) => Some(err),
        }
    }
}

type Handler = Arc<dyn Fn(&ErrorEvent) + Send + Sync>;

struct Registry {
    handlers: RwLock<Vec<(u64, Handler)>>,
    next_id: AtomicU64,
}

impl Registry {
    fn remove(&self, id: u64) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }
}

/// Process-scoped error bus. Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct ErrorChannel {
    registry: Arc<Registry>,
}

impl std::fmt::Debug for ErrorChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorChannel")
            .field("handlers_count", &self.handler_count())
            .finish()
    }
}

impl Default for ErrorChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorChannel {
    /// Creates an empty channel.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                handlers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Registers a handler and returns the guard that deregisters it.
    ///
    /// Dropping the guard deregisters the handler as well.
    pub fn subscribe<F>(&self, handler: F) -> HandlerGuard
    where
        F: Fn(&ErrorEvent) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.handlers.write().push((id, Arc::new(handler)));
        tracing::debug!(handler_id = id, "error channel handler registered");
        HandlerGuard {
            registry: Arc::downgrade(&self.registry),
            id,
            active: true,
        }
    }

    /// Delivers `event` to every currently registered handler.
    ///
    /// Returns the number of handlers that completed without panicking.
    pub fn publish(&self, event: ErrorEvent) -> usize {
        let snapshot: Vec<(u64, Handler)> = self.registry.handlers.read().clone();
        let mut delivered = 0;
        for (id, handler) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    tracing::error!(handler_id = id, "error channel handler panicked");
                },
            }
        }
        delivered
    }

    /// Wraps `error` in [`ErrorEvent::PermissionDenied`] and publishes it.
    pub fn publish_permission(&self, error: PermissionError) -> usize {
        self.publish(ErrorEvent::PermissionDenied(Arc::new(error)))
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.registry.handlers.read().len()
    }

    /// Removes every handler. Outstanding guards become no-ops.
    pub fn clear(&self) {
        self.registry.handlers.write().clear();
    }
}

/// Deregistration capability returned by [`ErrorChannel::subscribe`].
#[must_use = "dropping the guard deregisters the handler"]
#[derive(Debug)]
pub struct HandlerGuard {
    registry: Weak<Registry>,
    id: u64,
    active: bool,
}

impl HandlerGuard {
    /// Deregisters the handler.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !std::mem::take(&mut self.active) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            if registry.remove(self.id) {
                tracing::debug!(handler_id = self.id, "error channel handler removed");
            }
        }
    }
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::Operation;
    use parking_lot::Mutex;

    fn denial() -> ErrorEvent {
        ErrorEvent::PermissionDenied(Arc::new(PermissionError::new("tasks", Operation::List)))
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let channel = ErrorChannel::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut guards = Vec::new();
        for n in 0..3 {
            let order = Arc::clone(&order);
            guards.push(channel.subscribe(move |_| order.lock().push(n)));
        }

        assert_eq!(channel.publish(denial()), 3);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn panicking_handler_does_not_stop_dispatch() {
        let channel = ErrorChannel::new();
        let ran = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&ran);
        let _a = channel.subscribe(move |_| first.lock().push("a"));
        let _b = channel.subscribe(|_| panic!("handler failure"));
        let last = Arc::clone(&ran);
        let _c = channel.subscribe(move |_| last.lock().push("c"));

        assert_eq!(channel.publish(denial()), 2);
        assert_eq!(*ran.lock(), vec!["a", "c"]);
    }

    #[test]
    fn dropping_guard_deregisters() {
        let channel = ErrorChannel::new();
        let guard = channel.subscribe(|_| {});
        assert_eq!(channel.handler_count(), 1);
        drop(guard);
        assert_eq!(channel.handler_count(), 0);
    }

    #[test]
    fn unsubscribe_during_dispatch_keeps_current_dispatch() {
        let channel = ErrorChannel::new();
        let hits = Arc::new(Mutex::new(Vec::new()));
        let slot: Arc<Mutex<Option<HandlerGuard>>> = Arc::new(Mutex::new(None));

        let remover_slot = Arc::clone(&slot);
        let _remover = channel.subscribe(move |_| {
            if let Some(guard) = remover_slot.lock().take() {
                guard.unsubscribe();
            }
        });
        let second_hits = Arc::clone(&hits);
        *slot.lock() = Some(channel.subscribe(move |_| second_hits.lock().push(1)));

        channel.publish(denial());
        assert_eq!(hits.lock().len(), 1);

        channel.publish(denial());
        assert_eq!(hits.lock().len(), 1);
    }

    #[test]
    fn late_subscribers_see_no_replay() {
        let channel = ErrorChannel::new();
        channel.publish(denial());

        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        let _guard = channel.subscribe(move |_| *counter.lock() += 1);
        assert_eq!(*hits.lock(), 0);
    }

    #[test]
    fn clear_makes_guards_noops() {
        let channel = ErrorChannel::new();
        let guard = channel.subscribe(|_| {});
        channel.clear();
        assert_eq!(channel.handler_count(), 0);
        guard.unsubscribe();
        assert_eq!(channel.publish(denial()), 0);
    }

    #[test]
    fn guard_outliving_channel_is_harmless() {
        let guard = {
            let channel = ErrorChannel::new();
            channel.subscribe(|_| {})
        };
        guard.unsubscribe();
    }
}
