//! The single application-wide consumer of the [`ErrorChannel`].
//!
//! Bindings and writers never decide how a denial is shown. The
//! [`GlobalListener`] is registered once at start-up and applies a
//! [`SurfacePolicy`]:
//!
//! | Policy     | Effect                                                      |
//! |------------|-------------------------------------------------------------|
//! | `Log`      | `tracing::warn!` with the denied request                    |
//! | `Boundary` | logs, and parks the first pending error for the top-level boundary |
//! | `Toast`    | logs, and queues a [`Toast`] (bounded, oldest dropped first) |

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::channel::{ErrorChannel, ErrorEvent, HandlerGuard};
use crate::permission::PermissionError;

/// How the global listener surfaces a denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfacePolicy {
    /// Log only.
    Log,
    /// Hand the error to the application's top-level error boundary.
    #[default]
    Boundary,
    /// Queue a user-facing notification.
    Toast,
}

impl std::str::FromStr for SurfacePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "log" => Ok(Self::Log),
            "boundary" => Ok(Self::Boundary),
            "toast" => Ok(Self::Toast),
            other => Err(format!("unknown surface policy: {other}")),
        }
    }
}

/// A queued user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    /// Short headline.
    pub title: String,
    /// Body text.
    pub message: String,
}

impl Toast {
    fn for_denial(err: &PermissionError) -> Self {
        Self {
            title: "Access denied".to_string(),
            message: format!(
                "You do not have permission to {} {}.",
                err.operation(),
                err.path()
            ),
        }
    }
}

#[derive(Debug, Default)]
struct Surfaces {
    pending: Option<Arc<PermissionError>>,
    toasts: VecDeque<Toast>,
}

/// Shared state behind the listener; the registered handler holds a clone.
#[derive(Debug)]
struct Inner {
    policy: SurfacePolicy,
    toast_capacity: usize,
    surfaces: Mutex<Surfaces>,
}

impl Inner {
    fn handle(&self, event: &ErrorEvent) {
        let Some(err) = event.permission_error() else {
            return;
        };
        tracing::warn!(
            path = err.path(),
            operation = %err.operation(),
            request = %err.request(),
            "permission denied"
        );

        let mut surfaces = self.surfaces.lock();
        match self.policy {
            SurfacePolicy::Log => {},
            SurfacePolicy::Boundary => {
                if surfaces.pending.is_none() {
                    surfaces.pending = Some(Arc::clone(err));
                }
            },
            SurfacePolicy::Toast => {
                if self.toast_capacity == 0 {
                    return;
                }
                while surfaces.toasts.len() >= self.toast_capacity {
                    surfaces.toasts.pop_front();
                }
                surfaces.toasts.push_back(Toast::for_denial(err));
            },
        }
    }
}

/// The global error listener.
///
/// # Examples
///
/// ```
/// use office_sync::{ErrorChannel, GlobalListener, Operation, PermissionError, SurfacePolicy};
///
/// let channel = ErrorChannel::new();
/// let listener = GlobalListener::install(&channel, SurfacePolicy::Boundary, 16);
///
/// channel.publish_permission(PermissionError::new("users", Operation::List));
///
/// let pending = listener.take_pending().expect("boundary receives the denial");
/// assert_eq!(pending.path(), "users");
/// assert!(listener.take_pending().is_none());
/// ```
#[derive(Debug)]
pub struct GlobalListener {
    inner: Arc<Inner>,
    _guard: HandlerGuard,
}

impl GlobalListener {
    /// Registers the listener on `channel`. Dropping it deregisters.
    pub fn install(channel: &ErrorChannel, policy: SurfacePolicy, toast_capacity: usize) -> Self {
        let inner = Arc::new(Inner {
            policy,
            toast_capacity,
            surfaces: Mutex::new(Surfaces::default()),
        });
        let handler = Arc::clone(&inner);
        let guard = channel.subscribe(move |event| handler.handle(event));
        tracing::info!(?policy, "global error listener installed");
        Self {
            inner,
            _guard: guard,
        }
    }

    /// The active policy.
    pub fn policy(&self) -> SurfacePolicy {
        self.inner.policy
    }

    /// Takes the error parked for the top-level boundary, if any.
    pub fn take_pending(&self) -> Option<Arc<PermissionError>> {
        self.inner.surfaces.lock().pending.take()
    }

    /// Drains queued toasts, oldest first.
    pub fn drain_toasts(&self) -> Vec<Toast> {
        self.inner.surfaces.lock().toasts.drain(..).collect()
    }
}
