//! Keeps a [`TaskStore`] in step with the remote store.
//!
//! [`StoreSync`] runs one tokio task that follows the authentication state
//! and retargets three bindings accordingly:
//!
//! | identity | tasks                           | users            | own profile      |
//! |----------|---------------------------------|------------------|------------------|
//! | admin    | whole tasks collection          | users by name    | `users/{key}`    |
//! | employee | tasks where `assignee_id = key` | none             | `users/{key}`    |
//! | none     | none                            | none             | none             |
//!
//! Each snapshot is republished into the store. Signing out, or switching
//! to another key or role, clears the store first so nothing read under the
//! previous identity survives. A denied task query also clears the local
//! tasks.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::binding::{Binding, BindingError, BindingState, SubscriptionEngine};
use crate::config::SyncConfig;
use crate::identity::{AuthState, Identity};
use crate::locator::{CollectionQuery, Direction, DocumentRef};
use crate::model::{Task, User};
use crate::remote::policy::ASSIGNEE_FIELD;
use crate::store::TaskStore;

/// Locators the sync task binds for one identity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SyncTargets {
    /// Task query.
    pub tasks: Option<CollectionQuery>,
    /// User directory query.
    pub users: Option<CollectionQuery>,
    /// The signed-in user's own record.
    pub profile: Option<DocumentRef>,
}

impl SyncTargets {
    /// Targets for `identity`; all `None` when signed out.
    pub fn for_identity(identity: Option<&Identity>, config: &SyncConfig) -> Self {
        let Some(identity) = identity else {
            return Self::default();
        };
        let profile = Some(DocumentRef::new(
            config.users_collection.as_str(),
            identity.key.as_str(),
        ));
        if identity.is_admin() {
            Self {
                tasks: Some(CollectionQuery::new(config.tasks_collection.as_str())),
                users: Some(
                    CollectionQuery::new(config.users_collection.as_str())
                        .order_by("name", Direction::Ascending),
                ),
                profile,
            }
        } else {
            Self {
                tasks: Some(
                    CollectionQuery::new(config.tasks_collection.as_str())
                        .where_eq(ASSIGNEE_FIELD, identity.key.as_str()),
                ),
                users: None,
                profile,
            }
        }
    }
}

struct Bindings {
    tasks: Binding<Vec<Task>>,
    users: Binding<Vec<User>>,
    profile: Binding<Option<User>>,
}

impl Bindings {
    fn retarget(&self, targets: SyncTargets) {
        self.tasks.retarget(targets.tasks.map(Into::into));
        self.users.retarget(targets.users.map(Into::into));
        self.profile.retarget(targets.profile.map(Into::into));
    }
}

/// Background task republishing remote snapshots into a [`TaskStore`].
///
/// Dropping it aborts the task; [`stop`](Self::stop) shuts it down cleanly.
#[derive(Debug)]
pub struct StoreSync {
    stop: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl StoreSync {
    /// Spawns the sync task on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(
        engine: &SubscriptionEngine,
        store: Arc<TaskStore>,
        auth: watch::Receiver<AuthState>,
        config: &SyncConfig,
    ) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let bindings = Bindings {
            tasks: engine.collection(None),
            users: engine.collection(None),
            profile: engine.document(None),
        };
        let handle = tokio::spawn(run(bindings, store, auth, stop_rx, config.clone()));
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stops following the remote store and waits for the task to finish.
    ///
    /// All bindings are detached when this returns.
    pub async fn stop(mut self) {
        self.stop.send_replace(true);
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "sync task ended abnormally");
            }
        }
    }

    /// Returns `true` while the task is running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for StoreSync {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn run(
    bindings: Bindings,
    store: Arc<TaskStore>,
    mut auth: watch::Receiver<AuthState>,
    mut stop: watch::Receiver<bool>,
    config: SyncConfig,
) {
    let mut tasks_rx = bindings.tasks.watch();
    let mut users_rx = bindings.users.watch();
    let mut profile_rx = bindings.profile.watch();

    let mut current: Option<Option<Identity>> = None;
    let initial = auth.borrow_and_update().clone();
    follow_auth(&bindings, &store, &initial, &mut current, &config);
    let tasks = tasks_rx.borrow_and_update().clone();
    publish_tasks(&store, &tasks);
    let users = users_rx.borrow_and_update().clone();
    publish_users(&store, &users);
    let profile = profile_rx.borrow_and_update().clone();
    publish_profile(&store, &profile);

    loop {
        tokio::select! {
            changed = auth.changed() => {
                if changed.is_err() {
                    tracing::debug!("auth session closed; sync stopping");
                    break;
                }
                let state = auth.borrow_and_update().clone();
                follow_auth(&bindings, &store, &state, &mut current, &config);
            },
            Ok(()) = tasks_rx.changed() => {
                let state = tasks_rx.borrow_and_update().clone();
                publish_tasks(&store, &state);
            },
            Ok(()) = users_rx.changed() => {
                let state = users_rx.borrow_and_update().clone();
                publish_users(&store, &state);
            },
            Ok(()) = profile_rx.changed() => {
                let state = profile_rx.borrow_and_update().clone();
                publish_profile(&store, &state);
            },
            _ = stop.changed() => break,
        }
    }

    bindings.retarget(SyncTargets::default());
}

fn follow_auth(
    bindings: &Bindings,
    store: &TaskStore,
    state: &AuthState,
    current: &mut Option<Option<Identity>>,
    config: &SyncConfig,
) {
    if state.loading || current.as_ref() == Some(&state.identity) {
        return;
    }
    let previous = current.as_ref().and_then(Option::as_ref);
    let changed_hands = previous.is_some_and(|prev| {
        state
            .identity
            .as_ref()
            .is_none_or(|next| next.key != prev.key || next.role != prev.role)
    });
    *current = Some(state.identity.clone());

    bindings.retarget(SyncTargets::for_identity(state.identity.as_ref(), config));
    if changed_hands {
        store.replace_tasks(Vec::new());
        store.replace_users(Vec::new());
        match &state.identity {
            Some(next) => tracing::info!(
                user = %next.key,
                role = %next.role,
                "identity changed; local records cleared"
            ),
            None => tracing::info!("signed out; local records cleared"),
        }
    }
}

fn publish_tasks(store: &TaskStore, state: &BindingState<Vec<Task>>) {
    match (&state.value, &state.error) {
        (Some(tasks), _) => store.replace_tasks(tasks.clone()),
        (None, Some(BindingError::PermissionDenied(_))) => store.replace_tasks(Vec::new()),
        _ => {},
    }
}

fn publish_users(store: &TaskStore, state: &BindingState<Vec<User>>) {
    if let Some(users) = &state.value {
        store.replace_users(users.clone());
    }
}

fn publish_profile(store: &TaskStore, state: &BindingState<Option<User>>) {
    if let Some(Some(user)) = &state.value {
        store.upsert_user(user.clone());
    }
}
