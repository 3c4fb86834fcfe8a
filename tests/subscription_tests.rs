//! Integration tests for the subscription engine and error routing.
//!
//! Bindings run against `MemoryRemote` with the office access policy, so
//! denials come from real policy evaluation. Organized into module blocks
//! per concern.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use office_sync::binding::{BindingError, SubscriptionEngine};
use office_sync::identity::{Identity, Role};
use office_sync::locator::{CollectionQuery, Direction, DocumentRef};
use office_sync::remote::memory::MemoryRemote;
use office_sync::remote::policy::{OfficePolicy, ASSIGNEE_FIELD};
use office_sync::remote::RemoteError;
use office_sync::{
    ErrorChannel, GlobalListener, HandlerGuard, Operation, PermissionError, SurfacePolicy, Task,
    User,
};

type Published = Arc<Mutex<Vec<Arc<PermissionError>>>>;

struct Harness {
    remote: Arc<MemoryRemote>,
    engine: SubscriptionEngine,
    published: Published,
    _guard: HandlerGuard,
}

fn task_doc(title: &str, assignee: &str) -> serde_json::Value {
    json!({
        "title": title,
        "assignee_id": assignee,
        "created_by": "root",
        "created_at": "2025-03-01T09:00:00Z",
        "updated_at": "2025-03-01T09:00:00Z"
    })
}

fn harness(identity: Option<Identity>) -> Harness {
    let remote = Arc::new(MemoryRemote::with_policy(OfficePolicy::new("tasks", "users")));
    remote.seed("tasks", "t-alice", task_doc("Inventory", "alice"));
    remote.seed("tasks", "t-bob", task_doc("Payroll", "bob"));
    remote.seed(
        "users",
        "alice",
        json!({"name": "Alice", "email": "alice@example.com", "role": "employee"}),
    );
    remote.set_auth(identity);

    let channel = ErrorChannel::new();
    let published: Published = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&published);
    let guard = channel.subscribe(move |event| {
        if let Some(err) = event.permission_error() {
            sink.lock().push(Arc::clone(err));
        }
    });
    Harness {
        engine: SubscriptionEngine::new(remote.clone(), channel),
        remote,
        published,
        _guard: guard,
    }
}

fn alice() -> Identity {
    Identity::new("alice", Role::Employee)
}

fn admin() -> Identity {
    Identity::new("root", Role::Admin)
}

// ─── Attach / Snapshot Tests ────────────────────────────────────────────────

mod attach_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn null_locator_attaches_nothing() {
        let h = harness(Some(admin()));
        let binding = h.engine.collection::<Task>(None);
        let state = binding.state();
        assert!(!state.loading);
        assert!(state.value.is_none());
        assert!(state.error.is_none());
        assert_eq!(h.remote.listener_count(), 0);
    }

    #[test]
    fn admin_sees_every_task_in_insertion_order() {
        let h = harness(Some(admin()));
        let binding = h.engine.collection::<Task>(Some(CollectionQuery::new("tasks")));
        let titles: Vec<String> = binding
            .value()
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["Inventory".to_string(), "Payroll".to_string()]);
        assert!(!binding.is_loading());
    }

    #[test]
    fn employee_query_filtered_to_own_tasks() {
        let h = harness(Some(alice()));
        let query = CollectionQuery::new("tasks").where_eq(ASSIGNEE_FIELD, "alice");
        let binding = h.engine.collection::<Task>(Some(query));
        let tasks = binding.value().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id.as_str(), "t-alice");
        assert!(h.published.lock().is_empty());
    }

    #[tokio::test]
    async fn remote_writes_replace_value() {
        use office_sync::remote::RemoteStore;

        let h = harness(Some(admin()));
        let binding = h.engine.collection::<Task>(Some(
            CollectionQuery::new("tasks").order_by("title", Direction::Descending),
        ));
        let mut rx = binding.watch();
        rx.mark_unchanged();

        h.remote
            .set(&DocumentRef::new("tasks", "t-new"), task_doc("Audit", "bob"), false)
            .await
            .unwrap();

        assert!(rx.has_changed().unwrap());
        let titles: Vec<String> = binding
            .value()
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["Payroll", "Inventory", "Audit"]);
    }

    #[test]
    fn own_profile_document_decodes() {
        let h = harness(Some(alice()));
        let binding = h
            .engine
            .document::<User>(Some(DocumentRef::new("users", "alice")));
        let user = binding.value().flatten().unwrap();
        assert_eq!(user.name, "Alice");
        assert_eq!(user.role, Role::Employee);
    }
}

// ─── Denial Tests ───────────────────────────────────────────────────────────

mod denial_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn denied_collection_query_publishes_one_list_error() {
        let h = harness(Some(alice()));
        let binding = h.engine.collection::<Task>(Some(CollectionQuery::new("tasks")));

        let state = binding.state();
        assert!(!state.loading);
        assert!(state.value.is_none());
        assert!(state
            .error
            .as_ref()
            .is_some_and(BindingError::is_permission_denied));

        let published = h.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].operation(), Operation::List);
        assert_eq!(published[0].path(), "tasks");
        assert!(published[0].payload().is_none());
    }

    #[test]
    fn denied_document_publishes_get_error() {
        let h = harness(Some(alice()));
        let _binding = h
            .engine
            .document::<User>(Some(DocumentRef::new("users", "bob")));

        let published = h.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].operation(), Operation::Get);
        assert_eq!(published[0].path(), "users/bob");
    }

    #[test]
    fn binding_error_and_published_error_agree() {
        let h = harness(None);
        let binding = h.engine.collection::<Task>(Some(CollectionQuery::new("tasks")));
        let Some(BindingError::PermissionDenied(local)) = binding.error() else {
            panic!("expected a denial");
        };
        assert_eq!(*local, *h.published.lock()[0]);
    }

    #[test]
    fn sign_out_denies_live_bindings_once() {
        let h = harness(Some(admin()));
        let binding = h.engine.collection::<User>(Some(CollectionQuery::new("users")));
        assert!(binding.value().is_some());

        h.remote.set_auth(None);
        assert!(binding.value().is_none());
        assert!(binding.error().is_some());
        assert_eq!(h.published.lock().len(), 1);

        h.remote.set_auth(None);
        assert_eq!(h.published.lock().len(), 1);
    }

    #[test]
    fn transport_failure_is_local_only() {
        let h = harness(Some(admin()));
        h.remote.fail_next_listen(RemoteError::Unavailable {
            message: "backend offline".into(),
        });
        let binding = h.engine.collection::<Task>(Some(CollectionQuery::new("tasks")));
        assert!(matches!(binding.error(), Some(BindingError::Remote(_))));
        assert!(!binding.is_loading());
        assert!(h.published.lock().is_empty());
    }

    #[test]
    fn global_listener_receives_denial() {
        let h = harness(Some(alice()));
        let listener = GlobalListener::install(h.engine.channel(), SurfacePolicy::Toast, 4);
        let _binding = h.engine.collection::<Task>(Some(CollectionQuery::new("tasks")));

        let toasts = listener.drain_toasts();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].title, "Access denied");
        assert!(toasts[0].message.contains("list tasks"));
    }
}

// ─── Lifecycle Tests ────────────────────────────────────────────────────────

mod lifecycle_tests {
    use super::*;
    use office_sync::remote::RemoteStore;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn detached_binding_ignores_later_writes() {
        let h = harness(Some(admin()));
        let binding = h.engine.collection::<Task>(Some(CollectionQuery::new("tasks")));
        let before = binding.state();

        binding.detach();
        binding.detach();
        assert_eq!(h.remote.listener_count(), 0);

        h.remote.add("tasks", task_doc("Late", "bob")).await.unwrap();
        assert_eq!(binding.state(), before);
    }

    #[test]
    fn retarget_keeps_one_listener() {
        let h = harness(Some(admin()));
        let binding = h.engine.collection::<Task>(Some(CollectionQuery::new("tasks")));
        binding.retarget(Some(
            CollectionQuery::new("tasks").where_eq(ASSIGNEE_FIELD, "bob").into(),
        ));
        assert_eq!(h.remote.listener_count(), 1);
        let tasks = binding.value().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].assignee_id.as_str(), "bob");
    }

    #[test]
    fn retarget_after_denial_recovers() {
        let h = harness(Some(alice()));
        let binding = h.engine.collection::<Task>(Some(CollectionQuery::new("tasks")));
        assert!(binding.error().is_some());

        binding.retarget(Some(
            CollectionQuery::new("tasks").where_eq(ASSIGNEE_FIELD, "alice").into(),
        ));
        assert!(binding.error().is_none());
        assert_eq!(binding.value().map(|t| t.len()), Some(1));
        assert_eq!(h.published.lock().len(), 1);
    }

    #[test]
    fn dropping_bindings_releases_listeners() {
        let h = harness(Some(admin()));
        {
            let _tasks = h.engine.collection::<Task>(Some(CollectionQuery::new("tasks")));
            let _users = h.engine.collection::<User>(Some(CollectionQuery::new("users")));
            assert_eq!(h.remote.listener_count(), 2);
        }
        assert_eq!(h.remote.listener_count(), 0);
    }

    #[test]
    fn handler_may_detach_binding_during_denial() {
        let h = harness(Some(alice()));
        let binding = Arc::new(h.engine.collection::<Task>(None));
        let target = Arc::downgrade(&binding);
        let _guard = h.engine.channel().subscribe(move |_| {
            if let Some(binding) = target.upgrade() {
                binding.detach();
            }
        });

        binding.retarget(Some(CollectionQuery::new("tasks").into()));
        assert_eq!(h.published.lock().len(), 1);
        assert!(!binding.is_attached());
        assert!(binding.locator().is_none());
    }
}
