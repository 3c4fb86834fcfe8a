//! Access-policy evaluation for [`MemoryRemote`](super::memory::MemoryRemote).
//!
//! A policy sees one [`AccessRequest`] per listen or write and answers
//! allow/deny. Denials surface as
//! [`RemoteError::PermissionDenied`](super::RemoteError::PermissionDenied).
//!
//! [`OfficePolicy`] encodes the dashboard's rules:
//!
//! | Caller          | `users`                         | `tasks`                                  |
//! |-----------------|---------------------------------|------------------------------------------|
//! | signed out      | deny                            | deny                                     |
//! | admin           | allow                           | allow                                    |
//! | employee        | get/create/update own document; role field may not change | list filtered to own `assignee_id`; get/update own tasks, assignee may not change |

use serde_json::Value;

use crate::identity::{Identity, Role};
use crate::locator::CollectionQuery;
use crate::permission::Operation;

/// Field holding a task's assignee.
pub const ASSIGNEE_FIELD: &str = "assignee_id";

/// Field holding a user's role.
pub const ROLE_FIELD: &str = "role";

/// Everything a policy may inspect about one request.
#[derive(Debug, Clone, Copy)]
pub struct AccessRequest<'a> {
    /// Caller identity, `None` when signed out.
    pub auth: Option<&'a Identity>,
    /// Attempted operation.
    pub operation: Operation,
    /// Target collection.
    pub collection: &'a str,
    /// Target document id; `None` for list queries.
    pub document_id: Option<&'a str>,
    /// The query, for `List`.
    pub query: Option<&'a CollectionQuery>,
    /// The stored document before the operation, if any.
    pub existing: Option<&'a Value>,
    /// The payload being written, for writes.
    pub incoming: Option<&'a Value>,
}

/// Decides whether a request is allowed.
pub trait AccessPolicy: Send + Sync {
    /// Returns `true` to allow the request.
    fn allows(&self, request: &AccessRequest<'_>) -> bool;
}

impl<F> AccessPolicy for F
where
    F: Fn(&AccessRequest<'_>) -> bool + Send + Sync,
{
    fn allows(&self, request: &AccessRequest<'_>) -> bool {
        self(request)
    }
}

/// Allows everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn allows(&self, _request: &AccessRequest<'_>) -> bool {
        true
    }
}

/// The dashboard's role-based rules.
///
/// # Examples
///
/// ```
/// use office_sync::identity::{Identity, Role};
/// use office_sync::locator::CollectionQuery;
/// use office_sync::remote::policy::{AccessPolicy, AccessRequest, OfficePolicy};
/// use office_sync::Operation;
///
/// let policy = OfficePolicy::new("tasks", "users");
/// let alice = Identity::new("alice", Role::Employee);
/// let all_tasks = CollectionQuery::new("tasks");
///
/// let request = AccessRequest {
///     auth: Some(&alice),
///     operation: Operation::List,
///     collection: "tasks",
///     document_id: None,
///     query: Some(&all_tasks),
///     existing: None,
///     incoming: None,
/// };
/// assert!(!policy.allows(&request));
/// ```
#[derive(Debug, Clone)]
pub struct OfficePolicy {
    tasks_collection: String,
    users_collection: String,
}

impl OfficePolicy {
    /// Rules over the given collection names.
    pub fn new(tasks_collection: impl Into<String>, users_collection: impl Into<String>) -> Self {
        Self {
            tasks_collection: tasks_collection.into(),
            users_collection: users_collection.into(),
        }
    }

    fn employee_tasks(&self, me: &Identity, request: &AccessRequest<'_>) -> bool {
        let assigned_to_me = |data: Option<&Value>| {
            data.and_then(|d| d.get(ASSIGNEE_FIELD))
                .and_then(Value::as_str)
                == Some(me.key.as_str())
        };
        match request.operation {
            Operation::List => request.query.is_some_and(|query| {
                query.filters().iter().any(|filter| {
                    filter.field == ASSIGNEE_FIELD && filter.value.as_str() == Some(me.key.as_str())
                })
            }),
            Operation::Get => assigned_to_me(request.existing),
            Operation::Update => {
                let keeps_assignee = request
                    .incoming
                    .and_then(|d| d.get(ASSIGNEE_FIELD))
                    .is_none_or(|v| v.as_str() == Some(me.key.as_str()));
                assigned_to_me(request.existing) && keeps_assignee
            },
            Operation::Create | Operation::Delete => false,
        }
    }

    fn employee_users(&self, me: &Identity, request: &AccessRequest<'_>) -> bool {
        let own_document = request.document_id == Some(me.key.as_str());
        match request.operation {
            Operation::Get => own_document,
            Operation::Create => {
                own_document
                    && request
                        .incoming
                        .and_then(|d| d.get(ROLE_FIELD))
                        .and_then(Value::as_str)
                        == Some(Role::Employee.as_str())
            },
            Operation::Update => {
                let existing_role = request.existing.and_then(|d| d.get(ROLE_FIELD));
                let incoming_role = request.incoming.and_then(|d| d.get(ROLE_FIELD));
                own_document && (incoming_role.is_none() || incoming_role == existing_role)
            },
            Operation::List | Operation::Delete => false,
        }
    }
}

impl AccessPolicy for OfficePolicy {
    fn allows(&self, request: &AccessRequest<'_>) -> bool {
        let Some(me) = request.auth else {
            return false;
        };
        if me.role == Role::Admin {
            return true;
        }
        if request.collection == self.tasks_collection {
            self.employee_tasks(me, request)
        } else if request.collection == self.users_collection {
            self.employee_users(me, request)
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request<'a>(
        auth: Option<&'a Identity>,
        operation: Operation,
        collection: &'a str,
    ) -> AccessRequest<'a> {
        AccessRequest {
            auth,
            operation,
            collection,
            document_id: None,
            query: None,
            existing: None,
            incoming: None,
        }
    }

    fn policy() -> OfficePolicy {
        OfficePolicy::new("tasks", "users")
    }

    #[test]
    fn signed_out_is_denied() {
        assert!(!policy().allows(&request(None, Operation::Get, "tasks")));
    }

    #[test]
    fn admin_is_allowed_everything() {
        let admin = Identity::new("root", Role::Admin);
        for op in [Operation::List, Operation::Create, Operation::Delete] {
            assert!(policy().allows(&request(Some(&admin), op, "users")));
        }
    }

    #[test]
    fn employee_lists_only_own_tasks() {
        let alice = Identity::new("alice", Role::Employee);
        let own = CollectionQuery::new("tasks").where_eq(ASSIGNEE_FIELD, "alice");
        let other = CollectionQuery::new("tasks").where_eq(ASSIGNEE_FIELD, "bob");

        let mut req = request(Some(&alice), Operation::List, "tasks");
        req.query = Some(&own);
        assert!(policy().allows(&req));
        req.query = Some(&other);
        assert!(!policy().allows(&req));
    }

    #[test]
    fn employee_cannot_reassign_task() {
        let alice = Identity::new("alice", Role::Employee);
        let existing = json!({"assignee_id": "alice"});
        let progress = json!({"status": "in_progress"});
        let reassign = json!({"assignee_id": "bob"});

        let mut req = request(Some(&alice), Operation::Update, "tasks");
        req.document_id = Some("t-1");
        req.existing = Some(&existing);
        req.incoming = Some(&progress);
        assert!(policy().allows(&req));
        req.incoming = Some(&reassign);
        assert!(!policy().allows(&req));
    }

    #[test]
    fn employee_cannot_change_own_role() {
        let alice = Identity::new("alice", Role::Employee);
        let existing = json!({"role": "employee"});
        let promote = json!({"role": "admin"});
        let rename = json!({"name": "Alice B."});

        let mut req = request(Some(&alice), Operation::Update, "users");
        req.document_id = Some("alice");
        req.existing = Some(&existing);
        req.incoming = Some(&promote);
        assert!(!policy().allows(&req));
        req.incoming = Some(&rename);
        assert!(policy().allows(&req));
    }

    #[test]
    fn employee_reads_only_own_profile() {
        let alice = Identity::new("alice", Role::Employee);
        let mut req = request(Some(&alice), Operation::Get, "users");
        req.document_id = Some("alice");
        assert!(policy().allows(&req));
        req.document_id = Some("bob");
        assert!(!policy().allows(&req));
        assert!(!policy().allows(&request(Some(&alice), Operation::List, "users")));
    }

    #[test]
    fn closures_are_policies() {
        fn deny_all(_: &AccessRequest<'_>) -> bool {
            false
        }
        assert!(!deny_all.allows(&request(None, Operation::Get, "tasks")));
        assert!(AllowAll.allows(&request(None, Operation::Get, "tasks")));
    }
}
