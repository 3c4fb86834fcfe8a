//! Task domain store.
//!
//! [`TaskStore`] is the single local source of truth for task and user
//! records. All mutations take the write half of one `RwLock`, so readers
//! observe each `create` / `update` / `remove` / `replace_*` either fully or
//! not at all. Every mutation bumps a revision published on a
//! `tokio::sync::watch` channel; role-scoped projections are re-derived
//! from [`TaskStore::view_for`] whenever it changes.
//!
//! # Invariants
//!
//! - At most one task per [`TaskId`]; `update` replaces in place and keeps
//!   the sequence position.
//! - A known user's role never changes through this store.
//!
//! # Examples
//!
//! ```
//! use office_sync::identity::{Identity, Role};
//! use office_sync::store::TaskStore;
//! use office_sync::NewTask;
//!
//! let store = TaskStore::new();
//! store.create(NewTask::new("Book venue", "alice"));
//! store.create(NewTask::new("Order catering", "bob"));
//!
//! let alice = Identity::new("alice", Role::Employee);
//! let mine = store.view_for(&alice);
//! assert_eq!(mine.len(), 1);
//! assert_eq!(mine[0].title, "Book venue");
//!
//! let admin = Identity::new("root", Role::Admin);
//! assert_eq!(store.view_for(&admin).len(), 2);
//! ```

use std::collections::{HashMap, HashSet};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{Error, Result};
use crate::identity::{Identity, Role};
use crate::locator::DocumentRef;
use crate::model::{NewTask, Task, TaskId, User, UserId};
use crate::remote::RemoteError;
use crate::writes::RemoteWriter;

/// Which tasks a viewer may see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Every task (admins).
    All,
    /// Only tasks assigned to this user (employees).
    AssignedTo(UserId),
}

impl Scope {
    /// The scope of `identity`'s role.
    pub fn for_identity(identity: &Identity) -> Self {
        if identity.is_admin() {
            Self::All
        } else {
            Self::AssignedTo(identity.key.clone())
        }
    }

    /// Returns `true` if `task` is inside the scope.
    pub fn admits(&self, task: &Task) -> bool {
        match self {
            Self::All => true,
            Self::AssignedTo(user) => task.is_assigned_to(user),
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    tasks: Vec<Task>,
    users: Vec<User>,
}

impl StoreState {
    fn position(&self, id: &TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| &t.id == id)
    }
}

#[derive(Debug)]
enum WriteJob {
    Set { doc: DocumentRef, data: Value },
    Update { doc: DocumentRef, patch: Value },
    Delete { doc: DocumentRef },
    Flush { reply: oneshot::Sender<Vec<Error>> },
}

/// Remote mirror of local mutations.
///
/// Jobs go through one queue drained by a single worker task, so the remote
/// sees writes in the order the store applied them. The worker starts on
/// the first enqueue made inside a tokio runtime; until then jobs wait in
/// the queue.
#[derive(Debug)]
struct WriteThrough {
    collection: String,
    jobs: mpsc::UnboundedSender<WriteJob>,
    idle: Mutex<Option<(RemoteWriter, mpsc::UnboundedReceiver<WriteJob>)>>,
}

impl WriteThrough {
    fn new(writer: RemoteWriter, collection: String) -> Self {
        let (jobs, rx) = mpsc::unbounded_channel();
        Self {
            collection,
            jobs,
            idle: Mutex::new(Some((writer, rx))),
        }
    }

    fn doc(&self, id: &TaskId) -> DocumentRef {
        DocumentRef::new(self.collection.as_str(), id.as_str())
    }

    fn enqueue(&self, job: WriteJob) -> bool {
        if self.jobs.send(job).is_err() {
            tracing::error!(collection = %self.collection, "write-through worker gone; write dropped");
            return false;
        }
        self.start_worker();
        true
    }

    fn start_worker(&self) {
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        if let Some((writer, rx)) = self.idle.lock().take() {
            runtime.spawn(drain(writer, rx));
            tracing::debug!(collection = %self.collection, "write-through worker started");
        }
    }
}

async fn drain(writer: RemoteWriter, mut jobs: mpsc::UnboundedReceiver<WriteJob>) {
    let mut failures = Vec::new();
    while let Some(job) = jobs.recv().await {
        let result = match job {
            WriteJob::Set { doc, data } => writer.set(doc, data, false).wait().await,
            WriteJob::Update { doc, patch } => writer.update(doc, patch).wait().await,
            WriteJob::Delete { doc } => writer.delete(doc).wait().await,
            WriteJob::Flush { reply } => {
                if reply.send(std::mem::take(&mut failures)).is_err() {
                    tracing::debug!("flush caller went away");
                }
                continue;
            },
        };
        if let Err(err) = result {
            failures.push(err);
        }
    }
}

/// In-memory task and user records.
#[derive(Debug)]
pub struct TaskStore {
    state: RwLock<StoreState>,
    revision: watch::Sender<u64>,
    write_through: Option<WriteThrough>,
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore {
    /// An empty store that only changes local state.
    pub fn new() -> Self {
        let (revision, _rx) = watch::channel(0);
        Self {
            state: RwLock::new(StoreState::default()),
            revision,
            write_through: None,
        }
    }

    /// Also sends `create` / `update` / `remove` to `collection` through
    /// `writer`. Writes run in the background, one at a time and in
    /// mutation order; denials reach the error channel, not the caller.
    pub fn with_writer(mut self, writer: RemoteWriter, collection: impl Into<String>) -> Self {
        self.write_through = Some(WriteThrough::new(writer, collection.into()));
        self
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    /// Adds a task under a fresh id and returns the full record.
    pub fn create(&self, new: NewTask) -> Task {
        let task = {
            let mut state = self.state.write();
            let mut id = TaskId::generate();
            while state.position(&id).is_some() {
                id = TaskId::generate();
            }
            let task = Task::from_new(id, new);
            state.tasks.push(task.clone());
            task
        };
        self.bump();
        tracing::debug!(task_id = %task.id, assignee = %task.assignee_id, "task created");

        if let Some(wt) = &self.write_through {
            wt.enqueue(WriteJob::Set {
                doc: wt.doc(&task.id),
                data: task.to_document_data(),
            });
        }
        task
    }

    /// Replaces the record with `task.id`, keeping its position.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownTask`] if no record has that id.
    pub fn update(&self, task: Task) -> Result<()> {
        {
            let mut state = self.state.write();
            let Some(index) = state.position(&task.id) else {
                tracing::error!(task_id = %task.id, "update of unknown task");
                return Err(Error::UnknownTask { task_id: task.id });
            };
            state.tasks[index] = task.clone();
        }
        self.bump();
        tracing::debug!(task_id = %task.id, status = %task.status, "task updated");

        if let Some(wt) = &self.write_through {
            let mut patch = task.to_document_data();
            if let Value::Object(fields) = &mut patch {
                fields.entry("due_date").or_insert(Value::Null);
            }
            wt.enqueue(WriteJob::Update {
                doc: wt.doc(&task.id),
                patch,
            });
        }
        Ok(())
    }

    /// Removes and returns the record with `id`.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownTask`] if no record has that id.
    pub fn remove(&self, id: &TaskId) -> Result<Task> {
        let removed = {
            let mut state = self.state.write();
            let Some(index) = state.position(id) else {
                tracing::error!(task_id = %id, "removal of unknown task");
                return Err(Error::UnknownTask {
                    task_id: id.clone(),
                });
            };
            state.tasks.remove(index)
        };
        self.bump();
        tracing::debug!(task_id = %id, "task removed");

        if let Some(wt) = &self.write_through {
            wt.enqueue(WriteJob::Delete { doc: wt.doc(id) });
        }
        Ok(removed)
    }

    /// Adds an existing record (already carrying its id) without writing
    /// through.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateTask`] if the id is taken.
    pub fn insert(&self, task: Task) -> Result<()> {
        {
            let mut state = self.state.write();
            if state.position(&task.id).is_some() {
                tracing::error!(task_id = %task.id, "insert of duplicate task");
                return Err(Error::DuplicateTask { task_id: task.id });
            }
            state.tasks.push(task);
        }
        self.bump();
        Ok(())
    }

    /// Replaces every task with `tasks`, e.g. from a remote snapshot.
    ///
    /// Repeated ids collapse onto the first position with the last content.
    pub fn replace_tasks(&self, tasks: Vec<Task>) {
        let mut index: HashMap<TaskId, usize> = HashMap::with_capacity(tasks.len());
        let mut deduped: Vec<Task> = Vec::with_capacity(tasks.len());
        for task in tasks {
            match index.get(&task.id) {
                Some(&at) => {
                    tracing::warn!(task_id = %task.id, "snapshot repeats task id");
                    deduped[at] = task;
                },
                None => {
                    index.insert(task.id.clone(), deduped.len());
                    deduped.push(task);
                },
            }
        }
        self.state.write().tasks = deduped;
        self.bump();
    }

    /// Replaces every user with `users`.
    ///
    /// A user already known keeps their current role even if the snapshot
    /// reports another one.
    pub fn replace_users(&self, users: Vec<User>) {
        {
            let mut state = self.state.write();
            let known: HashMap<UserId, Role> = state
                .users
                .iter()
                .map(|u| (u.id.clone(), u.role))
                .collect();

            let mut seen = HashSet::with_capacity(users.len());
            let mut next = Vec::with_capacity(users.len());
            for mut user in users {
                if !seen.insert(user.id.clone()) {
                    tracing::warn!(user = %user.id, "snapshot repeats user id");
                    continue;
                }
                if let Some(&role) = known.get(&user.id) {
                    if role != user.role {
                        tracing::warn!(
                            user = %user.id,
                            kept = %role,
                            reported = %user.role,
                            "ignoring role change"
                        );
                        user.role = role;
                    }
                }
                next.push(user);
            }
            state.users = next;
        }
        self.bump();
    }

    /// Inserts or refreshes one user, keeping a known user's role.
    pub fn upsert_user(&self, mut user: User) {
        {
            let mut state = self.state.write();
            match state.users.iter_mut().find(|u| u.id == user.id) {
                Some(existing) => {
                    if existing.role != user.role {
                        tracing::warn!(
                            user = %user.id,
                            kept = %existing.role,
                            reported = %user.role,
                            "ignoring role change"
                        );
                        user.role = existing.role;
                    }
                    *existing = user;
                },
                None => state.users.push(user),
            }
        }
        self.bump();
    }

    /// All tasks in sequence order.
    pub fn tasks(&self) -> Vec<Task> {
        self.state.read().tasks.clone()
    }

    /// The task with `id`.
    pub fn task(&self, id: &TaskId) -> Option<Task> {
        let state = self.state.read();
        state.position(id).map(|i| state.tasks[i].clone())
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.state.read().tasks.len()
    }

    /// Returns `true` if there are no tasks.
    pub fn is_empty(&self) -> bool {
        self.state.read().tasks.is_empty()
    }

    /// All users.
    pub fn users(&self) -> Vec<User> {
        self.state.read().users.clone()
    }

    /// The user with `id`.
    pub fn user(&self, id: &UserId) -> Option<User> {
        self.state.read().users.iter().find(|u| &u.id == id).cloned()
    }

    /// Tasks `identity` may see: all for admins, assigned ones otherwise.
    pub fn view_for(&self, identity: &Identity) -> Vec<Task> {
        self.scoped(&Scope::for_identity(identity))
    }

    /// Tasks inside `scope`, in sequence order.
    pub fn scoped(&self, scope: &Scope) -> Vec<Task> {
        self.state
            .read()
            .tasks
            .iter()
            .filter(|t| scope.admits(t))
            .cloned()
            .collect()
    }

    /// Waits until every write-through write enqueued so far has run and
    /// returns the failures since the previous flush.
    pub async fn flush(&self) -> Vec<Error> {
        let Some(wt) = &self.write_through else {
            return Vec::new();
        };
        let (reply, rx) = oneshot::channel();
        if !wt.enqueue(WriteJob::Flush { reply }) {
            return vec![worker_gone()];
        }
        rx.await.unwrap_or_else(|_| vec![worker_gone()])
    }

    /// Current revision; bumped by every mutation.
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// A receiver notified after every mutation.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

fn worker_gone() -> Error {
    Error::Remote(RemoteError::Unavailable {
        message: "write-through worker stopped".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ErrorChannel;
    use crate::model::TaskStatus;
    use crate::remote::manual::{ManualRemote, WriteKind};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn user(id: &str, role: Role) -> User {
        User {
            id: UserId::from(id),
            name: id.to_uppercase(),
            email: format!("{id}@example.com"),
            role,
            avatar_url: None,
        }
    }

    #[test]
    fn update_keeps_position() {
        let store = TaskStore::new();
        let a = store.create(NewTask::new("a", "alice"));
        let b = store.create(NewTask::new("b", "bob"));

        let mut changed = a.clone();
        changed.status = TaskStatus::Done;
        store.update(changed.clone()).unwrap();

        assert_eq!(store.tasks(), vec![changed, b]);
    }

    #[test]
    fn unknown_ids_are_contract_violations() {
        let store = TaskStore::new();
        let ghost = Task::from_new(TaskId::from("ghost"), NewTask::new("g", "alice"));
        assert!(store.update(ghost).is_err_and(|e| e.is_contract_violation()));
        assert!(store.remove(&TaskId::from("ghost")).is_err());
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn insert_rejects_duplicates() {
        let store = TaskStore::new();
        let task = store.create(NewTask::new("a", "alice"));
        assert!(matches!(store.insert(task), Err(Error::DuplicateTask { .. })));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_returns_record() {
        let store = TaskStore::new();
        let task = store.create(NewTask::new("a", "alice"));
        assert_eq!(store.remove(&task.id).unwrap(), task);
        assert!(store.is_empty());
    }

    #[test]
    fn replace_tasks_collapses_repeated_ids() {
        let store = TaskStore::new();
        let first = Task::from_new(TaskId::from("x"), NewTask::new("old", "alice"));
        let other = Task::from_new(TaskId::from("y"), NewTask::new("y", "bob"));
        let last = Task::from_new(TaskId::from("x"), NewTask::new("new", "alice"));
        store.replace_tasks(vec![first, other.clone(), last.clone()]);
        assert_eq!(store.tasks(), vec![last, other]);
    }

    #[test]
    fn replace_users_keeps_known_roles() {
        let store = TaskStore::new();
        store.replace_users(vec![user("alice", Role::Employee)]);
        store.replace_users(vec![user("alice", Role::Admin), user("bob", Role::Admin)]);

        assert_eq!(store.user(&UserId::from("alice")).map(|u| u.role), Some(Role::Employee));
        assert_eq!(store.user(&UserId::from("bob")).map(|u| u.role), Some(Role::Admin));
    }

    #[test]
    fn upsert_user_keeps_role() {
        let store = TaskStore::new();
        store.upsert_user(user("carol", Role::Employee));
        let mut renamed = user("carol", Role::Admin);
        renamed.name = "Caroline".into();
        store.upsert_user(renamed);

        let carol = store.user(&UserId::from("carol")).unwrap();
        assert_eq!(carol.name, "Caroline");
        assert_eq!(carol.role, Role::Employee);
    }

    #[test]
    fn every_mutation_bumps_revision() {
        let store = TaskStore::new();
        let rx = store.subscribe_changes();
        let task = store.create(NewTask::new("a", "alice"));
        store.update(task.clone()).unwrap();
        store.remove(&task.id).unwrap();
        assert_eq!(*rx.borrow(), 3);
    }

    fn manual_store() -> (Arc<ManualRemote>, TaskStore) {
        let remote = Arc::new(ManualRemote::new());
        let writer = RemoteWriter::new(remote.clone(), ErrorChannel::new());
        (remote, TaskStore::new().with_writer(writer, "tasks"))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn write_through_keeps_mutation_order() {
        let (remote, store) = manual_store();
        let task = store.create(NewTask::new("a", "alice"));
        store.update(task.clone()).unwrap();
        store.remove(&task.id).unwrap();
        assert!(store.flush().await.is_empty());

        let kinds: Vec<WriteKind> = remote.writes().into_iter().map(|w| w.kind).collect();
        assert_eq!(
            kinds,
            vec![WriteKind::Set { merge: false }, WriteKind::Update, WriteKind::Delete]
        );
    }

    #[tokio::test]
    async fn flush_reports_failures_of_writes_that_already_finished() {
        let (remote, store) = manual_store();
        for _ in 0..2 {
            remote.fail_next_write(RemoteError::Transport {
                message: "reset".into(),
            });
        }

        store.create(NewTask::new("first", "alice"));
        for _ in 0..50 {
            if !remote.writes().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(remote.writes().len(), 1);
        store.create(NewTask::new("second", "bob"));

        let failures = store.flush().await;
        assert_eq!(failures.len(), 2);
        assert!(store.flush().await.is_empty());
    }

    #[test]
    fn writes_made_outside_a_runtime_wait_for_one() {
        let (remote, store) = manual_store();
        store.create(NewTask::new("queued", "alice"));
        assert!(remote.writes().is_empty());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let failures = runtime.block_on(store.flush());
        assert!(failures.is_empty());
        assert_eq!(remote.writes().len(), 1);
    }

    #[test]
    fn scope_for_roles() {
        let admin = Identity::new("root", Role::Admin);
        let alice = Identity::new("alice", Role::Employee);
        assert_eq!(Scope::for_identity(&admin), Scope::All);
        assert_eq!(
            Scope::for_identity(&alice),
            Scope::AssignedTo(UserId::from("alice"))
        );
    }
}
