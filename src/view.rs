//! Role-gated view composition.
//!
//! All authorization for pages lives in one table, [`Route::required_role`].
//! [`ViewComposer::decide`] turns `(auth state, route)` into an
//! [`Access`] decision, and [`ViewComposer::compose`] pairs it with the data
//! slice the viewer may see.
//!
//! | route       | required role |
//! |-------------|---------------|
//! | `Dashboard` | any           |
//! | `Tasks`     | any           |
//! | `Reports`   | any           |
//! | `Accounts`  | admin         |
//!
//! While authentication is still loading the result is always
//! [`View::Loading`], never [`View::AccessDenied`].

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::identity::{AuthState, Identity, Role};
use crate::model::{Task, TaskStatus, User, UserId};
use crate::store::{Scope, TaskStore};

/// A page of the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Landing page with task counts.
    Dashboard,
    /// Task list.
    Tasks,
    /// Per-assignee progress.
    Reports,
    /// User administration.
    Accounts,
}

impl Route {
    /// Every route.
    pub const ALL: [Route; 4] = [Self::Dashboard, Self::Tasks, Self::Reports, Self::Accounts];

    /// Role needed to open the route; `None` means any signed-in user.
    pub fn required_role(self) -> Option<Role> {
        match self {
            Self::Accounts => Some(Role::Admin),
            Self::Dashboard | Self::Tasks | Self::Reports => None,
        }
    }

    /// Where an access-denied page links back to.
    pub fn fallback(self) -> Route {
        Self::Dashboard
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dashboard => write!(f, "dashboard"),
            Self::Tasks => write!(f, "tasks"),
            Self::Reports => write!(f, "reports"),
            Self::Accounts => write!(f, "accounts"),
        }
    }
}

/// Reachability of a route for the current auth state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// Authentication is still resolving.
    Pending,
    /// Nobody is signed in.
    SignInRequired,
    /// Signed in without the required role.
    Denied,
    /// The identity may open the route.
    Granted(Identity),
}

/// Task counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusCounts {
    /// `not_started` tasks.
    pub not_started: usize,
    /// `in_progress` tasks.
    pub in_progress: usize,
    /// `done` tasks.
    pub done: usize,
}

impl StatusCounts {
    /// Counts `tasks`.
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut counts = Self::default();
        for task in tasks {
            counts.add(task.status);
        }
        counts
    }

    fn add(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::NotStarted => self.not_started += 1,
            TaskStatus::InProgress => self.in_progress += 1,
            TaskStatus::Done => self.done += 1,
        }
    }

    /// Count for one status.
    pub fn get(&self, status: TaskStatus) -> usize {
        match status {
            TaskStatus::NotStarted => self.not_started,
            TaskStatus::InProgress => self.in_progress,
            TaskStatus::Done => self.done,
        }
    }

    /// All tasks counted.
    pub fn total(&self) -> usize {
        self.not_started + self.in_progress + self.done
    }
}

/// Dashboard data.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardView {
    /// Who is looking.
    pub viewer: Identity,
    /// Counts over the viewer's scoped tasks.
    pub counts: StatusCounts,
}

/// Task list data.
#[derive(Debug, Clone, PartialEq)]
pub struct TasksView {
    /// Which tasks were included.
    pub scope: Scope,
    /// The scoped tasks, in store order.
    pub tasks: Vec<Task>,
}

/// Report data.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportsView {
    /// Which tasks were included.
    pub scope: Scope,
    /// Counts per assignee, in order of first appearance.
    pub by_assignee: IndexMap<UserId, StatusCounts>,
}

/// Account administration data.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountsView {
    /// Known users.
    pub users: Vec<User>,
}

/// What the shell should render.
#[derive(Debug, Clone, PartialEq)]
pub enum View {
    /// Neutral placeholder while authentication resolves.
    Loading,
    /// Prompt to sign in.
    SignInRequired,
    /// The route needs a role the viewer lacks.
    AccessDenied {
        /// The route that was refused.
        route: Route,
        /// Safe route to offer instead.
        fallback: Route,
    },
    /// Dashboard.
    Dashboard(DashboardView),
    /// Task list.
    Tasks(TasksView),
    /// Reports.
    Reports(ReportsView),
    /// Account administration.
    Accounts(AccountsView),
}

impl View {
    /// Returns `true` for [`View::AccessDenied`].
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::AccessDenied { .. })
    }
}

/// Decides what each route shows.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewComposer;

impl ViewComposer {
    /// Whether `auth` may open `route`.
    pub fn decide(auth: &AuthState, route: Route) -> Access {
        if auth.loading {
            return Access::Pending;
        }
        let Some(identity) = &auth.identity else {
            return Access::SignInRequired;
        };
        match route.required_role() {
            Some(role) if identity.role != role => Access::Denied,
            _ => Access::Granted(identity.clone()),
        }
    }

    /// The view for `route`, with data from `store`.
    pub fn compose(auth: &AuthState, route: Route, store: &TaskStore) -> View {
        let identity = match Self::decide(auth, route) {
            Access::Pending => return View::Loading,
            Access::SignInRequired => return View::SignInRequired,
            Access::Denied => {
                tracing::debug!(%route, "route denied for role");
                return View::AccessDenied {
                    route,
                    fallback: route.fallback(),
                };
            },
            Access::Granted(identity) => identity,
        };

        let scope = Scope::for_identity(&identity);
        match route {
            Route::Dashboard => {
                let tasks = store.scoped(&scope);
                View::Dashboard(DashboardView {
                    viewer: identity,
                    counts: StatusCounts::from_tasks(&tasks),
                })
            },
            Route::Tasks => View::Tasks(TasksView {
                tasks: store.scoped(&scope),
                scope,
            }),
            Route::Reports => {
                let mut by_assignee: IndexMap<UserId, StatusCounts> = IndexMap::new();
                for task in store.scoped(&scope) {
                    by_assignee
                        .entry(task.assignee_id.clone())
                        .or_default()
                        .add(task.status);
                }
                View::Reports(ReportsView { scope, by_assignee })
            },
            Route::Accounts => View::Accounts(AccountsView {
                users: store.users(),
            }),
        }
    }
}
