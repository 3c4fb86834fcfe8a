//! Real-time synchronization and permission-error routing for a role-gated
//! office task dashboard.
//!
//! # Overview
//!
//! Remote collections and documents are mirrored into local state through
//! [`Binding`](binding::Binding)s. When the remote layer denies a read or a
//! write, the component that noticed builds a [`PermissionError`] and
//! publishes it on an [`ErrorChannel`]; a single [`GlobalListener`] decides
//! how the application surfaces it. Task and user records live in a
//! [`TaskStore`](store::TaskStore), which serves role-scoped projections to
//! the [`ViewComposer`](view::ViewComposer).
//!
//! ```text
//! RemoteStore --snapshots--> Binding --StoreSync--> TaskStore --> ViewComposer
//!      |                        |
//!      +----denials-------------+--> ErrorChannel --> GlobalListener
//! ```
//!
//! # Module Organization
//!
//! - [`permission`] - The denied-operation error and operation kinds
//! - [`channel`] - Error channel with RAII handler guards
//! - [`listener`] - The global listener and its surface policies
//! - [`locator`] - Collection queries and document references
//! - [`remote`] - Remote store trait, in-memory and scripted stores, access policies
//! - [`binding`] - Subscription engine
//! - [`writes`] - Non-blocking writes that report denials
//! - [`identity`] - Authentication state as seen by the core
//! - [`model`] - Task and user records
//! - [`store`] - Task domain store
//! - [`sync`] - Republishes binding snapshots into the store
//! - [`view`] - Route decision table and composed views
//! - [`config`] - TOML and environment configuration
//! - [`error`] - Crate error type
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use office_sync::binding::SubscriptionEngine;
//! use office_sync::identity::{Identity, Role};
//! use office_sync::locator::CollectionQuery;
//! use office_sync::remote::memory::MemoryRemote;
//! use office_sync::remote::policy::OfficePolicy;
//! use office_sync::{ErrorChannel, GlobalListener, Operation, SurfacePolicy, Task};
//!
//! let remote = Arc::new(MemoryRemote::with_policy(OfficePolicy::new("tasks", "users")));
//! remote.set_auth(Some(Identity::new("alice", Role::Employee)));
//!
//! let channel = ErrorChannel::new();
//! let listener = GlobalListener::install(&channel, SurfacePolicy::Boundary, 16);
//! let engine = SubscriptionEngine::new(remote, channel);
//!
//! // Employees may not list every task.
//! let binding = engine.collection::<Task>(Some(CollectionQuery::new("tasks")));
//! assert!(binding.error().is_some());
//!
//! let denial = listener.take_pending().unwrap();
//! assert_eq!(denial.operation(), Operation::List);
//! assert_eq!(denial.path(), "tasks");
//! ```

pub mod binding;
pub mod channel;
pub mod config;
pub mod error;
pub mod identity;
pub mod listener;
pub mod locator;
#[cfg(feature = "logging")]
pub mod logging;
pub mod model;
pub mod permission;
pub mod remote;
pub mod store;
pub mod sync;
pub mod view;
pub mod writes;

// Re-exports for ergonomic access
pub use binding::{Binding, BindingError, BindingState, SubscriptionEngine};
pub use channel::{ErrorChannel, ErrorEvent, HandlerGuard};
pub use config::{ConfigError, LoggingConfig, SyncConfig};
pub use error::{Error, Result};
pub use identity::{AuthSession, AuthState, Identity, Role};
pub use listener::{GlobalListener, SurfacePolicy, Toast};
pub use locator::{CollectionQuery, DocumentRef, Locator};
pub use model::{NewTask, Priority, Task, TaskId, TaskStatus, User, UserId};
pub use permission::{Operation, PermissionError};
pub use remote::{RemoteError, RemoteStore};
pub use store::{Scope, TaskStore};
pub use sync::StoreSync;
pub use view::{Route, View, ViewComposer};
pub use writes::RemoteWriter;
