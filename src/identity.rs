//! The authentication collaborator as seen by the synchronization layer.
//!
//! Session management lives outside this crate. The core only reads an
//! [`AuthState`] -- the current [`Identity`] (if any) plus a `loading` flag --
//! through a `tokio::sync::watch` receiver handed out by [`AuthSession`].
//! The hosting application owns the session and drives it with
//! [`AuthSession::begin`], [`AuthSession::sign_in`] and
//! [`AuthSession::sign_out`].

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::model::UserId;

/// Role of a user. Exactly one per user, fixed once the user exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Sees and manages everything.
    Admin,
    /// Sees the tasks assigned to them.
    Employee,
}

impl Role {
    /// Wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Employee => "employee",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The signed-in user.
///
/// # Examples
///
/// ```
/// use office_sync::identity::{Identity, Role};
///
/// let alice = Identity::new("alice", Role::Employee)
///     .with_display_name("Alice")
///     .with_email("alice@example.com");
/// assert_eq!(alice.key.as_str(), "alice");
/// assert!(!alice.is_admin());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Authentication key; equals the user's record id.
    pub key: UserId,
    /// Role of the user.
    pub role: Role,
    /// Name shown in the interface.
    pub display_name: String,
    /// Contact address.
    pub email: Option<String>,
    /// Avatar reference.
    pub avatar: Option<String>,
}

impl Identity {
    /// Creates an identity with empty profile fields.
    pub fn new(key: impl Into<UserId>, role: Role) -> Self {
        Self {
            key: key.into(),
            role,
            display_name: String::new(),
            email: None,
            avatar: None,
        }
    }

    /// Sets the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Sets the contact address.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Sets the avatar reference.
    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }

    /// Returns `true` for admins.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Snapshot of the authentication collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthState {
    /// Current identity, `None` when signed out or not yet resolved.
    pub identity: Option<Identity>,
    /// `true` while the session is being resolved.
    pub loading: bool,
}

impl AuthState {
    /// Session still resolving.
    pub fn loading() -> Self {
        Self {
            identity: None,
            loading: true,
        }
    }

    /// No user signed in.
    pub fn signed_out() -> Self {
        Self {
            identity: None,
            loading: false,
        }
    }

    /// `identity` signed in.
    pub fn signed_in(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
            loading: false,
        }
    }
}

/// Owner side of the authentication state.
///
/// Cloning an [`AuthSession`] is not supported; hand out
/// [`watch`](Self::watch) receivers instead.
#[derive(Debug)]
pub struct AuthSession {
    tx: watch::Sender<AuthState>,
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthSession {
    /// Starts in the loading state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(AuthState::loading());
        Self { tx }
    }

    /// Marks the session as resolving again (e.g. token refresh).
    pub fn begin(&self) {
        self.tx.send_replace(AuthState::loading());
    }

    /// Publishes a signed-in identity.
    pub fn sign_in(&self, identity: Identity) {
        tracing::info!(user = %identity.key, role = %identity.role, "signed in");
        self.tx.send_replace(AuthState::signed_in(identity));
    }

    /// Publishes the signed-out state.
    pub fn sign_out(&self) {
        tracing::info!("signed out");
        self.tx.send_replace(AuthState::signed_out());
    }

    /// Current state.
    pub fn current(&self) -> AuthState {
        self.tx.borrow().clone()
    }

    /// A receiver observing every later change.
    pub fn watch(&self) -> watch::Receiver<AuthState> {
        self.tx.subscribe()
    }
}
