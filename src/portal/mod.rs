//! Credential verification.
//!
//! A [`Portal`] turns a [`Credential`] into an avatar: the root of the
//! resource subtree the authenticated client may reach, plus a
//! [`LogoutHandle`] that releases whatever session state the login created.
//!
//! # Modules
//!
//! - [`policy`]: first-match-wins identity rules (`IdentityPolicy`)
//! - [`certificate`]: the stock certificate portal (`CertificatePortal`, `Realm`)

pub mod certificate;
pub mod policy;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

pub use certificate::{Avatar, AvatarId, CertificatePortal, Realm};
pub use policy::{IdentityPolicy, PolicyDecision};

use crate::credentials::Credential;
use crate::error::LoginError;
use crate::resource::Resource;

/// Shape of the avatar requested from a portal.
///
/// The gate only ever asks for resource-shaped avatars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvatarInterface {
    /// An [`Arc<dyn Resource>`] tree root.
    Resource,
}

/// Result of a successful login.
#[derive(Debug)]
pub struct LoginSuccess {
    /// Interface the avatar implements.
    pub interface: AvatarInterface,
    /// Root of the authorized subtree.
    pub avatar: Arc<dyn Resource>,
    /// Releases the login's session state.
    pub logout: LogoutHandle,
}

/// Resolves credentials to avatars.
///
/// Implementations own their concurrency; the gate shares one portal across
/// all requests and never retries a failed login.
#[async_trait]
pub trait Portal: Send + Sync {
    /// Authenticate `credential` and return an avatar implementing
    /// `interface`.
    async fn login(
        &self,
        credential: Credential,
        interface: AvatarInterface,
    ) -> Result<LoginSuccess, LoginError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Logout handle
// ─────────────────────────────────────────────────────────────────────────────

type LogoutFn = Box<dyn FnOnce() + Send>;

struct LogoutInner {
    action: Mutex<Option<LogoutFn>>,
}

impl LogoutInner {
    fn fire(&self) -> bool {
        let action = self.action.lock().take();
        match action {
            Some(action) => {
                action();
                true
            }
            None => false,
        }
    }
}

impl Drop for LogoutInner {
    fn drop(&mut self) {
        self.fire();
    }
}

/// Releases the session state of one login.
///
/// Clones share one action. The action runs at most once, on the first
/// [`LogoutHandle::fire`]; if no clone ever fires, it runs when the last
/// clone is dropped.
#[derive(Clone)]
pub struct LogoutHandle {
    inner: Arc<LogoutInner>,
}

impl LogoutHandle {
    /// Wrap `action`.
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(LogoutInner {
                action: Mutex::new(Some(Box::new(action))),
            }),
        }
    }

    /// A handle with nothing to release.
    #[must_use]
    pub fn noop() -> Self {
        Self {
            inner: Arc::new(LogoutInner {
                action: Mutex::new(None),
            }),
        }
    }

    /// Run the action if it has not run yet. Returns `true` if this call ran it.
    pub fn fire(&self) -> bool {
        self.inner.fire()
    }

    /// Returns `true` once the action has run.
    #[must_use]
    pub fn is_spent(&self) -> bool {
        self.inner.action.lock().is_none()
    }
}

impl fmt::Debug for LogoutHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogoutHandle")
            .field("spent", &self.is_spent())
            .finish()
    }
}
