//! Authentication gate in front of the resource tree.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use super::{ResourceWrapper, UnauthorizedResource};
use crate::Result;
use crate::credentials::{ANONYMOUS, CredentialFactory, default_credential_factory};
use crate::error::LoginError;
use crate::portal::{AvatarInterface, Portal};
use crate::resource::{ErrorPage, RenderOutput, Request, Resource};

/// Authenticates every request by its TLS client certificate before letting
/// it reach the portal's avatar.
///
/// The wrapper is transparent for path accounting: it hands the segment it
/// was asked about back to the request and returns the avatar root, so the
/// avatar resolves the same segment itself. Nothing is cached between
/// dispatch steps or between requests; each lookup performs its own login.
pub struct AuthSessionWrapper {
    portal: Arc<dyn Portal>,
    credential_factory: CredentialFactory,
}

impl AuthSessionWrapper {
    /// Gate requests through `portal`, using the default credential factory.
    pub fn new(portal: Arc<dyn Portal>) -> Self {
        Self {
            portal,
            credential_factory: default_credential_factory(),
        }
    }

    /// Replace the function mapping peer certificates to credentials.
    #[must_use]
    pub fn with_credential_factory(mut self, factory: CredentialFactory) -> Self {
        self.credential_factory = factory;
        self
    }

    /// Log the request in and return the resource it may reach.
    ///
    /// Returns a [`ResourceWrapper`] around the avatar on success, an
    /// [`UnauthorizedResource`] when the portal rejects the credential, and a
    /// generic 500 [`ErrorPage`] on any other failure.
    pub async fn resolve_authorized_resource(&self, request: &mut Request) -> Arc<dyn Resource> {
        let credential = match request.peer_certificate() {
            Some(cert) => (self.credential_factory)(cert.clone()),
            None => ANONYMOUS,
        };

        let closed = request.connection().closed.clone();
        let outcome = tokio::select! {
            outcome = self.portal.login(credential, AvatarInterface::Resource) => outcome,
            () = closed.cancelled() => {
                debug!(path = %request.uri().path(), "Connection closed during login");
                return Arc::new(UnauthorizedResource);
            }
        };

        if request.is_closed() {
            // The login settled too late; dropping it releases its session.
            debug!(path = %request.uri().path(), "Discarding login for closed connection");
            return Arc::new(UnauthorizedResource);
        }

        match outcome {
            Ok(success) => Arc::new(ResourceWrapper::new(success.avatar, success.logout)),
            Err(e) if e.is_authentication_failure() => Arc::new(UnauthorizedResource),
            Err(e) => {
                log_unexpected(request, &e);
                Arc::new(ErrorPage::internal_error())
            }
        }
    }
}

fn log_unexpected(request: &Request, e: &LoginError) {
    error!(
        method = %request.method(),
        path = %request.uri().path(),
        error = %format_args!("{e:#}"),
        "Unexpected error during login"
    );
}

impl fmt::Debug for AuthSessionWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSessionWrapper").finish_non_exhaustive()
    }
}

#[async_trait]
impl Resource for AuthSessionWrapper {
    async fn get_child(&self, _segment: &str, request: &mut Request) -> Arc<dyn Resource> {
        request.requeue_segment();
        self.resolve_authorized_resource(request).await
    }

    async fn render(&self, request: &mut Request) -> Result<RenderOutput> {
        let resource = self.resolve_authorized_resource(request).await;
        resource.render(request).await
    }
}
