//! Logout-tracking proxy for an avatar subtree.

use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;
use crate::portal::LogoutHandle;
use crate::resource::{RenderOutput, Request, Resource};

/// Wraps a resource reached through one login so that the login's logout
/// handle runs once the request that renders it has finished.
///
/// Every child looked up through the wrapper is wrapped again with the same
/// handle, so the hook stays attached at any depth. The handle is idempotent:
/// if several resources of the subtree are rendered, the first finished
/// request releases the session and later ones are no-ops.
#[derive(Debug, Clone)]
pub struct ResourceWrapper {
    resource: Arc<dyn Resource>,
    logout: LogoutHandle,
}

impl ResourceWrapper {
    /// Bind `resource` to `logout`.
    pub fn new(resource: Arc<dyn Resource>, logout: LogoutHandle) -> Self {
        Self { resource, logout }
    }

    /// The wrapped resource.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn Resource> {
        &self.resource
    }
}

#[async_trait]
impl Resource for ResourceWrapper {
    fn is_leaf(&self) -> bool {
        self.resource.is_leaf()
    }

    async fn get_child(&self, segment: &str, request: &mut Request) -> Arc<dyn Resource> {
        let child = self.resource.get_child(segment, request).await;
        Arc::new(Self::new(child, self.logout.clone()))
    }

    async fn render(&self, request: &mut Request) -> Result<RenderOutput> {
        let logout = self.logout.clone();
        request.notify_finish(move |_reason| {
            logout.fire();
        });
        self.resource.render(request).await
    }
}
