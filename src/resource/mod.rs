//! Resource tree.
//!
//! Requests are served by walking a tree of [`Resource`] nodes one path
//! segment at a time and rendering the node the walk ends on. Nodes are
//! resolved lazily: a node decides at lookup time which child (if any)
//! handles the next segment, and lookups may suspend (e.g. to authenticate).
//!
//! ```text
//! GET /a/b/c
//!   root.get_child("a") → A
//!   A.get_child("b")    → B
//!   B.get_child("c")    → C   (or stop early when a node is a leaf)
//!   C.render()
//! ```

mod error_page;
mod request;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use bytes::Bytes;

pub use error_page::ErrorPage;
pub use request::{FinishHooks, FinishReason, Request};

use crate::Result;

/// What a resource produced when rendered.
pub enum RenderOutput {
    /// The whole body is available now.
    Complete(Bytes),
    /// The body will be produced later; the request finishes when the
    /// stream ends.
    Deferred(Body),
}

impl RenderOutput {
    /// A complete empty body.
    #[must_use]
    pub fn empty() -> Self {
        Self::Complete(Bytes::new())
    }

    /// Convert into an HTTP body.
    #[must_use]
    pub fn into_body(self) -> Body {
        match self {
            Self::Complete(bytes) => Body::from(bytes),
            Self::Deferred(body) => body,
        }
    }
}

impl From<&'static str> for RenderOutput {
    fn from(s: &'static str) -> Self {
        Self::Complete(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for RenderOutput {
    fn from(s: String) -> Self {
        Self::Complete(Bytes::from(s))
    }
}

impl From<Vec<u8>> for RenderOutput {
    fn from(v: Vec<u8>) -> Self {
        Self::Complete(Bytes::from(v))
    }
}

impl fmt::Debug for RenderOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete(bytes) => f.debug_tuple("Complete").field(&bytes.len()).finish(),
            Self::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

/// A node of the dispatch tree.
#[async_trait]
pub trait Resource: Send + Sync + fmt::Debug {
    /// Leaves end dispatch: remaining path segments are left for `render`.
    fn is_leaf(&self) -> bool {
        false
    }

    /// Resolve the child handling `segment`.
    ///
    /// The site has already moved `segment` from the request's postpath to
    /// its prepath. The default has no children.
    async fn get_child(&self, segment: &str, request: &mut Request) -> Arc<dyn Resource> {
        let _ = (segment, request);
        Arc::new(ErrorPage::not_found())
    }

    /// Render this node, setting status and headers on `request`.
    async fn render(&self, request: &mut Request) -> Result<RenderOutput>;
}

/// Walk `root` along the request's remaining path.
///
/// Stops at the first leaf or when the postpath is exhausted, and returns
/// the node to render.
pub async fn resolve(root: Arc<dyn Resource>, request: &mut Request) -> Arc<dyn Resource> {
    let mut resource = root;
    while !resource.is_leaf() {
        let Some(segment) = request.next_segment() else {
            break;
        };
        resource = resource.get_child(&segment, request).await;
    }
    resource
}
