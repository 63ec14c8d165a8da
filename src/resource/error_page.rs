//! Generic error pages.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderValue, StatusCode, header};

use super::{RenderOutput, Request, Resource};
use crate::Result;

/// A leaf rendering a fixed status and a generic HTML body.
///
/// The body only names the status; failure details are never included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorPage {
    status: StatusCode,
}

impl ErrorPage {
    /// Error page for an arbitrary status.
    #[must_use]
    pub const fn new(status: StatusCode) -> Self {
        Self { status }
    }

    /// 404 for unknown children.
    #[must_use]
    pub const fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND)
    }

    /// 500 for unexpected failures.
    #[must_use]
    pub const fn internal_error() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Status this page renders.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    fn html(&self) -> String {
        let code = self.status.as_u16();
        let brief = self.status.canonical_reason().unwrap_or("Error");
        format!(
            "<html>\n  <head><title>{code} - {brief}</title></head>\n  \
             <body>\n    <h1>{brief}</h1>\n  </body>\n</html>\n"
        )
    }
}

#[async_trait]
impl Resource for ErrorPage {
    fn is_leaf(&self) -> bool {
        true
    }

    async fn get_child(&self, _segment: &str, _request: &mut Request) -> Arc<dyn Resource> {
        Arc::new(*self)
    }

    async fn render(&self, request: &mut Request) -> Result<RenderOutput> {
        request.set_status(self.status);
        request.set_header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        Ok(self.html().into())
    }
}
