//! Rejection leaf.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderValue, StatusCode, header};

use crate::Result;
use crate::resource::{RenderOutput, Request, Resource};

/// Terminal resource served when authentication is refused.
///
/// Child lookups return another `UnauthorizedResource`, so nothing below the
/// point of rejection is ever reached.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnauthorizedResource;

#[async_trait]
impl Resource for UnauthorizedResource {
    fn is_leaf(&self) -> bool {
        true
    }

    async fn get_child(&self, _segment: &str, _request: &mut Request) -> Arc<dyn Resource> {
        Arc::new(Self)
    }

    async fn render(&self, request: &mut Request) -> Result<RenderOutput> {
        request.set_status(StatusCode::UNAUTHORIZED);
        if request.is_head() {
            return Ok(RenderOutput::empty());
        }
        request.set_header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Ok("Unauthorized".into())
    }
}
