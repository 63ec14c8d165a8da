//! HTTP front end of the resource tree.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use super::body::FinishBody;
use crate::resource::{ErrorPage, FinishReason, RenderOutput, Request, Resource, resolve};

/// Serves HTTP requests from a resource tree.
#[derive(Debug, Clone)]
pub struct Site {
    root: Arc<dyn Resource>,
}

impl Site {
    /// Serve the tree rooted at `root`.
    pub fn new(root: Arc<dyn Resource>) -> Self {
        Self { root }
    }

    /// Axum router dispatching every path into the tree.
    pub fn router(self) -> Router {
        Router::new()
            .fallback(dispatch)
            .with_state(Arc::new(self))
            .layer(TraceLayer::new_for_http())
    }

    /// Walk the tree for `request`, render the node it ends on and build the
    /// response.
    ///
    /// Finish hooks registered during rendering run when the response body
    /// is done. A render error is logged and answered with a generic 500
    /// page; its hooks run with [`FinishReason::Errored`].
    pub async fn handle(&self, request: axum::http::Request<Body>) -> Response {
        let mut request = Request::from_http(request);
        let method = request.method().clone();
        let uri = request.uri().clone();

        let resource = resolve(Arc::clone(&self.root), &mut request).await;
        let rendered = resource.render(&mut request).await;

        if request.is_closed() {
            debug!(%method, path = %uri.path(), "Connection closed before response");
            return StatusCode::NO_CONTENT.into_response();
        }

        match rendered {
            Ok(output) => {
                let (status, headers, hooks) = request.into_response_parts();
                let body = match output {
                    RenderOutput::Complete(bytes) => Body::from(bytes),
                    RenderOutput::Deferred(body) => body,
                };
                let mut response = Response::new(Body::new(FinishBody::new(body, hooks)));
                *response.status_mut() = status;
                *response.headers_mut() = headers;
                response
            }
            Err(e) => {
                error!(%method, path = %uri.path(), error = %e, "Render failed");
                let (_, _, hooks) = request.into_response_parts();
                hooks.run(FinishReason::Errored);
                internal_error(method, uri).await
            }
        }
    }
}

async fn dispatch(State(site): State<Arc<Site>>, request: axum::extract::Request) -> Response {
    site.handle(request).await
}

async fn internal_error(method: Method, uri: Uri) -> Response {
    let mut request = Request::new(method, uri);
    match ErrorPage::internal_error().render(&mut request).await {
        Ok(output) => {
            let (status, headers, _) = request.into_response_parts();
            (status, headers, output.into_body()).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
