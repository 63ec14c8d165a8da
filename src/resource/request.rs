//! The dispatch-time view of an HTTP request.
//!
//! A [`Request`] is exclusively owned by the task serving it. Resources read
//! the method, headers and transport info from it, consume path segments
//! while the site walks the tree, set the response status and headers, and
//! register finish hooks that run once the response has been delivered.

use std::collections::VecDeque;
use std::fmt;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use rustls::pki_types::CertificateDer;

use crate::transport::ConnectionInfo;

// ─────────────────────────────────────────────────────────────────────────────
// Finish hooks
// ─────────────────────────────────────────────────────────────────────────────

/// How the processing of a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The response body was delivered in full.
    Completed,
    /// Rendering or streaming the body failed.
    Errored,
    /// The response was dropped before completion (client went away).
    Abandoned,
}

type FinishHook = Box<dyn FnOnce(FinishReason) + Send>;

/// Callbacks waiting for a request to finish.
///
/// Each hook runs exactly once: either through [`FinishHooks::run`] or, if the
/// hooks are dropped first, with [`FinishReason::Abandoned`].
#[derive(Default)]
pub struct FinishHooks {
    hooks: Vec<FinishHook>,
}

impl FinishHooks {
    /// Register a hook.
    pub fn push(&mut self, hook: impl FnOnce(FinishReason) + Send + 'static) {
        self.hooks.push(Box::new(hook));
    }

    /// Number of pending hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Returns `true` when no hook is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every pending hook with `reason`.
    pub fn run(mut self, reason: FinishReason) {
        self.fire(reason);
    }

    fn fire(&mut self, reason: FinishReason) {
        for hook in self.hooks.drain(..) {
            hook(reason);
        }
    }
}

impl Drop for FinishHooks {
    fn drop(&mut self) {
        self.fire(FinishReason::Abandoned);
    }
}

impl fmt::Debug for FinishHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinishHooks")
            .field("pending", &self.hooks.len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request
// ─────────────────────────────────────────────────────────────────────────────

/// A request being dispatched through the resource tree.
#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    prepath: Vec<String>,
    postpath: VecDeque<String>,
    connection: ConnectionInfo,
    body: Option<Body>,
    status: StatusCode,
    response_headers: HeaderMap,
    finish_hooks: FinishHooks,
}

impl Request {
    /// Create a request for `method` and `uri` with no body and no transport
    /// information.
    #[must_use]
    pub fn new(method: Method, uri: Uri) -> Self {
        let postpath = split_path(uri.path());
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            prepath: Vec::new(),
            postpath,
            connection: ConnectionInfo::default(),
            body: None,
            status: StatusCode::OK,
            response_headers: HeaderMap::new(),
            finish_hooks: FinishHooks::default(),
        }
    }

    /// Build a dispatch request from an incoming HTTP request.
    ///
    /// The [`ConnectionInfo`] injected by the listener is picked up from the
    /// request extensions; requests without one are treated as coming from
    /// an anonymous plain connection.
    #[must_use]
    pub fn from_http(request: axum::http::Request<Body>) -> Self {
        let (mut parts, body) = request.into_parts();
        let connection = parts
            .extensions
            .remove::<ConnectionInfo>()
            .unwrap_or_default();
        let mut req = Self::new(parts.method, parts.uri);
        req.headers = parts.headers;
        req.connection = connection;
        req.body = Some(body);
        req
    }

    /// Attach transport information.
    #[must_use]
    pub fn with_connection(mut self, connection: ConnectionInfo) -> Self {
        self.connection = connection;
        self
    }

    /// Attach request headers.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// HTTP method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns `true` for `HEAD` requests.
    #[must_use]
    pub fn is_head(&self) -> bool {
        self.method == Method::HEAD
    }

    /// Request URI.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Transport information for the connection.
    #[must_use]
    pub fn connection(&self) -> &ConnectionInfo {
        &self.connection
    }

    /// Client certificate presented on the underlying transport, if any.
    #[must_use]
    pub fn peer_certificate(&self) -> Option<&CertificateDer<'static>> {
        self.connection.peer_certificate()
    }

    /// Returns `true` once the connection carrying this request is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    /// Take the request body. Returns `None` on the second call.
    pub fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }

    // ── path accounting ─────────────────────────────────────────────────────

    /// Segments already consumed by dispatch.
    #[must_use]
    pub fn prepath(&self) -> &[String] {
        &self.prepath
    }

    /// Segments not yet consumed by dispatch.
    #[must_use]
    pub fn postpath(&self) -> &VecDeque<String> {
        &self.postpath
    }

    /// Consume the next path segment, moving it to the prepath.
    pub fn next_segment(&mut self) -> Option<String> {
        let segment = self.postpath.pop_front()?;
        self.prepath.push(segment.clone());
        Some(segment)
    }

    /// Put the most recently consumed segment back in front of the postpath.
    pub fn requeue_segment(&mut self) {
        if let Some(segment) = self.prepath.pop() {
            self.postpath.push_front(segment);
        }
    }

    // ── response ────────────────────────────────────────────────────────────

    /// Response status set so far (200 unless changed).
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Set the response status.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// Set a response header, replacing any previous value.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.response_headers.insert(name, value);
    }

    /// Response headers set so far.
    #[must_use]
    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    /// Register `hook` to run once this request has finished, whatever the
    /// outcome.
    pub fn notify_finish(&mut self, hook: impl FnOnce(FinishReason) + Send + 'static) {
        self.finish_hooks.push(hook);
    }

    /// Split off the response head and the pending finish hooks.
    #[must_use]
    pub fn into_response_parts(self) -> (StatusCode, HeaderMap, FinishHooks) {
        (self.status, self.response_headers, self.finish_hooks)
    }
}

/// Split a URI path into non-empty segments.
fn split_path(path: &str) -> VecDeque<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}
