//! Per-call request context.
//!
//! A [`RequestContext`] carries everything one in-flight call needs:
//! - the inbound HTTP request and its (decrypted) body
//! - the envelope being decoded and answered
//! - the outbound [`ResponseSink`]
//! - the middleware cursor (`stopped`, pipeline position)
//! - a [`Scratch`] store for data shared between middleware and hooks
//! - the [`CallScope`] handed to methods that take a leading scope
//!
//! Contexts are pooled (see [`ContextPool`](super::ContextPool)); they are
//! never shared between concurrent calls.
//!
//! # Example
//!
//! ```ignore
//! let timing = Middleware::new("timing", |ctx: &mut RequestContext| {
//!     ctx.store_mut().insert("seen", true);
//!     ctx.next()
//! });
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::pipeline::Middleware;
use crate::protocol::Envelope;

/// Scratch key: call start, nanoseconds since the Unix epoch.
pub const START_TIME_KEY: &str = "__jrpc_start_time";
/// Scratch key: method return, nanoseconds since the Unix epoch.
pub const END_TIME_KEY: &str = "__jrpc_end_time";
/// Scratch key: nanoseconds between start and return.
pub const TIME_USED_KEY: &str = "__jrpc_time_used";

/// Deadline attached to an inbound request by the transport adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(pub Instant);

/// Cancellation and deadline signal passed to methods bound with a scope.
///
/// Built from the inbound request's extensions: a [`CancellationToken`]
/// and/or a [`Deadline`] inserted by the transport. The engine itself
/// never cancels a call.
#[derive(Debug, Clone)]
pub struct CallScope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CallScope {
    pub fn new(token: CancellationToken, deadline: Option<Instant>) -> Self {
        Self { token, deadline }
    }

    /// Scope carried by `request`, or one that never cancels.
    pub fn from_request(request: &http::Request<Bytes>) -> Self {
        let extensions = request.extensions();
        Self {
            token: extensions
                .get::<CancellationToken>()
                .cloned()
                .unwrap_or_else(CancellationToken::new),
            deadline: extensions.get::<Deadline>().map(|d| d.0),
        }
    }

    /// True once the token is cancelled or the deadline has passed.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    #[inline]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

impl Default for CallScope {
    fn default() -> Self {
        Self::new(CancellationToken::new(), None)
    }
}

/// String-keyed store shared by middleware, hooks and the invoker.
#[derive(Debug, Default)]
pub struct Scratch {
    entries: HashMap<String, Value>,
}

impl Scratch {
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.entries.get(key).and_then(Value::as_i64)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Nanoseconds since the Unix epoch.
pub(crate) fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}

/// Outbound half of the transport: status, headers and body.
///
/// Only the first write sticks; [`is_written`](Self::is_written) is the
/// marker the facade checks before writing the envelope.
#[derive(Debug)]
pub struct ResponseSink {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    written: bool,
}

impl ResponseSink {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            written: false,
        }
    }

    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    #[inline]
    pub fn is_written(&self) -> bool {
        self.written
    }

    /// Write status and body. Returns `false` if a response was already written.
    pub fn write(&mut self, status: StatusCode, body: impl Into<Bytes>) -> bool {
        if self.written {
            return false;
        }
        self.status = status;
        self.body = body.into();
        self.written = true;
        true
    }

    /// Write a plain-text transport error.
    pub fn write_error(&mut self, status: StatusCode, message: &str) -> bool {
        if self.written {
            return false;
        }
        self.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        self.write(status, Bytes::copy_from_slice(message.as_bytes()))
    }

    /// Move the response out, leaving the sink empty.
    pub fn take(&mut self) -> http::Response<Bytes> {
        let mut response = http::Response::new(std::mem::take(&mut self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = std::mem::take(&mut self.headers);
        self.reset();
        response
    }

    pub(crate) fn reset(&mut self) {
        self.status = StatusCode::OK;
        self.headers.clear();
        self.body = Bytes::new();
        self.written = false;
    }
}

impl Default for ResponseSink {
    fn default() -> Self {
        Self::new()
    }
}

/// State of one in-flight call.
pub struct RequestContext {
    pub(crate) stopped: bool,
    pub(crate) position: usize,
    pub(crate) handlers: Arc<[Middleware]>,
    envelope: Envelope,
    request: http::Request<Bytes>,
    body: Bytes,
    response: ResponseSink,
    scope: CallScope,
    store: Scratch,
}

impl RequestContext {
    /// Create a context with an empty envelope attached.
    pub fn new() -> Self {
        Self {
            stopped: false,
            position: 0,
            handlers: Arc::from(Vec::new()),
            envelope: Envelope::default(),
            request: http::Request::default(),
            body: Bytes::new(),
            response: ResponseSink::new(),
            scope: CallScope::default(),
            store: Scratch::default(),
        }
    }

    /// Bind the transport request and reset the pipeline cursor.
    pub fn begin_request(&mut self, request: http::Request<Bytes>) -> &mut Self {
        self.stopped = false;
        self.position = 0;
        self.scope = CallScope::from_request(&request);
        self.request = request;
        self.response.reset();
        self
    }

    /// Clear all per-call state. The envelope is cleared in place.
    pub(crate) fn reset(&mut self) {
        self.envelope.clear();
        self.stopped = false;
        self.position = 0;
        self.handlers = Arc::from(Vec::new());
        self.request = http::Request::default();
        self.body = Bytes::new();
        self.response.reset();
        self.scope = CallScope::default();
        self.store.clear();
    }

    #[inline]
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    #[inline]
    pub fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    /// Method name of the current envelope, normalised once resolved.
    #[inline]
    pub fn method(&self) -> &str {
        &self.envelope.method
    }

    #[inline]
    pub fn request(&self) -> &http::Request<Bytes> {
        &self.request
    }

    /// Request body after decryption.
    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub(crate) fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }

    #[inline]
    pub fn response(&self) -> &ResponseSink {
        &self.response
    }

    #[inline]
    pub fn response_mut(&mut self) -> &mut ResponseSink {
        &mut self.response
    }

    #[inline]
    pub fn scope(&self) -> &CallScope {
        &self.scope
    }

    #[inline]
    pub fn store(&self) -> &Scratch {
        &self.store
    }

    #[inline]
    pub fn store_mut(&mut self) -> &mut Scratch {
        &mut self.store
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Short-circuit the pipeline; later `next()` calls do nothing.
    #[inline]
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Index of the middleware currently running.
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.method())
            .field("stopped", &self.is_stopped())
            .field("position", &self.position())
            .finish_non_exhaustive()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request_with(token: Option<CancellationToken>, deadline: Option<Instant>) -> http::Request<Bytes> {
        let mut request = http::Request::new(Bytes::from_static(b"{}"));
        if let Some(token) = token {
            request.extensions_mut().insert(token);
        }
        if let Some(deadline) = deadline {
            request.extensions_mut().insert(Deadline(deadline));
        }
        request
    }

    #[test]
    fn test_context_creation() {
        let ctx = RequestContext::new();
        assert!(!ctx.is_stopped());
        assert_eq!(ctx.position(), 0);
        assert_eq!(ctx.envelope(), &Envelope::default());
        assert!(!ctx.response().is_written());
    }

    #[test]
    fn test_begin_request_resets_cursor() {
        let mut ctx = RequestContext::new();
        ctx.stop();
        ctx.position = 3;
        ctx.begin_request(request_with(None, None));
        assert!(!ctx.is_stopped());
        assert_eq!(ctx.position(), 0);
        assert_eq!(ctx.request().body().as_ref(), b"{}");
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut ctx = RequestContext::new();
        ctx.begin_request(request_with(None, None));
        ctx.envelope_mut().method.push_str("a.b");
        ctx.envelope_mut().id = Some(json!(1));
        ctx.store_mut().insert("user", "alice");
        ctx.set_body(Bytes::from_static(b"body"));
        ctx.response_mut().write(StatusCode::ACCEPTED, "x");

        ctx.reset();

        assert_eq!(ctx.envelope(), &Envelope::default());
        assert!(ctx.store().is_empty());
        assert!(ctx.body().is_empty());
        assert!(!ctx.response().is_written());
        assert!(ctx.request().body().is_empty());
    }

    #[test]
    fn test_scope_from_request_extensions() {
        let token = CancellationToken::new();
        let deadline = Instant::now() + Duration::from_secs(60);
        let scope = CallScope::from_request(&request_with(Some(token.clone()), Some(deadline)));
        assert_eq!(scope.deadline(), Some(deadline));
        assert!(!scope.is_cancelled());
        token.cancel();
        assert!(scope.is_cancelled());
    }

    #[test]
    fn test_scope_past_deadline_is_cancelled() {
        let scope = CallScope::new(CancellationToken::new(), Some(Instant::now()));
        assert!(scope.is_cancelled());
        assert_eq!(scope.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_default_scope_never_cancels() {
        let scope = CallScope::from_request(&request_with(None, None));
        assert!(!scope.is_cancelled());
        assert!(scope.deadline().is_none());
    }

    #[test]
    fn test_sink_first_write_wins() {
        let mut sink = ResponseSink::new();
        assert!(sink.write_error(StatusCode::UNAUTHORIZED, "login first"));
        assert!(!sink.write(StatusCode::OK, "late"));
        let response = sink.take();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.body().as_ref(), b"login first");
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert!(!sink.is_written());
    }

    #[test]
    fn test_scratch_store() {
        let mut store = Scratch::default();
        store.insert(START_TIME_KEY, 42i64);
        store.insert("name", "x");
        assert_eq!(store.get_i64(START_TIME_KEY), Some(42));
        assert_eq!(store.get_i64("name"), None);
        assert!(store.contains("name"));
        assert_eq!(store.remove("name"), Some(json!("x")));
        assert_eq!(store.len(), 1);
    }
}
