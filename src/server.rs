//! Server builder and request handling.
//!
//! The [`ServerBuilder`] provides a fluent API for registering services,
//! middleware and hooks. The [`Server`] handles one call per
//! [`Server::handle`] invocation:
//! 1. Refuse the call if the server is stopped
//! 2. Validate the HTTP method and body size
//! 3. Read (and decrypt) the body, decode the envelope
//! 4. Normalise the method name and resolve the callback
//! 5. Run the middleware pipeline
//! 6. Bind positional arguments and invoke
//! 7. Encode (and encrypt) the response envelope
//!
//! Any stage after decoding fails into a fault carried by the response
//! envelope; the HTTP status stays 200.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use jrpc_engine::handler::{MethodTable, Service};
//! use jrpc_engine::protocol::Fault;
//! use jrpc_engine::Server;
//!
//! struct Calc;
//!
//! impl Service for Calc {
//!     fn methods(table: &mut MethodTable<Self>) {
//!         table.method("add", |_, (a, b): (i64, i64)| Ok::<_, Fault>(a + b));
//!     }
//! }
//!
//! let server = Server::builder().service(Calc).build().unwrap();
//! let request = http::Request::post("/")
//!     .body(Bytes::from_static(br#"{"id":1,"method":"calc.add","params":[[2,3]]}"#))
//!     .unwrap();
//! let response = server.handle(request);
//! assert_eq!(response.body().as_ref(), br#"{"id":1,"jsonrpc":"2.0","result":5}"#);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use http::{HeaderValue, Request, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::codec::{CipherEncoding, PayloadCipher};
use crate::error::{EngineError, Result};
use crate::handler::{
    contain_panics, unix_nanos, CallOutcome, ContextPool, Middleware, NameStyle, PooledContext,
    Registry, RequestContext, Service, DEFAULT_MAX_IDLE, START_TIME_KEY,
};
use crate::protocol::{Envelope, Fault};
use crate::transport::{self, MAX_REQUEST_CONTENT_LENGTH};

/// Response header that, when set by middleware, logs the final envelope.
pub const REQUEST_ID_HEADER: &str = "request-id";

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const SEALED_CONTENT_TYPE: &str = "text/plain";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Namespace and method name normalisation.
    pub name_style: NameStyle,
    /// Shared key for body obfuscation; ignored when shorter than 16 chars.
    pub crypto_key: Option<String>,
    /// Text encoding of obfuscated bodies.
    pub cipher_encoding: CipherEncoding,
    /// Request body limit.
    pub max_body_bytes: usize,
    /// Idle contexts kept by the pool.
    pub pool_max_idle: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            name_style: NameStyle::default(),
            crypto_key: None,
            cipher_encoding: CipherEncoding::default(),
            max_body_bytes: MAX_REQUEST_CONTENT_LENGTH,
            pool_max_idle: DEFAULT_MAX_IDLE,
        }
    }
}

type Registration = Box<dyn FnOnce(&mut Registry) -> Result<bool> + Send>;

/// Builder for configuring and creating a [`Server`].
///
/// Services are registered at [`build`](ServerBuilder::build) time, after
/// the name style and exclusions are known.
pub struct ServerBuilder {
    options: ServerOptions,
    registrations: Vec<Registration>,
    excluded: Vec<String>,
    middleware: Vec<Middleware>,
    setup: Vec<Box<dyn FnOnce(&mut Registry) + Send>>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            options: ServerOptions::default(),
            registrations: Vec::new(),
            excluded: Vec::new(),
            middleware: Vec::new(),
            setup: Vec::new(),
        }
    }

    /// Replace all options at once.
    pub fn options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    /// Register a service under its own namespace.
    pub fn service<S: Service>(mut self, service: S) -> Self {
        self.registrations
            .push(Box::new(move |registry: &mut Registry| registry.try_register(None, service)));
        self
    }

    /// Register a service under `namespace`.
    pub fn service_as<S: Service>(mut self, namespace: &str, service: S) -> Self {
        let namespace = namespace.to_owned();
        self.registrations.push(Box::new(move |registry: &mut Registry| {
            registry.try_register(Some(&namespace), service)
        }));
        self
    }

    /// Method names never exposed by any service.
    pub fn exclude_methods<I, M>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: AsRef<str>,
    {
        self.excluded
            .extend(methods.into_iter().map(|m| m.as_ref().to_owned()));
        self
    }

    /// Append middleware. A name already installed is ignored.
    pub fn middleware(mut self, handler: Middleware) -> Self {
        self.middleware.push(handler);
        self
    }

    /// Registry-wide hook run before each call.
    pub fn call_before<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut RequestContext, &str, &[Value]) -> std::result::Result<(), Fault>
            + Send
            + Sync
            + 'static,
    {
        self.setup.push(Box::new(move |registry: &mut Registry| {
            registry.set_call_before(hook);
        }));
        self
    }

    /// Registry-wide hook run after each call.
    pub fn call_after<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut RequestContext, &str, &[Value], &CallOutcome) -> std::result::Result<(), Fault>
            + Send
            + Sync
            + 'static,
    {
        self.setup.push(Box::new(move |registry: &mut Registry| {
            registry.set_call_after(hook);
        }));
        self
    }

    /// Default: snake case.
    pub fn name_style(mut self, style: NameStyle) -> Self {
        self.options.name_style = style;
        self
    }

    /// Enable body obfuscation with a shared key.
    pub fn crypto_key(mut self, key: impl Into<String>) -> Self {
        self.options.crypto_key = Some(key.into());
        self
    }

    /// Default: upper-case hex.
    pub fn cipher_encoding(mut self, encoding: CipherEncoding) -> Self {
        self.options.cipher_encoding = encoding;
        self
    }

    /// Default: 5 MiB.
    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.options.max_body_bytes = limit;
        self
    }

    /// Default: 1024.
    pub fn pool_max_idle(mut self, limit: usize) -> Self {
        self.options.pool_max_idle = limit;
        self
    }

    /// Register everything and build the server.
    ///
    /// # Errors
    ///
    /// [`EngineError::DuplicateNamespace`] when two services share a
    /// namespace.
    pub fn build(self) -> Result<Server> {
        let mut registry = Registry::with_style(self.options.name_style);
        registry.exclude_methods(&self.excluded);
        registry.use_middleware(self.middleware);
        for setup in self.setup {
            setup(&mut registry);
        }
        for registration in self.registrations {
            registration(&mut registry)?;
        }
        Ok(Server::new(registry, self.options))
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A JSON-RPC server over `http` request and response values.
///
/// `Server` is `Send + Sync`; share it behind an `Arc` and call
/// [`handle`](Server::handle) from as many threads as the transport uses.
pub struct Server {
    registry: Registry,
    middleware: Arc<[Middleware]>,
    options: ServerOptions,
    cipher: Option<PayloadCipher>,
    pool: ContextPool,
    running: AtomicBool,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Build a server around an already populated registry.
    pub fn new(registry: Registry, options: ServerOptions) -> Self {
        let cipher = options.crypto_key.as_deref().and_then(|key| {
            match PayloadCipher::new(key, options.cipher_encoding) {
                Ok(cipher) => Some(cipher),
                Err(e) => {
                    warn!("Body obfuscation disabled: {}", e);
                    None
                }
            }
        });
        let middleware: Arc<[Middleware]> = registry.middleware().to_vec().into();
        Self {
            registry,
            middleware,
            pool: ContextPool::with_max_idle(options.pool_max_idle),
            options,
            cipher,
            running: AtomicBool::new(true),
        }
    }

    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[inline]
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    #[inline]
    pub fn pool(&self) -> &ContextPool {
        &self.pool
    }

    /// Receiver registered for the namespace of `method`.
    pub fn namespace_service(&self, method: &str) -> Option<Arc<dyn Service>> {
        self.registry.namespace_service(method)
    }

    /// Take a pooled context for use with [`handle_context`](Server::handle_context).
    pub fn context(&self) -> PooledContext<'_> {
        self.pool.acquire()
    }

    /// Stop accepting calls. Idempotent.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            debug!("Server stopped");
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Handle one HTTP request end to end.
    pub fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        if transport::is_liveness_probe(&request) {
            return bare(StatusCode::OK);
        }
        if !self.is_running() {
            return bare(StatusCode::SERVICE_UNAVAILABLE);
        }
        let mut ctx = self.context();
        ctx.begin_request(request);
        self.handle_context(ctx)
    }

    /// Handle the request bound to `ctx`, releasing the context on return.
    pub fn handle_context(&self, mut ctx: PooledContext<'_>) -> Response<Bytes> {
        if transport::is_liveness_probe(ctx.request()) {
            return bare(StatusCode::OK);
        }
        if !self.is_running() {
            return bare(StatusCode::SERVICE_UNAVAILABLE);
        }
        if ctx.response().is_written() {
            return ctx.response_mut().take();
        }
        if let Err(rejection) = transport::validate_request(ctx.request(), self.options.max_body_bytes) {
            debug!("Request refused: {}", rejection);
            ctx.response_mut()
                .write_error(rejection.status(), &rejection.to_string());
            return ctx.response_mut().take();
        }
        if transport::is_preflight(ctx.request()) {
            ctx.response_mut().write(StatusCode::OK, Bytes::new());
            return ctx.response_mut().take();
        }

        ctx.response_mut()
            .headers_mut()
            .insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));

        if let Err(fault) = self.dispatch(&mut ctx) {
            ctx.envelope_mut().set_fault(fault);
        }
        self.write_envelope(&mut ctx);
        ctx.response_mut().take()
    }

    fn dispatch(&self, ctx: &mut RequestContext) -> std::result::Result<(), Fault> {
        let body = self.read_body(ctx.request().body())?;
        ctx.store_mut().insert(START_TIME_KEY, unix_nanos());
        ctx.set_body(body.clone());

        *ctx.envelope_mut() = Envelope::parse(&body)?;
        // Result and error are response-side; never echo what the client sent.
        ctx.envelope_mut().result = None;
        ctx.envelope_mut().error = None;
        if !ctx.envelope().has_valid_id() {
            // A structured id is not echoed back.
            ctx.envelope_mut().id = None;
        }
        ctx.envelope().validate()?;

        let method = self.registry.normalize_method(ctx.method())?;
        ctx.envelope_mut().method = method;
        let callback = self.registry.resolve(ctx.method())?;

        self.run_middleware(ctx)?;
        if ctx.is_stopped() {
            return Ok(());
        }

        let params = ctx.envelope_mut().params.take();
        let args = callback.bind(params)?;
        let method = ctx.method().to_owned();
        let result = callback.invoke(self.registry.hooks(), ctx, &method, args)?;
        ctx.envelope_mut().set_result(result);
        Ok(())
    }

    fn read_body(&self, raw: &Bytes) -> std::result::Result<Bytes, Fault> {
        match &self.cipher {
            Some(cipher) => cipher
                .open(raw)
                .map(Bytes::from)
                .map_err(|e| Fault::parse(format!("parse error: {}", e))),
            None => Ok(raw.clone()),
        }
    }

    fn run_middleware(&self, ctx: &mut RequestContext) -> std::result::Result<(), Fault> {
        if self.middleware.is_empty() {
            return Ok(());
        }
        let handlers = Arc::clone(&self.middleware);
        let method = ctx.method().to_owned();
        contain_panics(&method, || ctx.run(handlers))
    }

    fn write_envelope(&self, ctx: &mut RequestContext) {
        if ctx.response().is_written() {
            return;
        }
        let (content_type, body) = match self.encode_envelope(ctx) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!("Failed to encode response: {}", e);
                ctx.response_mut()
                    .write_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
                return;
            }
        };
        ctx.response_mut()
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        ctx.response_mut().write(StatusCode::OK, body);

        if let Some(request_id) = ctx.response().headers().get(REQUEST_ID_HEADER) {
            debug!(request_id = ?request_id, envelope = ?ctx.envelope(), "Response written");
        }
    }

    fn encode_envelope(&self, ctx: &mut RequestContext) -> Result<(&'static str, Vec<u8>)> {
        let encoded = ctx.envelope_mut().encode_response().map_err(EngineError::Json)?;
        match &self.cipher {
            Some(cipher) => Ok((SEALED_CONTENT_TYPE, cipher.seal(&encoded)?)),
            None => Ok((JSON_CONTENT_TYPE, encoded)),
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("registry", &self.registry)
            .field("options", &self.options)
            .field("cipher", &self.cipher)
            .field("running", &self.is_running())
            .finish()
    }
}

fn bare(status: StatusCode) -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::MethodTable;

    struct Ping;

    impl Service for Ping {
        fn methods(table: &mut MethodTable<Self>) {
            table.method("ping", |_, ()| Value::from("pong"));
        }
    }

    fn post(body: &'static str) -> Request<Bytes> {
        Request::post("/").body(Bytes::from_static(body.as_bytes())).unwrap()
    }

    #[test]
    fn test_builder_default() {
        let builder = ServerBuilder::default();
        assert_eq!(builder.options.max_body_bytes, MAX_REQUEST_CONTENT_LENGTH);
        assert_eq!(builder.options.pool_max_idle, DEFAULT_MAX_IDLE);
        assert_eq!(builder.options.name_style, NameStyle::Snake);
        assert!(builder.options.crypto_key.is_none());
    }

    #[test]
    fn test_builder_configuration() {
        let builder = Server::builder()
            .name_style(NameStyle::Verbatim)
            .crypto_key("0123456789abcdef")
            .cipher_encoding(CipherEncoding::Base64)
            .max_body_bytes(1024)
            .pool_max_idle(8);

        assert_eq!(builder.options.name_style, NameStyle::Verbatim);
        assert_eq!(builder.options.crypto_key.as_deref(), Some("0123456789abcdef"));
        assert_eq!(builder.options.cipher_encoding, CipherEncoding::Base64);
        assert_eq!(builder.options.max_body_bytes, 1024);
        assert_eq!(builder.options.pool_max_idle, 8);

        let server = builder.build().unwrap();
        assert!(server.cipher.is_some());
        assert_eq!(server.pool().max_idle(), 8);
    }

    #[test]
    fn test_builder_method_chaining() {
        let server = Server::builder()
            .service(Ping)
            .service_as("health", Ping)
            .middleware(Middleware::new("noop", |ctx: &mut RequestContext| ctx.next()))
            .middleware(Middleware::new("noop", |ctx: &mut RequestContext| ctx.next()))
            .build()
            .unwrap();

        assert!(server.registry().contains("ping"));
        assert!(server.registry().contains("health"));
        assert_eq!(server.middleware.len(), 1);
    }

    #[test]
    fn test_builder_duplicate_namespace() {
        let err = Server::builder().service(Ping).service(Ping).build().unwrap_err();
        assert!(matches!(err, EngineError::DuplicateNamespace(ref ns) if ns == "ping"));
    }

    #[test]
    fn test_short_key_disables_obfuscation() {
        let server = Server::builder().crypto_key("short").build().unwrap();
        assert!(server.cipher.is_none());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let server = Server::builder().service(Ping).build().unwrap();
        assert!(server.is_running());
        server.stop();
        server.stop();
        assert!(!server.is_running());

        let response = server.handle(post(r#"{"id":1,"method":"ping.ping"}"#));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.body().is_empty());
    }

    #[test]
    fn test_liveness_answered_after_stop() {
        let server = Server::builder().service(Ping).build().unwrap();
        server.stop();

        let probe = Request::get("/").body(Bytes::new()).unwrap();
        let response = server.handle(probe);
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.body().is_empty());

        let mut ctx = server.context();
        ctx.begin_request(Request::get("/").body(Bytes::new()).unwrap());
        assert_eq!(server.handle_context(ctx).status(), StatusCode::OK);
    }

    #[test]
    fn test_prewritten_response_is_returned() {
        let server = Server::builder().service(Ping).build().unwrap();
        let mut ctx = server.context();
        ctx.begin_request(post(r#"{"id":1,"method":"ping.ping"}"#));
        ctx.response_mut().write(StatusCode::ACCEPTED, "queued");

        let response = server.handle_context(ctx);
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.body().as_ref(), b"queued");
        assert_eq!(server.pool().idle(), 1);
    }
}
