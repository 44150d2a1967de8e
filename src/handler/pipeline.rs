//! Middleware pipeline with explicit flow control.
//!
//! Each [`Middleware`] receives the [`RequestContext`] and either calls
//! [`RequestContext::next`] to continue, or returns without it (optionally
//! calling [`RequestContext::stop`]) to short-circuit. Returning `Err`
//! aborts the chain and the fault becomes the response.
//!
//! ```text
//! run([a, b, c]) ─▶ a ─next()─▶ b ─next()─▶ c ─next()─▶ (end)
//!                        │
//!                        └─ stop() ─▶ later next() is a no-op, method is not invoked
//! ```
//!
//! Middleware identity is its name: [`upsert_middleware`] ignores a
//! handler whose name is already installed.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use super::RequestContext;
use crate::protocol::Fault;

/// Result type for middleware functions.
pub type MiddlewareResult = Result<(), Fault>;

type MiddlewareFn = dyn Fn(&mut RequestContext) -> MiddlewareResult + Send + Sync;

/// A named pipeline handler.
#[derive(Clone)]
pub struct Middleware {
    name: Cow<'static, str>,
    func: Arc<MiddlewareFn>,
}

impl Middleware {
    pub fn new<F>(name: impl Into<Cow<'static, str>>, func: F) -> Self
    where
        F: Fn(&mut RequestContext) -> MiddlewareResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn call(&self, ctx: &mut RequestContext) -> MiddlewareResult {
        (self.func)(ctx)
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Middleware").field(&self.name).finish()
    }
}

/// Append every handler from `new` whose name is not yet in `handlers`.
pub fn upsert_middleware(handlers: &mut Vec<Middleware>, new: impl IntoIterator<Item = Middleware>) {
    for handler in new {
        if handlers.iter().any(|h| h.name == handler.name) {
            continue;
        }
        handlers.push(handler);
    }
}

impl RequestContext {
    /// Install `handlers` for this call and run the first one.
    pub fn run(&mut self, handlers: Arc<[Middleware]>) -> MiddlewareResult {
        self.handlers = handlers;
        self.position = 0;
        match self.handlers.first().cloned() {
            Some(first) => first.call(self),
            None => Ok(()),
        }
    }

    /// Advance to the next handler. No-op once stopped or exhausted.
    pub fn next(&mut self) -> MiddlewareResult {
        if self.stopped || self.position >= self.handlers.len() {
            return Ok(());
        }
        self.position += 1;
        match self.handlers.get(self.position).cloned() {
            Some(handler) => handler.call(self),
            None => Ok(()),
        }
    }
}
