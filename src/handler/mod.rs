//! Handler module - services, method dispatch and per-call state.
//!
//! Provides:
//! - [`Service`] / [`MethodTable`] - bind a value's methods under a namespace
//! - [`Registry`] - resolves `namespace.method` to a [`Callback`]
//! - [`Callback`] - a bound method plus the invocation sequence
//! - [`RequestContext`] - per-call state, middleware cursor and scratch store
//! - [`Middleware`] - named pipeline handlers run before the method
//! - [`ContextPool`] - reusable contexts
//!
//! # Example
//!
//! ```
//! use jrpc_engine::handler::{Middleware, MethodTable, Registry, RequestContext, Service};
//! use jrpc_engine::protocol::Fault;
//!
//! struct Clock;
//!
//! impl Service for Clock {
//!     fn methods(table: &mut MethodTable<Self>) {
//!         table.method("now", |_, ()| Ok::<_, Fault>(42_u64));
//!     }
//! }
//!
//! let mut registry = Registry::new();
//! registry
//!     .register(Clock)
//!     .use_middleware([Middleware::new("noop", |ctx: &mut RequestContext| ctx.next())]);
//! ```

mod callback;
mod context;
mod pipeline;
mod pool;
mod registry;
mod service;

pub use callback::{AfterHook, BeforeHook, BoundArgs, CallHooks, CallOutcome, Callback, IntoOutcome};
pub use context::{
    CallScope, Deadline, RequestContext, ResponseSink, Scratch, END_TIME_KEY, START_TIME_KEY,
    TIME_USED_KEY,
};
pub(crate) use callback::contain_panics;
pub(crate) use context::unix_nanos;
pub use pipeline::{upsert_middleware, Middleware, MiddlewareResult};
pub use pool::{ContextPool, PooledContext, DEFAULT_MAX_IDLE};
pub use registry::Registry;
pub use service::{MethodTable, NameStyle, Service};
