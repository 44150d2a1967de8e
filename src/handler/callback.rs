//! Bound methods and their invocation.
//!
//! A [`Callback`] is the type-erased form of one method binding: shape
//! metadata plus two closures. `decode` turns positional JSON arguments
//! into the method's argument value; `call` runs the method against its
//! receiver. Decoding happens before any hook runs, so bad parameters never
//! reach a hook or the method.
//!
//! # Call order
//!
//! ```text
//! registry before ─▶ service before_call ─▶ method ─▶ timing
//!        ─▶ service after_call ─▶ registry after ─▶ fault | payload
//! ```
//!
//! The first hook error ends the call with that error. A panic anywhere in
//! the sequence becomes an `Internal` fault.

use std::any::{Any, TypeId};
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Once};

use serde::Serialize;
use serde_json::Value;
use tracing::error;

use super::context::{unix_nanos, END_TIME_KEY, START_TIME_KEY, TIME_USED_KEY};
use super::service::Service;
use super::{CallScope, RequestContext};
use crate::codec::JsonCodec;
use crate::protocol::Fault;

pub(crate) type DecodeFn =
    dyn Fn(&[Value]) -> Result<Box<dyn Any + Send>, Fault> + Send + Sync;
pub(crate) type CallFn = dyn Fn(&CallScope, Box<dyn Any + Send>) -> CallOutcome + Send + Sync;

/// Registry-wide hook run before the receiver's `before_call`.
pub type BeforeHook =
    Arc<dyn Fn(&mut RequestContext, &str, &[Value]) -> Result<(), Fault> + Send + Sync>;
/// Registry-wide hook run after the receiver's `after_call`.
pub type AfterHook = Arc<
    dyn Fn(&mut RequestContext, &str, &[Value], &CallOutcome) -> Result<(), Fault> + Send + Sync,
>;

/// Registry-wide hooks, either may be unset.
#[derive(Clone, Default)]
pub struct CallHooks {
    pub before: Option<BeforeHook>,
    pub after: Option<AfterHook>,
}

impl fmt::Debug for CallHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallHooks")
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .finish()
    }
}

/// What a method returned: a payload, a fault, both absent, never both set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOutcome {
    pub payload: Option<Value>,
    pub fault: Option<Fault>,
}

impl CallOutcome {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn returned(payload: Value) -> Self {
        Self {
            payload: Some(payload),
            fault: None,
        }
    }

    pub fn failed(fault: Fault) -> Self {
        Self {
            payload: None,
            fault: Some(fault),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.fault.is_some()
    }

    /// The fault if any, otherwise the payload (`null` when absent).
    pub fn into_result(self) -> Result<Value, Fault> {
        match self.fault {
            Some(fault) => Err(fault),
            None => Ok(self.payload.unwrap_or(Value::Null)),
        }
    }
}

/// Return types a bound method may have.
pub trait IntoOutcome: 'static {
    /// Position of the error in the return shape, `-1` when there is none.
    fn error_return_index() -> i32;

    fn into_outcome(self) -> CallOutcome;
}

impl IntoOutcome for () {
    fn error_return_index() -> i32 {
        -1
    }

    fn into_outcome(self) -> CallOutcome {
        CallOutcome::empty()
    }
}

impl IntoOutcome for Value {
    fn error_return_index() -> i32 {
        -1
    }

    fn into_outcome(self) -> CallOutcome {
        CallOutcome::returned(self)
    }
}

impl<T, E> IntoOutcome for Result<T, E>
where
    T: Serialize + 'static,
    E: Into<Fault> + 'static,
{
    fn error_return_index() -> i32 {
        if TypeId::of::<T>() == TypeId::of::<()>() {
            0
        } else {
            1
        }
    }

    fn into_outcome(self) -> CallOutcome {
        match self {
            Ok(value) => {
                if TypeId::of::<T>() == TypeId::of::<()>() {
                    return CallOutcome::empty();
                }
                match JsonCodec::to_value(&value) {
                    Ok(payload) => CallOutcome::returned(payload),
                    Err(e) => CallOutcome::failed(Fault::internal(e.to_string())),
                }
            }
            Err(e) => CallOutcome::failed(e.into()),
        }
    }
}

/// Positional arguments, both raw (for hooks) and decoded (for the method).
pub struct BoundArgs {
    raw: Vec<Value>,
    typed: Box<dyn Any + Send>,
}

impl BoundArgs {
    pub fn raw(&self) -> &[Value] {
        &self.raw
    }
}

impl fmt::Debug for BoundArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundArgs").field("raw", &self.raw).finish_non_exhaustive()
    }
}

/// Descriptor of one callable method.
#[derive(Clone)]
pub struct Callback {
    method_name: String,
    arg_types: Vec<&'static str>,
    has_leading_context: bool,
    error_return_index: i32,
    receiver: Arc<dyn Service>,
    decode: Arc<DecodeFn>,
    call: Arc<CallFn>,
}

impl Callback {
    pub(crate) fn new(
        method_name: String,
        arg_types: Vec<&'static str>,
        has_leading_context: bool,
        error_return_index: i32,
        receiver: Arc<dyn Service>,
        decode: Arc<DecodeFn>,
        call: Arc<CallFn>,
    ) -> Self {
        Self {
            method_name,
            arg_types,
            has_leading_context,
            error_return_index,
            receiver,
            decode,
            call,
        }
    }

    /// Exposed (normalised) method name.
    #[inline]
    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub(crate) fn rename(&mut self, name: String) {
        self.method_name = name;
    }

    /// Positional argument type names, excluding a leading scope.
    #[inline]
    pub fn arg_types(&self) -> &[&'static str] {
        &self.arg_types
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.arg_types.len()
    }

    #[inline]
    pub fn has_leading_context(&self) -> bool {
        self.has_leading_context
    }

    #[inline]
    pub fn error_return_index(&self) -> i32 {
        self.error_return_index
    }

    pub fn receiver(&self) -> &Arc<dyn Service> {
        &self.receiver
    }

    /// Check and decode `params` against this method's shape.
    ///
    /// # Errors
    ///
    /// `BadParams` for non-array params, too many arguments or an argument
    /// that does not decode.
    pub fn bind(&self, params: Option<Value>) -> Result<BoundArgs, Fault> {
        let raw = JsonCodec::positional(params, self.arity())?;
        let typed = (self.decode)(&raw)?;
        Ok(BoundArgs { raw, typed })
    }

    /// Run the hooks and the method for one call.
    ///
    /// Records [`END_TIME_KEY`] and [`TIME_USED_KEY`] in the context store
    /// once the method returns; [`START_TIME_KEY`] is set here unless the
    /// caller already did.
    pub fn invoke(
        &self,
        hooks: &CallHooks,
        ctx: &mut RequestContext,
        method: &str,
        args: BoundArgs,
    ) -> Result<Value, Fault> {
        contain_panics(method, || self.invoke_unguarded(hooks, ctx, method, args))
    }

    fn invoke_unguarded(
        &self,
        hooks: &CallHooks,
        ctx: &mut RequestContext,
        method: &str,
        args: BoundArgs,
    ) -> Result<Value, Fault> {
        let BoundArgs { raw, typed } = args;

        if let Some(before) = &hooks.before {
            before(ctx, method, &raw)?;
        }
        self.receiver.before_call(ctx, method, &raw)?;

        if !ctx.store().contains(START_TIME_KEY) {
            ctx.store_mut().insert(START_TIME_KEY, unix_nanos());
        }
        let scope = ctx.scope().clone();
        let outcome = (self.call)(&scope, typed);

        let end = unix_nanos();
        let start = ctx.store().get_i64(START_TIME_KEY).unwrap_or(end);
        ctx.store_mut().insert(END_TIME_KEY, end);
        ctx.store_mut().insert(TIME_USED_KEY, end - start);

        self.receiver.after_call(ctx, method, &raw, &outcome)?;
        if let Some(after) = &hooks.after {
            after(ctx, method, &raw, &outcome)?;
        }

        outcome.into_result()
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("method_name", &self.method_name)
            .field("arg_types", &self.arg_types)
            .field("has_leading_context", &self.has_leading_context)
            .field("error_return_index", &self.error_return_index)
            .finish_non_exhaustive()
    }
}

thread_local! {
    /// Backtrace of the most recent panic on this thread, taken at the panic site.
    static PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static TRACE_HOOK: Once = Once::new();

/// Chain a panic hook that records the backtrace before the stack unwinds.
/// The previous hook still runs afterwards.
fn install_trace_hook() {
    TRACE_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let trace = Backtrace::force_capture().to_string();
            // The slot is gone when a thread panics during its own teardown.
            let _ = PANIC_TRACE.try_with(|slot| *slot.borrow_mut() = Some(trace));
            previous(info);
        }));
    });
}

/// Run `f`, turning a panic into an `Internal` fault for `method`.
pub(crate) fn contain_panics<T>(
    method: &str,
    f: impl FnOnce() -> Result<T, Fault>,
) -> Result<T, Fault> {
    install_trace_hook();
    PANIC_TRACE.with(|slot| slot.borrow_mut().take());
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|panic| Err(fault_from_panic(method, panic)))
}

/// Convert a caught panic into an `Internal` fault, logging the trace.
fn fault_from_panic(method: &str, panic: Box<dyn Any + Send>) -> Fault {
    let message = if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    };
    // Falls back to the catch site when another hook replaced ours.
    let trace = PANIC_TRACE
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_else(|| Backtrace::force_capture().to_string());
    error!(method = %method, "Call panicked: {}\n{}", message, trace);
    Fault::internal(format!("{}: {}", method, message)).with_data(Value::String(trace))
}
