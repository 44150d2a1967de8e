//! Services and their method tables.
//!
//! A service is a value implementing [`Service`]. Its associated
//! [`Service::methods`] function binds the exposed methods into a
//! [`MethodTable`]; each binding becomes a [`Callback`] at registration.
//!
//! Supported method shapes:
//!
//! | Binding | Signature |
//! |---|---|
//! | [`MethodTable::method`] | `Fn(&S, A) -> R` |
//! | [`MethodTable::method_with_scope`] | `Fn(&S, &CallScope, A) -> R` |
//!
//! `A = ()` takes no positional argument; any other `A` is the single
//! positional argument and must be `DeserializeOwned + Default`. `R` is one
//! of `()`, `serde_json::Value`, `Result<(), E>` or `Result<T, E>` with
//! `E: Into<Fault>` (see [`IntoOutcome`]).
//!
//! # Example
//!
//! ```
//! use jrpc_engine::handler::{MethodTable, Service};
//! use jrpc_engine::protocol::Fault;
//!
//! #[derive(Default)]
//! struct Calculator;
//!
//! impl Service for Calculator {
//!     fn methods(table: &mut MethodTable<Self>) {
//!         table
//!             .method("add", |_, (a, b): (i64, i64)| Ok::<_, Fault>(a + b))
//!             .method("divide", |_, (a, b): (i64, i64)| {
//!                 if b == 0 {
//!                     return Err(Fault::server("division by zero"));
//!                 }
//!                 Ok(a / b)
//!             });
//!     }
//! }
//! ```

use std::any::{Any, TypeId};
use std::sync::Arc;

use heck::ToSnakeCase;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::callback::{CallFn, CallOutcome, Callback, DecodeFn, IntoOutcome};
use super::{CallScope, RequestContext};
use crate::codec::JsonCodec;
use crate::protocol::Fault;

/// Method names that are hooks, never callable.
pub(crate) const RESERVED_METHODS: [&str; 4] =
    ["constructor", "exclude_method", "before_call", "after_call"];

/// How namespace and method names are normalised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameStyle {
    /// `getUser`, `GetUser` and `get_user` all become `get_user`.
    #[default]
    Snake,
    /// Names are matched exactly as registered and sent.
    Verbatim,
}

impl NameStyle {
    pub fn apply(self, name: &str) -> String {
        match self {
            NameStyle::Snake => name.to_snake_case(),
            NameStyle::Verbatim => name.to_owned(),
        }
    }
}

/// A value whose methods are exposed under one namespace.
///
/// Every method except [`methods`](Service::methods) has a default, so a
/// plain service only binds its table.
pub trait Service: Send + Sync + 'static {
    /// Namespace override. Defaults to the type name.
    fn namespace(&self) -> Option<&str> {
        None
    }

    /// One-time constructor hook, run at registration.
    fn construct(&mut self) {}

    /// Bound names to leave out of the table.
    fn exclude_methods(&self) -> &[&str] {
        &[]
    }

    /// Receiver-scope hook run before every call into this service.
    fn before_call(
        &self,
        _ctx: &mut RequestContext,
        _method: &str,
        _args: &[Value],
    ) -> Result<(), Fault> {
        Ok(())
    }

    /// Receiver-scope hook run after every call into this service.
    fn after_call(
        &self,
        _ctx: &mut RequestContext,
        _method: &str,
        _args: &[Value],
        _outcome: &CallOutcome,
    ) -> Result<(), Fault> {
        Ok(())
    }

    /// Bind the exposed methods.
    fn methods(table: &mut MethodTable<Self>)
    where
        Self: Sized;
}

/// Collects the method bindings of one service.
pub struct MethodTable<S: Service> {
    receiver: Arc<S>,
    entries: Vec<Callback>,
}

impl<S: Service> MethodTable<S> {
    pub(crate) fn new(receiver: Arc<S>) -> Self {
        Self {
            receiver,
            entries: Vec::new(),
        }
    }

    /// Bind `f(&S, A) -> R` under `name`.
    pub fn method<A, R, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        A: DeserializeOwned + Default + Send + 'static,
        R: IntoOutcome,
        F: Fn(&S, A) -> R + Send + Sync + 'static,
    {
        let receiver = Arc::clone(&self.receiver);
        let call: Arc<CallFn> = Arc::new(move |_scope: &CallScope, arg: Box<dyn Any + Send>| {
            match arg.downcast::<A>() {
                Ok(arg) => f(&receiver, *arg).into_outcome(),
                Err(_) => CallOutcome::failed(Fault::internal("argument type mismatch")),
            }
        });
        self.push::<A, R>(name, false, call)
    }

    /// Bind `f(&S, &CallScope, A) -> R` under `name`; the scope is the
    /// leading context carried by the request.
    pub fn method_with_scope<A, R, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        A: DeserializeOwned + Default + Send + 'static,
        R: IntoOutcome,
        F: Fn(&S, &CallScope, A) -> R + Send + Sync + 'static,
    {
        let receiver = Arc::clone(&self.receiver);
        let call: Arc<CallFn> = Arc::new(move |scope: &CallScope, arg: Box<dyn Any + Send>| {
            match arg.downcast::<A>() {
                Ok(arg) => f(&receiver, scope, *arg).into_outcome(),
                Err(_) => CallOutcome::failed(Fault::internal("argument type mismatch")),
            }
        });
        self.push::<A, R>(name, true, call)
    }

    fn push<A, R>(&mut self, name: &str, has_leading_context: bool, call: Arc<CallFn>) -> &mut Self
    where
        A: DeserializeOwned + Default + Send + 'static,
        R: IntoOutcome,
    {
        let arg_types = if TypeId::of::<A>() == TypeId::of::<()>() {
            Vec::new()
        } else {
            vec![std::any::type_name::<A>()]
        };
        let decode: Arc<DecodeFn> = Arc::new(|args: &[Value]| {
            JsonCodec::argument::<A>(args, 0).map(|a| Box::new(a) as Box<dyn Any + Send>)
        });
        self.entries.push(Callback::new(
            name.to_owned(),
            arg_types,
            has_leading_context,
            R::error_return_index(),
            Arc::clone(&self.receiver) as Arc<dyn Service>,
            decode,
            call,
        ));
        self
    }

    pub(crate) fn into_entries(self) -> Vec<Callback> {
        self.entries
    }
}

/// Final path segment of `S`'s type name, without generics.
pub(crate) fn type_namespace<S>() -> &'static str {
    let full = std::any::type_name::<S>();
    let plain = full.split('<').next().unwrap_or(full);
    plain.rsplit("::").next().unwrap_or(plain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Greeter {
        greeting: String,
    }

    impl Service for Greeter {
        fn construct(&mut self) {
            self.greeting = "hello".into();
        }

        fn methods(table: &mut MethodTable<Self>) {
            table
                .method("ping", |_, ()| ())
                .method("greet", |svc: &Greeter, name: String| {
                    json!(format!("{} {}", svc.greeting, name))
                })
                .method_with_scope("wait", |_, scope: &CallScope, ()| {
                    Ok::<_, Fault>(scope.is_cancelled())
                })
                .method("check", |_, flag: bool| {
                    if flag {
                        Ok(())
                    } else {
                        Err(Fault::server("flag unset"))
                    }
                });
        }
    }

    fn table() -> Vec<Callback> {
        let mut svc = Greeter::default();
        svc.construct();
        let mut table = MethodTable::new(Arc::new(svc));
        Greeter::methods(&mut table);
        table.into_entries()
    }

    fn find<'a>(entries: &'a [Callback], name: &str) -> &'a Callback {
        entries.iter().find(|c| c.method_name() == name).unwrap()
    }

    #[test]
    fn test_descriptor_shapes() {
        let entries = table();
        assert_eq!(entries.len(), 4);

        let ping = find(&entries, "ping");
        assert!(ping.arg_types().is_empty());
        assert!(!ping.has_leading_context());
        assert_eq!(ping.error_return_index(), -1);

        let greet = find(&entries, "greet");
        assert_eq!(greet.arg_types(), ["alloc::string::String"]);
        assert_eq!(greet.error_return_index(), -1);

        let wait = find(&entries, "wait");
        assert!(wait.has_leading_context());
        assert_eq!(wait.arg_types().len(), 0);
        assert_eq!(wait.error_return_index(), 1);

        let check = find(&entries, "check");
        assert_eq!(check.error_return_index(), 0);
    }

    #[test]
    fn test_name_styles() {
        assert_eq!(NameStyle::Snake.apply("getUser"), "get_user");
        assert_eq!(NameStyle::Snake.apply("GetUser"), "get_user");
        assert_eq!(NameStyle::Snake.apply("get_user"), "get_user");
        assert_eq!(NameStyle::Verbatim.apply("getUser"), "getUser");
    }

    #[test]
    fn test_type_namespace() {
        assert_eq!(type_namespace::<Greeter>(), "Greeter");
        assert_eq!(type_namespace::<Vec<Greeter>>(), "Vec");
    }

    proptest::proptest! {
        #[test]
        fn snake_style_is_idempotent(name in "[A-Za-z][A-Za-z0-9_]{0,20}") {
            let once = NameStyle::Snake.apply(&name);
            proptest::prop_assert_eq!(NameStyle::Snake.apply(&once), once);
        }
    }
}
