//! Service registry for dispatching calls by `namespace.method`.
//!
//! The registry maps namespaces to services and each service's exposed
//! method names to [`Callback`]s. It also owns the registry-wide call hooks
//! and the global middleware list.
//!
//! Names are normalised with the registry's [`NameStyle`] both when a
//! service is registered and when a call is resolved, so `User.GetName`,
//! `user.getName` and `user.get_name` reach the same method under the
//! default snake style.
//!
//! # Example
//!
//! ```
//! use jrpc_engine::handler::{MethodTable, Registry, Service};
//! use jrpc_engine::protocol::Fault;
//!
//! struct Echo;
//!
//! impl Service for Echo {
//!     fn methods(table: &mut MethodTable<Self>) {
//!         table.method("say", |_, text: String| Ok::<_, Fault>(text));
//!     }
//! }
//!
//! let mut registry = Registry::new();
//! registry.register(Echo);
//!
//! assert!(registry.resolve("echo.say").is_ok());
//! assert!(registry.resolve("Echo.Say").is_ok());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::callback::{AfterHook, BeforeHook, CallHooks, CallOutcome, Callback};
use super::pipeline::{upsert_middleware, Middleware};
use super::service::{type_namespace, MethodTable, NameStyle, Service, RESERVED_METHODS};
use super::RequestContext;
use crate::error::{EngineError, Result};
use crate::protocol::{Fault, METHOD_SEPARATOR};

/// One registered service.
struct ServiceEntry {
    receiver: Arc<dyn Service>,
    methods: HashMap<String, Callback>,
}

/// Namespace → service → method table.
pub struct Registry {
    services: HashMap<String, ServiceEntry>,
    style: NameStyle,
    excluded: Vec<String>,
    middleware: Vec<Middleware>,
    hooks: CallHooks,
}

impl Registry {
    /// Create an empty registry with snake-case names.
    pub fn new() -> Self {
        Self::with_style(NameStyle::default())
    }

    pub fn with_style(style: NameStyle) -> Self {
        Self {
            services: HashMap::new(),
            style,
            excluded: Vec::new(),
            middleware: Vec::new(),
            hooks: CallHooks::default(),
        }
    }

    #[inline]
    pub fn name_style(&self) -> NameStyle {
        self.style
    }

    /// Register `service` under its own namespace.
    ///
    /// # Panics
    ///
    /// Panics when the namespace is already taken.
    pub fn register<S: Service>(&mut self, service: S) -> &mut Self {
        if let Err(e) = self.try_register(None, service) {
            panic!("{}", e);
        }
        self
    }

    /// Register `service` under `namespace`.
    ///
    /// # Panics
    ///
    /// Panics when the namespace is already taken.
    pub fn register_as<S: Service>(&mut self, namespace: &str, service: S) -> &mut Self {
        if let Err(e) = self.try_register(Some(namespace), service) {
            panic!("{}", e);
        }
        self
    }

    /// Register `service`, reporting a duplicate namespace as an error.
    ///
    /// The namespace is `namespace` if given, else [`Service::namespace`],
    /// else the type name. Returns `Ok(false)` when the service exposes no
    /// callable method and was skipped.
    pub fn try_register<S: Service>(&mut self, namespace: Option<&str>, mut service: S) -> Result<bool> {
        let raw_name = namespace
            .or_else(|| service.namespace())
            .unwrap_or_else(|| type_namespace::<S>())
            .to_owned();
        let name = self.style.apply(&raw_name);
        if self.services.contains_key(&name) {
            return Err(EngineError::DuplicateNamespace(name));
        }

        service.construct();
        let receiver = Arc::new(service);
        let mut table = MethodTable::new(Arc::clone(&receiver));
        S::methods(&mut table);

        let service_excluded: Vec<String> =
            receiver.exclude_methods().iter().map(|m| self.style.apply(m)).collect();

        let mut methods = HashMap::new();
        for mut callback in table.into_entries() {
            let method = self.style.apply(callback.method_name());
            if self.is_excluded(&method, &service_excluded) {
                debug!(namespace = %name, method = %method, "Skipping excluded method");
                continue;
            }
            callback.rename(method.clone());
            if methods.insert(method.clone(), callback).is_some() {
                warn!(namespace = %name, method = %method, "Method bound twice, keeping the last binding");
            }
        }

        if methods.is_empty() {
            warn!(namespace = %name, "Service has no callable methods, not registered");
            return Ok(false);
        }

        debug!(namespace = %name, methods = methods.len(), "Registered service");
        self.services.insert(
            name,
            ServiceEntry {
                receiver: receiver as Arc<dyn Service>,
                methods,
            },
        );
        Ok(true)
    }

    fn is_excluded(&self, method: &str, service_excluded: &[String]) -> bool {
        let folded = self.style.apply(method);
        RESERVED_METHODS
            .iter()
            .any(|reserved| NameStyle::Snake.apply(&folded) == *reserved)
            || self.excluded.iter().any(|e| *e == folded)
            || service_excluded.iter().any(|e| *e == folded)
    }

    /// Leave `methods` out of every service registered afterwards.
    pub fn exclude_methods<I, M>(&mut self, methods: I) -> &mut Self
    where
        I: IntoIterator<Item = M>,
        M: AsRef<str>,
    {
        for method in methods {
            let method = self.style.apply(method.as_ref());
            if !self.excluded.contains(&method) {
                self.excluded.push(method);
            }
        }
        self
    }

    /// Append middleware, skipping names already installed.
    pub fn use_middleware(&mut self, handlers: impl IntoIterator<Item = Middleware>) -> &mut Self {
        upsert_middleware(&mut self.middleware, handlers);
        self
    }

    #[inline]
    pub fn middleware(&self) -> &[Middleware] {
        &self.middleware
    }

    /// Install the registry-wide before-call hook.
    pub fn set_call_before<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&mut RequestContext, &str, &[Value]) -> std::result::Result<(), Fault>
            + Send
            + Sync
            + 'static,
    {
        let hook: BeforeHook = Arc::new(hook);
        self.hooks.before = Some(hook);
        self
    }

    /// Install the registry-wide after-call hook.
    pub fn set_call_after<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&mut RequestContext, &str, &[Value], &CallOutcome) -> std::result::Result<(), Fault>
            + Send
            + Sync
            + 'static,
    {
        let hook: AfterHook = Arc::new(hook);
        self.hooks.after = Some(hook);
        self
    }

    #[inline]
    pub fn hooks(&self) -> &CallHooks {
        &self.hooks
    }

    /// Normalise a dotted method name with this registry's style.
    ///
    /// # Errors
    ///
    /// `NoMethod` ("wrong method") when either part is empty or the
    /// separator is missing.
    pub fn normalize_method(&self, method: &str) -> std::result::Result<String, Fault> {
        match method.split_once(METHOD_SEPARATOR) {
            Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => Ok(format!(
                "{}{}{}",
                self.style.apply(namespace),
                METHOD_SEPARATOR,
                self.style.apply(name)
            )),
            _ => Err(Fault::no_method("wrong method")),
        }
    }

    /// Find the callback for an already split name.
    ///
    /// # Errors
    ///
    /// `NoMethod` with "no namespace" or "no method".
    pub fn lookup(&self, namespace: &str, method: &str) -> std::result::Result<&Callback, Fault> {
        let service = self
            .services
            .get(&self.style.apply(namespace))
            .ok_or_else(|| Fault::no_method("no namespace"))?;
        service
            .methods
            .get(&self.style.apply(method))
            .ok_or_else(|| Fault::no_method("no method"))
    }

    /// Find the callback for a dotted method name.
    pub fn resolve(&self, method: &str) -> std::result::Result<&Callback, Fault> {
        match method.split_once(METHOD_SEPARATOR) {
            Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
                self.lookup(namespace, name)
            }
            _ => Err(Fault::no_method("wrong method")),
        }
    }

    /// Receiver registered for the namespace part of `method`.
    pub fn namespace_service(&self, method: &str) -> Option<Arc<dyn Service>> {
        let namespace = method.split_once(METHOD_SEPARATOR).map_or(method, |(ns, _)| ns);
        self.services
            .get(&self.style.apply(namespace))
            .map(|s| Arc::clone(&s.receiver))
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.services.contains_key(&self.style.apply(namespace))
    }

    /// Registered namespaces, unordered.
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// Exposed method names of `namespace`, unordered.
    pub fn methods_of(&self, namespace: &str) -> Vec<&str> {
        self.services
            .get(&self.style.apply(namespace))
            .map(|s| s.methods.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("namespaces", &self.services.keys().collect::<Vec<_>>())
            .field("style", &self.style)
            .field("middleware", &self.middleware)
            .field("hooks", &self.hooks)
            .finish()
    }
}
