//! Child-side service registry and dispatch table.
//!
//! The [`ServiceRegistry`] maps capability names to live service objects;
//! the [`DispatchTable`] maps `(capability, method, parameter types)` to a
//! handler that decodes the arguments, calls the service and encodes the
//! result. Handlers are registered once, before serving starts.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::remote::capability::Arguments;
use crate::wire::message::RemoteFault;
use crate::HarnessError;

/// Type-erased service object.
pub type Service = Arc<dyn Any + Send + Sync>;

/// Future returned by a dispatch handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, RemoteFault>> + Send>>;

/// Type-erased dispatch handler.
pub type Handler = Arc<dyn Fn(Service, Vec<Value>) -> HandlerFuture + Send + Sync>;

// ── Service registry ──────────────────────────────────────────────────────────

/// Named services available for invocation.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Service>>,
    changed: Notify,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.names())
            .finish_non_exhaustive()
    }
}

impl ServiceRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `service` under `name`, replacing any previous binding.
    pub fn register<S: Any + Send + Sync>(&self, name: impl Into<String>, service: Arc<S>) {
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), service);
        self.changed.notify_waiters();
    }

    /// Remove the binding for `name`; returns whether one existed.
    pub fn unregister(&self, name: &str) -> bool {
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    /// Service bound under `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Service> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Bound service names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Service bound under `name`, waiting up to `timeout` for it to
    /// appear. A zero timeout does not wait.
    pub async fn wait_for(&self, name: &str, timeout: Duration) -> Option<Service> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(service) = self.get(name) {
                return Some(service);
            }
            if Instant::now() >= deadline {
                return None;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.get(name);
            }
        }
    }
}

// ── Dispatch table ────────────────────────────────────────────────────────────

/// Dispatch key: capability, method and ordered parameter types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    /// Capability name.
    pub capability: String,
    /// Method name.
    pub method: String,
    /// Ordered parameter type descriptors.
    pub parameter_types: Vec<String>,
}

/// Signature-keyed handler table.
#[derive(Default, Clone)]
pub struct DispatchTable {
    handlers: HashMap<MethodKey, Handler>,
}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchTable")
            .field("methods", &self.handlers.len())
            .finish()
    }
}

impl DispatchTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `capability.method` with parameter types
    /// taken from `A`.
    ///
    /// The service bound under `capability` is downcast to `S` on every
    /// call. Registering the same signature again replaces the handler.
    pub fn register<S, A, R, F, Fut>(&mut self, capability: &str, method: &str, handler: F)
    where
        S: Any + Send + Sync,
        A: Arguments + Send + 'static,
        R: Serialize,
        F: Fn(Arc<S>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, RemoteFault>> + Send + 'static,
    {
        let key = MethodKey {
            capability: capability.to_owned(),
            method: method.to_owned(),
            parameter_types: A::descriptors(),
        };
        let handler = Arc::new(handler);
        let capability = capability.to_owned();

        let erased: Handler = Arc::new(move |service: Service, values: Vec<Value>| {
            let handler = Arc::clone(&handler);
            let capability = capability.clone();
            Box::pin(async move {
                let service = service.downcast::<S>().map_err(|_| {
                    RemoteFault::from(&HarnessError::Channel(format!(
                        "service bound as {capability} has an unexpected type"
                    )))
                })?;
                let args = A::from_values(values).map_err(|err| RemoteFault::from(&err))?;
                let value = handler(service, args).await?;
                serde_json::to_value(value).map_err(|err| {
                    RemoteFault::from(&HarnessError::Marshal(format!(
                        "cannot encode result: {err}"
                    )))
                })
            }) as HandlerFuture
        });

        self.handlers.insert(key, erased);
    }

    /// Handler for an exact signature.
    #[must_use]
    pub fn resolve(&self, capability: &str, method: &str, parameter_types: &[String]) -> Option<Handler> {
        let key = MethodKey {
            capability: capability.to_owned(),
            method: method.to_owned(),
            parameter_types: parameter_types.to_vec(),
        };
        self.handlers.get(&key).cloned()
    }

    /// Registered signatures for `capability`, rendered for diagnostics.
    #[must_use]
    pub fn signatures(&self, capability: &str) -> Vec<String> {
        let mut signatures: Vec<String> = self
            .handlers
            .keys()
            .filter(|key| key.capability == capability)
            .map(|key| format!("{}({})", key.method, key.parameter_types.join(", ")))
            .collect();
        signatures.sort();
        signatures
    }
}
