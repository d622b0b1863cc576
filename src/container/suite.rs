//! Entry-point table for activated payloads.
//!
//! A payload manifest names an `entry-host` and `entry-method`; the suite
//! registry maps that pair to the code that runs when the controller asks
//! the test runner to execute it.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use serde_json::Value;

use crate::models::artifact::ArtifactId;
use crate::wire::message::RemoteFault;

/// What a running entry point knows about the payload that declared it.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProbeContext {
    /// Artifact that declared the entry point.
    pub artifact_id: ArtifactId,
    /// `symbolic-name` manifest header.
    pub symbolic_name: Option<String>,
    /// `entry-host` manifest header.
    pub entry_host: String,
    /// `entry-method` manifest header.
    pub entry_method: String,
    /// Every manifest header.
    pub headers: BTreeMap<String, String>,
    /// Archive entry names, in archive order.
    pub entries: Vec<String>,
}

/// Future returned by an entry point.
pub type SuiteFuture = Pin<Box<dyn Future<Output = Result<Value, RemoteFault>> + Send>>;

/// Type-erased entry point.
pub type SuiteFn = Arc<dyn Fn(ProbeContext) -> SuiteFuture + Send + Sync>;

/// Entry points keyed by `(host, method)`.
#[derive(Default)]
pub struct SuiteRegistry {
    suites: RwLock<HashMap<(String, String), SuiteFn>>,
}

impl std::fmt::Debug for SuiteRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuiteRegistry")
            .field("entry_points", &self.entry_points())
            .finish()
    }
}

impl SuiteRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `suite` as `host.method`, replacing any previous entry.
    pub fn register<F, Fut, R>(&self, host: &str, method: &str, suite: F)
    where
        F: Fn(ProbeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, RemoteFault>> + Send + 'static,
        R: Serialize,
    {
        let erased: SuiteFn = Arc::new(move |context| {
            let run = suite(context);
            Box::pin(async move {
                let value = run.await?;
                serde_json::to_value(value).map_err(|err| {
                    RemoteFault::capture(&err).with_cause("entry point result is not serializable")
                })
            }) as SuiteFuture
        });

        self.suites
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((host.to_owned(), method.to_owned()), erased);
    }

    /// Entry point registered as `host.method`.
    #[must_use]
    pub fn resolve(&self, host: &str, method: &str) -> Option<SuiteFn> {
        self.suites
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(host.to_owned(), method.to_owned()))
            .cloned()
    }

    /// Registered entry points as `host.method`, sorted.
    #[must_use]
    pub fn entry_points(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .suites
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .map(|(host, method)| format!("{host}.{method}"))
            .collect();
        names.sort();
        names
    }
}
