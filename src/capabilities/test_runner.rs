//! `exam.TestRunner` capability.
//!
//! `execute(host, method)` runs the entry point that an active payload
//! declared in its manifest. The payload must be installed and started
//! first; the entry point itself is looked up in the host's
//! [`SuiteRegistry`].

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::container::store::ArtifactContainer;
use crate::container::suite::SuiteRegistry;
use crate::remote::capability::{CapabilityStub, RemoteCapability};
use crate::remote::dispatch::DispatchTable;
use crate::wire::message::{FaultKind, RemoteFault};
use crate::Result;

/// Capability name.
pub const TEST_RUNNER: &str = "exam.TestRunner";

/// Error type reported when no entry point matches.
pub const SUITE_NOT_FOUND: &str = "SuiteNotFound";

/// Child-side test runner.
#[derive(Debug)]
pub struct TestRunnerService {
    container: Arc<ArtifactContainer>,
    suites: Arc<SuiteRegistry>,
}

impl TestRunnerService {
    /// Runner over `container`'s artifacts and `suites`' entry points.
    #[must_use]
    pub fn new(container: Arc<ArtifactContainer>, suites: Arc<SuiteRegistry>) -> Self {
        Self { container, suites }
    }

    /// Run the entry point `host.method`.
    ///
    /// # Errors
    ///
    /// Returns a `no_such_artifact` fault when no active payload declares
    /// the entry point, a `SuiteNotFound` target fault when nothing is
    /// registered under it, or the entry point's own fault.
    pub async fn execute(&self, host: &str, method: &str) -> std::result::Result<Value, RemoteFault> {
        let Some(context) = self.container.find_entry_point(host, method).await else {
            return Err(RemoteFault::new(
                FaultKind::NoSuchArtifact,
                format!("no active artifact declares entry point {host}.{method}"),
            ));
        };

        let Some(suite) = self.suites.resolve(host, method) else {
            return Err(RemoteFault::target(
                SUITE_NOT_FOUND,
                format!("no entry point registered as {host}.{method}"),
            ));
        };

        let artifact_id = context.artifact_id;
        info!(host, method, artifact_id = %artifact_id, "running entry point");
        let outcome = suite(context).await;
        if let Err(ref fault) = outcome {
            warn!(host, method, %fault, "entry point failed");
        }
        outcome
    }

    /// Register the capability's methods.
    pub fn register(dispatch: &mut DispatchTable) {
        dispatch.register(
            TEST_RUNNER,
            "execute",
            |runner: Arc<Self>, (host, method): (String, String)| async move {
                runner.execute(&host, &method).await
            },
        );
        dispatch.register(TEST_RUNNER, "entry_points", |runner: Arc<Self>, (): ()| async move {
            Ok::<_, RemoteFault>(runner.suites.entry_points())
        });
    }
}

/// Controller-side `exam.TestRunner` stub.
#[derive(Debug, Clone)]
pub struct TestRunnerClient(CapabilityStub);

impl RemoteCapability for TestRunnerClient {
    const NAME: &'static str = TEST_RUNNER;

    fn bind(stub: CapabilityStub) -> Self {
        Self(stub)
    }
}

impl TestRunnerClient {
    /// Run the entry point `host.method` and return its result.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::InvocationTarget` if the entry point failed,
    /// `HarnessError::NotFound` if no active payload declares it, or a
    /// channel error.
    pub async fn execute(&self, host: &str, method: &str) -> Result<Value> {
        self.0
            .call("execute", (host.to_owned(), method.to_owned()))
            .await
    }

    /// Entry points registered in the container, as `host.method`.
    ///
    /// # Errors
    ///
    /// Returns a channel or marshalling error.
    pub async fn entry_points(&self) -> Result<Vec<String>> {
        self.0.call("entry_points", ()).await
    }
}
