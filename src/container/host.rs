//! Child-side host wiring.
//!
//! [`ContainerHost`] owns the artifact container, the entry-point table and
//! the capability services, and turns them into a serving
//! [`RemoteInvocationServer`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::capabilities::{inspector, test_runner};
use crate::container::store::{fetch_location, ArtifactContainer};
use crate::container::suite::SuiteRegistry;
use crate::container::{selftest, ModuleContainer};
use crate::context::Endpoint;
use crate::models::artifact::ArtifactId;
use crate::remote::dispatch::{DispatchTable, ServiceRegistry};
use crate::remote::server::{RemoteInvocationServer, MAX_ARTIFACT_BYTES};
use crate::remote::transport::Listener;
use crate::Result;

/// A container ready to serve invocations.
#[derive(Debug)]
pub struct ContainerHost {
    container: Arc<ArtifactContainer>,
    suites: Arc<SuiteRegistry>,
    registry: Arc<ServiceRegistry>,
    dispatch: DispatchTable,
    max_upload_bytes: usize,
}

impl Default for ContainerHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerHost {
    /// Host with the test runner and artifact inspector capabilities bound
    /// and the `exam.SelfTest` suite registered.
    #[must_use]
    pub fn new() -> Self {
        let container = Arc::new(ArtifactContainer::new());
        let suites = Arc::new(SuiteRegistry::new());
        let registry = Arc::new(ServiceRegistry::new());
        let mut dispatch = DispatchTable::new();

        selftest::register(&suites);

        registry.register(
            test_runner::TEST_RUNNER,
            Arc::new(test_runner::TestRunnerService::new(
                Arc::clone(&container),
                Arc::clone(&suites),
            )),
        );
        test_runner::TestRunnerService::register(&mut dispatch);

        registry.register(
            inspector::ARTIFACT_INSPECTOR,
            Arc::new(inspector::InspectorService::new(Arc::clone(&container))),
        );
        inspector::InspectorService::register(&mut dispatch);

        Self {
            container,
            suites,
            registry,
            dispatch,
            max_upload_bytes: MAX_ARTIFACT_BYTES,
        }
    }

    /// Artifact container.
    #[must_use]
    pub fn container(&self) -> &Arc<ArtifactContainer> {
        &self.container
    }

    /// Entry-point table; register suites here before payloads run.
    #[must_use]
    pub fn suites(&self) -> &Arc<SuiteRegistry> {
        &self.suites
    }

    /// Service registry; capabilities may be bound at any time.
    #[must_use]
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Dispatch table; extend it before building the server.
    pub fn dispatch_mut(&mut self) -> &mut DispatchTable {
        &mut self.dispatch
    }

    /// Cap the size of artifacts streamed to the server.
    pub fn set_max_upload_bytes(&mut self, limit: usize) {
        self.max_upload_bytes = limit;
    }

    /// Install and start every location in order.
    ///
    /// Failures are logged and skipped. Returns the ids that were
    /// installed.
    pub async fn provision(&self, locations: &[String]) -> Vec<ArtifactId> {
        let mut installed = Vec::with_capacity(locations.len());
        for location in locations {
            let outcome = async {
                let archive = fetch_location(location).await?;
                let id = self.container.install(location, archive).await?;
                installed.push(id);
                ModuleContainer::start(self.container.as_ref(), id).await
            }
            .await;

            match outcome {
                Ok(()) => info!(location, "provisioned artifact started"),
                Err(err) => warn!(location, %err, "provisioning failed"),
            }
        }
        installed
    }

    /// Build the invocation server over this host.
    #[must_use]
    pub fn server(&self) -> RemoteInvocationServer {
        RemoteInvocationServer::new(
            Arc::clone(&self.registry),
            self.dispatch.clone(),
            Arc::clone(&self.container) as Arc<dyn ModuleContainer>,
        )
        .with_max_upload_bytes(self.max_upload_bytes)
    }

    /// Bind `endpoint` and serve until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Channel` if the endpoint cannot be bound.
    pub async fn serve(&self, endpoint: &Endpoint, cancel: CancellationToken) -> Result<()> {
        let listener = Listener::bind(endpoint).await?;
        Arc::new(self.server()).serve(listener, cancel).await
    }
}
