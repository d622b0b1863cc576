//! `exam.ArtifactInspector` capability: read-only view of the container.

use std::sync::Arc;

use crate::container::store::ArtifactContainer;
use crate::models::artifact::{ArtifactId, ArtifactInfo, ArtifactState};
use crate::remote::capability::{CapabilityStub, RemoteCapability};
use crate::remote::dispatch::DispatchTable;
use crate::wire::message::RemoteFault;
use crate::Result;

/// Capability name.
pub const ARTIFACT_INSPECTOR: &str = "exam.ArtifactInspector";

/// Child-side inspector.
#[derive(Debug)]
pub struct InspectorService {
    container: Arc<ArtifactContainer>,
}

impl InspectorService {
    /// Inspector over `container`.
    #[must_use]
    pub fn new(container: Arc<ArtifactContainer>) -> Self {
        Self { container }
    }

    /// Register the capability's methods.
    pub fn register(dispatch: &mut DispatchTable) {
        dispatch.register(
            ARTIFACT_INSPECTOR,
            "state",
            |inspector: Arc<Self>, (id,): (u64,)| async move {
                inspector
                    .container
                    .state(ArtifactId(id))
                    .await
                    .map_err(|err| RemoteFault::from(&err))
            },
        );
        dispatch.register(ARTIFACT_INSPECTOR, "list", |inspector: Arc<Self>, (): ()| async move {
            Ok::<_, RemoteFault>(inspector.container.artifacts().await)
        });
    }
}

/// Controller-side `exam.ArtifactInspector` stub.
#[derive(Debug, Clone)]
pub struct ArtifactInspectorClient(CapabilityStub);

impl RemoteCapability for ArtifactInspectorClient {
    const NAME: &'static str = ARTIFACT_INSPECTOR;

    fn bind(stub: CapabilityStub) -> Self {
        Self(stub)
    }
}

impl ArtifactInspectorClient {
    /// Lifecycle state of one artifact.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::NotFound` for an unknown id.
    pub async fn state(&self, artifact_id: ArtifactId) -> Result<ArtifactState> {
        self.0.call("state", (artifact_id.0,)).await
    }

    /// Every installed artifact, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns a channel or marshalling error.
    pub async fn list(&self) -> Result<Vec<ArtifactInfo>> {
        self.0.call("list", ()).await
    }
}
