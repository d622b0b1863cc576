//! Minimal in-memory module container hosted by the child process.
//!
//! - `store`: the [`ArtifactContainer`] artifact registry and its
//!   lifecycle rules.
//! - `suite`: entry points that activated payloads resolve to.
//! - `selftest`: the built-in `exam.SelfTest` suite.
//! - `host`: wiring of container, capabilities and server into a serving
//!   process.

use std::future::Future;
use std::pin::Pin;

use crate::models::artifact::{ArtifactId, ArtifactInfo};
use crate::Result;

pub mod host;
pub mod selftest;
pub mod store;
pub mod suite;

pub use host::ContainerHost;
pub use store::ArtifactContainer;
pub use suite::{ProbeContext, SuiteRegistry};

/// Deployment operations the invocation server forwards to the container.
pub trait ModuleContainer: Send + Sync {
    /// Install the gzip tar `archive` under `location`.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::ArtifactInstall` if the archive is malformed.
    fn install<'a>(
        &'a self,
        location: &'a str,
        archive: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<ArtifactId>> + Send + 'a>>;

    /// Request activation of an installed artifact.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::NotFound` for an unknown id or
    /// `HarnessError::ArtifactStart` if the artifact did not become active.
    fn start(&self, artifact_id: ArtifactId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Snapshot of all installed artifacts, ordered by id.
    fn artifacts(&self) -> Pin<Box<dyn Future<Output = Vec<ArtifactInfo>> + Send + '_>>;
}
