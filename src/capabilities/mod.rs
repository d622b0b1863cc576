//! Capabilities the container host exposes, with their controller-side
//! stubs.
//!
//! - `test_runner`: `exam.TestRunner`, runs payload entry points.
//! - `inspector`: `exam.ArtifactInspector`, reports artifact states.

pub mod inspector;
pub mod test_runner;

pub use inspector::{ArtifactInspectorClient, ARTIFACT_INSPECTOR};
pub use test_runner::{TestRunnerClient, TEST_RUNNER};
