//! Artifact identity and lifecycle state.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Container-assigned artifact identifier.
///
/// Identifiers are monotonically increasing within one container instance
/// and never reused.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ArtifactId(pub u64);

impl Display for ArtifactId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an installed artifact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactState {
    /// Installed but dependencies not yet resolved.
    Installed,
    /// Resolved and ready to start; fragments stay here.
    Resolved,
    /// Activation requested but not completed.
    Starting,
    /// Fully active.
    Active,
    /// Deactivation in progress.
    Stopping,
    /// Removed from the container.
    Uninstalled,
}

impl ArtifactState {
    /// Lower-case label used in logs and error messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Resolved => "resolved",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Stopping => "stopping",
            Self::Uninstalled => "uninstalled",
        }
    }
}

impl Display for ArtifactState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one installed artifact, as reported by the container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactInfo {
    /// Container-assigned identifier.
    pub id: ArtifactId,
    /// Location the artifact was installed from.
    pub location: String,
    /// `symbolic-name` manifest header, when present.
    pub symbolic_name: Option<String>,
    /// Current lifecycle state.
    pub state: ArtifactState,
}
