//! Error types shared across the harness.
//!
//! The controller and the child host share one taxonomy. Failures that cross
//! the invocation channel travel as a [`RemoteFault`] and are converted back
//! into the matching [`HarnessError`] variant on the controller side, so the
//! error kind survives the process boundary.

use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::models::artifact::{ArtifactId, ArtifactState};
use crate::wire::message::{FaultKind, RemoteFault};

/// Shared harness result type.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Harness error enumeration covering all failure modes of a run.
#[derive(Debug)]
pub enum HarnessError {
    /// The child process could not be spawned.
    ProcessSpawn(String),
    /// Server discovery did not succeed before the lookup deadline.
    ///
    /// Carries the last lookup failure, if any attempt was made.
    DiscoveryTimeout(Option<Box<HarnessError>>),
    /// No implementation is registered for the requested capability.
    NoSuchCapability(String),
    /// The capability exists but has no method with the given signature.
    NoSuchMethod(String),
    /// Arguments or results could not be (de)serialized at the boundary.
    Marshal(String),
    /// Requested entity (artifact, file) does not exist.
    NotFound(String),
    /// An artifact could not be installed into the container.
    ArtifactInstall(String),
    /// An artifact did not reach the active state after a start request.
    ArtifactStart {
        /// Artifact that failed to start.
        artifact_id: ArtifactId,
        /// State the artifact was left in.
        state: ArtifactState,
    },
    /// The remote call itself failed; the original cause is preserved.
    InvocationTarget(RemoteFault),
    /// Transport-level failure on the invocation channel.
    Channel(String),
    /// The payload archive stream failed or was truncated.
    Payload(String),
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
}

/// Plain discriminant of a [`HarnessError`], convenient for matching on the
/// failure class without destructuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`HarnessError::ProcessSpawn`].
    ProcessSpawn,
    /// See [`HarnessError::DiscoveryTimeout`].
    DiscoveryTimeout,
    /// See [`HarnessError::NoSuchCapability`].
    NoSuchCapability,
    /// See [`HarnessError::NoSuchMethod`].
    NoSuchMethod,
    /// See [`HarnessError::Marshal`].
    Marshal,
    /// See [`HarnessError::NotFound`].
    NotFound,
    /// See [`HarnessError::ArtifactInstall`].
    ArtifactInstall,
    /// See [`HarnessError::ArtifactStart`].
    ArtifactStart,
    /// See [`HarnessError::InvocationTarget`].
    InvocationTarget,
    /// See [`HarnessError::Channel`].
    Channel,
    /// See [`HarnessError::Payload`].
    Payload,
    /// See [`HarnessError::Config`].
    Config,
    /// See [`HarnessError::Io`].
    Io,
}

impl HarnessError {
    /// Failure class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ProcessSpawn(_) => ErrorKind::ProcessSpawn,
            Self::DiscoveryTimeout(_) => ErrorKind::DiscoveryTimeout,
            Self::NoSuchCapability(_) => ErrorKind::NoSuchCapability,
            Self::NoSuchMethod(_) => ErrorKind::NoSuchMethod,
            Self::Marshal(_) => ErrorKind::Marshal,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::ArtifactInstall(_) => ErrorKind::ArtifactInstall,
            Self::ArtifactStart { .. } => ErrorKind::ArtifactStart,
            Self::InvocationTarget(_) => ErrorKind::InvocationTarget,
            Self::Channel(_) => ErrorKind::Channel,
            Self::Payload(_) => ErrorKind::Payload,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

impl Display for HarnessError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProcessSpawn(msg) => write!(f, "process spawn: {msg}"),
            Self::DiscoveryTimeout(Some(cause)) => write!(f, "discovery timeout: {cause}"),
            Self::DiscoveryTimeout(None) => write!(f, "discovery timeout: no lookup attempted"),
            Self::NoSuchCapability(name) => write!(f, "no such capability: {name}"),
            Self::NoSuchMethod(msg) => write!(f, "no such method: {msg}"),
            Self::Marshal(msg) => write!(f, "marshal: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::ArtifactInstall(msg) => write!(f, "artifact install: {msg}"),
            Self::ArtifactStart { artifact_id, state } => {
                write!(f, "artifact start: artifact {artifact_id} not started (still {state})")
            }
            Self::InvocationTarget(fault) => write!(f, "invocation target: {fault}"),
            Self::Channel(msg) => write!(f, "channel: {msg}"),
            Self::Payload(msg) => write!(f, "payload: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for HarnessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DiscoveryTimeout(Some(cause)) => Some(cause.as_ref()),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for HarnessError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for HarnessError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(err: serde_json::Error) -> Self {
        Self::Marshal(err.to_string())
    }
}

impl From<RemoteFault> for HarnessError {
    fn from(fault: RemoteFault) -> Self {
        match fault.kind {
            FaultKind::NotBound | FaultKind::Protocol => Self::Channel(fault.message),
            FaultKind::NoSuchCapability => Self::NoSuchCapability(fault.message),
            FaultKind::NoSuchMethod => Self::NoSuchMethod(fault.message),
            FaultKind::ArgumentMismatch => Self::Marshal(fault.message),
            FaultKind::NoSuchArtifact => Self::NotFound(fault.message),
            FaultKind::ArtifactInstall => Self::ArtifactInstall(fault.message),
            FaultKind::ArtifactStart { artifact_id, state } => {
                Self::ArtifactStart { artifact_id, state }
            }
            FaultKind::Target { .. } => Self::InvocationTarget(fault),
        }
    }
}

impl From<&HarnessError> for RemoteFault {
    fn from(err: &HarnessError) -> Self {
        let kind = match err {
            HarnessError::NoSuchCapability(_) => FaultKind::NoSuchCapability,
            HarnessError::NoSuchMethod(_) => FaultKind::NoSuchMethod,
            HarnessError::Marshal(_) => FaultKind::ArgumentMismatch,
            HarnessError::NotFound(_) => FaultKind::NoSuchArtifact,
            HarnessError::ArtifactInstall(_) | HarnessError::Payload(_) => {
                FaultKind::ArtifactInstall
            }
            HarnessError::ArtifactStart { artifact_id, state } => FaultKind::ArtifactStart {
                artifact_id: *artifact_id,
                state: *state,
            },
            HarnessError::InvocationTarget(fault) => return fault.clone(),
            HarnessError::ProcessSpawn(_)
            | HarnessError::DiscoveryTimeout(_)
            | HarnessError::Channel(_)
            | HarnessError::Config(_)
            | HarnessError::Io(_) => FaultKind::Protocol,
        };

        // Variants that carry their payload in the kind itself keep the
        // rendered error as the message.
        let message = match err {
            HarnessError::NoSuchCapability(msg)
            | HarnessError::NoSuchMethod(msg)
            | HarnessError::Marshal(msg)
            | HarnessError::NotFound(msg)
            | HarnessError::ArtifactInstall(msg)
            | HarnessError::Payload(msg)
            | HarnessError::ProcessSpawn(msg)
            | HarnessError::Channel(msg)
            | HarnessError::Config(msg)
            | HarnessError::Io(msg) => msg.clone(),
            other => other.to_string(),
        };

        RemoteFault::new(kind, message)
    }
}
