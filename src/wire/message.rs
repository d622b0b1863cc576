//! Request and result envelopes exchanged over the invocation channel.
//!
//! ## Protocol
//!
//! Every request is one JSON message frame and receives exactly one
//! [`InvocationResult`] message frame in reply:
//!
//! ```json
//! {"op": "lookup", "service": "exam.RemoteContainer"}
//! {"op": "invoke", "capability": "exam.TestRunner", "method": "execute",
//!  "parameter_types": ["string", "string"], "timeout_millis": 0,
//!  "arguments": ["suite.Foo", "bar"]}
//! {"op": "install_artifact", "location": "inline:probe", "source": {"type": "streamed"}}
//! {"op": "start_artifact", "artifact_id": 1}
//! ```
//!
//! A `streamed` install is followed by data chunk frames and a single end
//! (or abort) frame before the server replies.
//!
//! ```json
//! {"status": "success", "value": "ok"}
//! {"status": "failure", "value": {"kind": "no_such_capability", "message": "exam.Missing"}}
//! ```

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::models::artifact::{ArtifactId, ArtifactState};

/// Well-known name the invocation server binds under.
pub const SERVICE_NAME: &str = "exam.RemoteContainer";

/// Inbound request from the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Discovery handshake; succeeds when `service` is the bound name.
    Lookup {
        /// Service name the client expects.
        service: String,
    },
    /// Invoke a capability method.
    Invoke(InvocationRequest),
    /// Install a deployable unit.
    InstallArtifact {
        /// Location the artifact is recorded under.
        location: String,
        /// Where the artifact bytes come from.
        source: ArtifactSource,
    },
    /// Activate an installed artifact.
    StartArtifact {
        /// Artifact to activate.
        artifact_id: ArtifactId,
    },
}

/// Origin of artifact bytes for an install request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ArtifactSource {
    /// A `file:` URL or plain path readable by the child.
    Url(String),
    /// Bytes follow on the channel as chunk frames.
    Streamed,
}

/// One remote call, keyed by capability, method and parameter types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Capability name resolved in the remote service registry.
    pub capability: String,
    /// Method name within the capability.
    pub method: String,
    /// Ordered type descriptors of the parameters.
    pub parameter_types: Vec<String>,
    /// Call deadline in milliseconds; 0 waits indefinitely.
    pub timeout_millis: u64,
    /// Ordered argument values.
    pub arguments: Vec<serde_json::Value>,
}

impl InvocationRequest {
    /// Dispatch key rendered as `capability.method(types)` for logs.
    #[must_use]
    pub fn signature(&self) -> String {
        format!(
            "{}.{}({})",
            self.capability,
            self.method,
            self.parameter_types.join(", ")
        )
    }
}

/// Reply to any [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum InvocationResult {
    /// Call completed; carries the return value.
    Success(serde_json::Value),
    /// Call failed; carries the error descriptor.
    Failure(RemoteFault),
}

/// Error-kind discriminant carried across the process boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FaultKind {
    /// Lookup named a service that is not bound here.
    NotBound,
    /// No implementation registered for the capability.
    NoSuchCapability,
    /// No method with the requested signature.
    NoSuchMethod,
    /// Arguments did not match the declared parameter types.
    ArgumentMismatch,
    /// Unknown artifact id.
    NoSuchArtifact,
    /// Artifact bytes were malformed or unreadable.
    ArtifactInstall,
    /// Artifact did not reach the active state.
    ArtifactStart {
        /// Artifact that failed to start.
        artifact_id: ArtifactId,
        /// State it was left in.
        state: ArtifactState,
    },
    /// The invoked method itself failed.
    Target {
        /// Type name of the original error.
        error_type: String,
    },
    /// Malformed or out-of-sequence traffic.
    Protocol,
}

/// Serialized error: kind tag, message and cause chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFault {
    /// Error-kind discriminant.
    #[serde(flatten)]
    pub kind: FaultKind,
    /// Top-level error message.
    pub message: String,
    /// Messages of the underlying causes, outermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl RemoteFault {
    /// Fault without a cause chain.
    #[must_use]
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            causes: Vec::new(),
        }
    }

    /// Failure raised by invoked logic, identified by `error_type`.
    #[must_use]
    pub fn target(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            FaultKind::Target {
                error_type: error_type.into(),
            },
            message,
        )
    }

    /// Capture a concrete error as a target fault, preserving its type name
    /// and the messages of its `source()` chain.
    #[must_use]
    pub fn capture<E>(err: &E) -> Self
    where
        E: std::error::Error + 'static,
    {
        let mut causes = Vec::new();
        let mut next = err.source();
        while let Some(cause) = next {
            causes.push(cause.to_string());
            next = cause.source();
        }

        Self {
            kind: FaultKind::Target {
                error_type: std::any::type_name::<E>().to_owned(),
            },
            message: err.to_string(),
            causes,
        }
    }

    /// Append a cause message.
    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }

    /// Original error type name for target faults.
    #[must_use]
    pub fn error_type(&self) -> Option<&str> {
        match &self.kind {
            FaultKind::Target { error_type } => Some(error_type),
            _ => None,
        }
    }
}

impl Display for RemoteFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            FaultKind::Target { error_type } => write!(f, "{error_type}: {}", self.message)?,
            _ => f.write_str(&self.message)?,
        }
        for cause in &self.causes {
            write!(f, "; caused by: {cause}")?;
        }
        Ok(())
    }
}
