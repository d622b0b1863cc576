//! Per-run connection context shared by the launcher and the client.

use std::fmt::{Display, Formatter};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable carrying the communication port to the child.
pub const PORT_ENV: &str = "EXAM_COMMUNICATION_PORT";
/// Environment variable carrying the transport flavour to the child.
pub const TRANSPORT_ENV: &str = "EXAM_TRANSPORT";
/// Environment variable carrying the working directory to the child.
pub const WORKING_DIRECTORY_ENV: &str = "EXAM_WORKING_DIRECTORY";

/// Transport used for the invocation channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// TCP on the loopback interface.
    #[default]
    Tcp,
    /// Named pipe (Windows) or Unix domain socket (Linux/macOS).
    Local,
}

impl TransportKind {
    /// Lower-case label, as used in [`TRANSPORT_ENV`].
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Local => "local",
        }
    }

    /// Parse a [`TRANSPORT_ENV`] value; unknown values yield `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "tcp" => Some(Self::Tcp),
            "local" => Some(Self::Local),
            _ => None,
        }
    }
}

/// Address of the invocation server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Loopback TCP socket.
    Tcp(SocketAddr),
    /// Namespaced local socket name.
    Local(String),
}

impl Endpoint {
    /// Endpoint for `port` over the given transport.
    ///
    /// Local sockets are named `exam-harness-<port>` so that the port stays
    /// the single rendezvous value handed to the child.
    #[must_use]
    pub fn for_port(kind: TransportKind, port: u16) -> Self {
        match kind {
            TransportKind::Tcp => Self::Tcp(SocketAddr::from((Ipv4Addr::LOCALHOST, port))),
            TransportKind::Local => Self::Local(format!("exam-harness-{port}")),
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
            Self::Local(name) => write!(f, "local://{name}"),
        }
    }
}

/// Immutable per-run context: where the server lives and where the child
/// runs.
#[derive(Debug, Clone)]
pub struct ConnectorContext {
    transport: TransportKind,
    port: u16,
    working_directory: PathBuf,
}

impl ConnectorContext {
    /// Create a context for one run.
    #[must_use]
    pub fn new(transport: TransportKind, port: u16, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            transport,
            port,
            working_directory: working_directory.into(),
        }
    }

    /// Communication channel address derived from the port.
    #[must_use]
    pub fn communication_channel_address(&self) -> Endpoint {
        Endpoint::for_port(self.transport, self.port)
    }

    /// Communication port handed to the child.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Transport flavour.
    #[must_use]
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Working directory of the child.
    #[must_use]
    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }
}
