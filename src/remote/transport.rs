//! Byte transports for the invocation channel.
//!
//! Both transports carry the same [`WireCodec`] framing. TCP binds the
//! loopback interface; local sockets use a named pipe (Windows) or a Unix
//! domain socket (Linux/macOS) via the `interprocess` crate.

use interprocess::local_socket::tokio::prelude::*;
use interprocess::local_socket::tokio::{Listener as LocalListener, Stream as LocalStream};
use interprocess::local_socket::{GenericNamespaced, ListenerOptions};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use crate::context::Endpoint;
use crate::wire::codec::WireCodec;
use crate::{HarnessError, Result};

/// Any bidirectional byte stream usable as a channel.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Framed invocation channel over a boxed transport.
pub type Channel = Framed<Box<dyn Transport>, WireCodec>;

/// Frame an already-open transport.
#[must_use]
pub fn framed<T: Transport + 'static>(io: T) -> Channel {
    Framed::new(Box::new(io), WireCodec::new())
}

/// Open a channel to `endpoint`.
///
/// # Errors
///
/// Returns `HarnessError::Channel` if the connection cannot be established.
pub async fn connect(endpoint: &Endpoint) -> Result<Channel> {
    match endpoint {
        Endpoint::Tcp(addr) => {
            let stream = TcpStream::connect(addr)
                .await
                .map_err(|err| HarnessError::Channel(format!("connect {endpoint}: {err}")))?;
            stream
                .set_nodelay(true)
                .map_err(|err| HarnessError::Channel(format!("configure {endpoint}: {err}")))?;
            Ok(framed(stream))
        }
        Endpoint::Local(name) => {
            let ns_name = local_name(name)?;
            let stream = LocalStream::connect(ns_name)
                .await
                .map_err(|err| HarnessError::Channel(format!("connect {endpoint}: {err}")))?;
            Ok(framed(stream))
        }
    }
}

/// Bound server socket.
pub enum Listener {
    /// Loopback TCP listener.
    Tcp(TcpListener),
    /// Local socket listener.
    Local {
        /// Socket name.
        name: String,
        /// Underlying listener.
        listener: LocalListener,
    },
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp(listener) => f.debug_tuple("Tcp").field(listener).finish(),
            Self::Local { name, .. } => f.debug_struct("Local").field("name", name).finish(),
        }
    }
}

impl Listener {
    /// Bind `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Channel` if the socket name is invalid or the
    /// address is already in use.
    pub async fn bind(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => {
                let listener = TcpListener::bind(addr)
                    .await
                    .map_err(|err| HarnessError::Channel(format!("bind {endpoint}: {err}")))?;
                Ok(Self::Tcp(listener))
            }
            Endpoint::Local(name) => {
                let listener = ListenerOptions::new()
                    .name(local_name(name)?)
                    .create_tokio()
                    .map_err(|err| HarnessError::Channel(format!("bind {endpoint}: {err}")))?;
                Ok(Self::Local {
                    name: name.clone(),
                    listener,
                })
            }
        }
    }

    /// Endpoint actually bound (resolves a TCP port of 0).
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Channel` if the TCP socket address cannot be
    /// read.
    pub fn local_endpoint(&self) -> Result<Endpoint> {
        match self {
            Self::Tcp(listener) => listener
                .local_addr()
                .map(Endpoint::Tcp)
                .map_err(|err| HarnessError::Channel(format!("local address: {err}"))),
            Self::Local { name, .. } => Ok(Endpoint::Local(name.clone())),
        }
    }

    /// Accept the next connection, returning its channel and a peer label.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Channel` if accepting fails.
    pub async fn accept(&self) -> Result<(Channel, String)> {
        match self {
            Self::Tcp(listener) => {
                let (stream, peer) = listener
                    .accept()
                    .await
                    .map_err(|err| HarnessError::Channel(format!("accept failed: {err}")))?;
                // Nagle only delays the small request/reply frames.
                let _ = stream.set_nodelay(true);
                Ok((framed(stream), peer.to_string()))
            }
            Self::Local { name, listener } => {
                let stream = listener
                    .accept()
                    .await
                    .map_err(|err| HarnessError::Channel(format!("accept failed: {err}")))?;
                Ok((framed(stream), format!("local://{name}")))
            }
        }
    }
}

fn local_name(name: &str) -> Result<interprocess::local_socket::Name<'static>> {
    name.to_owned()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| HarnessError::Channel(format!("invalid local socket name '{name}': {err}")))
}
