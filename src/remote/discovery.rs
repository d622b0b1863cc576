//! Server discovery.
//!
//! A [`Discovery`] performs one lookup attempt: open a channel and confirm
//! the expected service is bound on the other side. Retrying and deadlines
//! belong to [`RemoteInvocationClient::connect`](super::client::RemoteInvocationClient::connect).

use std::future::Future;
use std::pin::Pin;

use futures_util::{SinkExt, StreamExt};

use crate::context::Endpoint;
use crate::remote::transport::{self, Channel};
use crate::wire::codec::Frame;
use crate::wire::message::{InvocationResult, Request, SERVICE_NAME};
use crate::{HarnessError, Result};

/// One-shot lookup of the invocation server.
pub trait Discovery: Send + Sync {
    /// Attempt a single lookup, returning a ready channel.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Channel` if the server is unreachable, closes
    /// the connection, or does not bind the expected service.
    fn lookup(&self) -> Pin<Box<dyn Future<Output = Result<Channel>> + Send + '_>>;

    /// Human-readable target, for logs.
    fn describe(&self) -> String;
}

/// Discovery over a fixed [`Endpoint`].
#[derive(Debug, Clone)]
pub struct EndpointDiscovery {
    endpoint: Endpoint,
    service: String,
}

impl EndpointDiscovery {
    /// Look up the well-known container service at `endpoint`.
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            service: SERVICE_NAME.to_owned(),
        }
    }

    /// Look up a different service name.
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    async fn handshake(&self) -> Result<Channel> {
        let mut channel = transport::connect(&self.endpoint).await?;

        let request = Request::Lookup {
            service: self.service.clone(),
        };
        channel.send(Frame::message(&request)?).await?;

        let reply: InvocationResult = match channel.next().await {
            Some(frame) => frame?.into_message()?,
            None => {
                return Err(HarnessError::Channel(format!(
                    "{} closed the connection during lookup",
                    self.endpoint
                )))
            }
        };

        match reply {
            InvocationResult::Success(_) => Ok(channel),
            InvocationResult::Failure(fault) => Err(fault.into()),
        }
    }
}

impl Discovery for EndpointDiscovery {
    fn lookup(&self) -> Pin<Box<dyn Future<Output = Result<Channel>> + Send + '_>> {
        Box::pin(self.handshake())
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.service, self.endpoint)
    }
}
