//! Controller-side invocation client.
//!
//! [`RemoteInvocationClient::connect`] polls a [`Discovery`] until the
//! server answers or the lookup deadline elapses. The resulting
//! [`ServerHandle`] serializes requests over one channel: each request is
//! written, then exactly one reply is read before the next request may use
//! the channel.
//!
//! ## Deadlines
//!
//! A call whose deadline elapses is abandoned, and the handle is poisoned:
//! the late reply would otherwise be read as the answer to the next request.
//! Every later call fails fast with `HarnessError::Channel`.
//!
//! Invocations carry their own deadline. Deployment calls (`install_url`,
//! `install_stream`, `start_artifact`) use the handle's call timeout, set
//! with [`ServerHandle::with_call_timeout`]; zero waits indefinitely.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::models::artifact::ArtifactId;
use crate::remote::capability::{CapabilityStub, RemoteCapability};
use crate::remote::discovery::Discovery;
use crate::remote::transport::Channel;
use crate::wire::codec::Frame;
use crate::wire::message::{ArtifactSource, InvocationRequest, InvocationResult, Request};
use crate::{HarnessError, Result};

/// Pause between discovery attempts.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// Entry point for reaching the invocation server.
pub struct RemoteInvocationClient {
    discovery: Box<dyn Discovery>,
    lookup_timeout: Duration,
}

impl std::fmt::Debug for RemoteInvocationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteInvocationClient")
            .field("discovery", &self.discovery.describe())
            .field("lookup_timeout", &self.lookup_timeout)
            .finish()
    }
}

impl RemoteInvocationClient {
    /// Client using `discovery`, giving up after `lookup_timeout` (zero
    /// retries forever).
    #[must_use]
    pub fn new(discovery: impl Discovery + 'static, lookup_timeout: Duration) -> Self {
        Self {
            discovery: Box::new(discovery),
            lookup_timeout,
        }
    }

    /// Poll discovery until the server answers.
    ///
    /// Attempts are paced [`RETRY_INTERVAL`] apart, the last pause clipped
    /// to the remaining time, so the call returns no later than the
    /// deadline plus one attempt.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::DiscoveryTimeout` carrying the last lookup
    /// failure once the deadline has elapsed.
    pub async fn connect(&self) -> Result<ServerHandle> {
        let target = self.discovery.describe();
        let deadline = (!self.lookup_timeout.is_zero()).then(|| Instant::now() + self.lookup_timeout);
        let mut last_error: Option<HarnessError> = None;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let outcome = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, self.discovery.lookup()).await {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            debug!(attempt, server = %target, "lookup attempt cut off by deadline");
                            break;
                        }
                    }
                }
                None => self.discovery.lookup().await,
            };

            match outcome {
                Ok(channel) => {
                    info!(attempt, server = %target, "invocation server found");
                    return Ok(ServerHandle::new(channel, target));
                }
                Err(err) => {
                    debug!(attempt, server = %target, %err, "lookup failed");
                    last_error = Some(err);
                }
            }

            let pause = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    RETRY_INTERVAL.min(remaining)
                }
                None => RETRY_INTERVAL,
            };
            tokio::time::sleep(pause).await;
        }

        warn!(attempts = attempt, server = %target, "invocation server not found before deadline");
        Err(HarnessError::DiscoveryTimeout(last_error.map(Box::new)))
    }
}

/// Connected invocation server.
pub struct ServerHandle {
    target: String,
    channel: Mutex<Channel>,
    poisoned: AtomicBool,
    call_timeout: Duration,
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("target", &self.target)
            .field("poisoned", &self.is_poisoned())
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl ServerHandle {
    /// Wrap a channel that already completed the lookup handshake.
    #[must_use]
    pub fn new(channel: Channel, target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            channel: Mutex::new(channel),
            poisoned: AtomicBool::new(false),
            call_timeout: Duration::ZERO,
        }
    }

    /// Bound every deployment call by `timeout` (zero waits indefinitely).
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Server description, for logs.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Whether an abandoned call left the channel unusable.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Typed stub for capability `T`, each call bounded by `timeout`.
    #[must_use]
    pub fn capability<T: RemoteCapability>(self: &Arc<Self>, timeout: Duration) -> T {
        T::bind(CapabilityStub::new(Arc::clone(self), T::NAME, timeout))
    }

    /// Send one invocation and wait for its result.
    ///
    /// The call is bounded by the request's `timeout_millis`; zero waits
    /// indefinitely.
    ///
    /// # Errors
    ///
    /// Returns the remote failure as the matching `HarnessError` variant, or
    /// `HarnessError::Channel` on transport failure, poisoning or timeout.
    pub async fn invoke(&self, request: InvocationRequest) -> Result<Value> {
        let timeout = Duration::from_millis(request.timeout_millis);
        let signature = request.signature();
        debug!(server = %self.target, %signature, "invoking");
        self.round_trip(&Request::Invoke(request), timeout, &signature)
            .await
    }

    /// Install an artifact the server can read itself (a `file:` URL or
    /// path).
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::ArtifactInstall` if the server rejects the
    /// artifact, or `HarnessError::Channel` on transport failure.
    pub async fn install_url(&self, url: &str) -> Result<ArtifactId> {
        let request = Request::InstallArtifact {
            location: url.to_owned(),
            source: ArtifactSource::Url(url.to_owned()),
        };
        let value = self
            .round_trip(&request, self.call_timeout, "install_artifact")
            .await?;
        decode_artifact_id(value)
    }

    /// Stream an artifact to the server and install it under `location`.
    ///
    /// Bytes are forwarded chunk by chunk as they arrive. If `stream` fails,
    /// the upload is aborted and the stream's error is returned. The whole
    /// upload, reply included, is bounded by the call timeout.
    ///
    /// # Errors
    ///
    /// Returns the stream's own error, `HarnessError::ArtifactInstall` if
    /// the server rejects the archive, or `HarnessError::Channel` on
    /// transport failure or timeout.
    pub async fn install_stream<S>(&self, location: &str, stream: S) -> Result<ArtifactId>
    where
        S: Stream<Item = Result<Bytes>> + Send + Unpin,
    {
        self.ensure_usable()?;
        let upload = self.upload(location, stream);
        if self.call_timeout.is_zero() {
            return upload.await;
        }
        match tokio::time::timeout(self.call_timeout, upload).await {
            Ok(outcome) => outcome,
            Err(_) => Err(self.abandon("install_artifact", self.call_timeout)),
        }
    }

    /// Ask the server to activate an installed artifact.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::NotFound` for an unknown id,
    /// `HarnessError::ArtifactStart` if the artifact did not become active,
    /// or `HarnessError::Channel` on transport failure.
    pub async fn start_artifact(&self, artifact_id: ArtifactId) -> Result<()> {
        let request = Request::StartArtifact { artifact_id };
        self.round_trip(&request, self.call_timeout, "start_artifact")
            .await?;
        Ok(())
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    async fn upload<S>(&self, location: &str, mut stream: S) -> Result<ArtifactId>
    where
        S: Stream<Item = Result<Bytes>> + Send + Unpin,
    {
        let mut channel = self.channel.lock().await;

        let request = Request::InstallArtifact {
            location: location.to_owned(),
            source: ArtifactSource::Streamed,
        };
        self.guard(channel.send(Frame::message(&request)?).await)?;

        let mut sent: u64 = 0;
        let mut stream_error = None;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    sent += bytes.len() as u64;
                    self.guard(channel.send(Frame::Chunk(bytes)).await)?;
                }
                Err(err) => {
                    stream_error = Some(err);
                    break;
                }
            }
        }

        let closing = match stream_error {
            Some(ref err) => Frame::Abort(err.to_string()),
            None => Frame::End,
        };
        self.guard(channel.send(closing).await)?;
        let reply = self.guard(read_reply(&mut channel).await)?;

        if let Some(err) = stream_error {
            warn!(location, bytes = sent, %err, "artifact upload aborted");
            return Err(err);
        }

        let value = into_value(reply)?;
        let id = decode_artifact_id(value)?;
        info!(location, bytes = sent, artifact_id = %id, "artifact installed");
        Ok(id)
    }

    async fn round_trip(&self, request: &Request, timeout: Duration, label: &str) -> Result<Value> {
        self.ensure_usable()?;
        let frame = Frame::message(request)?;

        let exchange = async {
            let mut channel = self.channel.lock().await;
            self.guard(channel.send(frame).await)?;
            self.guard(read_reply(&mut channel).await)
        };

        let reply = if timeout.is_zero() {
            exchange.await?
        } else if let Ok(reply) = tokio::time::timeout(timeout, exchange).await {
            reply?
        } else {
            return Err(self.abandon(label, timeout));
        };

        into_value(reply)
    }

    /// Poison the handle after a call overran `timeout`.
    fn abandon(&self, label: &str, timeout: Duration) -> HarnessError {
        self.poisoned.store(true, Ordering::Release);
        warn!(server = %self.target, label, ?timeout, "call abandoned after deadline");
        HarnessError::Channel(format!("{label} timed out after {} ms", timeout.as_millis()))
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.is_poisoned() {
            Err(HarnessError::Channel(format!(
                "channel to {} is unusable after an earlier failure",
                self.target
            )))
        } else {
            Ok(())
        }
    }

    /// Poison the handle on transport-level failures.
    fn guard<T>(&self, outcome: Result<T>) -> Result<T> {
        if let Err(HarnessError::Channel(_) | HarnessError::Io(_)) = outcome {
            self.poisoned.store(true, Ordering::Release);
        }
        outcome
    }
}

async fn read_reply(channel: &mut Channel) -> Result<InvocationResult> {
    match channel.next().await {
        Some(frame) => frame?.into_message(),
        None => Err(HarnessError::Channel("server closed the connection".into())),
    }
}

fn into_value(reply: InvocationResult) -> Result<Value> {
    match reply {
        InvocationResult::Success(value) => Ok(value),
        InvocationResult::Failure(fault) => Err(fault.into()),
    }
}

fn decode_artifact_id(value: Value) -> Result<ArtifactId> {
    serde_json::from_value(value)
        .map_err(|err| HarnessError::Marshal(format!("invalid artifact id in reply: {err}")))
}
