//! Child-side invocation server.
//!
//! Accepts channels on a [`Listener`] and answers each request with exactly
//! one [`InvocationResult`]. Every connection is served by its own task
//! inside the `invocation_conn` span; the accept loop runs in the
//! `invocation_server` span until its cancellation token fires.
//!
//! ## Streamed installs
//!
//! An `install_artifact` request with a `streamed` source is followed by
//! chunk frames and one end frame. An abort frame discards the upload and
//! is answered with an `artifact_install` fault. Any other frame in the
//! middle of an upload is a protocol violation and closes the connection.
//! An upload larger than the server's limit is drained to its end frame
//! and answered with an `artifact_install` fault.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::container::store::fetch_location;
use crate::container::ModuleContainer;
use crate::models::artifact::ArtifactId;
use crate::remote::dispatch::{DispatchTable, ServiceRegistry};
use crate::remote::transport::{Channel, Listener};
use crate::wire::codec::Frame;
use crate::wire::message::{
    ArtifactSource, FaultKind, InvocationRequest, InvocationResult, RemoteFault, Request,
    SERVICE_NAME,
};
use crate::{HarnessError, Result};

/// Default cap on a streamed artifact: 256 MiB.
pub const MAX_ARTIFACT_BYTES: usize = 256 * 1024 * 1024;

/// Outcome of receiving a streamed upload.
enum Upload {
    Complete(Vec<u8>),
    Aborted(String),
    TooLarge(u64),
}

/// Generic invoke-by-signature server plus deployment operations.
pub struct RemoteInvocationServer {
    service_name: String,
    registry: Arc<ServiceRegistry>,
    dispatch: Arc<DispatchTable>,
    container: Arc<dyn ModuleContainer>,
    max_upload_bytes: usize,
}

impl std::fmt::Debug for RemoteInvocationServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteInvocationServer")
            .field("service_name", &self.service_name)
            .field("registry", &self.registry)
            .field("dispatch", &self.dispatch)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish_non_exhaustive()
    }
}

impl RemoteInvocationServer {
    /// Server bound under the well-known service name.
    #[must_use]
    pub fn new(
        registry: Arc<ServiceRegistry>,
        dispatch: DispatchTable,
        container: Arc<dyn ModuleContainer>,
    ) -> Self {
        Self {
            service_name: SERVICE_NAME.to_owned(),
            registry,
            dispatch: Arc::new(dispatch),
            container,
            max_upload_bytes: MAX_ARTIFACT_BYTES,
        }
    }

    /// Reject streamed artifacts larger than `limit` bytes.
    #[must_use]
    pub fn with_max_upload_bytes(mut self, limit: usize) -> Self {
        self.max_upload_bytes = limit;
        self
    }

    /// Bind under a different service name.
    #[must_use]
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Answer a lookup handshake.
    #[must_use]
    pub fn lookup(&self, service: &str) -> InvocationResult {
        if service == self.service_name {
            InvocationResult::Success(json!(self.service_name))
        } else {
            InvocationResult::Failure(RemoteFault::new(
                FaultKind::NotBound,
                format!("{service} is not bound (this server is {})", self.service_name),
            ))
        }
    }

    /// Resolve and run one invocation.
    ///
    /// The capability may be registered while the request waits, for up to
    /// the request's `timeout_millis`.
    pub async fn invoke(&self, request: InvocationRequest) -> InvocationResult {
        let signature = request.signature();
        let wait = Duration::from_millis(request.timeout_millis);

        let Some(service) = self.registry.wait_for(&request.capability, wait).await else {
            warn!(%signature, "capability not registered");
            return InvocationResult::Failure(RemoteFault::new(
                FaultKind::NoSuchCapability,
                request.capability,
            ));
        };

        let Some(handler) =
            self.dispatch
                .resolve(&request.capability, &request.method, &request.parameter_types)
        else {
            let known = self.dispatch.signatures(&request.capability);
            warn!(%signature, known = ?known, "no method with this signature");
            return InvocationResult::Failure(RemoteFault::new(
                FaultKind::NoSuchMethod,
                signature,
            ));
        };

        info!(%signature, "dispatching invocation");

        // A panicking handler must not take the connection task down with it.
        match tokio::spawn(handler(service, request.arguments)).await {
            Ok(Ok(value)) => InvocationResult::Success(value),
            Ok(Err(fault)) => {
                debug!(%signature, %fault, "invocation failed");
                InvocationResult::Failure(fault)
            }
            Err(err) => {
                warn!(%signature, %err, "invocation handler panicked");
                InvocationResult::Failure(RemoteFault::target(
                    "panic",
                    format!("{signature} panicked: {err}"),
                ))
            }
        }
    }

    /// Install `archive` under `location`.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::ArtifactInstall` if the archive is malformed.
    pub async fn install_artifact(&self, location: &str, archive: Vec<u8>) -> Result<ArtifactId> {
        self.container.install(location, archive).await
    }

    /// Install the artifact behind a `file:` URL or path.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::ArtifactInstall` if the location is unreadable
    /// or the archive malformed.
    pub async fn install_url(&self, location: &str, url: &str) -> Result<ArtifactId> {
        let archive = fetch_location(url).await?;
        self.install_artifact(location, archive).await
    }

    /// Activate an installed artifact.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::NotFound` for an unknown id or
    /// `HarnessError::ArtifactStart` if it did not become active.
    pub async fn start_artifact(&self, artifact_id: ArtifactId) -> Result<()> {
        self.container.start(artifact_id).await
    }

    /// Accept connections on `listener` until `cancel` fires.
    ///
    /// Cancellation closes the listener and every open connection; the call
    /// returns once all connection tasks have finished.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Channel` if the listener address cannot be
    /// read.
    pub async fn serve(self: Arc<Self>, listener: Listener, cancel: CancellationToken) -> Result<()> {
        let endpoint = listener.local_endpoint()?;
        let span = info_span!("invocation_server", endpoint = %endpoint, service = %self.service_name);

        async move {
            info!("invocation server listening");
            let mut connections = JoinSet::new();

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("invocation server shutting down");
                        break;
                    }
                    Some(_) = connections.join_next(), if !connections.is_empty() => {}
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((channel, peer)) => {
                                let conn_span = info_span!("invocation_conn", peer = %peer);
                                connections.spawn(
                                    Arc::clone(&self)
                                        .handle_connection(channel, cancel.child_token())
                                        .instrument(conn_span),
                                );
                            }
                            Err(err) => {
                                warn!(%err, "accept failed");
                            }
                        }
                    }
                }
            }

            drop(listener);
            while connections.join_next().await.is_some() {}
            Ok(())
        }
        .instrument(span)
        .await
    }

    // ── Connection handling ───────────────────────────────────────────────────

    async fn handle_connection(self: Arc<Self>, mut channel: Channel, cancel: CancellationToken) {
        debug!("connection opened");

        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => break,
                next = channel.next() => next,
            };

            let frame = match next {
                None => break,
                Some(Ok(frame)) => frame,
                Some(Err(err)) => {
                    warn!(%err, "read failed, closing connection");
                    break;
                }
            };

            let request: Request = match frame.into_message() {
                Ok(request) => request,
                Err(err) => {
                    warn!(%err, "malformed request, closing connection");
                    let fault = RemoteFault::new(FaultKind::Protocol, err.to_string());
                    let _ = send_reply(&mut channel, &InvocationResult::Failure(fault)).await;
                    break;
                }
            };

            let reply = tokio::select! {
                () = cancel.cancelled() => break,
                reply = self.handle_request(request, &mut channel) => reply,
            };

            let reply = match reply {
                Ok(reply) => reply,
                Err(err) => {
                    warn!(%err, "protocol failure, closing connection");
                    break;
                }
            };

            if let Err(err) = send_reply(&mut channel, &reply).await {
                warn!(%err, "write failed, closing connection");
                break;
            }
        }

        debug!("connection closed");
    }

    /// Produce the reply for one request. `Err` means the connection can
    /// no longer be trusted.
    async fn handle_request(&self, request: Request, channel: &mut Channel) -> Result<InvocationResult> {
        let reply = match request {
            Request::Lookup { service } => self.lookup(&service),
            Request::Invoke(invocation) => self.invoke(invocation).await,
            Request::InstallArtifact {
                location,
                source: ArtifactSource::Url(url),
            } => artifact_reply(self.install_url(&location, &url).await),
            Request::InstallArtifact {
                location,
                source: ArtifactSource::Streamed,
            } => match receive_upload(channel, self.max_upload_bytes).await? {
                Upload::Complete(archive) => {
                    debug!(%location, bytes = archive.len(), "upload received");
                    artifact_reply(self.install_artifact(&location, archive).await)
                }
                Upload::Aborted(reason) => {
                    warn!(%location, %reason, "upload aborted by client");
                    InvocationResult::Failure(RemoteFault::new(
                        FaultKind::ArtifactInstall,
                        format!("upload of {location} aborted: {reason}"),
                    ))
                }
                Upload::TooLarge(received) => {
                    warn!(%location, received, limit = self.max_upload_bytes, "upload too large");
                    InvocationResult::Failure(RemoteFault::new(
                        FaultKind::ArtifactInstall,
                        format!(
                            "upload of {location} rejected: {received} bytes exceeds the {} byte limit",
                            self.max_upload_bytes
                        ),
                    ))
                }
            },
            Request::StartArtifact { artifact_id } => {
                match self.start_artifact(artifact_id).await {
                    Ok(()) => InvocationResult::Success(json!(artifact_id)),
                    Err(err) => InvocationResult::Failure(RemoteFault::from(&err)),
                }
            }
        };
        Ok(reply)
    }
}

/// Collect chunks up to the end frame. Past `limit` the bytes are counted
/// and dropped so the reply still follows the client's end frame.
async fn receive_upload(channel: &mut Channel, limit: usize) -> Result<Upload> {
    let mut archive = Vec::new();
    let mut received: u64 = 0;
    let mut oversized = false;
    loop {
        let frame = channel
            .next()
            .await
            .ok_or_else(|| HarnessError::Channel("connection closed during upload".into()))??;

        match frame {
            Frame::Chunk(bytes) => {
                received += bytes.len() as u64;
                if oversized {
                    continue;
                }
                if archive.len() + bytes.len() > limit {
                    oversized = true;
                    archive = Vec::new();
                } else {
                    archive.extend_from_slice(&bytes);
                }
            }
            Frame::End if oversized => return Ok(Upload::TooLarge(received)),
            Frame::End => return Ok(Upload::Complete(archive)),
            Frame::Abort(reason) => return Ok(Upload::Aborted(reason)),
            Frame::Message(_) => {
                return Err(HarnessError::Channel(
                    "message frame received during upload".into(),
                ))
            }
        }
    }
}

async fn send_reply(channel: &mut Channel, reply: &InvocationResult) -> Result<()> {
    channel.send(Frame::message(reply)?).await
}

fn artifact_reply(outcome: Result<ArtifactId>) -> InvocationResult {
    match outcome {
        Ok(id) => InvocationResult::Success(json!(id)),
        Err(err) => InvocationResult::Failure(RemoteFault::from(&err)),
    }
}
