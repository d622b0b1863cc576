//! Shared helpers for integration tests.
//!
//! [`InProcessLauncher`] implements the launcher seam by serving a
//! [`ContainerHost`] on a local socket inside the test process, so whole
//! runs can be exercised without spawning a child binary.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use exam_harness::container::ContainerHost;
use exam_harness::context::{ConnectorContext, Endpoint, TransportKind};
use exam_harness::controller::ExecutionPlan;
use exam_harness::options::{LaunchOptions, ParsedLaunchOptions};
use exam_harness::payload::descriptor::PayloadDescriptor;
use exam_harness::process::Launcher;
use exam_harness::remote::client::{RemoteInvocationClient, ServerHandle};
use exam_harness::remote::discovery::EndpointDiscovery;
use exam_harness::remote::transport::Listener;
use exam_harness::{HarnessError, Result};

/// Hook run on every freshly built host before it starts serving.
pub type HostSetup = Arc<dyn Fn(&ContainerHost) + Send + Sync>;

/// Port unique within this test binary, used to name local sockets.
pub fn unique_port() -> u16 {
    static NEXT: AtomicU16 = AtomicU16::new(0);
    let base = 20_000 + u16::try_from(std::process::id() % 20_000).unwrap_or(0);
    base.wrapping_add(NEXT.fetch_add(1, Ordering::Relaxed))
}

/// Serve a configured host on a fresh local socket.
pub async fn serve_host(setup: impl FnOnce(&mut ContainerHost)) -> (Endpoint, CancellationToken) {
    let mut host = ContainerHost::new();
    setup(&mut host);

    let endpoint = Endpoint::for_port(TransportKind::Local, unique_port());
    let listener = Listener::bind(&endpoint).await.expect("bind local socket");
    let cancel = CancellationToken::new();
    tokio::spawn(Arc::new(host.server()).serve(listener, cancel.clone()));
    (endpoint, cancel)
}

/// Connect to a host served by [`serve_host`].
pub async fn connect(endpoint: &Endpoint) -> Arc<ServerHandle> {
    let client = RemoteInvocationClient::new(
        EndpointDiscovery::new(endpoint.clone()),
        Duration::from_secs(5),
    );
    Arc::new(client.connect().await.expect("server reachable"))
}

/// Plan for a local-socket run of `host.method`.
pub fn plan(working_directory: &Path, descriptor: PayloadDescriptor) -> ExecutionPlan {
    ExecutionPlan {
        context: ConnectorContext::new(TransportKind::Local, unique_port(), working_directory),
        launch_options: LaunchOptions::new().platform("felix"),
        descriptor,
        lookup_timeout: Duration::from_secs(5),
        invocation_timeout: Duration::from_secs(5),
    }
}

/// Handle to a host served by [`InProcessLauncher`].
#[derive(Debug)]
pub struct InProcessHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<()>>>,
    stopped: bool,
}

/// Launcher that serves a [`ContainerHost`] inside the test process.
pub struct InProcessLauncher {
    setup: HostSetup,
    serve: bool,
    fail_start: bool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    last_options: std::sync::Mutex<Option<ParsedLaunchOptions>>,
}

impl InProcessLauncher {
    /// Launcher whose hosts are configured by `setup`.
    pub fn new(setup: impl Fn(&ContainerHost) + Send + Sync + 'static) -> Self {
        Self {
            setup: Arc::new(setup),
            serve: true,
            fail_start: false,
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            last_options: std::sync::Mutex::new(None),
        }
    }

    /// Start "successfully" without ever binding the endpoint.
    pub fn never_serving() -> Self {
        Self {
            serve: false,
            ..Self::new(|_| {})
        }
    }

    /// Fail every start.
    pub fn failing() -> Self {
        Self {
            fail_start: true,
            ..Self::new(|_| {})
        }
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Launch options seen by the most recent start.
    pub fn last_options(&self) -> Option<ParsedLaunchOptions> {
        self.last_options
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl Launcher for InProcessLauncher {
    type Handle = InProcessHandle;

    fn start<'a>(
        &'a self,
        options: &'a [String],
        _working_directory: &'a Path,
        port: u16,
    ) -> Pin<Box<dyn Future<Output = Result<InProcessHandle>> + Send + 'a>> {
        Box::pin(async move {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail_start {
                return Err(HarnessError::ProcessSpawn("refusing to start".into()));
            }

            let parsed = ParsedLaunchOptions::parse(options);
            *self
                .last_options
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(parsed.clone());

            let cancel = CancellationToken::new();
            let task = if self.serve {
                let host = ContainerHost::new();
                (self.setup)(&host);
                host.provision(&parsed.provision).await;

                let endpoint = Endpoint::for_port(TransportKind::Local, port);
                let listener = Listener::bind(&endpoint).await?;
                Some(tokio::spawn(
                    Arc::new(host.server()).serve(listener, cancel.clone()),
                ))
            } else {
                None
            };

            Ok(InProcessHandle {
                cancel,
                task,
                stopped: false,
            })
        })
    }

    fn stop<'a>(
        &'a self,
        handle: &'a mut InProcessHandle,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if handle.stopped {
                return Ok(());
            }
            handle.stopped = true;
            self.stops.fetch_add(1, Ordering::SeqCst);

            handle.cancel.cancel();
            if let Some(task) = handle.task.take() {
                tokio::time::timeout(Duration::from_secs(5), task)
                    .await
                    .map_err(|_| HarnessError::Io("host did not shut down".into()))?
                    .map_err(|err| HarnessError::Io(err.to_string()))??;
            }
            Ok(())
        })
    }
}
