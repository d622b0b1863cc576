//! Child process launcher.
//!
//! [`ProcessLauncher`] spawns the container binary with the rendered launch
//! options, hands it the communication port through the environment and
//! captures its stdio. Each child is spawned with `kill_on_drop(true)` so a
//! handle dropped without [`ProcessLauncher::stop`] never leaks a process.
//!
//! ## Lifecycle
//!
//! ```text
//! NotStarted ──launch──▶ Running ──stop──▶ Stopped
//!      └──────────────────stop───────────────▲
//! ```
//!
//! `stop` is idempotent: a second call on a stopped handle does nothing.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn};

use crate::context::{TransportKind, PORT_ENV, TRANSPORT_ENV, WORKING_DIRECTORY_ENV};
use crate::process::output::{forward_output, OutputLine, OutputStream};
use crate::{HarnessError, Result};

/// Upper bound on waiting for the stdio forwarders after the child exited.
const FORWARDER_DRAIN: Duration = Duration::from_secs(2);

// ── Launcher seam ─────────────────────────────────────────────────────────────

/// Starts and stops the process hosting the invocation server.
///
/// The controller is written against this trait so that a run can target
/// either a real child process or an in-process host.
pub trait Launcher: Send + Sync {
    /// Handle describing one started host.
    type Handle: Send;

    /// Start a host with `options` in `working_directory`, serving on `port`.
    ///
    /// Returns as soon as the host has been started; readiness is detected
    /// by discovery, not by the launcher.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::ProcessSpawn` if the host cannot be started.
    fn start<'a>(
        &'a self,
        options: &'a [String],
        working_directory: &'a Path,
        port: u16,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Handle>> + Send + 'a>>;

    /// Stop the host behind `handle`. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Io` if the host could not be terminated.
    fn stop<'a>(
        &'a self,
        handle: &'a mut Self::Handle,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Lifecycle state of a [`ProcessHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Prepared, no process yet.
    NotStarted,
    /// Child process spawned.
    Running,
    /// Child process stopped (or never started and discarded).
    Stopped,
}

impl Display for LifecycleState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => f.write_str("not_started"),
            Self::Running => f.write_str("running"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

/// One child process owned by the launcher.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    launch_options: Vec<String>,
    working_directory: PathBuf,
    port: u16,
    state: LifecycleState,
    exit_status: Option<ExitStatus>,
    child: Option<Child>,
    forwarders: Vec<JoinHandle<()>>,
}

impl ProcessHandle {
    /// OS process id, once spawned.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Arguments the child was (or will be) started with.
    #[must_use]
    pub fn launch_options(&self) -> &[String] {
        &self.launch_options
    }

    /// Child working directory.
    #[must_use]
    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    /// Communication port handed to the child.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Exit status observed when the child was stopped.
    #[must_use]
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }
}

// ── Process launcher ──────────────────────────────────────────────────────────

/// Static launcher settings.
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    /// Container binary to execute.
    pub program: PathBuf,
    /// Transport the child must serve on.
    pub transport: TransportKind,
    /// Time between the terminate request and a forced kill.
    pub stop_grace: Duration,
}

/// Launches the container binary as an OS child process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    config: LauncherConfig,
    output: Option<mpsc::UnboundedSender<OutputLine>>,
}

impl ProcessLauncher {
    /// Create a launcher; child output is only logged.
    #[must_use]
    pub fn new(config: LauncherConfig) -> Self {
        Self {
            config,
            output: None,
        }
    }

    /// Also deliver every child output line to `sink`.
    #[must_use]
    pub fn with_output_sink(mut self, sink: mpsc::UnboundedSender<OutputLine>) -> Self {
        self.output = Some(sink);
        self
    }

    /// Build a `NotStarted` handle without spawning anything.
    #[must_use]
    pub fn prepare(
        &self,
        options: &[String],
        working_directory: impl Into<PathBuf>,
        port: u16,
    ) -> ProcessHandle {
        ProcessHandle {
            pid: None,
            launch_options: options.to_vec(),
            working_directory: working_directory.into(),
            port,
            state: LifecycleState::NotStarted,
            exit_status: None,
            child: None,
            forwarders: Vec::new(),
        }
    }

    /// Spawn the child for a prepared handle.
    ///
    /// The working directory is created if missing. On failure the handle
    /// stays `NotStarted`.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::ProcessSpawn` if the handle was already
    /// launched, the working directory cannot be created, or the binary
    /// cannot be executed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn launch(&self, handle: &mut ProcessHandle) -> Result<()> {
        if handle.state != LifecycleState::NotStarted {
            return Err(HarnessError::ProcessSpawn(format!(
                "handle is {}, expected not_started",
                handle.state
            )));
        }

        let span = info_span!(
            "launch_child",
            program = %self.config.program.display(),
            port = handle.port
        );
        let _guard = span.enter();

        std::fs::create_dir_all(&handle.working_directory).map_err(|err| {
            HarnessError::ProcessSpawn(format!(
                "cannot create working directory {}: {err}",
                handle.working_directory.display()
            ))
        })?;

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&handle.launch_options)
            .env(PORT_ENV, handle.port.to_string())
            .env(TRANSPORT_ENV, self.config.transport.as_str())
            .env(WORKING_DIRECTORY_ENV, &handle.working_directory)
            .current_dir(&handle.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|err| {
            HarnessError::ProcessSpawn(format!(
                "failed to spawn {}: {err}",
                self.config.program.display()
            ))
        })?;

        let pid = child.id();
        let pid_label = pid.unwrap_or(0);

        if let Some(stdout) = child.stdout.take() {
            handle.forwarders.push(forward_output(
                stdout,
                pid_label,
                OutputStream::Stdout,
                self.output.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            handle.forwarders.push(forward_output(
                stderr,
                pid_label,
                OutputStream::Stderr,
                self.output.clone(),
            ));
        }

        info!(
            pid = pid_label,
            args = handle.launch_options.len(),
            "container process spawned"
        );

        handle.pid = pid;
        handle.child = Some(child);
        handle.state = LifecycleState::Running;
        Ok(())
    }

    /// Stop the child behind `handle`.
    ///
    /// A running child is asked to terminate, given the configured grace
    /// period, then killed. Stopping a `NotStarted` handle moves it to
    /// `Stopped`; stopping a `Stopped` handle does nothing.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Io` if the child could not be killed or
    /// reaped. The handle is `Stopped` either way.
    pub async fn stop(&self, handle: &mut ProcessHandle) -> Result<()> {
        match handle.state {
            LifecycleState::Stopped => return Ok(()),
            LifecycleState::NotStarted => {
                handle.state = LifecycleState::Stopped;
                return Ok(());
            }
            LifecycleState::Running => {}
        }
        handle.state = LifecycleState::Stopped;

        let Some(mut child) = handle.child.take() else {
            return Ok(());
        };

        let outcome = terminate(&mut child, handle.pid, self.config.stop_grace).await;

        for forwarder in handle.forwarders.drain(..) {
            if tokio::time::timeout(FORWARDER_DRAIN, forwarder).await.is_err() {
                debug!(pid = ?handle.pid, "child output forwarder still busy, detaching");
            }
        }

        let status = outcome?;
        info!(pid = ?handle.pid, %status, "container process stopped");
        handle.exit_status = Some(status);
        Ok(())
    }
}

impl Launcher for ProcessLauncher {
    type Handle = ProcessHandle;

    fn start<'a>(
        &'a self,
        options: &'a [String],
        working_directory: &'a Path,
        port: u16,
    ) -> Pin<Box<dyn Future<Output = Result<ProcessHandle>> + Send + 'a>> {
        Box::pin(async move {
            let mut handle = self.prepare(options, working_directory, port);
            self.launch(&mut handle)?;
            Ok(handle)
        })
    }

    fn stop<'a>(
        &'a self,
        handle: &'a mut ProcessHandle,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(ProcessLauncher::stop(self, handle))
    }
}

// ── Termination ───────────────────────────────────────────────────────────────

async fn terminate(child: &mut Child, pid: Option<u32>, grace: Duration) -> Result<ExitStatus> {
    if let Some(status) = child.try_wait().map_err(reap_error)? {
        debug!(?pid, %status, "container process already exited");
        return Ok(status);
    }

    if request_terminate(pid) {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => return status.map_err(reap_error),
            Err(_) => warn!(?pid, ?grace, "container ignored terminate, killing"),
        }
    }

    child
        .kill()
        .await
        .map_err(|err| HarnessError::Io(format!("failed to kill container process: {err}")))?;
    child.wait().await.map_err(reap_error)
}

/// Send SIGTERM; returns whether the signal was delivered.
#[cfg(unix)]
fn request_terminate(pid: Option<u32>) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(raw) = pid.and_then(|p| i32::try_from(p).ok()).filter(|p| *p > 0) else {
        return false;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => true,
        Err(err) => {
            debug!(pid = raw, %err, "terminate signal not delivered");
            false
        }
    }
}

#[cfg(not(unix))]
fn request_terminate(_pid: Option<u32>) -> bool {
    false
}

fn reap_error(err: std::io::Error) -> HarnessError {
    HarnessError::Io(format!("failed to reap container process: {err}"))
}
