//! Execution controller: one run of the spawn, package, deploy, invoke and
//! collect pipeline.
//!
//! ```text
//! Launcher::start ─▶ PayloadBuilder::build ─▶ connect ─▶ install_stream
//!        ─▶ start_artifact ─▶ TestRunner.execute ─▶ Launcher::stop ─▶ Summary
//! ```
//!
//! Once the host has started, it is stopped exactly once, whatever happens
//! afterwards. The first error wins; a failed stop after a successful run is
//! only logged.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::capabilities::test_runner::TestRunnerClient;
use crate::config::HarnessConfig;
use crate::context::ConnectorContext;
use crate::models::summary::Summary;
use crate::options::LaunchOptions;
use crate::payload::builder::PayloadBuilder;
use crate::payload::descriptor::PayloadDescriptor;
use crate::payload::source::PayloadEntry;
use crate::process::launcher::Launcher;
use crate::remote::client::RemoteInvocationClient;
use crate::remote::discovery::EndpointDiscovery;
use crate::Result;

/// Everything one run needs besides the payload entries.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Where the server lives and where the host runs.
    pub context: ConnectorContext,
    /// Launch options for the host.
    pub launch_options: LaunchOptions,
    /// Payload manifest.
    pub descriptor: PayloadDescriptor,
    /// Discovery deadline; zero retries forever.
    pub lookup_timeout: Duration,
    /// Per-call deadline for deployment and the entry-point invocation;
    /// zero waits indefinitely.
    pub invocation_timeout: Duration,
}

impl ExecutionPlan {
    /// Plan derived from a validated configuration, running the host in
    /// `working_directory`.
    #[must_use]
    pub fn from_config(config: &HarnessConfig, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            context: ConnectorContext::new(config.transport, config.port, working_directory),
            launch_options: config.launch_options(),
            descriptor: config.descriptor(),
            lookup_timeout: config.lookup_timeout(),
            invocation_timeout: config.invocation_timeout(),
        }
    }
}

/// Drives runs against a [`Launcher`].
#[derive(Debug)]
pub struct ExecutionController<L: Launcher> {
    launcher: L,
    builder: PayloadBuilder,
}

impl<L: Launcher> ExecutionController<L> {
    /// Controller over `launcher` with the default payload builder.
    #[must_use]
    pub fn new(launcher: L) -> Self {
        Self {
            launcher,
            builder: PayloadBuilder::new(),
        }
    }

    /// Use a custom payload builder.
    #[must_use]
    pub fn with_builder(mut self, builder: PayloadBuilder) -> Self {
        self.builder = builder;
        self
    }

    /// Underlying launcher.
    #[must_use]
    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Execute one run and seal its outcome.
    ///
    /// Never fails: every error ends up in the returned [`Summary`].
    pub async fn run<I>(&self, plan: &ExecutionPlan, entries: I) -> Summary
    where
        I: IntoIterator<Item = Result<PayloadEntry>>,
        I::IntoIter: Send + 'static,
    {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = info_span!(
            "execution",
            %run_id,
            entry_host = %plan.descriptor.entry_host,
            entry_method = %plan.descriptor.entry_method,
            address = %plan.context.communication_channel_address(),
        );

        let outcome = self.execute(plan, entries).instrument(span).await;
        let summary = Summary::new(run_id, started_at, outcome);
        match summary.error() {
            None => info!(%run_id, "run succeeded"),
            Some(err) => warn!(%run_id, %err, "run failed"),
        }
        summary
    }

    async fn execute<I>(&self, plan: &ExecutionPlan, entries: I) -> Result<Value>
    where
        I: IntoIterator<Item = Result<PayloadEntry>>,
        I::IntoIter: Send + 'static,
    {
        let options = plan.launch_options.build(&plan.context)?;

        let mut handle = self
            .launcher
            .start(&options, plan.context.working_directory(), plan.context.port())
            .await?;
        info!("host started");

        let outcome = self.deploy_and_invoke(plan, entries).await;
        let stopped = self.launcher.stop(&mut handle).await;

        match (outcome, stopped) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(value), Err(err)) => {
                warn!(%err, "host stop failed after a successful run");
                Ok(value)
            }
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(stop_err)) => {
                warn!(%stop_err, "host stop failed after a failed run");
                Err(err)
            }
        }
    }

    async fn deploy_and_invoke<I>(&self, plan: &ExecutionPlan, entries: I) -> Result<Value>
    where
        I: IntoIterator<Item = Result<PayloadEntry>>,
        I::IntoIter: Send + 'static,
    {
        let payload = self.builder.build(entries, &plan.descriptor);

        let discovery = EndpointDiscovery::new(plan.context.communication_channel_address());
        let server = Arc::new(
            RemoteInvocationClient::new(discovery, plan.lookup_timeout)
                .connect()
                .await?
                .with_call_timeout(plan.invocation_timeout),
        );

        let location = format!("inline:{}", plan.descriptor.symbolic_name);
        let artifact_id = server.install_stream(&location, payload).await?;
        server.start_artifact(artifact_id).await?;
        info!(artifact_id = %artifact_id, "payload deployed");

        let runner: TestRunnerClient = server.capability(plan.invocation_timeout);
        runner
            .execute(&plan.descriptor.entry_host, &plan.descriptor.entry_method)
            .await
    }
}
