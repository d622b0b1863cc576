#![forbid(unsafe_code)]

//! `exam-container`: child host launched by `exam-harness`.
//!
//! Parses the launch options it was started with, provisions the listed
//! artifacts, then serves the invocation channel on the communication port
//! until it receives ctrl-c or SIGTERM.
//!
//! The port comes from `EXAM_COMMUNICATION_PORT`, falling back to the
//! `-Dexam.communication.port=` property inside `--vmOptions`. Setting the
//! `exam.log.format=json` property switches logs to JSON.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use exam_harness::container::ContainerHost;
use exam_harness::context::{Endpoint, TransportKind, PORT_ENV, TRANSPORT_ENV, WORKING_DIRECTORY_ENV};
use exam_harness::options::ParsedLaunchOptions;
use exam_harness::remote::transport::Listener;
use exam_harness::{HarnessError, Result};

/// Property selecting the log format.
const LOG_FORMAT_PROPERTY: &str = "exam.log.format";

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum LogFormat {
    Text,
    Json,
}

fn main() -> Result<()> {
    let options = ParsedLaunchOptions::parse(std::env::args().skip(1));
    let log_format = match options.system_properties.get(LOG_FORMAT_PROPERTY).map(String::as_str) {
        Some("json") => LogFormat::Json,
        _ => LogFormat::Text,
    };
    init_tracing(log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| HarnessError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(options))
}

async fn run(options: ParsedLaunchOptions) -> Result<()> {
    // ── Resolve launch context ──────────────────────────
    let port = resolve_port(&options)?;
    let transport = resolve_transport()?;
    let working_directory = std::env::var(WORKING_DIRECTORY_ENV)
        .ok()
        .map(std::path::PathBuf::from)
        .or_else(|| options.working_directory.clone());
    info!(
        platform = options.platform.as_deref().unwrap_or("unspecified"),
        version = options.version.as_deref().unwrap_or("unspecified"),
        working_directory = ?working_directory,
        port,
        transport = transport.as_str(),
        "exam-container starting"
    );
    if !options.other.is_empty() {
        info!(options = ?options.other, "ignoring unrecognized launch options");
    }

    // ── Provision ───────────────────────────────────────
    let host = ContainerHost::new();
    let provisioned = host.provision(&options.provision).await;
    info!(
        requested = options.provision.len(),
        installed = provisioned.len(),
        "provisioning complete"
    );

    // ── Serve ───────────────────────────────────────────
    let endpoint = Endpoint::for_port(transport, port);
    let listener = Listener::bind(&endpoint).await?;
    let ct = CancellationToken::new();
    let server = Arc::new(host.server());
    let server_ct = ct.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(err) = server.serve(listener, server_ct).await {
            error!(%err, "invocation server failed");
        }
    });

    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    let _ = server_handle.await;
    info!("exam-container shut down");
    Ok(())
}

fn resolve_port(options: &ParsedLaunchOptions) -> Result<u16> {
    match std::env::var(PORT_ENV) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|err| HarnessError::Config(format!("invalid {PORT_ENV} '{raw}': {err}"))),
        Err(_) => options.port().ok_or_else(|| {
            HarnessError::Config(format!(
                "no communication port: set {PORT_ENV} or -Dexam.communication.port"
            ))
        }),
    }
}

fn resolve_transport() -> Result<TransportKind> {
    match std::env::var(TRANSPORT_ENV) {
        Ok(raw) => TransportKind::parse(&raw)
            .ok_or_else(|| HarnessError::Config(format!("unknown {TRANSPORT_ENV} '{raw}'"))),
        Err(_) => Ok(TransportKind::default()),
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Output is captured by the controller, not a terminal.
    let subscriber = fmt().with_env_filter(env_filter).with_ansi(false);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| HarnessError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| HarnessError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
