#![forbid(unsafe_code)]

//! `exam-harness`: controller binary.
//!
//! Loads a TOML run configuration, launches the container process, deploys
//! the probe payload, runs its entry point and prints the run summary as
//! JSON. Exits with status 1 when the run failed.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use exam_harness::controller::{ExecutionController, ExecutionPlan};
use exam_harness::payload::directory_entries;
use exam_harness::process::{LauncherConfig, ProcessLauncher};
use exam_harness::{HarnessConfig, HarnessError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "exam-harness",
    about = "Run a probe payload inside a freshly launched module container",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML run configuration.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the container binary from the configuration.
    #[arg(long)]
    container: Option<PathBuf>,

    /// Override the child working directory from the configuration.
    #[arg(long)]
    working_directory: Option<PathBuf>,
}

fn main() -> Result<ExitCode> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("exam-harness starting");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| HarnessError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<ExitCode> {
    // ── Load configuration ──────────────────────────────
    let mut config = HarnessConfig::load_from_path(&args.config)?;
    if let Some(container) = args.container {
        config.container_binary = container;
    }
    if let Some(dir) = args.working_directory {
        config.working_directory = Some(dir);
    }
    info!(
        container = %config.container_binary.display(),
        platform = %config.platform,
        port = config.port,
        "configuration loaded"
    );

    // ── Working directory ───────────────────────────────
    // The scratch directory lives until the run summary is printed.
    let (working_directory, _scratch) = match config.working_directory.clone() {
        Some(dir) => (dir, None),
        None => {
            let scratch = tempfile::Builder::new()
                .prefix("exam-run-")
                .tempdir()
                .map_err(|err| HarnessError::Io(format!("cannot create working directory: {err}")))?;
            (scratch.path().to_path_buf(), Some(scratch))
        }
    };

    // ── Run ─────────────────────────────────────────────
    let launcher = ProcessLauncher::new(LauncherConfig {
        program: config.container_binary.clone(),
        transport: config.transport,
        stop_grace: config.stop_grace(),
    });
    let controller = ExecutionController::new(launcher);
    let plan = ExecutionPlan::from_config(&config, working_directory);
    let entries = config
        .probe
        .sources
        .clone()
        .into_iter()
        .flat_map(directory_entries);

    let summary = controller.run(&plan, entries).await;

    let report = serde_json::to_string_pretty(&summary.report())?;
    println!("{report}");

    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries the summary.
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

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
