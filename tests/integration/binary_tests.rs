//! End-to-end tests driving the built binaries.
//!
//! Covers:
//! - the controller deploying into a spawned `exam-container` over TCP
//! - provisioning an artifact listed in the launch options
//! - `exam-harness` printing the run summary and its exit status

use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use serial_test::serial;

use exam_harness::context::{ConnectorContext, TransportKind};
use exam_harness::controller::{ExecutionController, ExecutionPlan};
use exam_harness::options::LaunchOptions;
use exam_harness::payload::descriptor::PayloadDescriptor;
use exam_harness::payload::directory_entries;
use exam_harness::process::{LauncherConfig, ProcessLauncher};

const CONTAINER_BIN: &str = env!("CARGO_BIN_EXE_exam-container");
const HARNESS_BIN: &str = env!("CARGO_BIN_EXE_exam-harness");

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("free port")
}

fn container_launcher() -> ProcessLauncher {
    ProcessLauncher::new(LauncherConfig {
        program: PathBuf::from(CONTAINER_BIN),
        transport: TransportKind::Tcp,
        stop_grace: Duration::from_secs(5),
    })
}

fn tcp_plan(working_directory: &Path, descriptor: PayloadDescriptor) -> ExecutionPlan {
    ExecutionPlan {
        context: ConnectorContext::new(TransportKind::Tcp, free_port(), working_directory),
        launch_options: LaunchOptions::new().platform("felix"),
        descriptor,
        lookup_timeout: Duration::from_secs(20),
        invocation_timeout: Duration::from_secs(10),
    }
}

fn write_probe_archive(path: &Path, manifest: &str) {
    let mut tar = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let mut header = tar::Header::new_gnu();
    header.set_size(manifest.len() as u64);
    header.set_mode(0o644);
    tar.append_data(&mut header, "META-INF/MANIFEST.MF", manifest.as_bytes())
        .expect("append manifest");
    let bytes = tar
        .into_inner()
        .expect("finish tar")
        .finish()
        .expect("finish gzip");
    std::fs::write(path, bytes).expect("write archive");
}

// ── Controller against the container binary ─────────────────────────────────

#[tokio::test]
#[serial]
async fn ping_through_spawned_container() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sources = dir.path().join("classes");
    std::fs::create_dir_all(sources.join("suite")).expect("sources");
    std::fs::write(sources.join("suite").join("Foo.class"), b"\xca\xfe").expect("class file");

    let controller = ExecutionController::new(container_launcher());
    let plan = tcp_plan(
        &dir.path().join("run"),
        PayloadDescriptor::new("exam.SelfTest", "describe"),
    );

    let summary = controller.run(&plan, directory_entries(&sources)).await;

    assert!(summary.is_success(), "run failed: {:?}", summary.error());
    let result = summary.result().expect("describe result");
    assert_eq!(result["entry_host"], "exam.SelfTest");
    assert_eq!(
        result["entries"],
        serde_json::json!(["META-INF/MANIFEST.MF", "suite/Foo.class"])
    );
}

#[tokio::test]
#[serial]
async fn provisioned_artifact_is_active_before_deploy() {
    let dir = tempfile::tempdir().expect("tempdir");
    let base = dir.path().join("base.tgz");
    write_probe_archive(
        &base,
        "symbolic-name: base\nentry-host: exam.SelfTest\nentry-method: ping\n",
    );

    let controller = ExecutionController::new(container_launcher());
    let mut plan = tcp_plan(
        &dir.path().join("run"),
        PayloadDescriptor::new("exam.SelfTest", "describe"),
    );
    plan.launch_options = LaunchOptions::new()
        .platform("felix")
        .provision(format!("file:{}", base.display()));

    let summary = controller.run(&plan, Vec::new()).await;

    let result = summary.result().expect("describe result");
    assert_eq!(result["artifact_id"], 2, "provisioned artifact takes id 1");
}

// ── Harness binary ──────────────────────────────────────────────────────────

fn write_config(dir: &Path, entry_method: &str) -> PathBuf {
    let sources = dir.join("classes");
    std::fs::create_dir_all(&sources).expect("sources");
    std::fs::write(sources.join("readme.txt"), "probe").expect("source file");

    let config = format!(
        r#"
container_binary = '{container}'
platform = "felix"
port = {port}
transport = "tcp"
lookup_timeout_ms = 20000
working_directory = '{work}'

[probe]
entry_host = "exam.SelfTest"
entry_method = "{entry_method}"
sources = ['{sources}']
"#,
        container = CONTAINER_BIN,
        port = free_port(),
        work = dir.join("run").display(),
        sources = sources.display(),
    );
    let path = dir.join("exam.toml");
    std::fs::write(&path, config).expect("write config");
    path
}

fn run_harness(config: &Path) -> (std::process::ExitStatus, Value) {
    let output = std::process::Command::new(HARNESS_BIN)
        .arg("--config")
        .arg(config)
        .output()
        .expect("harness runs");
    let report = serde_json::from_slice(&output.stdout).unwrap_or_else(|err| {
        panic!(
            "stdout is not a summary ({err}): {}",
            String::from_utf8_lossy(&output.stdout)
        )
    });
    (output.status, report)
}

#[test]
#[serial]
fn harness_prints_successful_summary() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_config(dir.path(), "ping");

    let (status, report) = run_harness(&config);

    assert!(status.success(), "report: {report}");
    assert_eq!(report["result"], "ok");
    assert!(report.get("error").is_none());
    assert!(report["run_id"].is_string());
}

#[test]
#[serial]
fn harness_exits_nonzero_on_failed_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_config(dir.path(), "fail");

    let (status, report) = run_harness(&config);

    assert_eq!(status.code(), Some(1));
    assert_eq!(report["error"]["kind"], "invocation_target");
    assert!(report.get("result").is_none());
}
