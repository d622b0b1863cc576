//! Integration tests for whole runs through the execution controller.
//!
//! Covers:
//! - a payload reaching its entry point and returning the suite's value
//! - the host is stopped exactly once on every path after a start
//! - failures before the start never stop anything
//! - each failure class surfaces with its own error kind

use std::time::Duration;

use serde_json::{json, Value};

use exam_harness::container::ProbeContext;
use exam_harness::controller::ExecutionController;
use exam_harness::errors::ErrorKind;
use exam_harness::models::artifact::ArtifactState;
use exam_harness::options::LaunchOptions;
use exam_harness::payload::descriptor::{PayloadDescriptor, ACTIVATION_POLICY, MANIFEST_PATH};
use exam_harness::payload::source::PayloadEntry;
use exam_harness::wire::message::RemoteFault;
use exam_harness::{HarnessError, Result};

use super::test_helpers::{plan, InProcessLauncher};

fn probe_entries() -> Vec<Result<PayloadEntry>> {
    vec![
        Ok(PayloadEntry::new("suite/Foo.class", b"\xca\xfe\xba\xbe".to_vec())),
        Ok(PayloadEntry::new("suite/resources/data.txt", "fixture")),
    ]
}

fn foo_suite_launcher() -> InProcessLauncher {
    InProcessLauncher::new(|host| {
        host.suites().register("suite.Foo", "bar", |context: ProbeContext| async move {
            Ok::<_, RemoteFault>(json!({ "result": "ok", "entries": context.entries }))
        });
        host.suites().register("suite.Foo", "broken", |_context: ProbeContext| async {
            Err::<Value, _>(
                RemoteFault::target("suite::AssertionFailed", "expected 1, got 2")
                    .with_cause("assertion at Foo.broken"),
            )
        });
        host.suites().register("suite.Foo", "slow", |_context: ProbeContext| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, RemoteFault>("late")
        });
    })
}

// ── Success ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn run_invokes_entry_point_and_stops_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let controller = ExecutionController::new(foo_suite_launcher());
    let plan = plan(dir.path(), PayloadDescriptor::new("suite.Foo", "bar"));

    let summary = controller.run(&plan, probe_entries()).await;

    assert!(summary.is_success(), "run failed: {:?}", summary.error());
    let result = summary.result().expect("result value");
    assert_eq!(result["result"], "ok");
    assert_eq!(
        result["entries"],
        json!([MANIFEST_PATH, "suite/Foo.class", "suite/resources/data.txt"])
    );
    assert_eq!(controller.launcher().starts(), 1);
    assert_eq!(controller.launcher().stops(), 1);
}

#[tokio::test]
async fn launch_options_reach_the_host() {
    let dir = tempfile::tempdir().expect("tempdir");
    let controller = ExecutionController::new(foo_suite_launcher());
    let mut plan = plan(dir.path(), PayloadDescriptor::new("exam.SelfTest", "ping"));
    plan.launch_options = LaunchOptions::new()
        .platform("Felix")
        .vm_option("-Xmx32m")
        .raw_option("--noConsole");

    let summary = controller.run(&plan, Vec::new()).await;
    assert_eq!(summary.result(), Some(&json!("ok")));

    let seen = controller.launcher().last_options().expect("options recorded");
    assert_eq!(seen.platform.as_deref(), Some("felix"));
    assert_eq!(seen.port(), Some(plan.context.port()));
    assert_eq!(seen.working_directory.as_deref(), Some(dir.path()));
    assert_eq!(seen.vm_options, vec!["-Xmx32m".to_owned()]);
    assert_eq!(seen.other, vec!["--noConsole".to_owned()]);
}

#[tokio::test]
async fn describe_reports_manifest_headers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let controller = ExecutionController::new(foo_suite_launcher());
    let descriptor = PayloadDescriptor::new("exam.SelfTest", "describe")
        .with_symbolic_name("suite.probe")
        .with_header("x-run", "nightly");

    let summary = controller.run(&plan(dir.path(), descriptor), probe_entries()).await;

    let result = summary.result().expect("describe result");
    assert_eq!(result["symbolic_name"], "suite.probe");
    assert_eq!(result["headers"]["x-run"], "nightly");
    assert_eq!(result["entry_method"], "describe");
}

// ── Failures after start ────────────────────────────────────────────────────

#[tokio::test]
async fn discovery_timeout_still_stops_host() {
    let dir = tempfile::tempdir().expect("tempdir");
    let controller = ExecutionController::new(InProcessLauncher::never_serving());
    let mut plan = plan(dir.path(), PayloadDescriptor::new("suite.Foo", "bar"));
    plan.lookup_timeout = Duration::from_millis(600);

    let summary = controller.run(&plan, probe_entries()).await;

    assert!(matches!(summary.error(), Some(HarnessError::DiscoveryTimeout(Some(_)))));
    assert_eq!(controller.launcher().stops(), 1);
}

#[tokio::test]
async fn failing_entry_point_is_invocation_target() {
    let dir = tempfile::tempdir().expect("tempdir");
    let controller = ExecutionController::new(foo_suite_launcher());
    let plan = plan(dir.path(), PayloadDescriptor::new("suite.Foo", "broken"));

    let summary = controller.run(&plan, probe_entries()).await;

    match summary.error() {
        Some(HarnessError::InvocationTarget(fault)) => {
            assert_eq!(fault.error_type(), Some("suite::AssertionFailed"));
            assert_eq!(fault.message, "expected 1, got 2");
            assert_eq!(fault.causes, vec!["assertion at Foo.broken".to_owned()]);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(controller.launcher().stops(), 1);
}

#[tokio::test]
async fn self_test_failure_keeps_cause_chain() {
    let dir = tempfile::tempdir().expect("tempdir");
    let controller = ExecutionController::new(foo_suite_launcher());
    let descriptor =
        PayloadDescriptor::new("exam.SelfTest", "fail").with_symbolic_name("suite.probe");

    let summary = controller.run(&plan(dir.path(), descriptor), Vec::new()).await;

    match summary.error() {
        Some(HarnessError::InvocationTarget(fault)) => {
            assert!(fault
                .error_type()
                .is_some_and(|name| name.ends_with("SelfTestFailure")));
            assert_eq!(fault.causes, vec!["payload suite.probe asked to fail".to_owned()]);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn unknown_entry_point_is_suite_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let controller = ExecutionController::new(foo_suite_launcher());
    let plan = plan(dir.path(), PayloadDescriptor::new("suite.Missing", "run"));

    let summary = controller.run(&plan, probe_entries()).await;

    match summary.error() {
        Some(HarnessError::InvocationTarget(fault)) => {
            assert_eq!(fault.error_type(), Some("SuiteNotFound"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(controller.launcher().stops(), 1);
}

#[tokio::test]
async fn lazy_payload_fails_to_start() {
    let dir = tempfile::tempdir().expect("tempdir");
    let controller = ExecutionController::new(foo_suite_launcher());
    let descriptor =
        PayloadDescriptor::new("suite.Foo", "bar").with_header(ACTIVATION_POLICY, "lazy");

    let summary = controller.run(&plan(dir.path(), descriptor), probe_entries()).await;

    assert!(matches!(
        summary.error(),
        Some(HarnessError::ArtifactStart {
            state: ArtifactState::Starting,
            ..
        })
    ));
    assert_eq!(controller.launcher().stops(), 1);
}

#[tokio::test]
async fn invocation_deadline_is_channel_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let controller = ExecutionController::new(foo_suite_launcher());
    let mut plan = plan(dir.path(), PayloadDescriptor::new("suite.Foo", "slow"));
    plan.invocation_timeout = Duration::from_millis(300);

    let started = std::time::Instant::now();
    let summary = controller.run(&plan, probe_entries()).await;

    assert!(matches!(summary.error(), Some(HarnessError::Channel(msg)) if msg.contains("timed out")));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(controller.launcher().stops(), 1);
}

#[tokio::test]
async fn unreadable_payload_entry_aborts_deploy() {
    let dir = tempfile::tempdir().expect("tempdir");
    let controller = ExecutionController::new(foo_suite_launcher());
    let plan = plan(dir.path(), PayloadDescriptor::new("suite.Foo", "bar"));
    let entries = vec![
        Ok(PayloadEntry::new("suite/Foo.class", "x")),
        Err(HarnessError::Payload("cannot read suite/Bar.class".into())),
    ];

    let summary = controller.run(&plan, entries).await;

    assert!(matches!(summary.error(), Some(HarnessError::Payload(msg)) if msg.contains("Bar.class")));
    assert_eq!(controller.launcher().stops(), 1);
}

// ── Failures before start ───────────────────────────────────────────────────

#[tokio::test]
async fn start_failure_never_stops() {
    let dir = tempfile::tempdir().expect("tempdir");
    let controller = ExecutionController::new(InProcessLauncher::failing());
    let plan = plan(dir.path(), PayloadDescriptor::new("suite.Foo", "bar"));

    let summary = controller.run(&plan, probe_entries()).await;

    assert_eq!(summary.error().map(HarnessError::kind), Some(ErrorKind::ProcessSpawn));
    assert_eq!(controller.launcher().starts(), 1);
    assert_eq!(controller.launcher().stops(), 0);
}

#[tokio::test]
async fn missing_platform_fails_before_start() {
    let dir = tempfile::tempdir().expect("tempdir");
    let controller = ExecutionController::new(foo_suite_launcher());
    let mut plan = plan(dir.path(), PayloadDescriptor::new("suite.Foo", "bar"));
    plan.launch_options = LaunchOptions::new();

    let summary = controller.run(&plan, probe_entries()).await;

    assert_eq!(summary.error().map(HarnessError::kind), Some(ErrorKind::Config));
    assert_eq!(controller.launcher().starts(), 0);
    assert_eq!(controller.launcher().stops(), 0);
}
