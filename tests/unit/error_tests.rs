//! Unit tests for the harness error taxonomy and its wire mapping.
//!
//! Covers:
//! - `Display` renders `"<kind>: <message>"`
//! - `kind()` discriminants
//! - remote faults map back to the matching `HarnessError` variant
//! - local errors map to the matching fault kind
//! - `DiscoveryTimeout` exposes its last cause through `source()`

use std::error::Error as _;

use exam_harness::errors::ErrorKind;
use exam_harness::models::artifact::{ArtifactId, ArtifactState};
use exam_harness::wire::message::{FaultKind, RemoteFault};
use exam_harness::HarnessError;

// ── Display ─────────────────────────────────────────────────────────────────

#[test]
fn display_prefixes_kind() {
    assert_eq!(
        HarnessError::ProcessSpawn("no such file".into()).to_string(),
        "process spawn: no such file"
    );
    assert_eq!(
        HarnessError::NoSuchCapability("exam.Missing".into()).to_string(),
        "no such capability: exam.Missing"
    );
    assert_eq!(
        HarnessError::ArtifactStart {
            artifact_id: ArtifactId(3),
            state: ArtifactState::Starting,
        }
        .to_string(),
        "artifact start: artifact 3 not started (still starting)"
    );
}

/// A target failure renders the original type, message and causes.
#[test]
fn invocation_target_display_keeps_original_error() {
    let fault = RemoteFault::target("suite::AssertionFailed", "expected 2, got 3")
        .with_cause("comparison in bar()");
    let err = HarnessError::InvocationTarget(fault);

    assert_eq!(
        err.to_string(),
        "invocation target: suite::AssertionFailed: expected 2, got 3; caused by: comparison in bar()"
    );
    assert_eq!(err.kind(), ErrorKind::InvocationTarget);
}

// ── Discovery timeout ───────────────────────────────────────────────────────

#[test]
fn discovery_timeout_exposes_last_cause() {
    let err = HarnessError::DiscoveryTimeout(Some(Box::new(HarnessError::Channel(
        "connection refused".into(),
    ))));

    assert_eq!(err.kind(), ErrorKind::DiscoveryTimeout);
    assert_eq!(
        err.to_string(),
        "discovery timeout: channel: connection refused"
    );
    let source = err.source().expect("last cause must be the source");
    assert_eq!(source.to_string(), "channel: connection refused");
}

#[test]
fn discovery_timeout_without_attempt_has_no_source() {
    let err = HarnessError::DiscoveryTimeout(None);
    assert!(err.source().is_none());
}

// ── Fault mapping ───────────────────────────────────────────────────────────

#[test]
fn remote_faults_map_to_matching_variants() {
    let cases = [
        (FaultKind::NotBound, ErrorKind::Channel),
        (FaultKind::Protocol, ErrorKind::Channel),
        (FaultKind::NoSuchCapability, ErrorKind::NoSuchCapability),
        (FaultKind::NoSuchMethod, ErrorKind::NoSuchMethod),
        (FaultKind::ArgumentMismatch, ErrorKind::Marshal),
        (FaultKind::NoSuchArtifact, ErrorKind::NotFound),
        (FaultKind::ArtifactInstall, ErrorKind::ArtifactInstall),
        (
            FaultKind::Target {
                error_type: "E".into(),
            },
            ErrorKind::InvocationTarget,
        ),
    ];

    for (kind, expected) in cases {
        let err = HarnessError::from(RemoteFault::new(kind.clone(), "boom"));
        assert_eq!(err.kind(), expected, "fault kind {kind:?}");
    }
}

#[test]
fn artifact_start_fault_keeps_id_and_state() {
    let fault = RemoteFault::new(
        FaultKind::ArtifactStart {
            artifact_id: ArtifactId(7),
            state: ArtifactState::Resolved,
        },
        "not started",
    );

    match HarnessError::from(fault) {
        HarnessError::ArtifactStart { artifact_id, state } => {
            assert_eq!(artifact_id, ArtifactId(7));
            assert_eq!(state, ArtifactState::Resolved);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn local_errors_map_to_fault_kinds() {
    let fault = RemoteFault::from(&HarnessError::NotFound("artifact 9".into()));
    assert_eq!(fault.kind, FaultKind::NoSuchArtifact);
    assert_eq!(fault.message, "artifact 9");

    let fault = RemoteFault::from(&HarnessError::Marshal("expected 2 argument(s), got 1".into()));
    assert_eq!(fault.kind, FaultKind::ArgumentMismatch);

    let fault = RemoteFault::from(&HarnessError::Io("broken pipe".into()));
    assert_eq!(fault.kind, FaultKind::Protocol);
}

/// Capturing a concrete error keeps its type name and source chain.
#[test]
fn capture_preserves_type_and_causes() {
    #[derive(Debug)]
    struct Outer(std::io::Error);

    impl std::fmt::Display for Outer {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("outer failed")
        }
    }

    impl std::error::Error for Outer {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    let fault = RemoteFault::capture(&Outer(std::io::Error::other("inner failed")));

    let error_type = fault.error_type().expect("captured fault is a target fault");
    assert!(error_type.ends_with("Outer"), "type name was {error_type}");
    assert_eq!(fault.message, "outer failed");
    assert_eq!(fault.causes, vec!["inner failed".to_owned()]);
}
