//! Integration tests for the invocation server and client over local
//! sockets.
//!
//! Covers:
//! - lookup of a service name that is not bound
//! - unknown capabilities and signatures
//! - capabilities registered while a call waits
//! - aborted uploads leave the connection usable
//! - uploads over the size limit are rejected and the connection survives
//! - url installs, start failures and the artifact inspector

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;

use exam_harness::capabilities::{ArtifactInspectorClient, TestRunnerClient};
use exam_harness::models::artifact::{ArtifactId, ArtifactState};
use exam_harness::remote::capability::CapabilityStub;
use exam_harness::remote::client::RemoteInvocationClient;
use exam_harness::remote::discovery::EndpointDiscovery;
use exam_harness::wire::message::RemoteFault;
use exam_harness::HarnessError;

use super::test_helpers::{connect, serve_host};

/// Gzip-compressed tar holding a manifest with `headers`.
fn archive(headers: &str) -> Vec<u8> {
    let mut tar = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let mut header = tar::Header::new_gnu();
    header.set_size(headers.len() as u64);
    header.set_mode(0o644);
    tar.append_data(&mut header, "META-INF/MANIFEST.MF", headers.as_bytes())
        .expect("append manifest");
    let encoder = tar.into_inner().expect("finish tar");
    encoder.finish().expect("finish gzip")
}

struct Greeter;

// ── Lookup ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn lookup_of_other_service_is_not_bound() {
    let (endpoint, cancel) = serve_host(|_| {}).await;

    let discovery = EndpointDiscovery::new(endpoint).with_service("exam.Elsewhere");
    let err = RemoteInvocationClient::new(discovery, Duration::from_millis(400))
        .connect()
        .await
        .expect_err("service is not bound");

    match err {
        HarnessError::DiscoveryTimeout(Some(cause)) => {
            assert!(cause.to_string().contains("exam.Elsewhere"), "cause: {cause}");
        }
        other => panic!("unexpected error: {other}"),
    }
    cancel.cancel();
}

// ── Dispatch ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_capability_is_reported() {
    let (endpoint, cancel) = serve_host(|_| {}).await;
    let server = connect(&endpoint).await;

    let stub = CapabilityStub::new(Arc::clone(&server), "exam.Missing", Duration::ZERO);
    let err = stub
        .call::<_, String>("anything", ())
        .await
        .expect_err("capability is not registered");

    assert!(matches!(err, HarnessError::NoSuchCapability(ref name) if name == "exam.Missing"));
    assert!(!server.is_poisoned());
    cancel.cancel();
}

#[tokio::test]
async fn wrong_signature_is_no_such_method() {
    let (endpoint, cancel) = serve_host(|_| {}).await;
    let server = connect(&endpoint).await;

    let stub = CapabilityStub::new(Arc::clone(&server), "exam.TestRunner", Duration::ZERO);
    let err = stub
        .call::<_, String>("execute", ("suite.Foo".to_owned(),))
        .await
        .expect_err("execute takes two strings");

    assert!(
        matches!(err, HarnessError::NoSuchMethod(ref msg) if msg == "exam.TestRunner.execute(string)"),
        "unexpected error: {err}"
    );

    // The channel survives a failed dispatch.
    let runner: TestRunnerClient = server.capability(Duration::ZERO);
    let entry_points = runner.entry_points().await.expect("entry points");
    assert!(entry_points.contains(&"exam.SelfTest.ping".to_owned()));
    cancel.cancel();
}

#[tokio::test]
async fn late_capability_registration_is_awaited() {
    let mut registry = None;
    let (endpoint, cancel) = serve_host(|host| {
        host.dispatch_mut().register(
            "demo.Greeter",
            "greet",
            |_greeter: Arc<Greeter>, (name,): (String,)| async move {
                Ok::<_, RemoteFault>(format!("hello {name}"))
            },
        );
        registry = Some(Arc::clone(host.registry()));
    })
    .await;
    let registry = registry.expect("registry captured");
    let server = connect(&endpoint).await;

    let stub = CapabilityStub::new(Arc::clone(&server), "demo.Greeter", Duration::from_secs(3));
    let call = tokio::spawn(async move { stub.call::<_, String>("greet", ("exam".to_owned(),)).await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    registry.register("demo.Greeter", Arc::new(Greeter));

    let greeting = call.await.expect("call task").expect("call completes after registration");
    assert_eq!(greeting, "hello exam");
    cancel.cancel();
}

// ── Deployment ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn aborted_upload_keeps_channel_usable() {
    let (endpoint, cancel) = serve_host(|_| {}).await;
    let server = connect(&endpoint).await;

    let failing = futures_util::stream::iter(vec![
        Ok(Bytes::from_static(b"partial")),
        Err(HarnessError::Payload("source vanished".into())),
    ]);
    let err = server
        .install_stream("inline:broken", failing)
        .await
        .expect_err("upload aborted");
    assert!(matches!(err, HarnessError::Payload(_)));

    let good = futures_util::stream::iter(vec![Ok(Bytes::from(archive(
        "entry-host: exam.SelfTest\nentry-method: ping\nsymbolic-name: good\n",
    )))]);
    let id = server
        .install_stream("inline:good", good)
        .await
        .expect("second upload succeeds");
    assert_eq!(id, ArtifactId(1), "the aborted upload installed nothing");
    cancel.cancel();
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let (endpoint, cancel) = serve_host(|host| host.set_max_upload_bytes(1024)).await;
    let server = connect(&endpoint).await;

    let big = futures_util::stream::iter(vec![
        Ok(Bytes::from(vec![0_u8; 800])),
        Ok(Bytes::from(vec![0_u8; 800])),
        Ok(Bytes::from(vec![0_u8; 800])),
    ]);
    let err = server
        .install_stream("inline:big", big)
        .await
        .expect_err("upload exceeds the limit");
    assert!(
        matches!(err, HarnessError::ArtifactInstall(ref msg) if msg.contains("2400 bytes")),
        "unexpected error: {err}"
    );
    assert!(!server.is_poisoned());

    let small = futures_util::stream::iter(vec![Ok(Bytes::from(archive(
        "entry-host: exam.SelfTest\nentry-method: ping\nsymbolic-name: small\n",
    )))]);
    let id = server
        .install_stream("inline:small", small)
        .await
        .expect("upload under the limit succeeds");
    assert_eq!(id, ArtifactId(1));
    cancel.cancel();
}

#[tokio::test]
async fn malformed_upload_is_artifact_install_error() {
    let (endpoint, cancel) = serve_host(|_| {}).await;
    let server = connect(&endpoint).await;

    let garbage = futures_util::stream::iter(vec![Ok(Bytes::from_static(b"not an archive"))]);
    let err = server
        .install_stream("inline:garbage", garbage)
        .await
        .expect_err("garbage is rejected");

    assert!(matches!(err, HarnessError::ArtifactInstall(_)));
    assert!(!server.is_poisoned());
    cancel.cancel();
}

#[tokio::test]
async fn url_install_start_and_inspect() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("probe.tgz");
    std::fs::write(
        &path,
        archive("entry-host: exam.SelfTest\nentry-method: ping\nsymbolic-name: from-disk\n"),
    )
    .expect("write archive");

    let (endpoint, cancel) = serve_host(|_| {}).await;
    let server = connect(&endpoint).await;

    let url = format!("file://{}", path.display());
    let id = server.install_url(&url).await.expect("install from url");

    let inspector: ArtifactInspectorClient = server.capability(Duration::ZERO);
    assert_eq!(inspector.state(id).await.expect("state"), ArtifactState::Installed);

    server.start_artifact(id).await.expect("start");
    assert_eq!(inspector.state(id).await.expect("state"), ArtifactState::Active);

    let listed = inspector.list().await.expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].location, url);
    assert_eq!(listed[0].symbolic_name.as_deref(), Some("from-disk"));

    let runner: TestRunnerClient = server.capability(Duration::ZERO);
    let value = runner.execute("exam.SelfTest", "ping").await.expect("ping");
    assert_eq!(value, "ok");
    cancel.cancel();
}

#[tokio::test]
async fn start_of_unknown_artifact_is_not_found() {
    let (endpoint, cancel) = serve_host(|_| {}).await;
    let server = connect(&endpoint).await;

    let err = server
        .start_artifact(ArtifactId(42))
        .await
        .expect_err("nothing installed");
    assert!(matches!(err, HarnessError::NotFound(_)));

    let inspector: ArtifactInspectorClient = server.capability(Duration::ZERO);
    let err = inspector.state(ArtifactId(42)).await.expect_err("unknown id");
    assert!(matches!(err, HarnessError::NotFound(_)));
    cancel.cancel();
}

#[tokio::test]
async fn missing_url_is_artifact_install_error() {
    let (endpoint, cancel) = serve_host(|_| {}).await;
    let server = connect(&endpoint).await;

    let err = server
        .install_url("file:///definitely/not/here.tgz")
        .await
        .expect_err("missing file");
    assert!(matches!(err, HarnessError::ArtifactInstall(_)));
    cancel.cancel();
}

/// The server itself answers an aborted upload with an install fault.
#[tokio::test]
async fn server_replies_to_abort_with_install_fault() {
    use exam_harness::remote::transport;
    use exam_harness::wire::codec::Frame;
    use exam_harness::wire::message::{ArtifactSource, FaultKind, InvocationResult, Request};
    use futures_util::{SinkExt, StreamExt};

    let (endpoint, cancel) = serve_host(|_| {}).await;
    let mut channel = transport::connect(&endpoint).await.expect("raw connect");

    let request = Request::InstallArtifact {
        location: "inline:raw".into(),
        source: ArtifactSource::Streamed,
    };
    channel
        .send(Frame::message(&request).expect("encode"))
        .await
        .expect("send request");
    channel
        .send(Frame::Chunk(Bytes::from_static(b"half")))
        .await
        .expect("send chunk");
    channel
        .send(Frame::Abort("producer failed".into()))
        .await
        .expect("send abort");

    let reply: InvocationResult = channel
        .next()
        .await
        .expect("reply frame")
        .expect("frame ok")
        .into_message()
        .expect("result json");

    match reply {
        InvocationResult::Failure(fault) => {
            assert_eq!(fault.kind, FaultKind::ArtifactInstall);
            assert_eq!(fault.message, "upload of inline:raw aborted: producer failed");
        }
        InvocationResult::Success(value) => panic!("unexpected success: {value}"),
    }
    cancel.cancel();
}
