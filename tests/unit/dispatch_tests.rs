//! Unit tests for the service registry, dispatch table and argument
//! marshalling.
//!
//! Covers:
//! - parameter type descriptors follow declaration order
//! - argument lists reject arity and type mismatches
//! - handlers resolve by exact signature only
//! - handler argument mismatches become `argument_mismatch` faults
//! - `wait_for` sees services registered while it waits, and a zero timeout
//!   does not wait

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use exam_harness::remote::capability::{Arguments, WireType};
use exam_harness::remote::dispatch::{DispatchTable, Service, ServiceRegistry};
use exam_harness::wire::message::{FaultKind, RemoteFault};
use exam_harness::HarnessError;

struct Calculator {
    offset: i64,
}

fn table() -> DispatchTable {
    let mut table = DispatchTable::new();
    table.register(
        "demo.Calculator",
        "add",
        |calc: Arc<Calculator>, (a, b): (i64, i64)| async move {
            Ok::<_, RemoteFault>(a + b + calc.offset)
        },
    );
    table.register(
        "demo.Calculator",
        "add",
        |_calc: Arc<Calculator>, (a, b): (String, String)| async move {
            Ok::<_, RemoteFault>(format!("{a}{b}"))
        },
    );
    table
}

// ── Descriptors ─────────────────────────────────────────────────────────────

#[test]
fn descriptors_follow_declaration_order() {
    assert_eq!(
        <(String, i64, Vec<bool>)>::descriptors(),
        vec!["string", "long", "list<boolean>"]
    );
    assert_eq!(<(Option<u32>,)>::descriptors(), vec!["optional<uint>"]);
    assert!(<()>::descriptors().is_empty());
    assert_eq!(Value::descriptor(), "any");
}

#[test]
fn values_follow_declaration_order() {
    let values = ("suite.Foo".to_owned(), "bar".to_owned())
        .into_values()
        .expect("strings serialize");
    assert_eq!(values, vec![json!("suite.Foo"), json!("bar")]);
}

#[test]
fn arity_mismatch_is_marshal_error() {
    let err = <(String, String)>::from_values(vec![json!("only one")])
        .expect_err("one value for two parameters");
    assert!(matches!(err, HarnessError::Marshal(ref msg) if msg.contains("expected 2")));
}

#[test]
fn type_mismatch_is_marshal_error() {
    let err = <(i64,)>::from_values(vec![json!("seven")]).expect_err("string is not a long");
    assert!(matches!(err, HarnessError::Marshal(ref msg) if msg.contains("long")));
}

// ── Dispatch table ──────────────────────────────────────────────────────────

#[tokio::test]
async fn overloads_resolve_by_parameter_types() {
    let table = table();
    let service: Service = Arc::new(Calculator { offset: 1 });

    let longs = table
        .resolve("demo.Calculator", "add", &["long".into(), "long".into()])
        .expect("long overload");
    let strings = table
        .resolve("demo.Calculator", "add", &["string".into(), "string".into()])
        .expect("string overload");

    let sum = longs(Arc::clone(&service), vec![json!(2), json!(3)])
        .await
        .expect("add longs");
    let joined = strings(service, vec![json!("a"), json!("b")])
        .await
        .expect("add strings");

    assert_eq!(sum, json!(6));
    assert_eq!(joined, json!("ab"));
}

#[test]
fn unknown_signature_does_not_resolve() {
    let table = table();
    assert!(table.resolve("demo.Calculator", "add", &["long".into()]).is_none());
    assert!(table.resolve("demo.Calculator", "sub", &[]).is_none());
    assert_eq!(
        table.signatures("demo.Calculator"),
        vec!["add(long, long)", "add(string, string)"]
    );
}

#[tokio::test]
async fn bad_arguments_become_argument_mismatch() {
    let table = table();
    let handler = table
        .resolve("demo.Calculator", "add", &["long".into(), "long".into()])
        .expect("long overload");

    let service: Service = Arc::new(Calculator { offset: 0 });
    let fault = handler(service, vec![json!("x"), json!(1)])
        .await
        .expect_err("string argument for a long parameter");

    assert_eq!(fault.kind, FaultKind::ArgumentMismatch);
}

// ── Service registry ────────────────────────────────────────────────────────

#[tokio::test]
async fn zero_timeout_does_not_wait() {
    let registry = ServiceRegistry::new();
    let started = std::time::Instant::now();

    assert!(registry.wait_for("demo.Missing", Duration::ZERO).await.is_none());
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[tokio::test]
async fn wait_for_sees_late_registration() {
    let registry = Arc::new(ServiceRegistry::new());

    let late = Arc::clone(&registry);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        late.register("demo.Calculator", Arc::new(Calculator { offset: 0 }));
    });

    let service = registry
        .wait_for("demo.Calculator", Duration::from_secs(5))
        .await
        .expect("service registered while waiting");
    assert!(service.downcast::<Calculator>().is_ok());
}

#[tokio::test]
async fn wait_for_gives_up_after_timeout() {
    let registry = ServiceRegistry::new();
    let started = std::time::Instant::now();

    assert!(registry
        .wait_for("demo.Missing", Duration::from_millis(100))
        .await
        .is_none());
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[test]
fn unregister_removes_binding() {
    let registry = ServiceRegistry::new();
    registry.register("demo.Calculator", Arc::new(Calculator { offset: 0 }));

    assert_eq!(registry.names(), vec!["demo.Calculator"]);
    assert!(registry.unregister("demo.Calculator"));
    assert!(registry.get("demo.Calculator").is_none());
    assert!(!registry.unregister("demo.Calculator"));
}
