//! Built-in `exam.SelfTest` entry points.
//!
//! Payloads can target these without shipping code of their own, which is
//! how a freshly launched container is smoke-tested end to end.

use std::fmt::{Display, Formatter};

use serde_json::{json, Value};

use crate::container::suite::{ProbeContext, SuiteRegistry};
use crate::wire::message::RemoteFault;

/// Entry host of the built-in suite.
pub const SELF_TEST_HOST: &str = "exam.SelfTest";

/// Failure raised by the `fail` entry point.
#[derive(Debug)]
pub struct SelfTestFailure {
    source: std::io::Error,
}

impl Display for SelfTestFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("self test failed on request")
    }
}

impl std::error::Error for SelfTestFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Register the `exam.SelfTest` entry points:
///
/// | Method     | Result                                   |
/// |------------|------------------------------------------|
/// | `ping`     | `"ok"`                                   |
/// | `describe` | the [`ProbeContext`] of the payload      |
/// | `fail`     | a target fault with a one-element cause  |
pub fn register(suites: &SuiteRegistry) {
    suites.register(SELF_TEST_HOST, "ping", |_context: ProbeContext| async {
        Ok::<_, RemoteFault>(json!("ok"))
    });

    suites.register(SELF_TEST_HOST, "describe", |context: ProbeContext| async move {
        Ok::<_, RemoteFault>(context)
    });

    suites.register(SELF_TEST_HOST, "fail", |context: ProbeContext| async move {
        let failure = SelfTestFailure {
            source: std::io::Error::other(format!(
                "payload {} asked to fail",
                context.symbolic_name.as_deref().unwrap_or("<unnamed>")
            )),
        };
        Err::<Value, _>(RemoteFault::capture(&failure))
    });
}
