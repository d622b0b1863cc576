#![forbid(unsafe_code)]

//! Distributed test-execution harness.
//!
//! A controller launches a child process hosting a module container,
//! streams a payload archive into it over an invocation channel, runs the
//! payload's entry point remotely and collects the result.

pub mod capabilities;
pub mod config;
pub mod container;
pub mod context;
pub mod controller;
pub mod errors;
pub mod models;
pub mod options;
pub mod payload;
pub mod process;
pub mod remote;
pub mod wire;

pub use config::HarnessConfig;
pub use errors::{HarnessError, Result};
