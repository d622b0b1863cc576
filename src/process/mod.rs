//! Child-process lifecycle management.
//!
//! - `launcher`: the [`Launcher`](launcher::Launcher) seam and the
//!   OS-process implementation [`ProcessLauncher`](launcher::ProcessLauncher).
//! - `output`: forwarding of child stdout/stderr to an observable sink.

pub mod launcher;
pub mod output;

pub use launcher::{LauncherConfig, Launcher, LifecycleState, ProcessHandle, ProcessLauncher};
pub use output::{OutputLine, OutputStream};
