//! Process handles, launching, and the handle registry.

mod handle;
mod launcher;
mod registry;
mod sink;

pub use handle::{stop_handle, wait_for_exit, ChildHandle, ProcessHandle, StopOutcome};
pub use launcher::{LaunchSpec, OsLauncher, ProcessLauncher};
pub use registry::ProcessRegistry;
pub use sink::DiagnosticSink;
