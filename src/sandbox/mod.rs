//! Subprocess sandbox: wraps generated programs and executes them with a
//! bounded wall-clock budget. See `wrap` for the pure wrapping pipeline and
//! `process` for the process-spawning adapter.

pub mod process;
pub mod wrap;

pub use process::{
    discover_site_packages, ExecResult, ProcessSandboxAdapter, SandboxAdapter, SandboxInfo, SandboxJob,
};
