//! Kernel abstraction and the Jupyter implementation.
//!
//! The engine talks to a kernel only through [`Kernel`] and starts one only
//! through [`KernelLauncher`], so runs can be driven by a real Jupyter kernel
//! or by an in-process stand-in.
//!
//! # Architecture
//!
//! ```text
//! NotebookEngine
//!     │
//!     └── KernelLauncher::launch(spec)
//!             │
//!             └── JupyterKernel (child process)
//!                     │
//!                     ├── shell   (DEALER): execute_request → execute_reply
//!                     ├── iopub   (SUB):    stream / display_data / error / status
//!                     └── control (DEALER): shutdown_request
//! ```

mod connection;
mod jupyter;
pub mod protocol;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use nbgate_format::Output;

use crate::error::Result;
use crate::kernelspec::KernelSpec;

pub use connection::ConnectionInfo;
pub use jupyter::{JupyterKernel, JupyterLauncher};
pub use protocol::ReplyStatus;

/// How long to wait for a kernel to become ready.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(60);

/// Options for starting a kernel.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Maximum time from spawn to the first `kernel_info_reply`.
    pub start_timeout: Duration,
    /// Maximum time a single cell may run. `None` waits forever.
    pub execution_timeout: Option<Duration>,
    /// Working directory of the kernel process.
    pub working_dir: Option<PathBuf>,
    /// Let the kernel process write to our stdout/stderr.
    pub forward_kernel_output: bool,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            start_timeout: DEFAULT_START_TIMEOUT,
            execution_timeout: None,
            working_dir: None,
            forward_kernel_output: false,
        }
    }
}

/// An error raised by cell code.
#[derive(Debug, Clone, PartialEq)]
pub struct RaisedError {
    pub ename: String,
    pub evalue: String,
    pub traceback: Vec<String>,
}

/// Result of executing one cell.
#[derive(Debug, Clone)]
pub struct CellExecution {
    pub outputs: Vec<Output>,
    pub execution_count: Option<u32>,
    pub status: ReplyStatus,
}

impl CellExecution {
    /// The error the cell raised, if it raised one.
    ///
    /// Taken from the reply when it carries one, otherwise from the first
    /// error output; some kernels only publish the error on iopub.
    pub fn raised_error(&self) -> Option<RaisedError> {
        match &self.status {
            ReplyStatus::Error {
                ename,
                evalue,
                traceback,
            } => Some(RaisedError {
                ename: ename.clone(),
                evalue: evalue.clone(),
                traceback: traceback.clone(),
            }),
            ReplyStatus::Aborted => Some(RaisedError {
                ename: "ExecutionAborted".to_string(),
                evalue: "the kernel aborted the request".to_string(),
                traceback: Vec::new(),
            }),
            ReplyStatus::Ok => self.outputs.iter().find_map(|output| match output {
                Output::Error {
                    ename,
                    evalue,
                    traceback,
                    ..
                } => Some(RaisedError {
                    ename: ename.clone(),
                    evalue: evalue.clone(),
                    traceback: traceback.clone(),
                }),
                _ => None,
            }),
        }
    }
}

/// A running kernel.
#[async_trait]
pub trait Kernel: Send {
    /// Kernelspec name this kernel was started from.
    fn name(&self) -> &str;

    /// Run `code` and wait until the kernel reports the cell finished.
    ///
    /// A raised error is a successful call whose [`CellExecution`] carries the
    /// error. `Err` means the kernel itself failed (died, timed out, spoke
    /// garbage).
    async fn execute(&mut self, code: &str) -> Result<CellExecution>;

    /// Stop the kernel process.
    async fn shutdown(&mut self) -> Result<()>;
}

/// Starts kernels from kernelspecs.
#[async_trait]
pub trait KernelLauncher: Send + Sync {
    /// Start a kernel and wait until it is ready to execute code.
    async fn launch(&self, spec: &KernelSpec, options: &LaunchOptions) -> Result<Box<dyn Kernel>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution(status: ReplyStatus, outputs: Vec<Output>) -> CellExecution {
        CellExecution {
            outputs,
            execution_count: Some(1),
            status,
        }
    }

    #[test]
    fn test_ok_without_error_output_raised_nothing() {
        let exec = execution(ReplyStatus::Ok, vec![Output::stream("stdout", "ok\n")]);
        assert!(exec.raised_error().is_none());
    }

    #[test]
    fn test_error_reply_wins() {
        let exec = execution(
            ReplyStatus::Error {
                ename: "AssertionError".to_string(),
                evalue: "boom".to_string(),
                traceback: vec![],
            },
            vec![],
        );
        assert_eq!(exec.raised_error().unwrap().evalue, "boom");
    }

    #[test]
    fn test_error_output_with_ok_reply() {
        let exec = execution(
            ReplyStatus::Ok,
            vec![Output::error("RuntimeError", "late failure", vec![])],
        );
        assert_eq!(exec.raised_error().unwrap().ename, "RuntimeError");
    }

    #[test]
    fn test_aborted_counts_as_raised() {
        let exec = execution(ReplyStatus::Aborted, vec![]);
        assert_eq!(exec.raised_error().unwrap().ename, "ExecutionAborted");
    }
}
