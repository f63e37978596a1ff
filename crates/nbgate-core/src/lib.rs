//! Notebook execution engine for nbgate.
//!
//! Runs a Jupyter notebook top to bottom against a live kernel and decides
//! whether it passed.
//!
//! # Architecture
//!
//! ```text
//! prober::list_kernels ──► NotebookEngine::execute ──► ExecutionVerdict ──► exit code
//!         │                     │            │           Success
//!         ▼                     ▼            ▼           TestFailure
//!   KernelRegistry       KernelLauncher   nbgate-format  EnvironmentFailure
//!   (kernel.json)        (JupyterKernel)  (output notebook)
//! ```
//!
//! Every stage reports through a [`RunReporter`].

pub mod config;
pub mod engine;
pub mod error;
pub mod kernel;
pub mod kernelspec;
pub mod paths;
pub mod prober;
pub mod reporter;
pub mod staging;
pub mod verdict;

pub use config::RunConfiguration;
pub use engine::NotebookEngine;
pub use error::{Error, Result};
pub use kernel::{
    CellExecution, JupyterLauncher, Kernel, KernelLauncher, LaunchOptions, RaisedError, ReplyStatus,
};
pub use kernelspec::{FsKernelRegistry, KernelRegistry, KernelSpec};
pub use paths::output_path_for;
pub use prober::list_kernels;
pub use reporter::{LogReporter, RunReporter};
pub use staging::{StageOutcome, StageStep};
pub use verdict::{CellFailure, ExecutionVerdict, RunState};
