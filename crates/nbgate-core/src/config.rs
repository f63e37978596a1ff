//! Run configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::kernel::{DEFAULT_START_TIMEOUT, LaunchOptions};
use crate::paths::output_path_for;

/// Everything one run needs to know. Built once, never changed.
#[derive(Debug, Clone)]
pub struct RunConfiguration {
    notebook_path: PathBuf,
    kernel_name: Option<String>,
    context: Option<String>,
    verbose: bool,
    start_timeout: Duration,
    execution_timeout: Option<Duration>,
    working_dir: Option<PathBuf>,
}

impl RunConfiguration {
    pub fn new(notebook_path: impl Into<PathBuf>) -> Self {
        Self {
            notebook_path: notebook_path.into(),
            kernel_name: None,
            context: None,
            verbose: false,
            start_timeout: DEFAULT_START_TIMEOUT,
            execution_timeout: None,
            working_dir: None,
        }
    }

    /// Use this kernel instead of the one named in the notebook.
    pub fn with_kernel_name(mut self, name: impl Into<String>) -> Self {
        self.kernel_name = Some(name.into());
        self
    }

    /// Free-form label recorded with the run (e.g. a cluster namespace).
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn notebook_path(&self) -> &Path {
        &self.notebook_path
    }

    pub fn kernel_name(&self) -> Option<&str> {
        self.kernel_name.as_deref()
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Where the executed notebook is written.
    pub fn output_path(&self) -> PathBuf {
        output_path_for(&self.notebook_path)
    }

    /// Kernel launch settings for this run.
    pub fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            start_timeout: self.start_timeout,
            execution_timeout: self.execution_timeout,
            working_dir: self.working_dir.clone(),
            forward_kernel_output: self.verbose,
        }
    }
}
