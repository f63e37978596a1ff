//! Run progress reporting.
//!
//! The prober and the engine announce everything they do through a
//! [`RunReporter`]. The binary builds one [`LogReporter`] and hands it to
//! both; tests can record events instead.

use std::path::Path;

use nbgate_format::Output;

use crate::error::Error;
use crate::kernelspec::KernelSpec;
use crate::verdict::{ExecutionVerdict, RunState};

const BANNER: &str = "---------------------------------------------------------------";

/// Receives run events.
pub trait RunReporter: Send + Sync {
    /// Called with the result of kernel enumeration.
    fn on_kernels_listed(&self, kernels: &[KernelSpec]);

    /// Called when kernel enumeration failed.
    fn on_kernel_listing_failed(&self, error: &Error);

    /// Called once before anything else happens to the notebook.
    fn on_run_started(&self, notebook: &Path, kernel: Option<&str>, context: Option<&str>);

    /// Called on each run-state change.
    fn on_state_changed(&self, _from: RunState, _to: RunState) {}

    /// Called when a code cell is submitted.
    fn on_cell_started(&self, index: usize, source: &str);

    /// Called when a code cell finished without raising.
    fn on_cell_completed(&self, index: usize, outputs: &[Output]);

    /// Called when a code cell raised.
    fn on_cell_failed(&self, index: usize, outputs: &[Output]);

    /// Called each time the output notebook is written.
    fn on_artifact_written(&self, _path: &Path) {}

    /// Called exactly once with the final verdict.
    fn on_verdict(&self, notebook: &Path, verdict: &ExecutionVerdict);
}

/// Reports through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct LogReporter {
    /// Log every cell's outputs as they arrive.
    log_output: bool,
}

impl LogReporter {
    pub fn new(log_output: bool) -> Self {
        Self { log_output }
    }

    fn log_outputs(&self, index: usize, outputs: &[Output]) {
        if !self.log_output {
            return;
        }
        for output in outputs {
            let text = strip_ansi(&output.plain_text());
            for line in text.lines() {
                tracing::info!("[cell {}] {}", index, line);
            }
        }
    }
}

impl RunReporter for LogReporter {
    fn on_kernels_listed(&self, kernels: &[KernelSpec]) {
        let names: Vec<&str> = kernels.iter().map(|k| k.name.as_str()).collect();
        tracing::info!("Available kernels: {:?}", names);
        for kernel in kernels {
            tracing::debug!(
                "  {} ({}) argv={:?}",
                kernel.name,
                kernel.display_name,
                kernel.argv
            );
        }
    }

    fn on_kernel_listing_failed(&self, error: &Error) {
        tracing::warn!("Could not list kernels: {}", error);
    }

    fn on_run_started(&self, notebook: &Path, kernel: Option<&str>, context: Option<&str>) {
        tracing::info!("{}", BANNER);
        tracing::info!("Start E2E test for the notebook: {}", notebook.display());
        if let Some(kernel) = kernel {
            tracing::info!("Kernel: {}", kernel);
        }
        if let Some(context) = context {
            tracing::info!("Context: {}", context);
        }
    }

    fn on_state_changed(&self, from: RunState, to: RunState) {
        tracing::debug!("Run state: {} -> {}", from, to);
    }

    fn on_cell_started(&self, index: usize, source: &str) {
        tracing::debug!("Executing cell {} ({} lines)", index, source.lines().count());
    }

    fn on_cell_completed(&self, index: usize, outputs: &[Output]) {
        self.log_outputs(index, outputs);
        tracing::debug!("Cell {} completed", index);
    }

    fn on_cell_failed(&self, index: usize, outputs: &[Output]) {
        self.log_outputs(index, outputs);
        tracing::debug!("Cell {} raised", index);
    }

    fn on_artifact_written(&self, path: &Path) {
        tracing::info!("Output notebook: {}", path.display());
    }

    fn on_verdict(&self, notebook: &Path, verdict: &ExecutionVerdict) {
        match verdict {
            ExecutionVerdict::Success => {
                tracing::info!("E2E test passed.");
            }
            ExecutionVerdict::TestFailure(failure) => {
                for line in &failure.traceback {
                    tracing::error!("{}", strip_ansi(line));
                }
                tracing::error!(
                    "E2E test failed: {} in {}",
                    failure,
                    notebook.display()
                );
            }
            ExecutionVerdict::EnvironmentFailure(error) => {
                tracing::error!(
                    "E2E test failed due to an environment error ({}): {}",
                    error.kind(),
                    error
                );
            }
        }
        tracing::info!("{}", BANNER);
    }
}

/// Remove terminal color escapes (`ESC [ ... letter`) from kernel tracebacks.
pub fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' && chars.peek() == Some(&'[') {
            chars.next();
            for c in chars.by_ref() {
                if c.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}
