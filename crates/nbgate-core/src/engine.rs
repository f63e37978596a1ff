//! Notebook execution engine.
//!
//! Runs every code cell of one notebook, in order, against one kernel and
//! turns whatever happens into an [`ExecutionVerdict`].

use std::path::Path;

use chrono::Utc;
use nbgate_format::{CellRunMetadata, Notebook, Output, RunMetadata};

use crate::config::RunConfiguration;
use crate::error::{Error, Result};
use crate::kernel::{JupyterLauncher, Kernel, KernelLauncher};
use crate::kernelspec::{FsKernelRegistry, KernelRegistry, KernelSpec};
use crate::reporter::RunReporter;
use crate::verdict::{CellFailure, ExecutionVerdict, RunState};

/// Executes notebooks.
pub struct NotebookEngine {
    registry: Box<dyn KernelRegistry>,
    launcher: Box<dyn KernelLauncher>,
}

impl NotebookEngine {
    /// Create an engine resolving kernels from `registry` and starting them
    /// with `launcher`.
    pub fn new(
        registry: impl KernelRegistry + 'static,
        launcher: impl KernelLauncher + 'static,
    ) -> Self {
        Self {
            registry: Box::new(registry),
            launcher: Box::new(launcher),
        }
    }

    /// Engine over the installed Jupyter kernels.
    pub fn jupyter() -> Self {
        Self::new(FsKernelRegistry::from_env(), JupyterLauncher)
    }

    /// The registry kernels are resolved from.
    pub fn registry(&self) -> &dyn KernelRegistry {
        self.registry.as_ref()
    }

    /// Run the notebook described by `config`.
    ///
    /// Never fails: every problem ends up in the returned verdict, which is
    /// also handed to `reporter` exactly once.
    pub async fn execute(
        &self,
        config: &RunConfiguration,
        reporter: &dyn RunReporter,
    ) -> ExecutionVerdict {
        let notebook_path = config.notebook_path();
        reporter.on_run_started(notebook_path, config.kernel_name(), config.context());

        let mut tracker = StateTracker {
            state: RunState::NotReady,
            reporter,
        };
        let verdict = self.run(config, &mut tracker).await;

        if let Err(e) = tracker.advance(verdict.state()) {
            tracing::warn!("{}", e);
        }
        reporter.on_verdict(notebook_path, &verdict);
        verdict
    }

    async fn run(&self, config: &RunConfiguration, tracker: &mut StateTracker<'_>) -> ExecutionVerdict {
        let reporter = tracker.reporter;

        let input = match Notebook::read_from_file(config.notebook_path()) {
            Ok(notebook) => notebook,
            Err(e) => return ExecutionVerdict::EnvironmentFailure(e.into()),
        };
        let spec = match self.select_kernel(config, &input) {
            Ok(spec) => spec,
            Err(e) => return ExecutionVerdict::EnvironmentFailure(e),
        };
        if let Err(e) = tracker.advance(RunState::KernelBound) {
            return ExecutionVerdict::EnvironmentFailure(e);
        }
        tracing::debug!(
            "Resolved kernel '{}' for {} ({} code cells)",
            spec.name,
            config.notebook_path().display(),
            input.code_cell_count()
        );

        let output_path = config.output_path();
        let mut output = input.fresh_copy();
        output.metadata.run = Some(RunMetadata {
            kernel_name: Some(spec.name.clone()),
            input_path: Some(config.notebook_path().display().to_string()),
            output_path: Some(output_path.display().to_string()),
            context: config.context().map(str::to_string),
            start_time: Some(Utc::now()),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
            ..Default::default()
        });
        if let Err(e) = write_artifact(&output, &output_path, reporter) {
            return ExecutionVerdict::EnvironmentFailure(e);
        }

        let mut kernel = match self.launcher.launch(&spec, &config.launch_options()).await {
            Ok(kernel) => kernel,
            Err(e) => {
                finish_run(&mut output, None, true);
                if let Err(write_err) = write_artifact(&output, &output_path, reporter) {
                    tracing::warn!("{}", write_err);
                }
                return ExecutionVerdict::EnvironmentFailure(e);
            }
        };

        let verdict = match tracker.advance(RunState::Running) {
            Ok(()) => run_cells(&mut output, kernel.as_mut(), reporter)
                .await
                .unwrap_or(ExecutionVerdict::Success),
            Err(e) => ExecutionVerdict::EnvironmentFailure(e),
        };

        if let Err(e) = kernel.shutdown().await {
            tracing::warn!("Failed to shut down kernel '{}': {}", kernel.name(), e);
        }

        let failed_cell = output
            .cells
            .iter()
            .position(|cell| {
                cell.as_code()
                    .and_then(|code| code.run_metadata())
                    .is_some_and(|meta| meta.exception)
            });
        finish_run(&mut output, failed_cell, !verdict.is_success());
        match write_artifact(&output, &output_path, reporter) {
            Ok(()) => verdict,
            Err(e) => ExecutionVerdict::EnvironmentFailure(e),
        }
    }

    /// Pick the kernel: the configured override, else the notebook's own.
    fn select_kernel(&self, config: &RunConfiguration, notebook: &Notebook) -> Result<KernelSpec> {
        let name = config
            .kernel_name()
            .or_else(|| notebook.kernel_name())
            .ok_or(Error::NoKernelName)?;
        self.registry.resolve(name)
    }
}

/// Tracks the run state and reports every change.
struct StateTracker<'a> {
    state: RunState,
    reporter: &'a dyn RunReporter,
}

impl StateTracker<'_> {
    fn advance(&mut self, next: RunState) -> Result<()> {
        let previous = self.state;
        self.state = previous.transition(next)?;
        self.reporter.on_state_changed(previous, next);
        Ok(())
    }
}

/// Execute the code cells in order, stopping at the first that fails.
///
/// Returns the verdict caused by the stopping cell, or `None` when every
/// cell completed.
async fn run_cells(
    notebook: &mut Notebook,
    kernel: &mut dyn Kernel,
    reporter: &dyn RunReporter,
) -> Option<ExecutionVerdict> {
    for (index, cell) in notebook.cells.iter_mut().enumerate() {
        let Some(cell) = cell.as_code_mut() else {
            continue;
        };

        let mut meta = CellRunMetadata::pending();
        let started = Utc::now();
        meta.start(started);

        if cell.source.is_blank() {
            meta.finish(started, false);
            cell.set_run_metadata(&meta);
            continue;
        }

        let source = cell.source.as_str().to_string();
        cell.set_run_metadata(&meta);
        reporter.on_cell_started(index, &source);

        let execution = match kernel.execute(&source).await {
            Ok(execution) => execution,
            Err(e) => {
                meta.finish(Utc::now(), true);
                cell.set_run_metadata(&meta);
                reporter.on_cell_failed(index, &cell.outputs);
                return Some(ExecutionVerdict::EnvironmentFailure(e));
            }
        };

        let raised = execution.raised_error();
        cell.outputs = execution.outputs;
        cell.execution_count = execution.execution_count;
        meta.finish(Utc::now(), raised.is_some());
        cell.set_run_metadata(&meta);

        let Some(raised) = raised else {
            reporter.on_cell_completed(index, &cell.outputs);
            continue;
        };

        // The reply may carry the error without a matching iopub message.
        if cell.error_output().is_none() {
            cell.outputs.push(Output::error(
                raised.ename.clone(),
                raised.evalue.clone(),
                raised.traceback.clone(),
            ));
        }
        reporter.on_cell_failed(index, &cell.outputs);
        let failure = CellFailure {
            cell_index: index,
            execution_count: cell.execution_count,
            ename: raised.ename,
            evalue: raised.evalue,
            traceback: raised.traceback,
        };
        return Some(ExecutionVerdict::TestFailure(failure));
    }
    None
}

fn finish_run(notebook: &mut Notebook, failed_cell: Option<usize>, exception: bool) {
    if let Some(run) = notebook.metadata.run.as_mut() {
        run.finish(Utc::now(), failed_cell, exception);
    }
}

fn write_artifact(notebook: &Notebook, path: &Path, reporter: &dyn RunReporter) -> Result<()> {
    notebook.write_to_file(path)?;
    reporter.on_artifact_written(path);
    Ok(())
}
