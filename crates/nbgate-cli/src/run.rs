//! Run command implementation for nbgate CLI.
//!
//! Stages files, lists the available kernels, executes the notebook and
//! maps the verdict to the process exit status.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use nbgate_core::{
    FsKernelRegistry, JupyterLauncher, LogReporter, NotebookEngine, RunConfiguration, StageStep,
    list_kernels, staging,
};

/// Arguments of `nbgate run`.
pub struct RunArgs {
    pub notebook: PathBuf,
    pub kernel: Option<String>,
    pub namespace: Option<String>,
    pub cwd: Option<PathBuf>,
    pub start_timeout: u64,
    pub execution_timeout: Option<u64>,
    pub stage: Vec<String>,
    pub rewrite_import: Vec<String>,
    pub verbose: bool,
}

/// Execute a notebook.
pub async fn execute(args: RunArgs) -> anyhow::Result<ExitCode> {
    tracing::debug!(
        "arguments: notebook={}, kernel={:?}, namespace={:?}, verbose={}",
        args.notebook.display(),
        args.kernel,
        args.namespace,
        args.verbose
    );

    let steps = staging_steps(&args)?;
    staging::apply_all(&steps).context("staging failed")?;

    let config = build_config(&args);
    let reporter = LogReporter::new(args.verbose);
    let registry = FsKernelRegistry::from_env();
    for dir in registry.search_dirs() {
        tracing::debug!("kernelspec search path: {}", dir.display());
    }

    list_kernels(&registry, &reporter);

    let engine = NotebookEngine::new(registry, JupyterLauncher);
    let verdict = engine.execute(&config, &reporter).await;
    Ok(ExitCode::from(verdict.exit_code()))
}

fn staging_steps(args: &RunArgs) -> anyhow::Result<Vec<StageStep>> {
    let copies = args.stage.iter().map(|arg| StageStep::parse_copy(arg));
    let rewrites = args.rewrite_import.iter().map(|arg| StageStep::parse_rewrite(arg));
    copies
        .chain(rewrites)
        .collect::<Result<Vec<_>, _>>()
        .context("invalid staging argument")
}

fn build_config(args: &RunArgs) -> RunConfiguration {
    let mut config = RunConfiguration::new(&args.notebook)
        .with_verbose(args.verbose)
        .with_start_timeout(Duration::from_secs(args.start_timeout));
    if let Some(kernel) = &args.kernel {
        config = config.with_kernel_name(kernel);
    }
    if let Some(namespace) = &args.namespace {
        config = config.with_context(namespace);
    }
    if let Some(cwd) = &args.cwd {
        config = config.with_working_dir(cwd);
    }
    if let Some(secs) = args.execution_timeout {
        config = config.with_execution_timeout(Duration::from_secs(secs));
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> RunArgs {
        RunArgs {
            notebook: PathBuf::from("nb/tune.ipynb"),
            kernel: None,
            namespace: None,
            cwd: None,
            start_timeout: 60,
            execution_timeout: None,
            stage: vec![],
            rewrite_import: vec![],
            verbose: false,
        }
    }

    #[test]
    fn test_build_config() {
        let mut args = args();
        args.kernel = Some("python3".to_string());
        args.namespace = Some("kubeflow-user".to_string());
        args.execution_timeout = Some(5);

        let config = build_config(&args);
        assert_eq!(config.kernel_name(), Some("python3"));
        assert_eq!(config.context(), Some("kubeflow-user"));
        assert_eq!(config.output_path(), PathBuf::from("nb/tune_output.ipynb"));
        assert_eq!(
            config.launch_options().execution_timeout,
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_staging_steps_keep_order() {
        let mut args = args();
        args.stage = vec!["a.py=b.py".to_string()];
        args.rewrite_import = vec!["b.py=import a=>from . import a".to_string()];

        let steps = staging_steps(&args).unwrap();
        assert_eq!(steps.len(), 2);
        assert!(matches!(steps[0], StageStep::CopyIfMissing { .. }));
        assert!(matches!(steps[1], StageStep::RewriteImport { .. }));
    }

    #[test]
    fn test_bad_staging_argument() {
        let mut args = args();
        args.stage = vec!["missing-separator".to_string()];
        assert!(staging_steps(&args).is_err());
    }
}
