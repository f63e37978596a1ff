//! nbgate CLI - run a Jupyter notebook as an end-to-end test.

mod kernels;
mod run;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

/// Exit status for failures outside the notebook itself.
const ENVIRONMENT_FAILURE: u8 = 2;

#[derive(Parser)]
#[command(name = "nbgate")]
#[command(about = "Run a Jupyter notebook as an end-to-end test")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging and echo cell outputs
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute every cell of a notebook and report pass/fail
    Run {
        /// Path to the notebook (.ipynb)
        #[arg(required_unless_present = "experiment_path")]
        notebook: Option<PathBuf>,

        /// Path to the notebook (alias for the positional argument)
        #[arg(long, conflicts_with = "notebook")]
        experiment_path: Option<PathBuf>,

        /// Kernel to use instead of the one named in the notebook
        #[arg(short, long)]
        kernel: Option<String>,

        /// Label recorded with the run, e.g. the cluster namespace under test
        #[arg(long)]
        namespace: Option<String>,

        /// Working directory for the kernel
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Seconds to wait for the kernel to start
        #[arg(long, default_value = "60")]
        start_timeout: u64,

        /// Seconds a single cell may run (default: no limit)
        #[arg(long)]
        execution_timeout: Option<u64>,

        /// Copy SRC to DST before the run unless DST exists (SRC=DST)
        #[arg(long = "stage", value_name = "SRC=DST")]
        stage: Vec<String>,

        /// Replace an import line before the run (FILE=FROM=>TO)
        #[arg(long = "rewrite-import", value_name = "FILE=FROM=>TO")]
        rewrite_import: Vec<String>,
    },

    /// List the registered Jupyter kernels
    Kernels,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stdout)
        .init();

    let result = match cli.command {
        Commands::Run {
            notebook,
            experiment_path,
            kernel,
            namespace,
            cwd,
            start_timeout,
            execution_timeout,
            stage,
            rewrite_import,
        } => {
            let args = run::RunArgs {
                notebook: notebook.or(experiment_path).unwrap_or_default(),
                kernel,
                namespace,
                cwd,
                start_timeout,
                execution_timeout,
                stage,
                rewrite_import,
                verbose: cli.verbose,
            };
            run::execute(args).await
        }

        Commands::Kernels => kernels::execute(),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from(ENVIRONMENT_FAILURE)
        }
    }
}
