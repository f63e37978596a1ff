//! Kernels command implementation for nbgate CLI.

use std::process::ExitCode;

use nbgate_core::{FsKernelRegistry, KernelRegistry};

/// Print the registered kernels, one per line.
pub fn execute() -> anyhow::Result<ExitCode> {
    let registry = FsKernelRegistry::from_env();
    let kernels = registry.enumerate()?;

    if kernels.is_empty() {
        tracing::warn!("No kernels found");
    }
    for kernel in &kernels {
        let location = kernel
            .resource_dir
            .as_ref()
            .map(|dir| dir.display().to_string())
            .unwrap_or_else(|| "(interpreter on PATH)".to_string());
        println!("{:<20} {:<30} {}", kernel.name, kernel.display_name, location);
    }

    Ok(ExitCode::SUCCESS)
}
