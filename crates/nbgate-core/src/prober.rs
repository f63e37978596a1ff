//! Kernel availability prober.

use crate::kernelspec::KernelRegistry;
use crate::reporter::RunReporter;

/// Names of the registered kernels, sorted.
///
/// Diagnostic only: a failing enumeration is reported and yields an empty
/// list, it never stops a run.
pub fn list_kernels(registry: &dyn KernelRegistry, reporter: &dyn RunReporter) -> Vec<String> {
    match registry.enumerate() {
        Ok(kernels) => {
            reporter.on_kernels_listed(&kernels);
            kernels.into_iter().map(|k| k.name).collect()
        }
        Err(e) => {
            reporter.on_kernel_listing_failed(&e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;

    use nbgate_format::Output;

    use super::*;
    use crate::error::{Error, Result};
    use crate::kernelspec::KernelSpec;
    use crate::verdict::ExecutionVerdict;

    struct FixedRegistry(Option<Vec<&'static str>>);

    impl KernelRegistry for FixedRegistry {
        fn enumerate(&self) -> Result<Vec<KernelSpec>> {
            let names = self
                .0
                .clone()
                .ok_or_else(|| Error::Io(std::io::Error::other("permission denied")))?;
            Ok(names
                .into_iter()
                .map(|name| KernelSpec {
                    name: name.to_string(),
                    display_name: name.to_string(),
                    language: "python".to_string(),
                    argv: vec!["k".to_string()],
                    env: Default::default(),
                    resource_dir: None,
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl RunReporter for Recorder {
        fn on_kernels_listed(&self, kernels: &[KernelSpec]) {
            self.events.lock().unwrap().push(format!("listed {}", kernels.len()));
        }
        fn on_kernel_listing_failed(&self, _error: &Error) {
            self.events.lock().unwrap().push("failed".to_string());
        }
        fn on_run_started(&self, _: &Path, _: Option<&str>, _: Option<&str>) {}
        fn on_cell_started(&self, _: usize, _: &str) {}
        fn on_cell_completed(&self, _: usize, _: &[Output]) {}
        fn on_cell_failed(&self, _: usize, _: &[Output]) {}
        fn on_verdict(&self, _: &Path, _: &ExecutionVerdict) {}
    }

    #[test]
    fn test_lists_names_and_reports() {
        let recorder = Recorder::default();
        let names = list_kernels(&FixedRegistry(Some(vec!["ir", "python3"])), &recorder);
        assert_eq!(names, vec!["ir", "python3"]);
        assert_eq!(*recorder.events.lock().unwrap(), vec!["listed 2"]);
    }

    #[test]
    fn test_enumeration_error_yields_empty_list() {
        let recorder = Recorder::default();
        let names = list_kernels(&FixedRegistry(None), &recorder);
        assert!(names.is_empty());
        assert_eq!(*recorder.events.lock().unwrap(), vec!["failed"]);
    }
}
