//! Kernelspec discovery.
//!
//! A kernelspec is a `kernels/<name>/kernel.json` file under one of the
//! Jupyter data directories. It tells us how to start the kernel process.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::paths;

/// Placeholder in `argv` replaced by the connection file path.
const CONNECTION_FILE_PLACEHOLDER: &str = "{connection_file}";

/// Placeholder in `argv` replaced by the kernelspec directory.
const RESOURCE_DIR_PLACEHOLDER: &str = "{resource_dir}";

/// Name of the kernel the interpreter on `PATH` provides without a spec file.
pub const NATIVE_KERNEL_NAME: &str = "python3";

/// A registered kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelSpec {
    /// Lower-case kernel name.
    pub name: String,
    pub display_name: String,
    pub language: String,
    /// Command line, with `{connection_file}` still unsubstituted.
    pub argv: Vec<String>,
    /// Extra environment for the kernel process.
    pub env: BTreeMap<String, String>,
    /// Directory holding `kernel.json` and its resources.
    pub resource_dir: Option<PathBuf>,
}

/// On-disk `kernel.json`.
#[derive(Debug, Deserialize)]
struct KernelJson {
    argv: Vec<String>,
    display_name: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

impl KernelSpec {
    /// Read `<dir>/kernel.json`; the kernel is named after `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let file = dir.join("kernel.json");
        let invalid = |message: String| Error::KernelSpec {
            path: file.display().to_string(),
            message,
        };

        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .ok_or_else(|| invalid("kernelspec directory has no name".to_string()))?;
        let content = fs::read_to_string(&file).map_err(|e| invalid(e.to_string()))?;
        let raw: KernelJson = serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;
        if raw.argv.is_empty() {
            return Err(invalid("argv is empty".to_string()));
        }

        Ok(Self {
            name,
            display_name: raw.display_name,
            language: raw.language,
            argv: raw.argv,
            env: raw.env,
            resource_dir: Some(dir.to_path_buf()),
        })
    }

    /// The `python3` kernel served by the interpreter on `PATH`, if any.
    pub fn native_python() -> Option<Self> {
        let python = which::which("python3").ok()?;
        Some(Self {
            name: NATIVE_KERNEL_NAME.to_string(),
            display_name: "Python 3 (ipykernel)".to_string(),
            language: "python".to_string(),
            argv: vec![
                python.display().to_string(),
                "-m".to_string(),
                "ipykernel_launcher".to_string(),
                "-f".to_string(),
                CONNECTION_FILE_PLACEHOLDER.to_string(),
            ],
            env: BTreeMap::new(),
            resource_dir: None,
        })
    }

    /// Command line to start the kernel with the given connection file.
    pub fn launch_argv(&self, connection_file: &Path) -> Vec<String> {
        let connection_file = connection_file.display().to_string();
        let resource_dir = self
            .resource_dir
            .as_ref()
            .map(|dir| dir.display().to_string())
            .unwrap_or_default();
        self.argv
            .iter()
            .map(|arg| {
                arg.replace(CONNECTION_FILE_PLACEHOLDER, &connection_file)
                    .replace(RESOURCE_DIR_PLACEHOLDER, &resource_dir)
            })
            .collect()
    }
}

/// Source of kernelspecs.
pub trait KernelRegistry: Send + Sync {
    /// All registered kernels, sorted by name.
    fn enumerate(&self) -> Result<Vec<KernelSpec>>;

    /// Look up a kernel by name, ignoring case.
    fn resolve(&self, name: &str) -> Result<KernelSpec> {
        let wanted = name.to_lowercase();
        self.enumerate()?
            .into_iter()
            .find(|spec| spec.name == wanted)
            .ok_or_else(|| Error::KernelNotFound(name.to_string()))
    }
}

/// Kernelspecs found on the filesystem.
#[derive(Debug, Clone)]
pub struct FsKernelRegistry {
    search_dirs: Vec<PathBuf>,
    native_python: bool,
}

impl FsKernelRegistry {
    /// Registry over the standard Jupyter data directories, including the
    /// native `python3` kernel.
    pub fn from_env() -> Self {
        Self {
            search_dirs: paths::jupyter_data_dirs(),
            native_python: true,
        }
    }

    /// Registry over exactly these data directories.
    pub fn with_dirs(search_dirs: Vec<PathBuf>) -> Self {
        Self {
            search_dirs,
            native_python: false,
        }
    }

    /// Data directories searched, in precedence order.
    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }
}

impl KernelRegistry for FsKernelRegistry {
    fn enumerate(&self) -> Result<Vec<KernelSpec>> {
        let mut found: BTreeMap<String, KernelSpec> = BTreeMap::new();

        for data_dir in &self.search_dirs {
            let kernels_dir = data_dir.join("kernels");
            let entries = match fs::read_dir(&kernels_dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };

            for entry in entries {
                let path = match entry {
                    Ok(entry) => entry.path(),
                    Err(e) => {
                        tracing::warn!(
                            "Skipping unreadable entry in {}: {}",
                            kernels_dir.display(),
                            e
                        );
                        continue;
                    }
                };
                if !path.join("kernel.json").is_file() {
                    continue;
                }
                match KernelSpec::from_dir(&path) {
                    Ok(spec) => {
                        if found.contains_key(&spec.name) {
                            tracing::debug!(
                                "Kernel '{}' at {} is shadowed by an earlier definition",
                                spec.name,
                                path.display()
                            );
                        } else {
                            found.insert(spec.name.clone(), spec);
                        }
                    }
                    Err(e) => tracing::warn!("Skipping kernelspec: {}", e),
                }
            }
        }

        if self.native_python && !found.contains_key(NATIVE_KERNEL_NAME) {
            if let Some(spec) = KernelSpec::native_python() {
                found.insert(spec.name.clone(), spec);
            }
        }

        Ok(found.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_spec(data_dir: &Path, name: &str, display_name: &str) {
        let dir = data_dir.join("kernels").join(name);
        fs::create_dir_all(&dir).unwrap();
        let json = serde_json::json!({
            "argv": ["python", "-m", "ipykernel_launcher", "-f", "{connection_file}"],
            "display_name": display_name,
            "language": "python",
        });
        fs::write(dir.join("kernel.json"), json.to_string()).unwrap();
    }

    #[test]
    fn test_launch_argv_substitutes_placeholders() {
        let spec = KernelSpec {
            name: "k".to_string(),
            display_name: "K".to_string(),
            language: "python".to_string(),
            argv: vec![
                "run".to_string(),
                "--res={resource_dir}".to_string(),
                "-f".to_string(),
                "{connection_file}".to_string(),
            ],
            env: BTreeMap::new(),
            resource_dir: Some(PathBuf::from("/specs/k")),
        };
        assert_eq!(
            spec.launch_argv(Path::new("/run/kernel-1.json")),
            vec!["run", "--res=/specs/k", "-f", "/run/kernel-1.json"]
        );
    }

    #[test]
    fn test_enumerate_sorted_by_name() {
        let temp = TempDir::new().unwrap();
        write_spec(temp.path(), "zeta", "Zeta");
        write_spec(temp.path(), "alpha", "Alpha");

        let registry = FsKernelRegistry::with_dirs(vec![temp.path().to_path_buf()]);
        let names: Vec<_> = registry.enumerate().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_first_directory_wins() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        write_spec(first.path(), "py", "First");
        write_spec(second.path(), "py", "Second");

        let registry = FsKernelRegistry::with_dirs(vec![
            first.path().to_path_buf(),
            second.path().to_path_buf(),
        ]);
        assert_eq!(registry.resolve("py").unwrap().display_name, "First");
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let temp = TempDir::new().unwrap();
        write_spec(temp.path(), "Python3", "Python 3");

        let registry = FsKernelRegistry::with_dirs(vec![temp.path().to_path_buf()]);
        let spec = registry.resolve("PYTHON3").unwrap();
        assert_eq!(spec.name, "python3");
        assert_eq!(spec.resource_dir.as_deref(), Some(temp.path().join("kernels").join("Python3").as_path()));
    }

    #[test]
    fn test_resolve_unknown_kernel() {
        let temp = TempDir::new().unwrap();
        let registry = FsKernelRegistry::with_dirs(vec![temp.path().to_path_buf()]);
        let err = registry.resolve("nonexistent-kernel").unwrap_err();
        assert!(matches!(err, Error::KernelNotFound(name) if name == "nonexistent-kernel"));
    }

    #[test]
    fn test_malformed_spec_is_skipped() {
        let temp = TempDir::new().unwrap();
        write_spec(temp.path(), "good", "Good");
        let bad = temp.path().join("kernels").join("bad");
        fs::create_dir_all(&bad).unwrap();
        fs::write(bad.join("kernel.json"), "{ not json").unwrap();
        let empty = temp.path().join("kernels").join("empty-argv");
        fs::create_dir_all(&empty).unwrap();
        fs::write(empty.join("kernel.json"), r#"{"argv": [], "display_name": "E"}"#).unwrap();

        let registry = FsKernelRegistry::with_dirs(vec![temp.path().to_path_buf()]);
        let names: Vec<_> = registry.enumerate().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["good"]);
    }

    #[test]
    fn test_stray_entries_do_not_fail_enumeration() {
        let temp = TempDir::new().unwrap();
        write_spec(temp.path(), "good", "Good");
        let kernels = temp.path().join("kernels");
        fs::write(kernels.join("README"), "not a kernel").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(temp.path().join("gone"), kernels.join("dangling")).unwrap();

        let registry = FsKernelRegistry::with_dirs(vec![temp.path().to_path_buf()]);
        let names: Vec<_> = registry.enumerate().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["good"]);
    }

    #[test]
    fn test_missing_directories_are_ignored() {
        let registry = FsKernelRegistry::with_dirs(vec![PathBuf::from("/nonexistent/nbgate/share")]);
        assert!(registry.enumerate().unwrap().is_empty());
    }

    #[test]
    fn test_env_is_read() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("kernels").join("envy");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("kernel.json"),
            r#"{"argv": ["k", "{connection_file}"], "display_name": "Envy", "env": {"MODE": "ci"}}"#,
        )
        .unwrap();

        let spec = KernelSpec::from_dir(&dir).unwrap();
        assert_eq!(spec.env.get("MODE").map(String::as_str), Some("ci"));
        assert_eq!(spec.language, "");
    }
}
