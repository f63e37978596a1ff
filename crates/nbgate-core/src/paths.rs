//! Filesystem locations used by a run.
//!
//! Output notebook naming and the places Jupyter keeps kernelspecs and
//! connection files.

use std::env;
use std::path::{Path, PathBuf};

/// Suffix appended to the input file stem to name the output notebook.
pub const OUTPUT_SUFFIX: &str = "_output";

/// Derive the output notebook path from the input path.
///
/// Same directory, same extension, `_output` appended to the stem:
/// `tests/tune.ipynb` becomes `tests/tune_output.ipynb`.
pub fn output_path_for(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match input.extension() {
        Some(ext) => format!("{}{}.{}", stem, OUTPUT_SUFFIX, ext.to_string_lossy()),
        None => format!("{}{}", stem, OUTPUT_SUFFIX),
    };
    input.with_file_name(file_name)
}

/// Jupyter data directories in lookup precedence order.
///
/// Mirrors `jupyter --paths`:
/// 1. `$JUPYTER_PATH` entries
/// 2. the user data directory
/// 3. environment prefixes (`$CONDA_PREFIX`, `$VIRTUAL_ENV`, the `python3` on `PATH`)
/// 4. system-wide directories
pub fn jupyter_data_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    if let Some(paths) = env::var_os("JUPYTER_PATH") {
        dirs.extend(env::split_paths(&paths).filter(|p| !p.as_os_str().is_empty()));
    }

    if let Some(user_dir) = user_data_dir() {
        dirs.push(user_dir);
    }

    for var in ["CONDA_PREFIX", "VIRTUAL_ENV"] {
        if let Some(prefix) = env::var_os(var) {
            dirs.push(PathBuf::from(prefix).join("share").join("jupyter"));
        }
    }

    // <prefix>/bin/python3 → <prefix>/share/jupyter
    if let Ok(python) = which::which("python3") {
        if let Some(prefix) = python.parent().and_then(Path::parent) {
            dirs.push(prefix.join("share").join("jupyter"));
        }
    }

    if cfg!(windows) {
        if let Some(program_data) = env::var_os("PROGRAMDATA") {
            dirs.push(PathBuf::from(program_data).join("jupyter"));
        }
    } else {
        dirs.push(PathBuf::from("/usr/local/share/jupyter"));
        dirs.push(PathBuf::from("/usr/share/jupyter"));
    }

    dedup_preserving_order(dirs)
}

/// Per-user Jupyter data directory.
fn user_data_dir() -> Option<PathBuf> {
    if let Some(dir) = env::var_os("JUPYTER_DATA_DIR") {
        return Some(PathBuf::from(dir));
    }
    if cfg!(target_os = "macos") {
        return dirs::home_dir().map(|home| home.join("Library").join("Jupyter"));
    }
    dirs::data_dir().map(|data| data.join("jupyter"))
}

/// Directory for kernel connection files.
pub fn runtime_dir() -> PathBuf {
    if let Some(dir) = env::var_os("JUPYTER_RUNTIME_DIR") {
        return PathBuf::from(dir);
    }
    dirs::runtime_dir().unwrap_or_else(env::temp_dir)
}

fn dedup_preserving_order(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = Vec::with_capacity(paths.len());
    for path in paths {
        if !seen.contains(&path) {
            seen.push(path);
        }
    }
    seen
}
