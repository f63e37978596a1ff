//! Pre-run file staging.
//!
//! Some notebooks import generated code that has to be copied into a
//! package, with one import line patched, before they can run. Staging does
//! that ahead of the engine and is safe to repeat.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// One staging action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStep {
    /// Copy `source` to `destination` unless the destination exists.
    CopyIfMissing {
        source: PathBuf,
        destination: PathBuf,
    },
    /// Replace `from` with `to` in `file`, keeping a `.bak` copy.
    RewriteImport {
        file: PathBuf,
        from: String,
        to: String,
    },
}

/// What a step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Copied,
    AlreadyPresent,
    /// Number of lines rewritten.
    Rewritten(usize),
    Unchanged,
}

impl StageStep {
    /// Parse `SRC=DST`.
    pub fn parse_copy(arg: &str) -> Result<Self> {
        let (source, destination) = arg
            .split_once('=')
            .filter(|(s, d)| !s.is_empty() && !d.is_empty())
            .ok_or_else(|| invalid(arg, "expected SRC=DST"))?;
        Ok(StageStep::CopyIfMissing {
            source: PathBuf::from(source),
            destination: PathBuf::from(destination),
        })
    }

    /// Parse `FILE=FROM=>TO`.
    pub fn parse_rewrite(arg: &str) -> Result<Self> {
        let (file, rule) = arg
            .split_once('=')
            .ok_or_else(|| invalid(arg, "expected FILE=FROM=>TO"))?;
        let (from, to) = rule
            .split_once("=>")
            .ok_or_else(|| invalid(arg, "expected FILE=FROM=>TO"))?;
        if file.is_empty() || from.is_empty() {
            return Err(invalid(arg, "file and pattern must not be empty"));
        }
        Ok(StageStep::RewriteImport {
            file: PathBuf::from(file),
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    /// Run the step.
    pub fn apply(&self) -> Result<StageOutcome> {
        match self {
            StageStep::CopyIfMissing {
                source,
                destination,
            } => copy_if_missing(source, destination),
            StageStep::RewriteImport { file, from, to } => rewrite(file, from, to),
        }
    }
}

impl fmt::Display for StageStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStep::CopyIfMissing {
                source,
                destination,
            } => write!(f, "copy {} -> {}", source.display(), destination.display()),
            StageStep::RewriteImport { file, from, to } => {
                write!(f, "rewrite '{}' -> '{}' in {}", from, to, file.display())
            }
        }
    }
}

/// Apply steps in order, stopping at the first failure.
pub fn apply_all(steps: &[StageStep]) -> Result<()> {
    for step in steps {
        let outcome = step.apply()?;
        tracing::info!("Staging: {} ({:?})", step, outcome);
    }
    Ok(())
}

fn copy_if_missing(source: &Path, destination: &Path) -> Result<StageOutcome> {
    if destination.exists() {
        return Ok(StageOutcome::AlreadyPresent);
    }
    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| staging_error(destination, e))?;
        }
    }
    fs::copy(source, destination).map_err(|e| staging_error(source, e))?;
    Ok(StageOutcome::Copied)
}

/// Lines that already contain a non-empty `to` are left alone so a second
/// run is a no-op even when `to` contains `from`. An empty `to` deletes.
fn rewrite(file: &Path, from: &str, to: &str) -> Result<StageOutcome> {
    let content = fs::read_to_string(file).map_err(|e| staging_error(file, e))?;

    let mut rewritten = 0;
    let mut updated = String::with_capacity(content.len());
    for line in content.split_inclusive('\n') {
        let already_rewritten = !to.is_empty() && line.contains(to);
        if line.contains(from) && !already_rewritten {
            updated.push_str(&line.replace(from, to));
            rewritten += 1;
        } else {
            updated.push_str(line);
        }
    }
    if rewritten == 0 {
        return Ok(StageOutcome::Unchanged);
    }

    let mut backup = file.as_os_str().to_owned();
    backup.push(".bak");
    fs::write(&backup, &content).map_err(|e| staging_error(Path::new(&backup), e))?;
    fs::write(file, updated).map_err(|e| staging_error(file, e))?;
    Ok(StageOutcome::Rewritten(rewritten))
}

fn staging_error(path: &Path, e: std::io::Error) -> Error {
    Error::Staging {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

fn invalid(arg: &str, message: &str) -> Error {
    Error::Staging {
        path: arg.to_string(),
        message: message.to_string(),
    }
}
