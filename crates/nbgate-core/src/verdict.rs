//! Run outcomes and the run state machine.

use std::fmt;

use crate::error::{Error, Result};

/// Terminal outcome of one notebook run.
#[derive(Debug)]
pub enum ExecutionVerdict {
    /// Every code cell ran without raising.
    Success,
    /// A cell raised; the notebook's own checks failed.
    TestFailure(CellFailure),
    /// The run could not be carried out.
    EnvironmentFailure(Error),
}

impl ExecutionVerdict {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionVerdict::Success)
    }

    /// Process exit status for this verdict.
    pub fn exit_code(&self) -> u8 {
        match self {
            ExecutionVerdict::Success => 0,
            ExecutionVerdict::TestFailure(_) => 1,
            ExecutionVerdict::EnvironmentFailure(_) => 2,
        }
    }

    /// Terminal state matching this verdict.
    pub fn state(&self) -> RunState {
        match self {
            ExecutionVerdict::Success => RunState::Succeeded,
            ExecutionVerdict::TestFailure(_) => RunState::TestFailed,
            ExecutionVerdict::EnvironmentFailure(_) => RunState::EnvironmentFailed,
        }
    }
}

/// The cell that raised, and what it raised.
#[derive(Debug, Clone, PartialEq)]
pub struct CellFailure {
    /// Index of the cell in the notebook (all cell types counted).
    pub cell_index: usize,
    pub execution_count: Option<u32>,
    pub ename: String,
    pub evalue: String,
    pub traceback: Vec<String>,
}

impl fmt::Display for CellFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell {} raised {}", self.cell_index, self.ename)?;
        if !self.evalue.is_empty() {
            write!(f, ": {}", self.evalue)?;
        }
        Ok(())
    }
}

/// Where a run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotReady,
    KernelBound,
    Running,
    Succeeded,
    TestFailed,
    EnvironmentFailed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::TestFailed | RunState::EnvironmentFailed
        )
    }

    /// Move to `next`, rejecting transitions the run cannot make.
    pub fn transition(self, next: RunState) -> Result<RunState> {
        use RunState::*;

        let allowed = matches!(
            (self, next),
            (NotReady, KernelBound)
                | (NotReady, EnvironmentFailed)
                | (KernelBound, Running)
                | (KernelBound, EnvironmentFailed)
                | (Running, Succeeded)
                | (Running, TestFailed)
                | (Running, EnvironmentFailed)
        );
        if allowed {
            Ok(next)
        } else {
            Err(Error::InvalidTransition(format!("{} -> {}", self, next)))
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::NotReady => "not-ready",
            RunState::KernelBound => "kernel-bound",
            RunState::Running => "running",
            RunState::Succeeded => "succeeded",
            RunState::TestFailed => "test-failed",
            RunState::EnvironmentFailed => "environment-failed",
        };
        f.write_str(name)
    }
}
