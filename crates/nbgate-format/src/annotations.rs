//! Run annotations written into output notebooks.
//!
//! Stored under the `nbgate` key of notebook and cell metadata so a reader
//! can tell which cells ran, which one failed, and how long each took.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata key used at notebook and cell level.
pub const METADATA_KEY: &str = "nbgate";

/// Execution status of one code cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellStatus {
    /// Not executed (yet). Cells after a failure stay here.
    Pending,
    /// Submitted to the kernel.
    Running,
    /// Finished without raising.
    Completed,
    /// Raised an error, or the kernel failed while running it.
    Failed,
}

/// Per-cell run annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRunMetadata {
    pub status: CellStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    /// Seconds between start and end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    #[serde(default)]
    pub exception: bool,
}

impl CellRunMetadata {
    /// Annotation for a cell that has not run.
    pub fn pending() -> Self {
        Self {
            status: CellStatus::Pending,
            start_time: None,
            end_time: None,
            duration: None,
            exception: false,
        }
    }

    /// Mark the cell as submitted.
    pub fn start(&mut self, at: DateTime<Utc>) {
        self.status = CellStatus::Running;
        self.start_time = Some(at);
    }

    /// Mark the cell as finished.
    pub fn finish(&mut self, at: DateTime<Utc>, failed: bool) {
        self.status = if failed {
            CellStatus::Failed
        } else {
            CellStatus::Completed
        };
        self.exception = failed;
        self.end_time = Some(at);
        self.duration = self.start_time.map(|start| seconds_between(start, at));
    }
}

/// Notebook-level run annotation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,

    /// Caller-supplied label (e.g. a cluster namespace).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    #[serde(default)]
    pub exception: bool,

    /// Index (into `cells`) of the cell that stopped the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_cell: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl RunMetadata {
    /// Record the end of the run.
    pub fn finish(&mut self, at: DateTime<Utc>, failed_cell: Option<usize>, exception: bool) {
        self.end_time = Some(at);
        self.duration = self.start_time.map(|start| seconds_between(start, at));
        self.failed_cell = failed_cell;
        self.exception = exception;
    }
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_cell_lifecycle() {
        let start = Utc::now();
        let mut meta = CellRunMetadata::pending();
        meta.start(start);
        assert_eq!(meta.status, CellStatus::Running);

        meta.finish(start + Duration::milliseconds(1500), false);
        assert_eq!(meta.status, CellStatus::Completed);
        assert_eq!(meta.duration, Some(1.5));
        assert!(!meta.exception);
    }

    #[test]
    fn test_failed_cell() {
        let start = Utc::now();
        let mut meta = CellRunMetadata::pending();
        meta.start(start);
        meta.finish(start, true);
        assert_eq!(meta.status, CellStatus::Failed);
        assert!(meta.exception);
    }

    #[test]
    fn test_pending_serialization_is_minimal() {
        let json = serde_json::to_value(CellRunMetadata::pending()).unwrap();
        assert_eq!(json, serde_json::json!({"status": "pending", "exception": false}));
    }
}
