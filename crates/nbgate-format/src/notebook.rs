//! Jupyter notebook (.ipynb) document model.
//!
//! Models nbformat 4. Keys that are not modelled explicitly, at notebook,
//! metadata, cell and output level, are kept in `extra` maps so a notebook
//! survives a read/write cycle.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::annotations::{CellRunMetadata, METADATA_KEY, RunMetadata};
use crate::error::{FormatError, FormatResult};
use crate::outputs::Output;
use crate::text::MultilineText;

/// Only major version of nbformat this crate reads.
pub const NBFORMAT_MAJOR: u32 = 4;

/// A Jupyter notebook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notebook {
    /// Notebook cells
    pub cells: Vec<Cell>,

    /// Notebook metadata
    #[serde(default)]
    pub metadata: NotebookMetadata,

    /// Format version (always 4)
    pub nbformat: u32,

    /// Minor format version
    #[serde(default)]
    pub nbformat_minor: u32,

    /// Unmodelled top-level keys
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Notebook metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotebookMetadata {
    /// Kernel the notebook was authored against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernelspec: Option<KernelSpecInfo>,

    /// Annotations written by the last nbgate run
    #[serde(default, rename = "nbgate", skip_serializing_if = "Option::is_none")]
    pub run: Option<RunMetadata>,

    /// Everything else (language_info, widgets, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Kernel specification recorded in notebook metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelSpecInfo {
    /// Kernel name
    pub name: String,

    /// Display name
    #[serde(default)]
    pub display_name: String,

    /// Language
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// A notebook cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cell_type", rename_all = "lowercase")]
pub enum Cell {
    /// Executable source
    Code(CodeCell),
    /// Markdown text
    Markdown(TextCell),
    /// Raw text passed through untouched
    Raw(TextCell),
}

/// A code cell.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeCell {
    /// Cell id (nbformat 4.5+)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Cell metadata
    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// Cell source
    pub source: MultilineText,

    /// Execution count, `null` when the cell has not run
    #[serde(default)]
    pub execution_count: Option<u32>,

    /// Cell outputs
    #[serde(default)]
    pub outputs: Vec<Output>,

    /// Unmodelled cell keys
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A markdown or raw cell.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextCell {
    /// Cell id (nbformat 4.5+)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Cell metadata
    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// Cell source
    pub source: MultilineText,

    /// Inline attachments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Value>,

    /// Unmodelled cell keys
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Notebook {
    /// Create a new empty notebook.
    pub fn new() -> Self {
        Self {
            cells: Vec::new(),
            metadata: NotebookMetadata::default(),
            nbformat: NBFORMAT_MAJOR,
            nbformat_minor: 5,
            extra: Map::new(),
        }
    }

    /// Parse a notebook from JSON text.
    pub fn from_json(json: &str) -> FormatResult<Self> {
        let notebook: Self = serde_json::from_str(json)?;
        notebook.validate()?;
        Ok(notebook)
    }

    /// Read a notebook from a file.
    pub fn read_from_file(path: impl AsRef<Path>) -> FormatResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| FormatError::ReadError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_json(&content)
    }

    /// Serialize as Jupyter does: one-space indentation, trailing newline.
    pub fn to_json(&self) -> FormatResult<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut serializer)?;
        buf.push(b'\n');
        String::from_utf8(buf).map_err(|e| FormatError::InvalidNotebook(e.to_string()))
    }

    /// Write the notebook to a file, replacing any existing file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> FormatResult<()> {
        let path = path.as_ref();
        let json = self.to_json()?;
        fs::write(path, json).map_err(|e| FormatError::WriteError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Check the document is a notebook this crate understands.
    pub fn validate(&self) -> FormatResult<()> {
        if self.nbformat != NBFORMAT_MAJOR {
            return Err(FormatError::InvalidNotebook(format!(
                "unsupported nbformat version {}.{} (expected {})",
                self.nbformat, self.nbformat_minor, NBFORMAT_MAJOR
            )));
        }
        Ok(())
    }

    /// Kernel name from the notebook's own metadata.
    pub fn kernel_name(&self) -> Option<&str> {
        self.metadata
            .kernelspec
            .as_ref()
            .map(|spec| spec.name.as_str())
            .filter(|name| !name.is_empty())
    }

    /// Number of code cells.
    pub fn code_cell_count(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_code()).count()
    }

    /// Copy of this notebook with every code cell reset to the never-run state.
    ///
    /// Stale outputs and execution counts are dropped, each code cell gets a
    /// `pending` run annotation, and the previous run's notebook annotation is
    /// removed. The receiver is left untouched.
    pub fn fresh_copy(&self) -> Self {
        let mut copy = self.clone();
        copy.metadata.run = None;
        for cell in &mut copy.cells {
            if let Cell::Code(code) = cell {
                code.outputs.clear();
                code.execution_count = None;
                code.set_run_metadata(&CellRunMetadata::pending());
            }
        }
        copy
    }
}

impl Default for Notebook {
    fn default() -> Self {
        Self::new()
    }
}

impl Cell {
    /// Create a code cell.
    pub fn code(source: impl Into<MultilineText>) -> Self {
        Cell::Code(CodeCell {
            source: source.into(),
            ..Default::default()
        })
    }

    /// Create a markdown cell.
    pub fn markdown(source: impl Into<MultilineText>) -> Self {
        Cell::Markdown(TextCell {
            source: source.into(),
            ..Default::default()
        })
    }

    /// Cell source.
    pub fn source(&self) -> &MultilineText {
        match self {
            Cell::Code(cell) => &cell.source,
            Cell::Markdown(cell) | Cell::Raw(cell) => &cell.source,
        }
    }

    /// Whether this is a code cell.
    pub fn is_code(&self) -> bool {
        matches!(self, Cell::Code(_))
    }

    /// The code cell, if this is one.
    pub fn as_code(&self) -> Option<&CodeCell> {
        match self {
            Cell::Code(cell) => Some(cell),
            _ => None,
        }
    }

    /// The code cell, mutably, if this is one.
    pub fn as_code_mut(&mut self) -> Option<&mut CodeCell> {
        match self {
            Cell::Code(cell) => Some(cell),
            _ => None,
        }
    }
}

impl CodeCell {
    /// Run annotation for this cell, if present and well-formed.
    pub fn run_metadata(&self) -> Option<CellRunMetadata> {
        self.metadata
            .get(METADATA_KEY)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Replace the run annotation for this cell.
    pub fn set_run_metadata(&mut self, meta: &CellRunMetadata) {
        match serde_json::to_value(meta) {
            Ok(value) => {
                self.metadata.insert(METADATA_KEY.to_string(), value);
            }
            Err(e) => tracing::warn!("Failed to encode cell run metadata: {}", e),
        }
    }

    /// First error output of this cell, if any.
    pub fn error_output(&self) -> Option<&Output> {
        self.outputs.iter().find(|output| output.is_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::CellStatus;

    const SAMPLE: &str = r##"{
 "cells": [
  {
   "cell_type": "markdown",
   "id": "intro",
   "metadata": {},
   "source": ["# Title\n", "Some text"]
  },
  {
   "cell_type": "code",
   "execution_count": 3,
   "id": "calc",
   "metadata": {"tags": ["parameters"]},
   "outputs": [
    {"output_type": "stream", "name": "stdout", "text": ["stale\n"]}
   ],
   "source": "x = 1\nprint(x)"
  }
 ],
 "metadata": {
  "kernelspec": {"display_name": "Python 3", "language": "python", "name": "python3"},
  "language_info": {"name": "python", "version": "3.11.4"}
 },
 "nbformat": 4,
 "nbformat_minor": 5
}"##;

    #[test]
    fn test_empty_notebook() {
        let notebook = Notebook::new();
        assert_eq!(notebook.nbformat, 4);
        assert!(notebook.cells.is_empty());
        assert!(notebook.kernel_name().is_none());
    }

    #[test]
    fn test_parse_sample() {
        let notebook = Notebook::from_json(SAMPLE).unwrap();
        assert_eq!(notebook.cells.len(), 2);
        assert_eq!(notebook.code_cell_count(), 1);
        assert_eq!(notebook.kernel_name(), Some("python3"));
        assert_eq!(notebook.cells[0].source().as_str(), "# Title\nSome text");

        let code = notebook.cells[1].as_code().unwrap();
        assert_eq!(code.execution_count, Some(3));
        assert_eq!(code.outputs.len(), 1);
    }

    #[test]
    fn test_unknown_metadata_survives_roundtrip() {
        let notebook = Notebook::from_json(SAMPLE).unwrap();
        let json = notebook.to_json().unwrap();
        let reparsed: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            reparsed["metadata"]["language_info"]["version"],
            Value::from("3.11.4")
        );
        assert_eq!(reparsed["cells"][1]["metadata"]["tags"][0], Value::from("parameters"));
        assert_eq!(reparsed["cells"][0]["cell_type"], Value::from("markdown"));
    }

    #[test]
    fn test_rejects_old_nbformat() {
        let json = r#"{"cells": [], "metadata": {}, "nbformat": 3, "nbformat_minor": 0}"#;
        let err = Notebook::from_json(json).unwrap_err();
        assert!(matches!(err, FormatError::InvalidNotebook(_)));
    }

    #[test]
    fn test_rejects_malformed_json() {
        let err = Notebook::from_json("{ not json").unwrap_err();
        assert!(matches!(err, FormatError::JsonError(_)));
    }

    #[test]
    fn test_fresh_copy_clears_outputs() {
        let notebook = Notebook::from_json(SAMPLE).unwrap();
        let fresh = notebook.fresh_copy();

        let code = fresh.cells[1].as_code().unwrap();
        assert!(code.outputs.is_empty());
        assert!(code.execution_count.is_none());
        assert_eq!(code.run_metadata().unwrap().status, CellStatus::Pending);

        // Original untouched
        let original = notebook.cells[1].as_code().unwrap();
        assert_eq!(original.outputs.len(), 1);
        assert!(original.run_metadata().is_none());
    }

    #[test]
    fn test_unrun_code_cell_writes_null_execution_count() {
        let mut notebook = Notebook::new();
        notebook.cells.push(Cell::code("pass"));
        let value: Value = serde_json::from_str(&notebook.to_json().unwrap()).unwrap();
        assert!(value["cells"][0]["execution_count"].is_null());
        assert_eq!(value["cells"][0]["outputs"], serde_json::json!([]));
    }
}
