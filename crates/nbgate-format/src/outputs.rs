//! Cell outputs.
//!
//! `Output` mirrors the four nbformat output types. `OutputCollector`
//! accumulates outputs for one cell the way a notebook front-end does:
//! consecutive stream chunks are merged and a `clear_output` empties the cell.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::text::MultilineText;

/// A MIME-type keyed bundle of representations.
pub type MimeBundle = Map<String, Value>;

/// Cell output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum Output {
    /// Standard output/error
    Stream {
        name: String,
        text: MultilineText,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },

    /// Value of the last expression of a cell
    ExecuteResult {
        #[serde(default)]
        execution_count: Option<u32>,
        data: MimeBundle,
        #[serde(default)]
        metadata: Map<String, Value>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },

    /// Rich display data
    DisplayData {
        data: MimeBundle,
        #[serde(default)]
        metadata: Map<String, Value>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },

    /// Error output
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
}

impl Output {
    /// Create a stream output.
    pub fn stream(name: impl Into<String>, text: impl Into<MultilineText>) -> Self {
        Output::Stream {
            name: name.into(),
            text: text.into(),
            extra: Map::new(),
        }
    }

    /// Create an error output.
    pub fn error(
        ename: impl Into<String>,
        evalue: impl Into<String>,
        traceback: Vec<String>,
    ) -> Self {
        Output::Error {
            ename: ename.into(),
            evalue: evalue.into(),
            traceback,
            extra: Map::new(),
        }
    }

    /// Whether this is an error output.
    pub fn is_error(&self) -> bool {
        matches!(self, Output::Error { .. })
    }

    /// Best-effort plain-text rendering, used for logs.
    pub fn plain_text(&self) -> String {
        match self {
            Output::Stream { text, .. } => text.to_string(),
            Output::ExecuteResult { data, .. } | Output::DisplayData { data, .. } => {
                match data.get("text/plain") {
                    Some(Value::String(text)) => text.clone(),
                    Some(Value::Array(lines)) => lines
                        .iter()
                        .filter_map(Value::as_str)
                        .collect::<String>(),
                    _ => {
                        let kinds: Vec<&str> = data.keys().map(String::as_str).collect();
                        format!("[{}]", kinds.join(", "))
                    }
                }
            }
            Output::Error { ename, evalue, .. } => format!("{}: {}", ename, evalue),
        }
    }
}

/// Accumulates the outputs produced by a single cell execution.
#[derive(Debug, Default)]
pub struct OutputCollector {
    outputs: Vec<Output>,
}

impl OutputCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an output, merging it into the previous stream chunk when both
    /// are the same stream.
    pub fn push(&mut self, output: Output) {
        if let Output::Stream { name, text, .. } = &output {
            if let Some(Output::Stream {
                name: last_name,
                text: last_text,
                ..
            }) = self.outputs.last_mut()
            {
                if last_name == name {
                    last_text.push_str(text.as_str());
                    return;
                }
            }
        }
        self.outputs.push(output);
    }

    /// Drop everything collected so far.
    pub fn clear(&mut self) {
        self.outputs.clear();
    }

    /// Outputs collected so far.
    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// Whether any error output was collected.
    pub fn has_error(&self) -> bool {
        self.outputs.iter().any(Output::is_error)
    }

    /// Consume the collector.
    pub fn into_outputs(self) -> Vec<Output> {
        self.outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consecutive_streams_are_merged() {
        let mut collector = OutputCollector::new();
        collector.push(Output::stream("stdout", "a\n"));
        collector.push(Output::stream("stdout", "b\n"));
        collector.push(Output::stream("stderr", "warn\n"));
        collector.push(Output::stream("stdout", "c\n"));

        let outputs = collector.into_outputs();
        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[0].plain_text(), "a\nb\n");
        assert_eq!(outputs[2].plain_text(), "c\n");
    }

    #[test]
    fn test_clear_drops_collected_outputs() {
        let mut collector = OutputCollector::new();
        collector.push(Output::stream("stdout", "progress 10%"));
        collector.clear();
        collector.push(Output::stream("stdout", "done"));
        assert_eq!(collector.outputs().len(), 1);
        assert_eq!(collector.outputs()[0].plain_text(), "done");
    }

    #[test]
    fn test_error_output_serialization() {
        let output = Output::error("AssertionError", "boom", vec!["line 1".to_string()]);
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["output_type"], "error");
        assert_eq!(json["ename"], "AssertionError");
        assert_eq!(json["evalue"], "boom");

        let mut collector = OutputCollector::new();
        collector.push(output);
        assert!(collector.has_error());
    }

    #[test]
    fn test_plain_text_of_rich_output() {
        let json = r#"{
            "output_type": "execute_result",
            "execution_count": 2,
            "data": {"text/plain": ["42"], "text/html": "<b>42</b>"},
            "metadata": {}
        }"#;
        let output: Output = serde_json::from_str(json).unwrap();
        assert_eq!(output.plain_text(), "42");

        let image = Output::DisplayData {
            data: serde_json::from_str(r#"{"image/png": "iVBORw0KGgo="}"#).unwrap(),
            metadata: Map::new(),
            extra: Map::new(),
        };
        assert_eq!(image.plain_text(), "[image/png]");
    }
}
