//! Multi-line text as stored in notebook JSON.
//!
//! nbformat allows cell sources and stream text to be either a single string
//! or a list of lines. Both decode to the same value; writing always produces
//! the list form with line endings kept on each element, as Jupyter does.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Text that may be encoded as a string or a list of lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultilineText(String);

impl MultilineText {
    /// Create text from a string.
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// The full text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into lines, keeping the trailing newline of each line.
    pub fn lines(&self) -> Vec<String> {
        self.0.split_inclusive('\n').map(String::from).collect()
    }

    /// Append more text.
    pub fn push_str(&mut self, text: &str) {
        self.0.push_str(text);
    }

    /// Whether the text contains only whitespace.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for MultilineText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MultilineText {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for MultilineText {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl Serialize for MultilineText {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.lines().serialize(serializer)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Repr {
    Single(String),
    Lines(Vec<String>),
}

impl<'de> Deserialize<'de> for MultilineText {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Single(text) => Self(text),
            Repr::Lines(lines) => Self(lines.concat()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_both_encodings() {
        let single: MultilineText = serde_json::from_str(r#""a = 1\nb = 2""#).unwrap();
        let lines: MultilineText = serde_json::from_str(r#"["a = 1\n", "b = 2"]"#).unwrap();
        assert_eq!(single, lines);
        assert_eq!(single.as_str(), "a = 1\nb = 2");
    }

    #[test]
    fn test_serializes_as_lines() {
        let text = MultilineText::new("first\nsecond\n");
        let json = serde_json::to_value(&text).unwrap();
        assert_eq!(json, serde_json::json!(["first\n", "second\n"]));
    }

    #[test]
    fn test_empty_text_serializes_as_empty_list() {
        let json = serde_json::to_value(MultilineText::default()).unwrap();
        assert_eq!(json, serde_json::json!([]));
    }

    #[test]
    fn test_blank() {
        assert!(MultilineText::new("  \n\t").is_blank());
        assert!(!MultilineText::new("pass").is_blank());
    }
}
