//! Rich-text document model.
//!
//! A document is an ordered sequence of paragraphs; a paragraph is an
//! ordered sequence of runs; a run carries one formatting set and a text
//! segment. The serialized form is the externally-defined container the
//! engine reads and writes paragraph by paragraph — nothing here owns a
//! file format.

use serde::{Deserialize, Serialize};

use crate::error::MergeError;

/// Formatting carried by a single run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFormat {
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub italic: bool,
    #[serde(default)]
    pub underline: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font: Option<String>,
}

/// A contiguous text segment with uniform formatting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub text: String,
    #[serde(default)]
    pub format: RunFormat,
}

impl Run {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: RunFormat::default(),
        }
    }
}

/// An ordered sequence of runs.
///
/// Structural markers are plain paragraphs whose *concatenated* text matches
/// the marker grammar — which is why marker detection must read the full
/// paragraph text, never a single run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Paragraph {
    #[serde(default)]
    pub runs: Vec<Run>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

impl Paragraph {
    /// A paragraph holding one unformatted run.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            runs: vec![Run::plain(text)],
            style: None,
        }
    }

    /// Full text: the concatenation of every run's segment.
    pub fn text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }
}

/// An ordered sequence of paragraphs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateDocument {
    #[serde(default)]
    pub paragraphs: Vec<Paragraph>,
}

impl TemplateDocument {
    pub fn new(paragraphs: Vec<Paragraph>) -> Self {
        Self { paragraphs }
    }

    /// Build a document of one plain paragraph per input line.
    pub fn from_lines(lines: &[&str]) -> Self {
        Self {
            paragraphs: lines.iter().map(|l| Paragraph::from_text(*l)).collect(),
        }
    }

    /// Parse a document from its container bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MergeError> {
        serde_json::from_slice(bytes).map_err(|e| MergeError::InvalidBody(e.to_string()))
    }

    /// Serialize back to container bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MergeError> {
        serde_json::to_vec(self).map_err(|e| MergeError::Serialize(e.to_string()))
    }

    /// Paragraph texts joined by newlines. Diagnostics and tests only.
    pub fn plain_text(&self) -> String {
        self.paragraphs
            .iter()
            .map(|p| p.text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraph_text_concatenates_runs() {
        let para = Paragraph {
            runs: vec![
                Run {
                    text: "{Loan".into(),
                    format: RunFormat {
                        bold: true,
                        ..Default::default()
                    },
                },
                Run::plain("Amount}"),
            ],
            style: None,
        };
        assert_eq!(para.text(), "{LoanAmount}");
    }

    #[test]
    fn container_round_trip() {
        let doc = TemplateDocument::from_lines(&["first", "[[IF x]]", "second"]);
        let bytes = doc.to_bytes().unwrap();
        let back = TemplateDocument::from_bytes(&bytes).unwrap();
        assert_eq!(back, doc);
        assert_eq!(back.plain_text(), "first\n[[IF x]]\nsecond");
    }

    #[test]
    fn invalid_body_is_an_error_not_a_panic() {
        let err = TemplateDocument::from_bytes(b"not json").unwrap_err();
        assert!(matches!(err, MergeError::InvalidBody(_)));
    }
}
