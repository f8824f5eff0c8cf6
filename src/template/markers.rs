//! Structural marker grammar.
//!
//! A paragraph is a marker when its full text matches one of:
//! `[[IF <condition>]]`, `[[END]]`, `[[FOREACH <var> in <expr>]]`,
//! `[[ENDFOREACH]]`. Markers control which surrounding paragraphs survive
//! the merge; they are ordinary paragraphs, not a separate node type.

use regex::Regex;

/// A recognized structural marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    If(String),
    End,
    ForEach { var: String, expr: String },
    EndForEach,
}

/// Compiled marker grammar. Built once per engine.
#[derive(Debug)]
pub struct MarkerGrammar {
    if_re: Regex,
    end_re: Regex,
    foreach_re: Regex,
    endforeach_re: Regex,
}

impl MarkerGrammar {
    pub fn new() -> Self {
        Self {
            if_re: Regex::new(r"(?i)^\s*\[\[\s*IF\s+(.+?)\s*\]\]\s*$").unwrap(),
            end_re: Regex::new(r"(?i)^\s*\[\[\s*END\s*\]\]\s*$").unwrap(),
            foreach_re: Regex::new(
                r"(?i)^\s*\[\[\s*FOREACH\s+([A-Za-z_][A-Za-z0-9_]*)\s+in\s+(.+?)\s*\]\]\s*$",
            )
            .unwrap(),
            endforeach_re: Regex::new(r"(?i)^\s*\[\[\s*ENDFOREACH\s*\]\]\s*$").unwrap(),
        }
    }

    /// Parse a paragraph's full text. `None` for ordinary paragraphs.
    pub fn parse(&self, text: &str) -> Option<Marker> {
        if let Some(caps) = self.if_re.captures(text) {
            return Some(Marker::If(caps[1].to_string()));
        }
        if self.end_re.is_match(text) {
            return Some(Marker::End);
        }
        if let Some(caps) = self.foreach_re.captures(text) {
            return Some(Marker::ForEach {
                var: caps[1].to_string(),
                expr: caps[2].to_string(),
            });
        }
        if self.endforeach_re.is_match(text) {
            return Some(Marker::EndForEach);
        }
        None
    }
}

impl Default for MarkerGrammar {
    fn default() -> Self {
        Self::new()
    }
}
