//! The merge scan: structural block expansion and placeholder substitution.
//!
//! A linear pass over the paragraph sequence. At each cursor position the
//! paragraph's full text is tested, in priority order, as an `IF` block
//! opener, a `FOREACH` opener, or a plain paragraph. Marked paragraphs are
//! swept at the end, so marker paragraphs never survive a merge. A repeat
//! stencil is rendered by the same pass recursively, once per element with
//! the loop variable bound, so markers inside it evaluate per element.

use regex::Regex;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::warn;

use crate::template::expr::{Scope, eval_condition};
use crate::template::markers::{Marker, MarkerGrammar};
use crate::template::model::{Paragraph, Run, TemplateDocument};

/// Field whose resolved value renders with locale-aware currency formatting
/// instead of its natural string form.
const CURRENCY_FIELD: &str = "loanamount";

/// Renders templates against a root data object.
pub struct MergeEngine {
    grammar: MarkerGrammar,
    placeholder_re: Regex,
}

impl MergeEngine {
    pub fn new() -> Self {
        Self {
            grammar: MarkerGrammar::new(),
            placeholder_re: Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\}")
                .unwrap(),
        }
    }

    /// Expand all structural blocks and substitute every placeholder,
    /// in place. Never fails: an unterminated block aborts the remaining
    /// scan and the document keeps what was produced so far.
    pub fn merge(&self, doc: &mut TemplateDocument, model: &Value) {
        self.scan(&mut doc.paragraphs, &Scope::root(model));
    }

    /// One mark-and-sweep pass over a paragraph sequence under one scope.
    /// Repeat stencils recurse here with the element bound, so blocks and
    /// placeholders nested inside a `FOREACH` see the loop variable.
    fn scan(&self, paragraphs: &mut Vec<Paragraph>, scope: &Scope) {
        let mut marked = vec![false; paragraphs.len()];
        let mut i = 0;

        while i < paragraphs.len() {
            if marked[i] {
                i += 1;
                continue;
            }
            let text = paragraphs[i].text();
            match self.grammar.parse(&text) {
                Some(Marker::If(condition)) => {
                    let Some(end) = self.find_block_end(paragraphs, i, BlockKind::If) else {
                        warn!(paragraph = i, "unterminated IF block, aborting merge scan");
                        break;
                    };
                    marked[i] = true;
                    marked[end] = true;
                    if eval_condition(&condition, scope) {
                        // Inner block stays; scan it normally so nested
                        // blocks expand and placeholders resolve.
                        i += 1;
                    } else {
                        for slot in marked.iter_mut().take(end).skip(i + 1) {
                            *slot = true;
                        }
                        i = end + 1;
                    }
                }
                Some(Marker::ForEach { var, expr }) => {
                    let Some(end) = self.find_block_end(paragraphs, i, BlockKind::ForEach) else {
                        warn!(paragraph = i, "unterminated FOREACH block, aborting merge scan");
                        break;
                    };
                    marked[i] = true;
                    marked[end] = true;
                    for slot in marked.iter_mut().take(end).skip(i + 1) {
                        *slot = true;
                    }

                    // Empty or unresolvable sequences expand to nothing.
                    let elements: Vec<Value> = scope
                        .resolve(&expr)
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    let stencil: Vec<Paragraph> = paragraphs[i + 1..end].to_vec();

                    let mut insert_at = end + 1;
                    for element in &elements {
                        let element_scope = scope.with_var(&var, element);
                        let mut block = stencil.clone();
                        self.scan(&mut block, &element_scope);
                        for paragraph in block {
                            paragraphs.insert(insert_at, paragraph);
                            marked.insert(insert_at, false);
                            insert_at += 1;
                        }
                    }
                    // Expanded output is already fully rendered; skip it.
                    i = insert_at;
                }
                // An orphan closer has no matching opener; drop it rather
                // than leaking marker text into the output.
                Some(Marker::End) | Some(Marker::EndForEach) => {
                    marked[i] = true;
                    i += 1;
                }
                None => {
                    self.resolve_placeholders(&mut paragraphs[i], scope);
                    i += 1;
                }
            }
        }

        let mut keep = marked.iter().map(|m| !m);
        paragraphs.retain(|_| keep.next().unwrap_or(true));
    }

    /// Find the closer matching the opener at `start`, honoring nesting of
    /// the same block kind.
    fn find_block_end(
        &self,
        paragraphs: &[Paragraph],
        start: usize,
        kind: BlockKind,
    ) -> Option<usize> {
        let mut depth = 0usize;
        for (k, paragraph) in paragraphs.iter().enumerate().skip(start + 1) {
            match (self.grammar.parse(&paragraph.text()), kind) {
                (Some(Marker::If(_)), BlockKind::If) => depth += 1,
                (Some(Marker::End), BlockKind::If) => {
                    if depth == 0 {
                        return Some(k);
                    }
                    depth -= 1;
                }
                (Some(Marker::ForEach { .. }), BlockKind::ForEach) => depth += 1,
                (Some(Marker::EndForEach), BlockKind::ForEach) => {
                    if depth == 0 {
                        return Some(k);
                    }
                    depth -= 1;
                }
                _ => {}
            }
        }
        None
    }

    /// Substitute every `{path}` placeholder in one paragraph.
    ///
    /// A placeholder's characters may straddle run boundaries, so the runs
    /// are flattened to one text stream with a per-byte back-map to
    /// (run, offset); matches are located on the flat stream and spliced
    /// back-to-front so earlier offsets stay valid.
    pub fn resolve_placeholders(&self, paragraph: &mut Paragraph, scope: &Scope) {
        if paragraph.runs.is_empty() {
            return;
        }
        let mut flat = String::new();
        let mut back_map: Vec<(usize, usize)> = Vec::new();
        for (run_index, run) in paragraph.runs.iter().enumerate() {
            for offset in 0..run.text.len() {
                back_map.push((run_index, offset));
            }
            flat.push_str(&run.text);
        }

        let matches: Vec<(usize, usize, String)> = self
            .placeholder_re
            .captures_iter(&flat)
            .map(|caps| {
                let m = caps.get(0).expect("match group 0");
                (m.start(), m.end(), caps[1].to_string())
            })
            .collect();

        for (start, end, path) in matches.into_iter().rev() {
            let replacement = self.render_path(&path, scope);
            splice_runs(paragraph, &back_map, start, end, &replacement);
        }
    }

    /// Resolve one placeholder path to its rendered text. Unresolvable
    /// paths render empty; the currency field renders formatted.
    fn render_path(&self, path: &str, scope: &Scope) -> String {
        let Some(value) = scope.resolve(path) else {
            return String::new();
        };
        let last_segment = path.rsplit('.').next().unwrap_or(path);
        if last_segment.eq_ignore_ascii_case(CURRENCY_FIELD) {
            if let Some(amount) = decimal_of(value) {
                return format_currency(amount);
            }
        }
        display_value(value)
    }
}

impl Default for MergeEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    If,
    ForEach,
}

/// Replace `flat[start..end]` inside the paragraph's runs: truncate the
/// first affected run before the match, insert one run carrying the
/// replacement (cloning the first run's formatting), re-attach the last
/// affected run's remainder, and drop wholly-covered runs in between.
fn splice_runs(
    paragraph: &mut Paragraph,
    back_map: &[(usize, usize)],
    start: usize,
    end: usize,
    replacement: &str,
) {
    let (first_run, first_offset) = back_map[start];
    let (last_run, last_offset) = back_map[end - 1];
    // The final matched byte is the closing brace, always one byte.
    let tail_start = last_offset + 1;

    let tail = paragraph.runs[last_run].text[tail_start..].to_string();
    let first_format = paragraph.runs[first_run].format.clone();
    let last_format = paragraph.runs[last_run].format.clone();

    paragraph.runs[first_run].text.truncate(first_offset);
    if last_run > first_run {
        paragraph.runs.drain(first_run + 1..=last_run);
    }

    let mut insert_at = first_run + 1;
    if !replacement.is_empty() {
        paragraph.runs.insert(
            insert_at,
            Run {
                text: replacement.to_string(),
                format: first_format,
            },
        );
        insert_at += 1;
    }
    if !tail.is_empty() {
        paragraph.runs.insert(
            insert_at,
            Run {
                text: tail,
                format: last_format,
            },
        );
    }
    if paragraph.runs[first_run].text.is_empty() {
        paragraph.runs.remove(first_run);
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        // Structured values have no natural inline rendering.
        Value::Array(_) | Value::Object(_) => String::new(),
    }
}

fn decimal_of(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s.trim().replace(['$', ','], "").parse().ok(),
        _ => None,
    }
}

/// en-US currency rendering: two decimal places, comma-grouped thousands,
/// leading `$`, sign before the symbol.
pub fn format_currency(amount: Decimal) -> String {
    let rounded = amount.round_dp(2);
    let negative = rounded.is_sign_negative();
    let text = format!("{:.2}", rounded.abs());
    let (int_part, frac_part) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let sign = if negative { "-" } else { "" };
    format!("{sign}${grouped}.{frac_part}")
}
