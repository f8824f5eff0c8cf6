//! Template merge engine.
//!
//! Operates directly on a paragraph-oriented rich-text model: structural
//! `[[IF]]`/`[[FOREACH]]` blocks are expanded or removed, then `{path}`
//! placeholders are substituted in place — including placeholders whose
//! characters straddle formatting-run boundaries.

pub mod expr;
pub mod markers;
pub mod merge;
pub mod model;

pub use expr::Scope;
pub use markers::{Marker, MarkerGrammar};
pub use merge::{MergeEngine, format_currency};
pub use model::{Paragraph, Run, RunFormat, TemplateDocument};
