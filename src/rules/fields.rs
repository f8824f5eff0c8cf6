//! Field type registry.
//!
//! Every leaf field key resolves to a value type that decides how its
//! comparisons are performed. Explicit registration always wins; keys ending
//! in `State` auto-register as select (enumerated) fields by naming
//! convention, so state-like fields work without any setup.

use std::collections::HashMap;

use crate::rules::Operator;

/// Declared value type of a field key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Number,
    Boolean,
    Date,
    /// Enumerated value from a fixed set (e.g. a US state code).
    Select,
}

/// Suffix that auto-registers a key as a select field.
const STATE_SUFFIX: &str = "state";

/// Registry mapping field keys (case-insensitive) to value types.
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    fields: HashMap<String, FieldType>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the standard loan fields.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register("LoanAmount", FieldType::Number);
        registry.register("InterestRate", FieldType::Number);
        registry.register("TermMonths", FieldType::Number);
        registry.register("CloseDate", FieldType::Date);
        registry.register("IsRefinance", FieldType::Boolean);
        registry
    }

    /// Register a key explicitly. Takes precedence over suffix detection.
    pub fn register(&mut self, key: &str, field_type: FieldType) {
        self.fields.insert(key.to_lowercase(), field_type);
    }

    /// Resolve a key's value type: explicit registration first, then the
    /// `State` suffix convention, else plain text.
    pub fn field_type(&self, key: &str) -> FieldType {
        let lowered = key.to_lowercase();
        if let Some(t) = self.fields.get(&lowered) {
            return *t;
        }
        if lowered.ends_with(STATE_SUFFIX) {
            return FieldType::Select;
        }
        FieldType::Text
    }

    /// Operators valid for a value type. Used by rule authoring surfaces;
    /// the evaluator itself fails closed on mismatches instead of erroring.
    pub fn allowed_operators(field_type: FieldType) -> &'static [Operator] {
        use Operator::*;
        match field_type {
            FieldType::Text => &[
                Equals,
                NotEquals,
                In,
                NotIn,
                IsAnswered,
                IsUnanswered,
            ],
            FieldType::Number | FieldType::Date => &[
                Equals,
                NotEquals,
                GreaterThan,
                GreaterThanOrEqual,
                LessThan,
                LessThanOrEqual,
                In,
                NotIn,
                IsAnswered,
                IsUnanswered,
            ],
            FieldType::Boolean => &[IsTrue, IsFalse, IsAnswered, IsUnanswered],
            FieldType::Select => &[
                Equals,
                NotEquals,
                In,
                NotIn,
                AnyOf,
                NoneOf,
                AllOf,
                IsAnswered,
                IsUnanswered,
            ],
        }
    }
}
