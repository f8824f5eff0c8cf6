//! Shared types for the assembly pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::rules::DataBag;

// ── Loan ────────────────────────────────────────────────────────────

/// A loan work item: the identifying codes plus the answer bag the rules
/// and merge engines read.
///
/// Owned exclusively by the selection stage while it is being processed;
/// downstream stages see an immutable snapshot behind an `Arc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loan {
    pub id: Uuid,
    pub loan_number: String,
    pub lender_code: String,
    pub broker_code: String,
    pub borrower_name: String,
    pub borrower_email: String,
    pub property_state: String,
    pub loan_type_id: Uuid,
    pub amount: Decimal,
    /// Additional answers; values may be nested objects or sequences used
    /// by repeat blocks.
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// Admin-only override bag. Overrides win over every other answer.
    #[serde(default)]
    pub overrides: HashMap<String, String>,
    /// Human-readable processing trace, appended by the pipeline.
    #[serde(default)]
    pub trace: Vec<String>,
}

impl Loan {
    pub fn new(loan_number: impl Into<String>, loan_type_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            loan_number: loan_number.into(),
            lender_code: String::new(),
            broker_code: String::new(),
            borrower_name: String::new(),
            borrower_email: String::new(),
            property_state: String::new(),
            loan_type_id,
            amount: Decimal::ZERO,
            fields: Map::new(),
            overrides: HashMap::new(),
            trace: Vec::new(),
        }
    }

    pub fn push_trace(&mut self, line: impl Into<String>) {
        self.trace.push(line.into());
    }

    /// Flatten the loan into the case-insensitive scalar bag the rule
    /// engine evaluates. Admin overrides are applied last.
    pub fn data_bag(&self) -> DataBag {
        let mut bag = DataBag::new();
        bag.set("LoanNumber", &self.loan_number);
        bag.set("LenderCode", &self.lender_code);
        bag.set("BrokerCode", &self.broker_code);
        bag.set("BorrowerName", &self.borrower_name);
        bag.set("BorrowerEmail", &self.borrower_email);
        bag.set("PropertyState", &self.property_state);
        bag.set("LoanAmount", self.amount.to_string());
        for (key, value) in &self.fields {
            if let Some(scalar) = scalar_text(value) {
                bag.set(key, scalar);
            }
        }
        for (key, value) in &self.overrides {
            bag.set(key, value);
        }
        bag
    }

    /// The object graph the merge engine resolves placeholders against.
    /// Named codes sit at the top level next to every extra field; admin
    /// overrides are applied last here too.
    pub fn merge_model(&self) -> Value {
        let mut model = Map::new();
        model.insert("LoanNumber".into(), json!(self.loan_number));
        model.insert("LenderCode".into(), json!(self.lender_code));
        model.insert("BrokerCode".into(), json!(self.broker_code));
        model.insert("BorrowerName".into(), json!(self.borrower_name));
        model.insert("BorrowerEmail".into(), json!(self.borrower_email));
        model.insert("PropertyState".into(), json!(self.property_state));
        model.insert("LoanAmount".into(), json!(self.amount.to_string()));
        for (key, value) in &self.fields {
            model.insert(key.clone(), value.clone());
        }
        for (key, value) in &self.overrides {
            model.insert(key.clone(), json!(value));
        }
        Value::Object(model)
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

// ── Document template ───────────────────────────────────────────────

/// Target output format of a rendered document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// The engine's native paragraph container, kept as-is.
    RichText,
    /// Converted after merge by the registered format converter.
    Pdf,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::RichText => "json",
            OutputFormat::Pdf => "pdf",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::RichText => "application/json",
            OutputFormat::Pdf => "application/pdf",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::RichText => write!(f, "rich-text"),
            OutputFormat::Pdf => write!(f, "pdf"),
        }
    }
}

/// Immutable template identity plus the raw rich-text body bytes.
/// Read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentTemplate {
    pub id: Uuid,
    pub name: String,
    pub format: OutputFormat,
    pub body: Vec<u8>,
}

impl DocumentTemplate {
    pub fn new(name: impl Into<String>, format: OutputFormat, body: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            format,
            body,
        }
    }
}

// ── Merge unit ──────────────────────────────────────────────────────

/// Lifecycle state of one (loan, template) pairing.
///
/// `Queued` is the only non-terminal state; there is no automatic retry —
/// a failed merge stays `Error` for external replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    Queued,
    Complete,
    Error,
}

impl std::fmt::Display for MergeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeStatus::Queued => write!(f, "queued"),
            MergeStatus::Complete => write!(f, "complete"),
            MergeStatus::Error => write!(f, "error"),
        }
    }
}

/// Tracks one (loan, template) render lifecycle.
///
/// Created by the selection stage, mutated only by the merge stage, read by
/// the email stage and any UI observer polling the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeUnit {
    pub id: Uuid,
    pub loan_id: Uuid,
    pub template_id: Uuid,
    pub template_name: String,
    pub format: OutputFormat,
    pub status: MergeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rendered: Option<Vec<u8>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MergeUnit {
    pub fn new(loan: &Loan, template: &DocumentTemplate) -> Self {
        Self {
            id: Uuid::new_v4(),
            loan_id: loan.id,
            template_id: template.id,
            template_name: template.name.clone(),
            format: template.format,
            status: MergeStatus::Queued,
            rendered: None,
            completed_at: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Attachment file name derived from the template name.
    pub fn file_name(&self) -> String {
        let stem: String = self
            .template_name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        format!("{stem}.{}", self.format.extension())
    }
}

// ── Work items ──────────────────────────────────────────────────────

/// Merge-stage work item: one queued unit plus snapshots of its inputs.
#[derive(Debug, Clone)]
pub struct MergeItem {
    pub unit_id: Uuid,
    pub loan: Arc<Loan>,
    pub template: Arc<DocumentTemplate>,
}

/// Email-stage work item: one outbound email per loan.
#[derive(Debug, Clone)]
pub struct EmailItem {
    pub loan_id: Uuid,
    pub recipient: String,
    pub subject: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loan() -> Loan {
        let mut loan = Loan::new("LN-1001", Uuid::new_v4());
        loan.lender_code = "ACME".into();
        loan.property_state = "CA".into();
        loan.amount = "250000".parse().unwrap();
        loan.fields.insert("IsRefinance".into(), Value::Bool(true));
        loan.fields
            .insert("Sections".into(), json!([{"Title": "One"}]));
        loan
    }

    #[test]
    fn data_bag_flattens_scalars_and_skips_structures() {
        let bag = loan().data_bag();
        assert_eq!(bag.get("propertystate"), Some("CA"));
        assert_eq!(bag.get("LoanAmount"), Some("250000"));
        assert_eq!(bag.get("isrefinance"), Some("true"));
        assert_eq!(bag.get("Sections"), None);
    }

    #[test]
    fn overrides_win_over_fields() {
        let mut loan = loan();
        loan.overrides.insert("PropertyState".into(), "NV".into());
        let bag = loan.data_bag();
        assert_eq!(bag.get("PropertyState"), Some("NV"));
        let model = loan.merge_model();
        assert_eq!(model["PropertyState"], json!("NV"));
    }

    #[test]
    fn merge_model_keeps_structured_fields() {
        let model = loan().merge_model();
        assert_eq!(model["Sections"][0]["Title"], json!("One"));
        assert_eq!(model["LoanAmount"], json!("250000"));
    }

    #[test]
    fn merge_unit_starts_queued() {
        let template = DocumentTemplate::new("CA Deed of Trust", OutputFormat::Pdf, Vec::new());
        let unit = MergeUnit::new(&loan(), &template);
        assert_eq!(unit.status, MergeStatus::Queued);
        assert!(unit.rendered.is_none());
        assert!(unit.completed_at.is_none());
        assert_eq!(unit.file_name(), "CA_Deed_of_Trust.pdf");
    }
}
