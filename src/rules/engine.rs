//! Rule evaluation.
//!
//! The engine never returns an error: malformed rules evaluate to "no
//! match", unparsable typed values fail closed, and callers always get a
//! (possibly empty) document list plus a human-readable trace.

use std::cmp::Ordering as CmpOrdering;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use crate::rules::condition::{
    ConditionGroup, ConditionLeaf, ConditionNode, DataBag, JoinOp, LoanType, Operator,
};
use crate::rules::fields::{FieldRegistry, FieldType};

/// Result of evaluating a loan type: the selected document ids
/// (deduplicated, order-preserving) and one trace line per rule.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub document_ids: Vec<Uuid>,
    pub trace: Vec<String>,
}

/// Evaluates loan types against data bags.
pub struct RuleEngine {
    registry: FieldRegistry,
}

impl RuleEngine {
    pub fn new(registry: FieldRegistry) -> Self {
        Self { registry }
    }

    /// Run every rule of `loan_type` against `bag`.
    ///
    /// Document ids are the union of the `then_documents` of every matched
    /// rule, first-seen order, deduplicated. When the loan type declares an
    /// eligible set, ids outside it are dropped and traced.
    pub fn evaluate(&self, loan_type: &LoanType, bag: &DataBag) -> Selection {
        let mut document_ids: Vec<Uuid> = Vec::new();
        let mut trace = Vec::new();

        for rule in &loan_type.rules {
            match &rule.condition {
                None => {
                    trace.push(format!("rule '{}': no condition group, skipped", rule.name));
                }
                Some(group) => {
                    let mut first_fail = None;
                    let matched = self.eval_group(group, bag, &mut first_fail);
                    if matched {
                        trace.push(format!(
                            "rule '{}': matched, selects {} document(s)",
                            rule.name,
                            rule.then_documents.len()
                        ));
                        for id in &rule.then_documents {
                            if !document_ids.contains(id) {
                                document_ids.push(*id);
                            }
                        }
                    } else {
                        let why = first_fail.unwrap_or_else(|| "empty group".to_string());
                        trace.push(format!("rule '{}': not matched ({why})", rule.name));
                    }
                }
            }
        }

        if !loan_type.eligible_documents.is_empty() {
            document_ids.retain(|id| {
                let eligible = loan_type.eligible_documents.contains(id);
                if !eligible {
                    trace.push(format!(
                        "document {id} dropped: not eligible for loan type '{}'",
                        loan_type.name
                    ));
                }
                eligible
            });
        }

        debug!(
            loan_type = %loan_type.name,
            selected = document_ids.len(),
            rules = loan_type.rules.len(),
            "rule evaluation finished"
        );
        Selection {
            document_ids,
            trace,
        }
    }

    /// Left-to-right fold over the group's terms. The first term seeds the
    /// result; each later term combines using the preceding term's join
    /// operator. No precedence: `A OR B AND C` is `(A OR B) AND C`.
    fn eval_group(
        &self,
        group: &ConditionGroup,
        bag: &DataBag,
        first_fail: &mut Option<String>,
    ) -> bool {
        let mut result = true;
        let mut incoming: Option<JoinOp> = None;
        for term in &group.terms {
            let value = self.eval_node(&term.node, bag, first_fail);
            result = match incoming {
                None => value,
                Some(JoinOp::And) => result && value,
                Some(JoinOp::Or) => result || value,
            };
            incoming = Some(term.join_to_next);
        }
        result
    }

    fn eval_node(
        &self,
        node: &ConditionNode,
        bag: &DataBag,
        first_fail: &mut Option<String>,
    ) -> bool {
        match node {
            ConditionNode::Group(group) => self.eval_group(group, bag, first_fail),
            ConditionNode::Leaf(leaf) => {
                let value = self.eval_leaf(leaf, bag);
                if !value && first_fail.is_none() {
                    *first_fail = Some(format!(
                        "first failing term: '{}' {:?} {:?}",
                        leaf.field, leaf.op, leaf.values
                    ));
                }
                value
            }
        }
    }

    /// Evaluate one field comparison. A missing key is "unanswered": only
    /// `IsUnanswered` is true, everything else (including `NotEquals` and
    /// `NotIn`) is false. Typed parse failures also evaluate false.
    fn eval_leaf(&self, leaf: &ConditionLeaf, bag: &DataBag) -> bool {
        let answer = bag.get(&leaf.field).filter(|a| !a.trim().is_empty());

        match leaf.op {
            Operator::IsUnanswered => return answer.is_none(),
            Operator::IsAnswered => return answer.is_some(),
            _ => {}
        }
        let Some(answer) = answer else {
            return false;
        };

        let field_type = self.registry.field_type(&leaf.field);
        match leaf.op {
            Operator::IsUnanswered | Operator::IsAnswered => unreachable!(),
            Operator::IsTrue => parse_bool(answer) == Some(true),
            Operator::IsFalse => parse_bool(answer) == Some(false),
            Operator::Equals => {
                first_value(leaf).is_some_and(|v| typed_eq(answer, v, field_type) == Some(true))
            }
            Operator::NotEquals => {
                first_value(leaf).is_some_and(|v| typed_eq(answer, v, field_type) == Some(false))
            }
            Operator::GreaterThan => cmp_first(leaf, answer, field_type)
                .is_some_and(|o| o == CmpOrdering::Greater),
            Operator::GreaterThanOrEqual => cmp_first(leaf, answer, field_type)
                .is_some_and(|o| o != CmpOrdering::Less),
            Operator::LessThan => {
                cmp_first(leaf, answer, field_type).is_some_and(|o| o == CmpOrdering::Less)
            }
            Operator::LessThanOrEqual => cmp_first(leaf, answer, field_type)
                .is_some_and(|o| o != CmpOrdering::Greater),
            Operator::In => any_eq(answer, &leaf.values, field_type) == Some(true),
            Operator::NotIn => any_eq(answer, &leaf.values, field_type) == Some(false),
            // Multi-select operators treat the answer as a comma-separated
            // value list.
            Operator::AnyOf => {
                let parts = split_multi(answer);
                set_match(&parts, &leaf.values, field_type, SetMode::Any)
            }
            Operator::NoneOf => {
                let parts = split_multi(answer);
                set_match(&parts, &leaf.values, field_type, SetMode::None)
            }
            Operator::AllOf => {
                let parts = split_multi(answer);
                set_match(&parts, &leaf.values, field_type, SetMode::All)
            }
        }
    }
}

fn first_value(leaf: &ConditionLeaf) -> Option<&str> {
    leaf.values.first().map(String::as_str)
}

fn cmp_first(leaf: &ConditionLeaf, answer: &str, ty: FieldType) -> Option<CmpOrdering> {
    typed_cmp(answer, first_value(leaf)?, ty)
}

/// Whether `answer` equals any of `values`. `None` when any side fails to
/// parse as the field's type (fail-closed for both `In` and `NotIn`).
fn any_eq(answer: &str, values: &[String], ty: FieldType) -> Option<bool> {
    let mut hit = false;
    for value in values {
        hit |= typed_eq(answer, value, ty)?;
    }
    Some(hit)
}

enum SetMode {
    Any,
    None,
    All,
}

fn split_multi(answer: &str) -> Vec<&str> {
    answer
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

fn set_match(parts: &[&str], values: &[String], ty: FieldType, mode: SetMode) -> bool {
    let contains = |value: &str| -> Option<bool> {
        let mut hit = false;
        for part in parts {
            hit |= typed_eq(part, value, ty)?;
        }
        Some(hit)
    };
    let mut results = Vec::with_capacity(values.len());
    for value in values {
        match contains(value) {
            Some(r) => results.push(r),
            None => return false, // fail-closed on parse failure
        }
    }
    match mode {
        SetMode::Any => results.iter().any(|r| *r),
        SetMode::None => !results.iter().any(|r| *r),
        SetMode::All => !results.is_empty() && results.iter().all(|r| *r),
    }
}

/// Typed equality. `None` signals a parse failure on either side.
fn typed_eq(left: &str, right: &str, ty: FieldType) -> Option<bool> {
    match ty {
        FieldType::Number => Some(parse_decimal(left)? == parse_decimal(right)?),
        FieldType::Date => Some(parse_date(left)? == parse_date(right)?),
        FieldType::Boolean => Some(parse_bool(left)? == parse_bool(right)?),
        FieldType::Text | FieldType::Select => {
            Some(left.trim().to_lowercase() == right.trim().to_lowercase())
        }
    }
}

/// Typed ordering. Text and select fields order lexicographically,
/// case-insensitively.
fn typed_cmp(left: &str, right: &str, ty: FieldType) -> Option<CmpOrdering> {
    match ty {
        FieldType::Number => Some(parse_decimal(left)?.cmp(&parse_decimal(right)?)),
        FieldType::Date => Some(parse_date(left)?.cmp(&parse_date(right)?)),
        FieldType::Boolean => None,
        FieldType::Text | FieldType::Select => {
            Some(left.trim().to_lowercase().cmp(&right.trim().to_lowercase()))
        }
    }
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    s.trim().replace(['$', ','], "").parse().ok()
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%m/%d/%Y"))
        .ok()
}
