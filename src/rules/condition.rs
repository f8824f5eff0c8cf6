//! Condition tree and rule types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Comparison operator carried by a condition leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    In,
    NotIn,
    IsTrue,
    IsFalse,
    IsAnswered,
    IsUnanswered,
    AnyOf,
    NoneOf,
    AllOf,
}

/// How a group term combines with the term that follows it.
///
/// The join operator is attached to the term, not the group, so mixed
/// AND/OR chains evaluate strictly left to right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinOp {
    And,
    Or,
}

/// One node of the condition tree — a single field comparison or a nested
/// group. A tagged sum type, matched by a single recursive evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConditionNode {
    Leaf(ConditionLeaf),
    Group(ConditionGroup),
}

/// A single field comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionLeaf {
    /// Field key, resolved case-insensitively against the data bag.
    pub field: String,
    pub op: Operator,
    /// Comparison values. Empty for the unary operators.
    #[serde(default)]
    pub values: Vec<String>,
}

impl ConditionLeaf {
    pub fn new(field: impl Into<String>, op: Operator, values: Vec<String>) -> Self {
        Self {
            field: field.into(),
            op,
            values,
        }
    }
}

/// An ordered chain of terms. The first term seeds the result; each later
/// term combines with the running result using the *preceding* term's
/// `join_to_next`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionGroup {
    pub terms: Vec<GroupTerm>,
}

/// One term of a group plus the operator joining it to the next term.
/// The last term's `join_to_next` is never read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupTerm {
    pub node: ConditionNode,
    pub join_to_next: JoinOp,
}

impl ConditionGroup {
    /// Build a group from `(node, join-to-next)` pairs.
    pub fn new(terms: Vec<GroupTerm>) -> Self {
        Self { terms }
    }

    /// Convenience: a group holding a single leaf.
    pub fn single(leaf: ConditionLeaf) -> Self {
        Self {
            terms: vec![GroupTerm {
                node: ConditionNode::Leaf(leaf),
                join_to_next: JoinOp::And,
            }],
        }
    }
}

/// An output rule: when its root group evaluates true, the documents in
/// `then_documents` are selected.
///
/// Rule ids are stable once created — downstream trace and audit records
/// reference them, so they are never regenerated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputRule {
    pub id: Uuid,
    pub name: String,
    /// Document template ids selected when the rule matches.
    pub then_documents: Vec<Uuid>,
    /// Root condition group. `None` means the rule is malformed and never
    /// matches (traced, never an error).
    pub condition: Option<ConditionGroup>,
}

impl OutputRule {
    pub fn new(name: impl Into<String>, then_documents: Vec<Uuid>, condition: ConditionGroup) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            then_documents,
            condition: Some(condition),
        }
    }
}

/// A loan type: the ordered rule list the engine runs, plus the documents
/// eligible for loans of this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanType {
    pub id: Uuid,
    pub name: String,
    pub rules: Vec<OutputRule>,
    /// When non-empty, rule output is filtered to this set.
    #[serde(default)]
    pub eligible_documents: Vec<Uuid>,
}

impl LoanType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            rules: Vec::new(),
            eligible_documents: Vec::new(),
        }
    }
}

/// Case-insensitive string-keyed bag of scalar answers.
///
/// Keys are folded to lowercase on insert and lookup; values stay verbatim.
#[derive(Debug, Clone, Default)]
pub struct DataBag {
    values: HashMap<String, String>,
}

impl DataBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_lowercase(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&key.to_lowercase()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for DataBag {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut bag = DataBag::new();
        for (k, v) in iter {
            bag.set(k.as_ref(), v);
        }
        bag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_bag_is_case_insensitive() {
        let mut bag = DataBag::new();
        bag.set("PropertyState", "CA");
        assert_eq!(bag.get("propertystate"), Some("CA"));
        assert_eq!(bag.get("PROPERTYSTATE"), Some("CA"));
        assert_eq!(bag.get("other"), None);
    }

    #[test]
    fn data_bag_last_write_wins_across_casing() {
        let mut bag = DataBag::new();
        bag.set("Amount", "100");
        bag.set("amount", "200");
        assert_eq!(bag.get("Amount"), Some("200"));
        assert_eq!(bag.len(), 1);
    }

    #[test]
    fn condition_node_serde_round_trip() {
        let group = ConditionGroup::new(vec![
            GroupTerm {
                node: ConditionNode::Leaf(ConditionLeaf::new(
                    "PropertyState",
                    Operator::Equals,
                    vec!["CA".into()],
                )),
                join_to_next: JoinOp::Or,
            },
            GroupTerm {
                node: ConditionNode::Group(ConditionGroup::single(ConditionLeaf::new(
                    "LoanAmount",
                    Operator::GreaterThan,
                    vec!["100000".into()],
                ))),
                join_to_next: JoinOp::And,
            },
        ]);

        let json = serde_json::to_string(&group).unwrap();
        let back: ConditionGroup = serde_json::from_str(&json).unwrap();
        assert_eq!(back.terms.len(), 2);
        match &back.terms[1].node {
            ConditionNode::Group(inner) => assert_eq!(inner.terms.len(), 1),
            other => panic!("expected nested group, got {other:?}"),
        }
    }
}
