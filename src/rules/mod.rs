//! Rule evaluation engine.
//!
//! Decides which document templates are in scope for a loan: a named,
//! case-insensitive data bag is evaluated against each output rule's tree of
//! AND/OR condition groups. Group chains fold strictly left to right — there
//! is no boolean precedence, by contract, because persisted rules depend on
//! that evaluation order.

pub mod condition;
pub mod engine;
pub mod fields;

pub use condition::{
    ConditionGroup, ConditionLeaf, ConditionNode, DataBag, GroupTerm, JoinOp, LoanType, Operator,
    OutputRule,
};
pub use engine::{RuleEngine, Selection};
pub use fields::{FieldRegistry, FieldType};
