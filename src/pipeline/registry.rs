//! Shared concurrent registries.
//!
//! The merge-unit registry and the active-loan registry are the only
//! concurrently-mutated shared structures in the pipeline. Both are lock-free
//! maps because workers of several stages touch them simultaneously; state
//! transitions published here are the pipeline's whole cross-stage contract.

use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::pipeline::types::{Loan, MergeStatus, MergeUnit};

/// Registry of merge units by id. UI observers poll snapshots of it.
#[derive(Default)]
pub struct MergeRegistry {
    units: DashMap<Uuid, MergeUnit>,
}

impl MergeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, unit: MergeUnit) {
        debug!(unit = %unit.id, loan = %unit.loan_id, template = %unit.template_name, "merge unit registered");
        self.units.insert(unit.id, unit);
    }

    pub fn get(&self, id: Uuid) -> Option<MergeUnit> {
        self.units.get(&id).map(|u| u.clone())
    }

    /// Transition a unit to `Complete` with its rendered bytes. Returns
    /// false when the unit is unknown.
    pub fn mark_complete(&self, id: Uuid, rendered: Vec<u8>) -> bool {
        match self.units.get_mut(&id) {
            Some(mut unit) => {
                unit.status = MergeStatus::Complete;
                unit.rendered = Some(rendered);
                unit.completed_at = Some(Utc::now());
                unit.error = None;
                true
            }
            None => false,
        }
    }

    /// Transition a unit to `Error`. Terminal; external replay only.
    pub fn mark_error(&self, id: Uuid, reason: &str) -> bool {
        match self.units.get_mut(&id) {
            Some(mut unit) => {
                unit.status = MergeStatus::Error;
                unit.completed_at = Some(Utc::now());
                unit.error = Some(reason.to_string());
                true
            }
            None => false,
        }
    }

    /// Every unit belonging to a loan, in no particular order.
    pub fn for_loan(&self, loan_id: Uuid) -> Vec<MergeUnit> {
        self.units
            .iter()
            .filter(|u| u.loan_id == loan_id)
            .map(|u| u.clone())
            .collect()
    }

    /// Completed units for a loan, oldest completion first so attachment
    /// order is stable.
    pub fn completed_for_loan(&self, loan_id: Uuid) -> Vec<MergeUnit> {
        let mut units: Vec<MergeUnit> = self
            .units
            .iter()
            .filter(|u| u.loan_id == loan_id && u.status == MergeStatus::Complete)
            .map(|u| u.clone())
            .collect();
        units.sort_by_key(|u| u.completed_at);
        units
    }

    /// Count of completed units for a loan — the quiet-period probe.
    pub fn complete_count(&self, loan_id: Uuid) -> usize {
        self.units
            .iter()
            .filter(|u| u.loan_id == loan_id && u.status == MergeStatus::Complete)
            .count()
    }

    /// Drop the rendered bytes of every unit belonging to a loan, keeping
    /// status, timestamps, and error text. Called once the email stage has
    /// shipped the attachments so the registry does not pin document payloads
    /// for the life of the process.
    pub fn drop_rendered(&self, loan_id: Uuid) {
        for mut unit in self.units.iter_mut() {
            if unit.loan_id == loan_id {
                unit.rendered = None;
            }
        }
    }

    /// Snapshot of every unit, for UI polling.
    pub fn snapshot(&self) -> Vec<MergeUnit> {
        self.units.iter().map(|u| u.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Loans currently in flight, inserted by selection and removed once the
/// email stage finishes with them.
#[derive(Default)]
pub struct ActiveLoans {
    loans: DashMap<Uuid, Loan>,
    email_claims: DashMap<Uuid, ()>,
}

impl ActiveLoans {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, loan: Loan) {
        self.loans.insert(loan.id, loan);
    }

    pub fn get(&self, id: Uuid) -> Option<Loan> {
        self.loans.get(&id).map(|l| l.clone())
    }

    /// Claim the single email slot for a loan's current assembly cycle.
    /// Returns true for the first caller; later callers get false until the
    /// loan is removed (or the claim explicitly released), so each cycle
    /// produces exactly one email even when many merges complete.
    pub fn claim_email(&self, id: Uuid) -> bool {
        self.email_claims.insert(id, ()).is_none()
    }

    /// Undo a claim whose email item never made it onto the queue.
    pub fn release_email_claim(&self, id: Uuid) {
        self.email_claims.remove(&id);
    }

    /// Removing a loan ends its cycle: the email claim goes with it, so a
    /// re-submitted loan gets a fresh email.
    pub fn remove(&self, id: Uuid) -> Option<Loan> {
        self.email_claims.remove(&id);
        self.loans.remove(&id).map(|(_, loan)| loan)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.loans.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.loans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loans.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{DocumentTemplate, OutputFormat};

    fn unit(loan_id: Uuid) -> MergeUnit {
        let mut loan = Loan::new("LN-1", Uuid::new_v4());
        loan.id = loan_id;
        let template = DocumentTemplate::new("Note", OutputFormat::RichText, Vec::new());
        MergeUnit::new(&loan, &template)
    }

    #[test]
    fn complete_transition_sets_bytes_and_timestamp() {
        let registry = MergeRegistry::new();
        let loan_id = Uuid::new_v4();
        let u = unit(loan_id);
        let id = u.id;
        registry.insert(u);

        assert!(registry.mark_complete(id, vec![1, 2, 3]));
        let unit = registry.get(id).unwrap();
        assert_eq!(unit.status, MergeStatus::Complete);
        assert_eq!(unit.rendered.as_deref(), Some(&[1u8, 2, 3][..]));
        assert!(unit.completed_at.is_some());
        assert_eq!(registry.complete_count(loan_id), 1);
    }

    #[test]
    fn error_transition_keeps_reason() {
        let registry = MergeRegistry::new();
        let u = unit(Uuid::new_v4());
        let id = u.id;
        let loan_id = u.loan_id;
        registry.insert(u);

        assert!(registry.mark_error(id, "conversion failed"));
        let unit = registry.get(id).unwrap();
        assert_eq!(unit.status, MergeStatus::Error);
        assert_eq!(unit.error.as_deref(), Some("conversion failed"));
        // Errored units never count as complete.
        assert_eq!(registry.complete_count(loan_id), 0);
        assert!(registry.completed_for_loan(loan_id).is_empty());
    }

    #[test]
    fn unknown_unit_transitions_return_false() {
        let registry = MergeRegistry::new();
        assert!(!registry.mark_complete(Uuid::new_v4(), Vec::new()));
        assert!(!registry.mark_error(Uuid::new_v4(), "x"));
    }

    #[test]
    fn per_loan_queries_ignore_other_loans() {
        let registry = MergeRegistry::new();
        let loan_a = Uuid::new_v4();
        let loan_b = Uuid::new_v4();
        for _ in 0..3 {
            registry.insert(unit(loan_a));
        }
        registry.insert(unit(loan_b));

        assert_eq!(registry.for_loan(loan_a).len(), 3);
        assert_eq!(registry.for_loan(loan_b).len(), 1);
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn drop_rendered_keeps_status_and_timestamps() {
        let registry = MergeRegistry::new();
        let loan_a = Uuid::new_v4();
        let loan_b = Uuid::new_v4();
        let a = unit(loan_a);
        let b = unit(loan_b);
        let (a_id, b_id) = (a.id, b.id);
        registry.insert(a);
        registry.insert(b);
        registry.mark_complete(a_id, vec![1, 2, 3]);
        registry.mark_complete(b_id, vec![4]);

        registry.drop_rendered(loan_a);

        let a = registry.get(a_id).unwrap();
        assert_eq!(a.status, MergeStatus::Complete);
        assert!(a.rendered.is_none());
        assert!(a.completed_at.is_some());
        // Other loans' payloads are untouched.
        assert_eq!(registry.get(b_id).unwrap().rendered.as_deref(), Some(&[4u8][..]));
        // Counts still reflect completion after the payload is gone.
        assert_eq!(registry.complete_count(loan_a), 1);
    }

    #[test]
    fn email_claim_is_per_cycle() {
        let active = ActiveLoans::new();
        let loan = Loan::new("LN-7", Uuid::new_v4());
        let id = loan.id;
        active.insert(loan.clone());

        assert!(active.claim_email(id));
        assert!(!active.claim_email(id));

        // Ending the cycle frees the slot for the next submission.
        active.remove(id);
        active.insert(loan);
        assert!(active.claim_email(id));

        active.release_email_claim(id);
        assert!(active.claim_email(id));
    }

    #[test]
    fn active_loans_insert_remove() {
        let active = ActiveLoans::new();
        let loan = Loan::new("LN-9", Uuid::new_v4());
        let id = loan.id;
        active.insert(loan);
        assert!(active.contains(id));
        assert_eq!(active.get(id).unwrap().loan_number, "LN-9");
        assert_eq!(active.remove(id).unwrap().loan_number, "LN-9");
        assert!(active.is_empty());
    }
}
