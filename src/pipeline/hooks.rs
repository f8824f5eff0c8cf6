//! Completion hooks.
//!
//! The merge stage invokes every registered hook after a unit reaches
//! `Complete`. Hooks are isolated: a failing hook is logged and never
//! affects the unit's status or the other hooks.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::Error;
use crate::pipeline::registry::ActiveLoans;
use crate::pipeline::types::{EmailItem, MergeUnit};
use crate::queue::WorkQueue;

/// Hook invoked once per successfully merged unit.
#[async_trait]
pub trait CompletionHook: Send + Sync {
    fn name(&self) -> &'static str;
    async fn on_merge_complete(&self, unit: &MergeUnit) -> Result<(), Error>;
}

/// The hook that feeds the email stage: enqueues at most one email item per
/// loan cycle, no matter how many of its units complete. The claim lives in
/// [`ActiveLoans`] and falls away when the email stage removes the loan, so a
/// re-submitted loan earns a fresh email.
pub struct EmailQueueHook {
    email_queue: Arc<WorkQueue<EmailItem>>,
    active: Arc<ActiveLoans>,
}

impl EmailQueueHook {
    pub fn new(email_queue: Arc<WorkQueue<EmailItem>>, active: Arc<ActiveLoans>) -> Self {
        Self {
            email_queue,
            active,
        }
    }
}

#[async_trait]
impl CompletionHook for EmailQueueHook {
    fn name(&self) -> &'static str {
        "email-queue"
    }

    async fn on_merge_complete(&self, unit: &MergeUnit) -> Result<(), Error> {
        // First completed unit for the loan wins; later ones are no-ops.
        if !self.active.claim_email(unit.loan_id) {
            return Ok(());
        }

        let Some(loan) = self.active.get(unit.loan_id) else {
            warn!(loan = %unit.loan_id, "completed merge for a loan no longer active, no email queued");
            self.active.release_email_claim(unit.loan_id);
            return Ok(());
        };
        if loan.borrower_email.is_empty() {
            warn!(loan = %loan.loan_number, "loan has no borrower email, no email queued");
            return Ok(());
        }

        let item = EmailItem {
            loan_id: loan.id,
            recipient: loan.borrower_email.clone(),
            subject: format!("Loan documents for {}", loan.loan_number),
        };
        if let Err(e) = self.email_queue.enqueue(item).await {
            // Undo the claim so a later completion can re-queue.
            self.active.release_email_claim(unit.loan_id);
            return Err(e.into());
        }
        Ok(())
    }
}
