//! Selection stage — decides which documents a loan gets.
//!
//! Consumes loan items, runs the rule engine against the loan's data bag,
//! resolves the selected template ids, and fans out one queued merge unit
//! per resolved template. An unresolvable loan type aborts the loan; an
//! unresolvable template id is traced and skipped so the remaining
//! documents still assemble.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, SelectionError};
use crate::pipeline::registry::{ActiveLoans, MergeRegistry};
use crate::pipeline::types::{DocumentTemplate, Loan, MergeItem, MergeUnit};
use crate::pool::WorkHandler;
use crate::queue::{Shutdown, WorkQueue};
use crate::rules::RuleEngine;
use crate::store::RecordStore;

pub struct SelectionStage {
    store: Arc<dyn RecordStore>,
    engine: RuleEngine,
    registry: Arc<MergeRegistry>,
    active: Arc<ActiveLoans>,
    merge_queue: Arc<WorkQueue<MergeItem>>,
    enabled: bool,
    /// Stage-owned template cache, constructed once at pipeline start.
    template_cache: DashMap<Uuid, Arc<DocumentTemplate>>,
}

impl SelectionStage {
    pub fn new(
        store: Arc<dyn RecordStore>,
        engine: RuleEngine,
        registry: Arc<MergeRegistry>,
        active: Arc<ActiveLoans>,
        merge_queue: Arc<WorkQueue<MergeItem>>,
        enabled: bool,
    ) -> Self {
        Self {
            store,
            engine,
            registry,
            active,
            merge_queue,
            enabled,
            template_cache: DashMap::new(),
        }
    }

    async fn resolve_template(&self, id: Uuid) -> Result<Option<Arc<DocumentTemplate>>, Error> {
        if let Some(cached) = self.template_cache.get(&id) {
            return Ok(Some(Arc::clone(&cached)));
        }
        match self.store.template(id).await? {
            Some(template) => {
                let template = Arc::new(template);
                self.template_cache.insert(id, Arc::clone(&template));
                Ok(Some(template))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl WorkHandler<Loan> for SelectionStage {
    async fn handle(&self, mut loan: Loan, _shutdown: &Shutdown) -> Result<(), Error> {
        if !self.enabled {
            debug!(loan = %loan.loan_number, "document assembly disabled, loan skipped");
            return Ok(());
        }

        let Some(loan_type) = self.store.loan_type(loan.loan_type_id).await? else {
            loan.push_trace(format!(
                "selection aborted: loan type {} not found",
                loan.loan_type_id
            ));
            warn!(loan = %loan.loan_number, loan_type = %loan.loan_type_id, "loan type not found");
            return Err(SelectionError::LoanTypeNotFound {
                id: loan.loan_type_id,
            }
            .into());
        };

        let bag = loan.data_bag();
        let selection = self.engine.evaluate(&loan_type, &bag);
        loan.trace.extend(selection.trace.iter().cloned());

        if selection.document_ids.is_empty() {
            loan.push_trace("no documents selected; nothing to assemble");
            info!(loan = %loan.loan_number, "selection produced no documents");
            return Ok(());
        }

        let mut templates = Vec::with_capacity(selection.document_ids.len());
        for document_id in &selection.document_ids {
            match self.resolve_template(*document_id).await? {
                Some(template) => templates.push(template),
                None => {
                    loan.push_trace(format!("template {document_id} not found, skipped"));
                    warn!(loan = %loan.loan_number, template = %document_id, "selected template not found");
                }
            }
        }
        if templates.is_empty() {
            loan.push_trace("no selected templates could be resolved");
            warn!(loan = %loan.loan_number, "selection resolved zero templates");
            return Ok(());
        }

        loan.push_trace(format!("queuing {} merge unit(s)", templates.len()));
        self.active.insert(loan.clone());
        let loan = Arc::new(loan);
        for template in templates {
            let unit = MergeUnit::new(&loan, &template);
            let unit_id = unit.id;
            self.registry.insert(unit);
            self.merge_queue
                .enqueue(MergeItem {
                    unit_id,
                    loan: Arc::clone(&loan),
                    template,
                })
                .await?;
        }
        info!(loan = %loan.loan_number, "selection complete");
        Ok(())
    }
}
