//! Merge stage — renders one template against one loan.
//!
//! The heavy lifting lives in [`crate::template::MergeEngine`]; this stage
//! deserializes the template body, runs the merge with the loan's model,
//! converts the output format when needed, and records the result in the
//! registry. Completion hooks fire after a successful render; a hook
//! failure is logged but never fails the unit.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::Error;
use crate::pipeline::hooks::CompletionHook;
use crate::pipeline::registry::MergeRegistry;
use crate::pipeline::types::{MergeItem, OutputFormat};
use crate::pool::WorkHandler;
use crate::queue::Shutdown;
use crate::store::FormatConverter;
use crate::template::{MergeEngine, TemplateDocument};

pub struct MergeStage {
    engine: MergeEngine,
    registry: Arc<MergeRegistry>,
    converter: Arc<dyn FormatConverter>,
    hooks: Vec<Arc<dyn CompletionHook>>,
}

impl MergeStage {
    pub fn new(
        registry: Arc<MergeRegistry>,
        converter: Arc<dyn FormatConverter>,
        hooks: Vec<Arc<dyn CompletionHook>>,
    ) -> Self {
        Self {
            engine: MergeEngine::new(),
            registry,
            converter,
            hooks,
        }
    }

    fn render(&self, item: &MergeItem) -> Result<Vec<u8>, Error> {
        let mut document = TemplateDocument::from_bytes(&item.template.body)?;
        let model = item.loan.merge_model();
        self.engine.merge(&mut document, &model);
        let rendered = document.to_bytes()?;
        match item.template.format {
            OutputFormat::RichText => Ok(rendered),
            OutputFormat::Pdf => Ok(self.converter.convert(
                &rendered,
                OutputFormat::RichText,
                OutputFormat::Pdf,
            )?),
        }
    }
}

#[async_trait]
impl WorkHandler<MergeItem> for MergeStage {
    async fn handle(&self, item: MergeItem, _shutdown: &Shutdown) -> Result<(), Error> {
        match self.render(&item) {
            Ok(bytes) => {
                info!(
                    loan = %item.loan.loan_number,
                    template = %item.template.name,
                    bytes = bytes.len(),
                    "merge complete"
                );
                self.registry.mark_complete(item.unit_id, bytes);
                if let Some(unit) = self.registry.get(item.unit_id) {
                    for hook in &self.hooks {
                        if let Err(err) = hook.on_merge_complete(&unit).await {
                            warn!(hook = hook.name(), error = %err, "completion hook failed");
                        }
                    }
                }
                Ok(())
            }
            Err(err) => {
                self.registry.mark_error(item.unit_id, &err.to_string());
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{DocumentTemplate, Loan, MergeStatus, MergeUnit};
    use crate::queue::shutdown_pair;
    use crate::store::PassthroughConverter;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct CountingHook {
        fired: AtomicUsize,
    }

    #[async_trait]
    impl CompletionHook for CountingHook {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn on_merge_complete(
            &self,
            _unit: &MergeUnit,
        ) -> Result<(), Error> {
            self.fired.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn item_for(body: Vec<u8>, registry: &MergeRegistry) -> MergeItem {
        let mut loan = Loan::new("LN-9", Uuid::new_v4());
        loan.borrower_name = "Ada Lopez".into();
        loan.amount = dec!(250000);
        let template = DocumentTemplate::new("Note", OutputFormat::RichText, body);
        let unit = MergeUnit::new(&loan, &template);
        let unit_id = unit.id;
        registry.insert(unit);
        MergeItem {
            unit_id,
            loan: Arc::new(loan),
            template: Arc::new(template),
        }
    }

    #[tokio::test]
    async fn successful_render_completes_unit_and_fires_hooks() {
        let (_handle, shutdown) = shutdown_pair();
        let registry = Arc::new(MergeRegistry::new());
        let hook = Arc::new(CountingHook {
            fired: AtomicUsize::new(0),
        });
        let stage = MergeStage::new(
            registry.clone(),
            Arc::new(PassthroughConverter),
            vec![hook.clone()],
        );

        let body = TemplateDocument::from_lines(&["Dear {BorrowerName}, amount {LoanAmount}."])
            .to_bytes()
            .unwrap();
        let item = item_for(body, &registry);
        let unit_id = item.unit_id;
        stage.handle(item, &shutdown).await.unwrap();

        let unit = registry.get(unit_id).unwrap();
        assert_eq!(unit.status, MergeStatus::Complete);
        let rendered = TemplateDocument::from_bytes(unit.rendered.as_ref().unwrap()).unwrap();
        assert_eq!(
            rendered.plain_text(),
            "Dear Ada Lopez, amount $250,000.00."
        );
        assert_eq!(hook.fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_body_marks_unit_errored() {
        let (_handle, shutdown) = shutdown_pair();
        let registry = Arc::new(MergeRegistry::new());
        let stage = MergeStage::new(registry.clone(), Arc::new(PassthroughConverter), vec![]);

        let item = item_for(b"not a document".to_vec(), &registry);
        let unit_id = item.unit_id;
        assert!(stage.handle(item, &shutdown).await.is_err());

        let unit = registry.get(unit_id).unwrap();
        assert_eq!(unit.status, MergeStatus::Error);
        assert!(unit.error.is_some());
        assert!(unit.rendered.is_none());
    }
}
