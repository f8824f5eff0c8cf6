//! Email stage — delivers a loan's finished documents to the borrower.
//!
//! A loan can still have merges in flight when its email item arrives, so
//! the stage first waits for the loan's completed-merge count to go quiet:
//! it polls the registry and sends once the count has held steady for the
//! configured window, or once the maximum wait elapses. Send failures are
//! logged rather than raised so one bad mailbox never poisons a worker.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::Error;
use crate::pipeline::archive;
use crate::pipeline::registry::{ActiveLoans, MergeRegistry};
use crate::pipeline::types::{EmailItem, MergeUnit};
use crate::pool::WorkHandler;
use crate::queue::Shutdown;
use crate::store::{EmailAttachment, Mailer, OutboundEmail};

pub struct EmailStage {
    registry: Arc<MergeRegistry>,
    active: Arc<ActiveLoans>,
    mailer: Arc<dyn Mailer>,
    config: PipelineConfig,
}

impl EmailStage {
    pub fn new(
        registry: Arc<MergeRegistry>,
        active: Arc<ActiveLoans>,
        mailer: Arc<dyn Mailer>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            registry,
            active,
            mailer,
            config,
        }
    }

    /// Poll until the loan's completed-merge count holds steady for the
    /// stable window, the max wait elapses, or shutdown is raised.
    async fn wait_for_quiet(&self, item: &EmailItem, shutdown: &Shutdown) {
        let started = Instant::now();
        let mut last_count = self.registry.complete_count(item.loan_id);
        let mut stable_since = Instant::now();
        loop {
            if started.elapsed() >= self.config.quiet_max_wait {
                warn!(loan = %item.loan_id, "quiet period hit max wait, sending what is complete");
                return;
            }
            if shutdown.is_raised() {
                return;
            }
            tokio::time::sleep(self.config.quiet_poll_interval).await;
            let count = self.registry.complete_count(item.loan_id);
            if count != last_count {
                last_count = count;
                stable_since = Instant::now();
            } else if stable_since.elapsed() >= self.config.quiet_stable_window {
                return;
            }
        }
    }

    fn attachments_for(&self, units: &[MergeUnit]) -> Vec<EmailAttachment> {
        let mut attachments = Vec::new();
        let mut total_bytes = 0usize;
        for unit in units {
            let Some(bytes) = &unit.rendered else { continue };
            if attachments.len() >= self.config.max_attachments {
                warn!(unit = %unit.id, "attachment count cap reached, document dropped from email");
                continue;
            }
            if total_bytes + bytes.len() > self.config.max_attachment_bytes {
                warn!(unit = %unit.id, "attachment size cap reached, document dropped from email");
                continue;
            }
            total_bytes += bytes.len();
            attachments.push(EmailAttachment {
                file_name: unit.file_name(),
                content_type: unit.format.content_type().to_string(),
                bytes: bytes.clone(),
            });
        }
        attachments
    }
}

#[async_trait]
impl WorkHandler<EmailItem> for EmailStage {
    async fn handle(&self, item: EmailItem, shutdown: &Shutdown) -> Result<(), Error> {
        self.wait_for_quiet(&item, shutdown).await;

        let completed = self.registry.completed_for_loan(item.loan_id);
        if completed.is_empty() {
            warn!(loan = %item.loan_id, "no completed documents, email skipped");
            self.active.remove(item.loan_id);
            return Ok(());
        }

        let attachments = self.attachments_for(&completed);
        let document_count = attachments.len();
        let attachments = if self.config.bundle_archive && attachments.len() > 1 {
            match archive::bundle(&attachments, &self.config.archive_name) {
                Ok(bundled) => vec![bundled],
                Err(err) => {
                    warn!(loan = %item.loan_id, error = %err, "archive build failed, sending individual attachments");
                    attachments
                }
            }
        } else {
            attachments
        };

        let email = OutboundEmail {
            to: item.recipient.clone(),
            subject: item.subject.clone(),
            body: format!("Please find {document_count} document(s) attached for your loan."),
            attachments,
        };
        match self.mailer.send(email).await {
            Ok(()) => info!(loan = %item.loan_id, to = %item.recipient, "documents emailed"),
            Err(err) => {
                warn!(loan = %item.loan_id, to = %item.recipient, error = %err, "email send failed")
            }
        }
        // The loan's cycle is over: free the rendered payloads and let a
        // re-submission start fresh.
        self.registry.drop_rendered(item.loan_id);
        self.active.remove(item.loan_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{DocumentTemplate, Loan, OutputFormat};
    use crate::queue::shutdown_pair;
    use crate::store::MemoryMailer;
    use std::time::Duration;
    use uuid::Uuid;

    fn quick_config() -> PipelineConfig {
        PipelineConfig {
            quiet_poll_interval: Duration::from_millis(5),
            quiet_stable_window: Duration::from_millis(20),
            quiet_max_wait: Duration::from_millis(500),
            ..PipelineConfig::default()
        }
    }

    fn completed_unit(registry: &MergeRegistry, loan: &Loan, name: &str) -> Uuid {
        let template = DocumentTemplate::new(name, OutputFormat::RichText, Vec::new());
        let unit = MergeUnit::new(loan, &template);
        let id = unit.id;
        registry.insert(unit);
        registry.mark_complete(id, format!("{name} body").into_bytes());
        id
    }

    fn stage(
        registry: Arc<MergeRegistry>,
        active: Arc<ActiveLoans>,
        mailer: Arc<MemoryMailer>,
        config: PipelineConfig,
    ) -> EmailStage {
        EmailStage::new(registry, active, mailer, config)
    }

    #[tokio::test]
    async fn bundles_multiple_documents_into_one_archive() {
        let (_handle, shutdown) = shutdown_pair();
        let registry = Arc::new(MergeRegistry::new());
        let active = Arc::new(ActiveLoans::new());
        let mailer = Arc::new(MemoryMailer::new());

        let loan = Loan::new("LN-1", Uuid::new_v4());
        active.insert(loan.clone());
        completed_unit(&registry, &loan, "Note");
        completed_unit(&registry, &loan, "Deed");

        let stage = stage(registry, active.clone(), mailer.clone(), quick_config());
        stage
            .handle(
                EmailItem {
                    loan_id: loan.id,
                    recipient: "ada@example.com".into(),
                    subject: "Loan documents for LN-1".into(),
                },
                &shutdown,
            )
            .await
            .unwrap();

        let sent = mailer.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].attachments.len(), 1);
        assert_eq!(sent[0].attachments[0].file_name, "loan-documents.zip");
        assert_eq!(sent[0].attachments[0].content_type, "application/zip");
        assert!(!active.contains(loan.id));
    }

    #[tokio::test]
    async fn single_document_is_sent_unbundled() {
        let (_handle, shutdown) = shutdown_pair();
        let registry = Arc::new(MergeRegistry::new());
        let active = Arc::new(ActiveLoans::new());
        let mailer = Arc::new(MemoryMailer::new());

        let loan = Loan::new("LN-2", Uuid::new_v4());
        active.insert(loan.clone());
        completed_unit(&registry, &loan, "Note");

        let stage = stage(registry, active, mailer.clone(), quick_config());
        stage
            .handle(
                EmailItem {
                    loan_id: loan.id,
                    recipient: "ada@example.com".into(),
                    subject: "s".into(),
                },
                &shutdown,
            )
            .await
            .unwrap();

        let sent = mailer.sent().await;
        assert_eq!(sent[0].attachments.len(), 1);
        assert_eq!(sent[0].attachments[0].file_name, "Note.json");
    }

    #[tokio::test]
    async fn attachment_count_cap_is_enforced() {
        let (_handle, shutdown) = shutdown_pair();
        let registry = Arc::new(MergeRegistry::new());
        let active = Arc::new(ActiveLoans::new());
        let mailer = Arc::new(MemoryMailer::new());

        let loan = Loan::new("LN-3", Uuid::new_v4());
        active.insert(loan.clone());
        for i in 0..4 {
            completed_unit(&registry, &loan, &format!("Doc{i}"));
        }

        let config = PipelineConfig {
            max_attachments: 2,
            bundle_archive: false,
            ..quick_config()
        };
        let stage = stage(registry, active, mailer.clone(), config);
        stage
            .handle(
                EmailItem {
                    loan_id: loan.id,
                    recipient: "ada@example.com".into(),
                    subject: "s".into(),
                },
                &shutdown,
            )
            .await
            .unwrap();

        assert_eq!(mailer.sent().await[0].attachments.len(), 2);
    }

    #[tokio::test]
    async fn rendered_payloads_are_released_after_send() {
        let (_handle, shutdown) = shutdown_pair();
        let registry = Arc::new(MergeRegistry::new());
        let active = Arc::new(ActiveLoans::new());
        let mailer = Arc::new(MemoryMailer::new());

        let loan = Loan::new("LN-6", Uuid::new_v4());
        active.insert(loan.clone());
        let unit_id = completed_unit(&registry, &loan, "Note");

        let stage = stage(registry.clone(), active, mailer.clone(), quick_config());
        stage
            .handle(
                EmailItem {
                    loan_id: loan.id,
                    recipient: "ada@example.com".into(),
                    subject: "s".into(),
                },
                &shutdown,
            )
            .await
            .unwrap();

        assert_eq!(mailer.sent().await.len(), 1);
        // Status survives; the document bytes do not.
        let unit = registry.get(unit_id).unwrap();
        assert_eq!(unit.status, crate::pipeline::types::MergeStatus::Complete);
        assert!(unit.rendered.is_none());
    }

    #[tokio::test]
    async fn no_completed_documents_means_no_email() {
        let (_handle, shutdown) = shutdown_pair();
        let registry = Arc::new(MergeRegistry::new());
        let active = Arc::new(ActiveLoans::new());
        let mailer = Arc::new(MemoryMailer::new());

        let loan = Loan::new("LN-4", Uuid::new_v4());
        active.insert(loan.clone());

        let stage = stage(registry, active.clone(), mailer.clone(), quick_config());
        stage
            .handle(
                EmailItem {
                    loan_id: loan.id,
                    recipient: "ada@example.com".into(),
                    subject: "s".into(),
                },
                &shutdown,
            )
            .await
            .unwrap();

        assert!(mailer.sent().await.is_empty());
        assert!(!active.contains(loan.id));
    }

    #[tokio::test]
    async fn quiet_period_waits_for_late_merges() {
        let (_handle, shutdown) = shutdown_pair();
        let registry = Arc::new(MergeRegistry::new());
        let active = Arc::new(ActiveLoans::new());
        let mailer = Arc::new(MemoryMailer::new());

        let loan = Loan::new("LN-5", Uuid::new_v4());
        active.insert(loan.clone());
        completed_unit(&registry, &loan, "Note");

        // A second merge lands while the email stage is polling.
        let late_registry = registry.clone();
        let late_loan = loan.clone();
        let late = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            completed_unit(&late_registry, &late_loan, "Deed");
        });

        let config = PipelineConfig {
            bundle_archive: false,
            ..quick_config()
        };
        let stage = stage(registry, active, mailer.clone(), config);
        stage
            .handle(
                EmailItem {
                    loan_id: loan.id,
                    recipient: "ada@example.com".into(),
                    subject: "s".into(),
                },
                &shutdown,
            )
            .await
            .unwrap();
        late.await.unwrap();

        assert_eq!(mailer.sent().await[0].attachments.len(), 2);
    }
}
