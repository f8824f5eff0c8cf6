//! External collaborators: record store, mailer, format converter.
//!
//! The core never owns persistence or transport. Records live behind the
//! async [`RecordStore`] trait, outbound mail behind [`Mailer`], and output
//! format conversion behind [`FormatConverter`]. In-memory implementations
//! back tests and the demo binary; `SmtpMailer` is the production transport.

use std::collections::HashMap;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MailAttachment, Body, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::{EmailError, MergeError, StoreError};
use crate::pipeline::types::{DocumentTemplate, Loan, OutputFormat};
use crate::rules::LoanType;

// ── Record store ────────────────────────────────────────────────────

/// Opaque key-value record store, keyed by entity type and id.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn loan_type(&self, id: Uuid) -> Result<Option<LoanType>, StoreError>;
    async fn template(&self, id: Uuid) -> Result<Option<DocumentTemplate>, StoreError>;
    async fn templates(&self) -> Result<Vec<DocumentTemplate>, StoreError>;
    async fn upsert_loan_type(&self, loan_type: LoanType) -> Result<(), StoreError>;
    async fn upsert_template(&self, template: DocumentTemplate) -> Result<(), StoreError>;
}

/// In-memory record store.
#[derive(Default)]
pub struct MemoryStore {
    loan_types: RwLock<HashMap<Uuid, LoanType>>,
    templates: RwLock<HashMap<Uuid, DocumentTemplate>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn loan_type(&self, id: Uuid) -> Result<Option<LoanType>, StoreError> {
        Ok(self.loan_types.read().await.get(&id).cloned())
    }

    async fn template(&self, id: Uuid) -> Result<Option<DocumentTemplate>, StoreError> {
        Ok(self.templates.read().await.get(&id).cloned())
    }

    async fn templates(&self) -> Result<Vec<DocumentTemplate>, StoreError> {
        Ok(self.templates.read().await.values().cloned().collect())
    }

    async fn upsert_loan_type(&self, loan_type: LoanType) -> Result<(), StoreError> {
        self.loan_types
            .write()
            .await
            .insert(loan_type.id, loan_type);
        Ok(())
    }

    async fn upsert_template(&self, template: DocumentTemplate) -> Result<(), StoreError> {
        self.templates.write().await.insert(template.id, template);
        Ok(())
    }
}

// ── Mailer ──────────────────────────────────────────────────────────

/// One attachment on an outbound email.
#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// An outbound email with attachments.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<EmailAttachment>,
}

/// Black-box send capability. Must not block the pipeline beyond its own
/// call; delivery guarantees and retries are the transport's concern.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutboundEmail) -> Result<(), EmailError>;
}

/// SMTP configuration for [`SmtpMailer`], built from environment variables.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

impl SmtpConfig {
    /// Returns `None` if `ASSEMBLY_SMTP_HOST` is not set (mail disabled).
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("ASSEMBLY_SMTP_HOST").ok()?;
        let port: u16 = std::env::var("ASSEMBLY_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);
        let username = std::env::var("ASSEMBLY_SMTP_USERNAME").unwrap_or_default();
        let password = std::env::var("ASSEMBLY_SMTP_PASSWORD").unwrap_or_default();
        let from_address =
            std::env::var("ASSEMBLY_FROM_ADDRESS").unwrap_or_else(|_| username.clone());
        Some(Self {
            host,
            port,
            username,
            password,
            from_address,
        })
    }
}

/// SMTP transport via lettre.
pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn build_message(&self, email: &OutboundEmail) -> Result<Message, EmailError> {
        let from = self
            .config
            .from_address
            .parse()
            .map_err(|e| EmailError::InvalidAddress {
                address: self.config.from_address.clone(),
                reason: format!("{e}"),
            })?;
        let to = email.to.parse().map_err(|e| EmailError::InvalidAddress {
            address: email.to.clone(),
            reason: format!("{e}"),
        })?;

        let mut multipart = MultiPart::mixed().singlepart(SinglePart::plain(email.body.clone()));
        for attachment in &email.attachments {
            let content_type = ContentType::parse(&attachment.content_type)
                .map_err(|e| EmailError::BuildFailed(format!("content type: {e}")))?;
            multipart = multipart.singlepart(
                MailAttachment::new(attachment.file_name.clone())
                    .body(Body::new(attachment.bytes.clone()), content_type),
            );
        }

        Message::builder()
            .from(from)
            .to(to)
            .subject(&email.subject)
            .multipart(multipart)
            .map_err(|e| EmailError::BuildFailed(format!("{e}")))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutboundEmail) -> Result<(), EmailError> {
        let message = self.build_message(&email)?;
        let credentials = Credentials::new(
            self.config.username.clone(),
            self.config.password.clone(),
        );
        let transport = SmtpTransport::relay(&self.config.host)
            .map_err(|e| EmailError::SendFailed(format!("SMTP relay error: {e}")))?
            .port(self.config.port)
            .credentials(credentials)
            .build();
        transport
            .send(&message)
            .map_err(|e| EmailError::SendFailed(format!("{e}")))?;
        Ok(())
    }
}

/// Mailer that records every sent email. Tests and the demo binary.
#[derive(Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<OutboundEmail>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: OutboundEmail) -> Result<(), EmailError> {
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            attachments = email.attachments.len(),
            "captured outbound email"
        );
        self.sent.lock().await.push(email);
        Ok(())
    }
}

// ── Format converter ────────────────────────────────────────────────

/// Converts a rendered body between output formats. The real converter is
/// an external service; the pipeline only needs the call boundary.
pub trait FormatConverter: Send + Sync {
    fn convert(
        &self,
        body: &[u8],
        from: OutputFormat,
        to: OutputFormat,
    ) -> Result<Vec<u8>, MergeError>;
}

/// Stand-in converter that passes bytes through unchanged.
pub struct PassthroughConverter;

impl FormatConverter for PassthroughConverter {
    fn convert(
        &self,
        body: &[u8],
        from: OutputFormat,
        to: OutputFormat,
    ) -> Result<Vec<u8>, MergeError> {
        if from != to {
            tracing::debug!(%from, %to, "passthrough conversion, bytes unchanged");
        }
        Ok(body.to_vec())
    }
}

/// Seed a memory store with one loan and its collaborating records.
/// Shared by the demo binary and integration tests.
pub async fn seed_demo_records(store: &MemoryStore) -> Result<(Loan, Uuid), StoreError> {
    use crate::rules::{ConditionGroup, ConditionLeaf, Operator, OutputRule};
    use crate::template::TemplateDocument;

    let body = TemplateDocument::from_lines(&[
        "LOAN AGREEMENT {LoanNumber}",
        "Borrower: {BorrowerName}",
        "Principal amount: {LoanAmount}",
        "[[IF PropertyState == \"CA\"]]",
        "California per diem interest disclosure applies.",
        "[[END]]",
        "[[FOREACH item in Sections]]",
        "Rider: {item.Title}",
        "[[ENDFOREACH]]",
    ])
    .to_bytes()
    .map_err(|e| StoreError::Backend(e.to_string()))?;

    let template = DocumentTemplate::new("Loan Agreement", OutputFormat::RichText, body);
    let template_id = template.id;

    let mut loan_type = LoanType::new("Conventional");
    loan_type.rules.push(OutputRule::new(
        "california-docs",
        vec![template_id],
        ConditionGroup::single(ConditionLeaf::new(
            "PropertyState",
            Operator::Equals,
            vec!["CA".into()],
        )),
    ));
    let loan_type_id = loan_type.id;

    store.upsert_template(template).await?;
    store.upsert_loan_type(loan_type).await?;

    let mut loan = Loan::new("LN-1001", loan_type_id);
    loan.lender_code = "ACME".into();
    loan.broker_code = "BRK-7".into();
    loan.borrower_name = "Ada Lopez".into();
    loan.borrower_email = "ada@example.com".into();
    loan.property_state = "CA".into();
    loan.amount = "250000".parse().unwrap_or_default();
    loan.fields.insert(
        "Sections".into(),
        serde_json::json!([{"Title": "Prepayment"}, {"Title": "Escrow"}]),
    );
    Ok((loan, template_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips_records() {
        let store = MemoryStore::new();
        let (loan, template_id) = seed_demo_records(&store).await.unwrap();

        let loan_type = store.loan_type(loan.loan_type_id).await.unwrap().unwrap();
        assert_eq!(loan_type.rules.len(), 1);

        let template = store.template(template_id).await.unwrap().unwrap();
        assert_eq!(template.name, "Loan Agreement");
        assert_eq!(store.templates().await.unwrap().len(), 1);

        assert!(store.template(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_mailer_captures_sends() {
        let mailer = MemoryMailer::new();
        mailer
            .send(OutboundEmail {
                to: "a@b.test".into(),
                subject: "s".into(),
                body: "b".into(),
                attachments: vec![],
            })
            .await
            .unwrap();
        assert_eq!(mailer.sent().await.len(), 1);
    }

    #[test]
    fn smtp_message_builds_with_attachments() {
        let mailer = SmtpMailer::new(SmtpConfig {
            host: "smtp.example.com".into(),
            port: 587,
            username: "docs@example.com".into(),
            password: "secret".into(),
            from_address: "docs@example.com".into(),
        });
        let message = mailer.build_message(&OutboundEmail {
            to: "ada@example.com".into(),
            subject: "Your documents".into(),
            body: "Attached.".into(),
            attachments: vec![EmailAttachment {
                file_name: "Loan_Agreement.pdf".into(),
                content_type: "application/pdf".into(),
                bytes: vec![1, 2, 3],
            }],
        });
        assert!(message.is_ok());
    }

    #[test]
    fn smtp_invalid_recipient_is_an_address_error() {
        let mailer = SmtpMailer::new(SmtpConfig {
            host: "smtp.example.com".into(),
            port: 587,
            username: String::new(),
            password: String::new(),
            from_address: "docs@example.com".into(),
        });
        let err = mailer
            .build_message(&OutboundEmail {
                to: "not-an-address".into(),
                subject: "s".into(),
                body: "b".into(),
                attachments: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, EmailError::InvalidAddress { .. }));
    }
}
