use std::sync::Arc;
use std::time::Duration;

use doc_assembly::config::PipelineConfig;
use doc_assembly::pipeline::{AssemblyPipeline, MergeStatus};
use doc_assembly::rules::FieldRegistry;
use doc_assembly::store::{
    Mailer, MemoryMailer, MemoryStore, PassthroughConverter, SmtpConfig, SmtpMailer,
    seed_demo_records,
};
use doc_assembly::template::TemplateDocument;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut config = PipelineConfig::default();
    // The demo runs one loan, so a short quiet period keeps it snappy.
    config.quiet_poll_interval = Duration::from_millis(50);
    config.quiet_stable_window = Duration::from_millis(200);
    if let Ok(enabled) = std::env::var("ASSEMBLY_ENABLED") {
        config.assembly_enabled = enabled != "false" && enabled != "0";
    }

    eprintln!("📄 Document Assembly v{}", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(MemoryStore::new());
    let (loan, _template_id) = seed_demo_records(&store).await?;

    let memory_mailer = Arc::new(MemoryMailer::new());
    let mailer: Arc<dyn Mailer> = match SmtpConfig::from_env() {
        Some(smtp) => {
            eprintln!("   Mail: SMTP via {}", smtp.host);
            Arc::new(SmtpMailer::new(smtp))
        }
        None => {
            eprintln!("   Mail: captured in memory (set ASSEMBLY_SMTP_HOST for SMTP)");
            memory_mailer.clone()
        }
    };

    let pipeline = AssemblyPipeline::start(
        config,
        store,
        mailer,
        Arc::new(PassthroughConverter),
        FieldRegistry::standard(),
    );

    let loan_id = loan.id;
    let loan_number = loan.loan_number.clone();
    pipeline.enqueue_loan(loan).await?;
    eprintln!("   Loan {loan_number} queued for assembly\n");

    // Poll until the loan leaves the active set (documents emailed) or we
    // give up.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while pipeline.active_loans().contains(loan_id) {
        if tokio::time::Instant::now() >= deadline {
            eprintln!("   Timed out waiting for assembly to finish");
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    for unit in pipeline.registry().for_loan(loan_id) {
        eprintln!("── {} [{}] ──", unit.template_name, unit.status);
        if unit.status == MergeStatus::Complete {
            if let Some(bytes) = &unit.rendered {
                if let Ok(doc) = TemplateDocument::from_bytes(bytes) {
                    eprintln!("{}", doc.plain_text());
                }
            }
        } else if let Some(error) = &unit.error {
            eprintln!("error: {error}");
        }
    }

    for email in memory_mailer.sent().await {
        eprintln!(
            "📬 {} <- \"{}\" ({} attachment(s))",
            email.to,
            email.subject,
            email.attachments.len()
        );
    }

    pipeline.shutdown().await;
    Ok(())
}
