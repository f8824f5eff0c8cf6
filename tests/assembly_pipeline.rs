//! End-to-end flow: loan in, rendered documents and one email out.

use std::sync::Arc;
use std::time::Duration;

use doc_assembly::config::PipelineConfig;
use doc_assembly::pipeline::{AssemblyPipeline, MergeStatus};
use doc_assembly::rules::FieldRegistry;
use doc_assembly::store::{MemoryMailer, MemoryStore, PassthroughConverter, seed_demo_records};
use doc_assembly::template::TemplateDocument;

fn test_config() -> PipelineConfig {
    PipelineConfig {
        quiet_poll_interval: Duration::from_millis(10),
        quiet_stable_window: Duration::from_millis(40),
        quiet_max_wait: Duration::from_secs(5),
        ..PipelineConfig::default()
    }
}

#[tokio::test]
async fn loan_flows_from_selection_to_email() {
    let store = Arc::new(MemoryStore::new());
    let (loan, _template_id) = seed_demo_records(&store).await.unwrap();
    let mailer = Arc::new(MemoryMailer::new());

    let pipeline = AssemblyPipeline::start(
        test_config(),
        store,
        mailer.clone(),
        Arc::new(PassthroughConverter),
        FieldRegistry::standard(),
    );

    let loan_id = loan.id;
    pipeline.enqueue_loan(loan).await.unwrap();

    // Wait for the email stage to finish with the loan.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let sent = mailer.sent().await;
        if !sent.is_empty() && !pipeline.active_loans().contains(loan_id) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "pipeline did not finish in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let units = pipeline.registry().for_loan(loan_id);
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].status, MergeStatus::Complete);
    // Document bytes are released once they have been emailed.
    assert!(units[0].rendered.is_none());

    let sent = mailer.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "ada@example.com");
    assert_eq!(sent[0].subject, "Loan documents for LN-1001");
    assert_eq!(sent[0].attachments.len(), 1);

    let rendered = TemplateDocument::from_bytes(&sent[0].attachments[0].bytes).unwrap();
    let text = rendered.plain_text();
    assert!(text.contains("LOAN AGREEMENT LN-1001"));
    assert!(text.contains("Borrower: Ada Lopez"));
    assert!(text.contains("Principal amount: $250,000.00"));
    assert!(text.contains("California per diem interest disclosure applies."));
    assert!(text.contains("Rider: Prepayment"));
    assert!(text.contains("Rider: Escrow"));
    // Markers themselves never survive a merge.
    assert!(!text.contains("[["));

    pipeline.shutdown().await;
}

#[tokio::test]
async fn resubmitted_loan_gets_a_second_email() {
    let store = Arc::new(MemoryStore::new());
    let (loan, _template_id) = seed_demo_records(&store).await.unwrap();
    let mailer = Arc::new(MemoryMailer::new());

    let pipeline = AssemblyPipeline::start(
        test_config(),
        store,
        mailer.clone(),
        Arc::new(PassthroughConverter),
        FieldRegistry::standard(),
    );

    let loan_id = loan.id;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    for expected_emails in 1..=2usize {
        pipeline.enqueue_loan(loan.clone()).await.unwrap();
        loop {
            let sent = mailer.sent().await;
            if sent.len() >= expected_emails && !pipeline.active_loans().contains(loan_id) {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "cycle {expected_emails} did not finish in time"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    let sent = mailer.sent().await;
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|e| e.to == "ada@example.com"));
    // The second email carries only the re-run's document; the first
    // cycle's payload was already released.
    assert_eq!(sent[1].attachments.len(), 1);
    assert_eq!(pipeline.registry().for_loan(loan_id).len(), 2);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn non_matching_loan_never_emails() {
    let store = Arc::new(MemoryStore::new());
    let (mut loan, _template_id) = seed_demo_records(&store).await.unwrap();
    loan.property_state = "TX".into();
    let mailer = Arc::new(MemoryMailer::new());

    let pipeline = AssemblyPipeline::start(
        test_config(),
        store,
        mailer.clone(),
        Arc::new(PassthroughConverter),
        FieldRegistry::standard(),
    );

    let loan_id = loan.id;
    pipeline.enqueue_loan(loan).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(pipeline.registry().for_loan(loan_id).is_empty());
    assert!(!pipeline.active_loans().contains(loan_id));
    assert!(mailer.sent().await.is_empty());

    pipeline.shutdown().await;
}
