//! Configuration types.

use std::time::Duration;

/// Assembly pipeline configuration.
///
/// Queue capacities and worker counts are fixed at pipeline start; every
/// stage is tuned independently. The merge/email queues are larger than the
/// loan queue because one loan fans out into many merge and email items.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Master switch for document assembly. When disabled, loan items are
    /// drained and dropped without selection.
    pub assembly_enabled: bool,
    /// Capacity of the loan (selection) queue.
    pub loan_queue_capacity: usize,
    /// Capacity of the merge queue.
    pub merge_queue_capacity: usize,
    /// Capacity of the email queue.
    pub email_queue_capacity: usize,
    /// Selection stage worker count.
    pub selection_workers: usize,
    /// Merge stage worker count.
    pub merge_workers: usize,
    /// Email stage worker count.
    pub email_workers: usize,
    /// Interval between quiet-period polls of the merge registry.
    pub quiet_poll_interval: Duration,
    /// How long the completed-merge count must hold steady before a loan's
    /// outputs are considered finished.
    pub quiet_stable_window: Duration,
    /// Upper bound on the quiet-period wait.
    pub quiet_max_wait: Duration,
    /// Maximum number of attachments per outbound email.
    pub max_attachments: usize,
    /// Maximum total attachment bytes per outbound email.
    pub max_attachment_bytes: usize,
    /// Bundle attachments into a single archive instead of sending them
    /// individually. Archive-build failure falls back to individual files.
    pub bundle_archive: bool,
    /// File name of the bundled archive attachment.
    pub archive_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            assembly_enabled: true,
            loan_queue_capacity: 500,
            merge_queue_capacity: 2000,
            email_queue_capacity: 2000,
            selection_workers: 2,
            merge_workers: 4,
            email_workers: 2,
            quiet_poll_interval: Duration::from_millis(250),
            quiet_stable_window: Duration::from_secs(1),
            quiet_max_wait: Duration::from_secs(30),
            max_attachments: 15,
            max_attachment_bytes: 20 * 1024 * 1024, // 20 MB
            bundle_archive: true,
            archive_name: "loan-documents.zip".to_string(),
        }
    }
}
