//! Document assembly pipeline.
//!
//! Three bounded stages connected by work queues: selection decides which
//! documents a loan gets, merge renders each one, and email delivers the
//! finished set. [`AssemblyPipeline`] owns the queues, the worker pools,
//! and the shared registries, and tears everything down cooperatively on
//! shutdown.

pub mod archive;
pub mod email;
pub mod hooks;
pub mod merge;
pub mod registry;
pub mod selection;
pub mod types;

use std::sync::Arc;

use tracing::info;

use crate::config::PipelineConfig;
use crate::error::Error;
use crate::pool::WorkerPool;
use crate::queue::{shutdown_pair, ShutdownHandle, WorkQueue};
use crate::rules::{FieldRegistry, RuleEngine};
use crate::store::{FormatConverter, Mailer, RecordStore};

pub use email::EmailStage;
pub use hooks::{CompletionHook, EmailQueueHook};
pub use merge::MergeStage;
pub use registry::{ActiveLoans, MergeRegistry};
pub use selection::SelectionStage;
pub use types::{
    DocumentTemplate, EmailItem, Loan, MergeItem, MergeStatus, MergeUnit, OutputFormat,
};

pub struct AssemblyPipeline {
    loan_queue: Arc<WorkQueue<Loan>>,
    merge_queue: Arc<WorkQueue<MergeItem>>,
    email_queue: Arc<WorkQueue<EmailItem>>,
    registry: Arc<MergeRegistry>,
    active: Arc<ActiveLoans>,
    shutdown: ShutdownHandle,
    pools: Vec<WorkerPool>,
}

impl AssemblyPipeline {
    /// Wire up the stages and spawn their worker pools.
    pub fn start(
        config: PipelineConfig,
        store: Arc<dyn RecordStore>,
        mailer: Arc<dyn Mailer>,
        converter: Arc<dyn FormatConverter>,
        field_registry: FieldRegistry,
    ) -> Self {
        Self::start_with_hooks(config, store, mailer, converter, field_registry, Vec::new())
    }

    /// Like [`AssemblyPipeline::start`], with extra completion hooks that run
    /// after the built-in email queue hook.
    pub fn start_with_hooks(
        config: PipelineConfig,
        store: Arc<dyn RecordStore>,
        mailer: Arc<dyn Mailer>,
        converter: Arc<dyn FormatConverter>,
        field_registry: FieldRegistry,
        extra_hooks: Vec<Arc<dyn CompletionHook>>,
    ) -> Self {
        let (handle, shutdown) = shutdown_pair();

        let loan_queue = Arc::new(WorkQueue::new(config.loan_queue_capacity));
        let merge_queue = Arc::new(WorkQueue::new(config.merge_queue_capacity));
        let email_queue = Arc::new(WorkQueue::new(config.email_queue_capacity));

        let registry = Arc::new(MergeRegistry::new());
        let active = Arc::new(ActiveLoans::new());

        let mut hooks: Vec<Arc<dyn CompletionHook>> = vec![Arc::new(EmailQueueHook::new(
            Arc::clone(&email_queue),
            Arc::clone(&active),
        ))];
        hooks.extend(extra_hooks);

        let selection = Arc::new(SelectionStage::new(
            store,
            RuleEngine::new(field_registry),
            Arc::clone(&registry),
            Arc::clone(&active),
            Arc::clone(&merge_queue),
            config.assembly_enabled,
        ));
        let merge = Arc::new(MergeStage::new(Arc::clone(&registry), converter, hooks));
        let email = Arc::new(EmailStage::new(
            Arc::clone(&registry),
            Arc::clone(&active),
            mailer,
            config.clone(),
        ));

        let pools = vec![
            WorkerPool::start(
                Arc::clone(&loan_queue),
                selection,
                config.selection_workers,
                shutdown.clone(),
            ),
            WorkerPool::start(
                Arc::clone(&merge_queue),
                merge,
                config.merge_workers,
                shutdown.clone(),
            ),
            WorkerPool::start(
                Arc::clone(&email_queue),
                email,
                config.email_workers,
                shutdown,
            ),
        ];
        info!("assembly pipeline started");

        Self {
            loan_queue,
            merge_queue,
            email_queue,
            registry,
            active,
            shutdown: handle,
            pools,
        }
    }

    /// Submit a loan for document assembly. Suspends while the loan queue
    /// is at capacity.
    pub async fn enqueue_loan(&self, loan: Loan) -> Result<(), Error> {
        self.loan_queue.enqueue(loan).await?;
        Ok(())
    }

    /// Submit a merge item directly, bypassing selection. External replay of
    /// a failed unit goes through here.
    pub async fn enqueue_merge(&self, item: MergeItem) -> Result<(), Error> {
        self.merge_queue.enqueue(item).await?;
        Ok(())
    }

    /// Submit an email item directly, bypassing the completion hook.
    pub async fn enqueue_email(&self, item: EmailItem) -> Result<(), Error> {
        self.email_queue.enqueue(item).await?;
        Ok(())
    }

    pub fn registry(&self) -> &Arc<MergeRegistry> {
        &self.registry
    }

    pub fn active_loans(&self) -> &Arc<ActiveLoans> {
        &self.active
    }

    /// Raise shutdown and wait for every worker to park.
    pub async fn shutdown(self) {
        self.shutdown.raise();
        for pool in self.pools {
            pool.join().await;
        }
        info!("assembly pipeline stopped");
    }
}
