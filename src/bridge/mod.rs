pub mod adapter;
pub mod config;
pub mod coordinator;
pub mod counter;
pub mod error;
pub mod poller;
pub mod record;

pub use adapter::RecordAdapter;
pub use config::{BridgeConfig, OffsetStorageConfig};
pub use coordinator::{BatchFailure, BatchId, FlushCoordinator, FlushOutcome, FlushState};
pub use counter::{CounterUnderflow, OutstandingCounter};
pub use error::BridgeError;
pub use poller::{BatchPoller, Interrupter, PollerSettings};
pub use record::{BridgeRecord, RecordAck, RecordData};

use crate::metrics::BridgeMetrics;
use crate::offsets::{
    BufferedLedger, FileOffsetStore, MemoryOffsetStore, OffsetLedger, OffsetReader,
};
use crate::registry::Registry;
use crate::task::SourceTaskContext;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Lifecycle wrapper around one source task: `open`, then `read` records
/// until done, then `close`.
///
/// `read` takes `&mut self`, so there is a single consumer. The records it
/// returns can be acked or failed from any thread.
pub struct Bridge {
    poller: BatchPoller,
    ledger: Arc<dyn OffsetLedger>,
    metrics: BridgeMetrics,
    config: BridgeConfig,
    closed: bool,
}

impl Bridge {
    /// Opens a bridge whose ledger is built from `config.offset_storage`.
    pub async fn open(config: BridgeConfig, registry: &Registry) -> Result<Self, BridgeError> {
        let ledger = build_ledger(&config.offset_storage);
        Self::open_with_ledger(config, registry, ledger).await
    }

    pub async fn open_with_ledger(
        config: BridgeConfig,
        registry: &Registry,
        ledger: Arc<dyn OffsetLedger>,
    ) -> Result<Self, BridgeError> {
        config.validate()?;

        let mut task = registry.create_task(&config.task)?;
        let mut key_converter = registry.create_converter(&config.key_converter)?;
        key_converter.configure(&config.task_properties, true)?;
        let mut value_converter = registry.create_converter(&config.value_converter)?;
        value_converter.configure(&config.task_properties, false)?;

        ledger.start().await?;

        let context = SourceTaskContext::new(
            OffsetReader::new(Arc::clone(&ledger)),
            &config.topic_namespace,
        );
        if let Err(e) = task.start(context, &config.task_properties).await {
            tracing::error!(task = %config.task, "Failed to start source task: {}", e);
            ledger.stop().await;
            return Err(e.into());
        }

        let metrics = BridgeMetrics::new();
        let coordinator = FlushCoordinator::new(Arc::clone(&ledger), metrics.clone());
        let adapter = RecordAdapter::new(
            key_converter,
            value_converter,
            config.topic_namespace.clone(),
        );
        let settings = PollerSettings {
            poll_backoff: config.poll_backoff,
            flush_timeout: config.flush_timeout,
        };
        let poller = BatchPoller::new(task, adapter, coordinator, settings, metrics.clone());

        tracing::info!(
            task = %config.task,
            namespace = %config.topic_namespace,
            flush_timeout_ms = config.flush_timeout.as_millis() as u64,
            poll_backoff_ms = config.poll_backoff.as_millis() as u64,
            "Source bridge opened"
        );

        Ok(Self {
            poller,
            ledger,
            metrics,
            config,
            closed: false,
        })
    }

    /// Next record, waiting for the task to produce one and for the
    /// previous batch to resolve. Cancel-safe.
    pub async fn read(&mut self) -> Result<BridgeRecord, BridgeError> {
        if self.closed {
            return Err(BridgeError::Closed);
        }
        self.poller.next_record().await
    }

    /// Stops the task and the ledger. A batch still waiting for
    /// acknowledgments is cancelled and its offsets are not committed. A
    /// fully acknowledged batch gets to finish its flush first, bounded by
    /// the flush timeout.
    pub async fn close(&mut self) -> Result<(), BridgeError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let result = self.poller.stop().await;
        self.ledger.stop().await;
        tracing::info!(task = %self.config.task, "Source bridge closed");
        result
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn interrupter(&self) -> Interrupter {
        self.poller.interrupter()
    }

    pub fn metrics(&self) -> &BridgeMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn flush_state(&self) -> FlushState {
        self.poller.coordinator().state()
    }

    pub fn outstanding(&self) -> usize {
        self.poller.coordinator().outstanding()
    }

    pub fn current_batch(&self) -> Option<BatchId> {
        self.poller.coordinator().current_batch()
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("task", &self.config.task)
            .field("coordinator", self.poller.coordinator())
            .field("closed", &self.closed)
            .finish()
    }
}

fn build_ledger(storage: &OffsetStorageConfig) -> Arc<dyn OffsetLedger> {
    let runtime = Handle::current();
    match storage {
        OffsetStorageConfig::Memory => {
            Arc::new(BufferedLedger::new(MemoryOffsetStore::new(), runtime))
        }
        OffsetStorageConfig::File { path } => {
            Arc::new(BufferedLedger::new(FileOffsetStore::new(path), runtime))
        }
    }
}
