pub mod buffered;
pub mod file;
pub mod store;

pub use buffered::BufferedLedger;
pub use file::FileOffsetStore;
pub use store::{MemoryOffsetStore, OffsetStore};

use crate::domain::{SourceOffset, SourcePartition};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;

pub type OffsetMap = HashMap<SourcePartition, SourceOffset>;

/// Invoked once when a flush started by [`OffsetLedger::do_flush`] finishes.
/// Not invoked for flushes that were cancelled first.
pub type FlushCallback = Box<dyn FnOnce(Result<(), LedgerError>) + Send + 'static>;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("A flush is already in progress")]
    FlushInProgress,
    #[error("Offset store write failed: {0}")]
    WriteFailed(String),
    #[error("Unsupported offset document version {0}")]
    UnsupportedVersion(u32),
}

/// One in-flight offset flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushHandle {
    id: u64,
    started_at: Instant,
}

impl FlushHandle {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            started_at: Instant::now(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }
}

/// Durable partition → offset mapping with buffered writes.
///
/// `set` only buffers. `begin_flush` snapshots the buffer (returning
/// `false` when there is nothing to write), `do_flush` starts writing the
/// snapshot in the background and `cancel_flush` abandons it. After a failed
/// flush the caller is expected to call `cancel_flush` before beginning the
/// next one.
#[async_trait]
pub trait OffsetLedger: Send + Sync {
    async fn start(&self) -> Result<(), LedgerError>;

    async fn stop(&self);

    async fn get(&self, partitions: &[SourcePartition]) -> Result<OffsetMap, LedgerError>;

    fn set(&self, partition: SourcePartition, offset: SourceOffset);

    fn begin_flush(&self) -> Result<bool, LedgerError>;

    fn do_flush(&self, on_complete: FlushCallback) -> Option<FlushHandle>;

    fn cancel_flush(&self);
}

/// Read-only view of committed offsets handed to source tasks.
#[derive(Clone)]
pub struct OffsetReader {
    ledger: Arc<dyn OffsetLedger>,
}

impl OffsetReader {
    pub fn new(ledger: Arc<dyn OffsetLedger>) -> Self {
        Self { ledger }
    }

    pub async fn offset(
        &self,
        partition: &SourcePartition,
    ) -> Result<Option<SourceOffset>, LedgerError> {
        let mut found = self.ledger.get(std::slice::from_ref(partition)).await?;
        Ok(found.remove(partition))
    }

    pub async fn offsets(&self, partitions: &[SourcePartition]) -> Result<OffsetMap, LedgerError> {
        self.ledger.get(partitions).await
    }
}

impl std::fmt::Debug for OffsetReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffsetReader").finish_non_exhaustive()
    }
}
