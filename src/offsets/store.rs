use super::{LedgerError, OffsetMap};
use crate::domain::SourcePartition;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Persistence backend underneath a [`super::BufferedLedger`].
#[async_trait]
pub trait OffsetStore: Send + Sync + 'static {
    async fn start(&self) -> Result<(), LedgerError> {
        Ok(())
    }

    async fn stop(&self) {}

    async fn get(&self, partitions: &[SourcePartition]) -> Result<OffsetMap, LedgerError>;

    /// Durably merges `offsets` into the stored mapping.
    async fn set(&self, offsets: OffsetMap) -> Result<(), LedgerError>;
}

/// Non-durable store for tests and ephemeral pipelines.
#[derive(Debug, Default)]
pub struct MemoryOffsetStore {
    offsets: RwLock<OffsetMap>,
    writes: AtomicU64,
}

impl MemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> OffsetMap {
        self.offsets.read().clone()
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Acquire)
    }
}

#[async_trait]
impl OffsetStore for MemoryOffsetStore {
    async fn get(&self, partitions: &[SourcePartition]) -> Result<OffsetMap, LedgerError> {
        let offsets = self.offsets.read();
        Ok(partitions
            .iter()
            .filter_map(|p| offsets.get(p).map(|o| (p.clone(), o.clone())))
            .collect())
    }

    async fn set(&self, offsets: OffsetMap) -> Result<(), LedgerError> {
        self.offsets.write().extend(offsets);
        self.writes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
