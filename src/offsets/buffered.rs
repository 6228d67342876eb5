use super::store::OffsetStore;
use super::{FlushCallback, FlushHandle, LedgerError, OffsetLedger, OffsetMap};
use crate::domain::{SourceOffset, SourcePartition};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;

#[derive(Default)]
struct WriterState {
    data: OffsetMap,
    to_flush: Option<OffsetMap>,
    current_flush_id: u64,
}

/// [`OffsetLedger`] that buffers writes in memory and persists them to an
/// [`OffsetStore`] on the given runtime.
///
/// Every begun flush gets an id; a write that completes after its flush was
/// cancelled is ignored, so a late success cannot clear newer state.
pub struct BufferedLedger<S> {
    store: Arc<S>,
    runtime: Handle,
    state: Arc<Mutex<WriterState>>,
}

impl<S: OffsetStore> BufferedLedger<S> {
    pub fn new(store: S, runtime: Handle) -> Self {
        Self::from_shared(Arc::new(store), runtime)
    }

    pub fn from_shared(store: Arc<S>, runtime: Handle) -> Self {
        Self {
            store,
            runtime,
            state: Arc::new(Mutex::new(WriterState::default())),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn is_flushing(&self) -> bool {
        self.state.lock().to_flush.is_some()
    }

    pub fn buffered_len(&self) -> usize {
        self.state.lock().data.len()
    }
}

/// Returns whether `flush_id` was still the current flush.
fn finish_write(state: &Mutex<WriterState>, flush_id: u64, result: &Result<(), LedgerError>) -> bool {
    let mut state = state.lock();
    if flush_id != state.current_flush_id {
        return false;
    }

    match result {
        Ok(()) => {
            state.to_flush = None;
            state.current_flush_id += 1;
        }
        Err(_) => restore_unflushed(&mut state),
    }
    true
}

fn restore_unflushed(state: &mut WriterState) {
    if let Some(to_flush) = state.to_flush.take() {
        // Offsets buffered after the flush began are newer and win.
        for (partition, offset) in to_flush {
            state.data.entry(partition).or_insert(offset);
        }
        state.current_flush_id += 1;
    }
}

#[async_trait]
impl<S: OffsetStore> OffsetLedger for BufferedLedger<S> {
    async fn start(&self) -> Result<(), LedgerError> {
        self.store.start().await
    }

    async fn stop(&self) {
        self.store.stop().await;
    }

    async fn get(&self, partitions: &[SourcePartition]) -> Result<OffsetMap, LedgerError> {
        self.store.get(partitions).await
    }

    fn set(&self, partition: SourcePartition, offset: SourceOffset) {
        self.state.lock().data.insert(partition, offset);
    }

    fn begin_flush(&self) -> Result<bool, LedgerError> {
        let mut state = self.state.lock();
        if state.to_flush.is_some() {
            tracing::error!("Invalid call to begin_flush() while a flush is already in progress");
            return Err(LedgerError::FlushInProgress);
        }
        if state.data.is_empty() {
            return Ok(false);
        }
        state.to_flush = Some(std::mem::take(&mut state.data));
        Ok(true)
    }

    fn do_flush(&self, on_complete: FlushCallback) -> Option<FlushHandle> {
        let (flush_id, offsets) = {
            let state = self.state.lock();
            let offsets = state.to_flush.clone()?;
            (state.current_flush_id, offsets)
        };

        tracing::debug!(
            flush_id,
            partitions = offsets.len(),
            "Submitting offsets to the offset store"
        );

        let store = Arc::clone(&self.store);
        let state = Arc::clone(&self.state);
        self.runtime.spawn(async move {
            let result = store.set(offsets).await;
            if finish_write(&state, flush_id, &result) {
                on_complete(result);
            } else {
                tracing::debug!(flush_id, "Ignoring completion of a cancelled flush");
            }
        });

        Some(FlushHandle::new(flush_id))
    }

    fn cancel_flush(&self) {
        let mut state = self.state.lock();
        if state.to_flush.is_some() {
            tracing::debug!(flush_id = state.current_flush_id, "Cancelling offset flush");
            restore_unflushed(&mut state);
        }
    }
}
