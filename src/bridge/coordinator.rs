use super::counter::OutstandingCounter;
use super::error::BridgeError;
use crate::domain::{SourceOffset, SourcePartition};
use crate::metrics::BridgeMetrics;
use crate::offsets::{FlushHandle, LedgerError, OffsetLedger, OffsetMap};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;

pub type BatchId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    Idle,
    Accumulating,
    Flushing,
}

/// Why a batch did not commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchFailure {
    /// A downstream consumer failed one of its records.
    Rejected,
    /// The ledger reported an error while persisting.
    Storage(String),
    NoOffsetsPending,
    DoubleAcknowledgment,
}

impl BatchFailure {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BatchFailure::NoOffsetsPending | BatchFailure::DoubleAcknowledgment
        )
    }
}

/// Terminal state of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    Committed,
    Failed(BatchFailure),
    TimedOut,
    Cancelled,
}

impl FlushOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            FlushOutcome::Committed => "committed",
            FlushOutcome::Failed(_) => "failed",
            FlushOutcome::TimedOut => "timed_out",
            FlushOutcome::Cancelled => "cancelled",
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, FlushOutcome::Committed)
    }

    pub(crate) fn into_fatal_error(self, batch: BatchId) -> Option<BridgeError> {
        match self {
            FlushOutcome::Failed(BatchFailure::NoOffsetsPending) => {
                Some(BridgeError::NoOffsetsPending { batch })
            }
            FlushOutcome::Failed(BatchFailure::DoubleAcknowledgment) => {
                Some(BridgeError::DoubleAcknowledgment { batch })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BatchPhase {
    Open,
    Flushing(Instant),
    Resolved(FlushOutcome),
}

/// Held by the poller for the batch it opened.
#[derive(Debug)]
pub(crate) struct BatchTicket {
    pub(crate) id: BatchId,
    pub(crate) phase: watch::Receiver<BatchPhase>,
}

struct Inner {
    state: FlushState,
    current: Option<BatchId>,
    next_batch: BatchId,
    pending: OffsetMap,
    flush: Option<FlushHandle>,
    flush_started: Option<Instant>,
    phase: Option<watch::Sender<BatchPhase>>,
}

impl Inner {
    fn phase(&self) -> Option<BatchPhase> {
        self.phase.as_ref().map(|tx| tx.borrow().clone())
    }

    fn is_current(&self, batch: BatchId) -> bool {
        self.current == Some(batch)
    }

    fn is_open(&self, batch: BatchId) -> bool {
        self.is_current(batch) && matches!(self.phase(), Some(BatchPhase::Open))
    }

    fn set_phase(&self, phase: BatchPhase) {
        if let Some(tx) = &self.phase {
            tx.send_replace(phase);
        }
    }
}

struct Shared {
    ledger: Arc<dyn OffsetLedger>,
    counter: OutstandingCounter,
    inner: Mutex<Inner>,
    metrics: BridgeMetrics,
}

/// What to do with the ledger once the coordinator lock is released.
enum LedgerAction {
    None,
    Flush,
    Cancel,
}

/// Decides when the open batch's offsets are flushed and tracks that flush.
///
/// Every decision happens under one lock: the ack that takes the counter to
/// zero is the one that begins the flush. Ledger calls that may call back
/// into the coordinator (`do_flush`, `cancel_flush`) run after the lock is
/// released.
#[derive(Clone)]
pub struct FlushCoordinator {
    shared: Arc<Shared>,
}

impl FlushCoordinator {
    pub fn new(ledger: Arc<dyn OffsetLedger>, metrics: BridgeMetrics) -> Self {
        Self {
            shared: Arc::new(Shared {
                ledger,
                counter: OutstandingCounter::new(),
                inner: Mutex::new(Inner {
                    state: FlushState::Idle,
                    current: None,
                    next_batch: 1,
                    pending: OffsetMap::new(),
                    flush: None,
                    flush_started: None,
                    phase: None,
                }),
                metrics,
            }),
        }
    }

    pub fn state(&self) -> FlushState {
        self.shared.inner.lock().state
    }

    pub fn outstanding(&self) -> usize {
        self.shared.counter.get()
    }

    pub fn current_batch(&self) -> Option<BatchId> {
        self.shared.inner.lock().current
    }

    pub fn pending_len(&self) -> usize {
        self.shared.inner.lock().pending.len()
    }

    /// The open batch's in-flight flush, if any.
    pub fn flush_handle(&self) -> Option<FlushHandle> {
        self.shared.inner.lock().flush.clone()
    }

    pub(crate) fn open_batch(&self, size: usize) -> Result<BatchTicket, BridgeError> {
        let mut inner = self.shared.inner.lock();
        if let Some(batch) = inner.current {
            return Err(BridgeError::BatchStillOpen { batch });
        }

        let id = inner.next_batch;
        inner.next_batch += 1;
        inner.current = Some(id);
        inner.state = FlushState::Idle;
        inner.pending.clear();
        inner.flush = None;
        inner.flush_started = None;
        let (tx, rx) = watch::channel(BatchPhase::Open);
        inner.phase = Some(tx);
        self.shared.counter.reset(size);
        drop(inner);

        self.shared.metrics.record_batch_opened(size);
        tracing::debug!(batch = id, size, "Opened batch");
        Ok(BatchTicket { id, phase: rx })
    }

    /// Adds a converted record's position to the pending set.
    pub(crate) fn record_offset(
        &self,
        batch: BatchId,
        partition: SourcePartition,
        offset: SourceOffset,
    ) {
        let mut inner = self.shared.inner.lock();
        if !inner.is_open(batch) {
            tracing::debug!(batch, "Ignoring offset for a batch that is no longer open");
            return;
        }
        inner.pending.insert(partition, offset);
        inner.state = FlushState::Accumulating;
    }

    pub fn acknowledge(&self, batch: BatchId) {
        let action = {
            let mut inner = self.shared.inner.lock();
            if !inner.is_current(batch) {
                drop(inner);
                self.shared.metrics.record_stale_ack();
                tracing::debug!(batch, "Ignoring acknowledgment for a closed batch");
                return;
            }

            match self.shared.counter.decrement() {
                Err(_) => {
                    tracing::error!(batch, "Record acknowledged more often than it was emitted");
                    self.double_acknowledgment_locked(&mut inner)
                }
                Ok(remaining) => {
                    if !matches!(inner.phase(), Some(BatchPhase::Open)) {
                        drop(inner);
                        self.shared.metrics.record_stale_ack();
                        tracing::debug!(batch, "Ignoring acknowledgment for a resolved batch");
                        return;
                    }

                    self.shared.metrics.record_ack();
                    tracing::trace!(batch, remaining, "Record acknowledged");
                    if remaining > 0 {
                        return;
                    }
                    self.begin_flush_locked(&mut inner, batch)
                }
            }
        };
        action.run(self, batch);
    }

    pub fn fail(&self, batch: BatchId) {
        let mut inner = self.shared.inner.lock();
        if !inner.is_open(batch) {
            drop(inner);
            self.shared.metrics.record_stale_ack();
            tracing::debug!(batch, "Ignoring failure for a batch that is no longer open");
            return;
        }

        self.shared.metrics.record_fail();
        let discarded = inner.pending.len();
        inner.pending.clear();
        tracing::warn!(batch, discarded, "Record failed downstream, batch will not commit");
        self.resolve_locked(&mut inner, FlushOutcome::Failed(BatchFailure::Rejected));
    }

    /// Resolves the batch with `outcome` unless it already resolved.
    /// Returns whether this call resolved it.
    pub(crate) fn cancel(&self, batch: BatchId, outcome: FlushOutcome) -> bool {
        let action = {
            let mut inner = self.shared.inner.lock();
            if !inner.is_current(batch) {
                return false;
            }
            match inner.phase() {
                Some(BatchPhase::Open) => {
                    inner.pending.clear();
                    self.resolve_locked(&mut inner, outcome);
                    LedgerAction::None
                }
                Some(BatchPhase::Flushing(_)) => {
                    if let Some(handle) = inner.flush.take() {
                        tracing::debug!(batch, flush_id = handle.id(), "Cancelling flush");
                    }
                    self.resolve_locked(&mut inner, outcome);
                    LedgerAction::Cancel
                }
                Some(BatchPhase::Resolved(_)) | None => return false,
            }
        };
        action.run(self, batch);
        true
    }

    /// Releases the batch and returns how it ended. The batch must have
    /// resolved first.
    pub(crate) fn close_batch(&self, batch: BatchId) -> Option<FlushOutcome> {
        let mut inner = self.shared.inner.lock();
        if !inner.is_current(batch) {
            return None;
        }
        let outcome = match inner.phase() {
            Some(BatchPhase::Resolved(outcome)) => outcome,
            _ => return None,
        };
        inner.current = None;
        inner.phase = None;
        inner.state = FlushState::Idle;
        inner.pending.clear();
        tracing::debug!(batch, outcome = outcome.label(), "Closed batch");
        Some(outcome)
    }

    fn complete_flush(&self, batch: BatchId, result: Result<(), LedgerError>) {
        let action = {
            let mut inner = self.shared.inner.lock();
            let flushing = inner.is_current(batch)
                && matches!(inner.phase(), Some(BatchPhase::Flushing(_)));
            if !flushing {
                tracing::debug!(batch, "Ignoring completion of a resolved flush");
                return;
            }

            inner.flush = None;
            match result {
                Ok(()) => {
                    self.resolve_locked(&mut inner, FlushOutcome::Committed);
                    LedgerAction::None
                }
                Err(e) => {
                    tracing::error!(batch, "Failed to flush offsets: {}", e);
                    self.resolve_locked(
                        &mut inner,
                        FlushOutcome::Failed(BatchFailure::Storage(e.to_string())),
                    );
                    LedgerAction::Cancel
                }
            }
        };
        action.run(self, batch);
    }

    fn begin_flush_locked(&self, inner: &mut Inner, batch: BatchId) -> LedgerAction {
        let pending = std::mem::take(&mut inner.pending);
        if pending.is_empty() {
            tracing::error!(batch, "Batch fully acknowledged but no offsets were recorded");
            self.resolve_locked(inner, FlushOutcome::Failed(BatchFailure::NoOffsetsPending));
            return LedgerAction::None;
        }

        let partitions = pending.len();
        for (partition, offset) in pending {
            self.shared.ledger.set(partition, offset);
        }

        match self.shared.ledger.begin_flush() {
            Ok(true) => {}
            Ok(false) => {
                tracing::error!(batch, "Offset ledger had nothing to flush");
                self.resolve_locked(inner, FlushOutcome::Failed(BatchFailure::NoOffsetsPending));
                return LedgerAction::None;
            }
            Err(e) => {
                tracing::error!(batch, "Failed to begin offset flush: {}", e);
                self.resolve_locked(
                    inner,
                    FlushOutcome::Failed(BatchFailure::Storage(e.to_string())),
                );
                return LedgerAction::Cancel;
            }
        }

        let started = Instant::now();
        inner.state = FlushState::Flushing;
        inner.flush_started = Some(started);
        inner.set_phase(BatchPhase::Flushing(started));
        tracing::debug!(batch, partitions, "Beginning offset flush");
        LedgerAction::Flush
    }

    fn start_flush(&self, batch: BatchId) {
        let coordinator = self.clone();
        let handle = self
            .shared
            .ledger
            .do_flush(Box::new(move |result| coordinator.complete_flush(batch, result)));

        let mut inner = self.shared.inner.lock();
        let flushing =
            inner.is_current(batch) && matches!(inner.phase(), Some(BatchPhase::Flushing(_)));
        match handle {
            Some(handle) if flushing => inner.flush = Some(handle),
            Some(_) => {}
            None if flushing => {
                tracing::error!(batch, "Offset ledger returned no flush for a begun flush");
                self.resolve_locked(
                    &mut inner,
                    FlushOutcome::Failed(BatchFailure::NoOffsetsPending),
                );
            }
            None => {}
        }
    }

    fn double_acknowledgment_locked(&self, inner: &mut Inner) -> LedgerAction {
        let outcome = FlushOutcome::Failed(BatchFailure::DoubleAcknowledgment);
        match inner.phase() {
            Some(BatchPhase::Open) => {
                inner.pending.clear();
                self.resolve_locked(inner, outcome);
                LedgerAction::None
            }
            Some(BatchPhase::Flushing(_)) => {
                inner.flush = None;
                self.resolve_locked(inner, outcome);
                LedgerAction::Cancel
            }
            Some(BatchPhase::Resolved(_)) => {
                // Already counted; only the verdict changes.
                inner.set_phase(BatchPhase::Resolved(outcome));
                LedgerAction::None
            }
            None => LedgerAction::None,
        }
    }

    fn resolve_locked(&self, inner: &mut Inner, outcome: FlushOutcome) {
        let elapsed = inner.flush_started.take().map(|started| started.elapsed());
        inner.state = FlushState::Idle;
        inner.flush = None;

        match &outcome {
            FlushOutcome::Committed => tracing::debug!(?elapsed, "Batch committed"),
            FlushOutcome::Failed(failure) => tracing::warn!(?failure, "Batch failed"),
            FlushOutcome::TimedOut => tracing::warn!(?elapsed, "Offset flush timed out"),
            FlushOutcome::Cancelled => tracing::warn!("Batch cancelled"),
        }
        self.shared.metrics.record_outcome(&outcome, elapsed);
        inner.set_phase(BatchPhase::Resolved(outcome));
    }
}

impl LedgerAction {
    fn run(self, coordinator: &FlushCoordinator, batch: BatchId) {
        match self {
            LedgerAction::None => {}
            LedgerAction::Flush => coordinator.start_flush(batch),
            LedgerAction::Cancel => coordinator.shared.ledger.cancel_flush(),
        }
    }
}

impl std::fmt::Debug for FlushCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("FlushCoordinator")
            .field("state", &inner.state)
            .field("current", &inner.current)
            .field("pending", &inner.pending.len())
            .field("outstanding", &self.shared.counter.get())
            .finish()
    }
}
