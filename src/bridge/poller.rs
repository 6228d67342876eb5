use super::adapter::RecordAdapter;
use super::coordinator::{BatchId, BatchPhase, BatchTicket, FlushCoordinator, FlushOutcome};
use super::error::BridgeError;
use super::record::{BridgeRecord, RecordAck};
use crate::domain::SourceRecord;
use crate::metrics::BridgeMetrics;
use crate::task::SourceTask;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct PollerSettings {
    pub poll_backoff: Duration,
    pub flush_timeout: Duration,
}

struct OpenBatch {
    ticket: BatchTicket,
    records: std::vec::IntoIter<SourceRecord>,
}

/// Interrupts a poller waiting for its batch's flush. The wait ends with the
/// batch cancelled. An interrupt sent while nothing waits is dropped.
#[derive(Debug, Clone)]
pub struct Interrupter {
    notify: Arc<Notify>,
}

impl Interrupter {
    pub fn interrupt(&self) {
        self.notify.notify_waiters();
    }
}

/// Pulls batches from the task and emits their records one at a time.
pub struct BatchPoller {
    task: Box<dyn SourceTask>,
    adapter: RecordAdapter,
    coordinator: FlushCoordinator,
    settings: PollerSettings,
    current: Option<OpenBatch>,
    interrupt: Arc<Notify>,
    metrics: BridgeMetrics,
}

impl BatchPoller {
    pub fn new(
        task: Box<dyn SourceTask>,
        adapter: RecordAdapter,
        coordinator: FlushCoordinator,
        settings: PollerSettings,
        metrics: BridgeMetrics,
    ) -> Self {
        Self {
            task,
            adapter,
            coordinator,
            settings,
            current: None,
            interrupt: Arc::new(Notify::new()),
            metrics,
        }
    }

    pub fn interrupter(&self) -> Interrupter {
        Interrupter {
            notify: Arc::clone(&self.interrupt),
        }
    }

    pub fn coordinator(&self) -> &FlushCoordinator {
        &self.coordinator
    }

    /// Cancel-safe: a dropped call leaves the open batch in place and the
    /// next call resumes where it stopped.
    pub async fn next_record(&mut self) -> Result<BridgeRecord, BridgeError> {
        loop {
            if let Some(open) = self.current.as_mut() {
                if let Some(record) = open.records.next() {
                    return self.emit(record);
                }

                let batch = open.ticket.id;
                wait_for_resolution(
                    &mut open.ticket,
                    &self.coordinator,
                    &self.interrupt,
                    self.settings.flush_timeout,
                )
                .await;
                self.finish_batch(batch).await?;
                continue;
            }

            let records = self.task.poll().await?;
            if records.is_empty() {
                self.metrics.record_empty_poll();
                tracing::trace!(
                    backoff_ms = self.settings.poll_backoff.as_millis() as u64,
                    "No records polled, backing off"
                );
                tokio::time::sleep(self.settings.poll_backoff).await;
                continue;
            }

            let ticket = self.coordinator.open_batch(records.len())?;
            self.current = Some(OpenBatch {
                ticket,
                records: records.into_iter(),
            });
        }
    }

    fn emit(&mut self, record: SourceRecord) -> Result<BridgeRecord, BridgeError> {
        let Some(open) = self.current.as_ref() else {
            return Err(BridgeError::Closed);
        };
        let batch = open.ticket.id;

        let data = match self.adapter.adapt(&record) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(batch, topic = %record.topic, "Failed to convert record: {}", e);
                self.coordinator.fail(batch);
                self.coordinator.close_batch(batch);
                self.current = None;
                return Err(e.into());
            }
        };

        self.coordinator
            .record_offset(batch, record.partition, record.offset);
        self.metrics.record_emitted();
        tracing::debug!(
            batch,
            destination = %data.destination_topic,
            partition = %data.partition_id,
            "Emitting record"
        );
        Ok(BridgeRecord::new(
            data,
            RecordAck::new(batch, self.coordinator.clone()),
        ))
    }

    async fn finish_batch(&mut self, batch: BatchId) -> Result<(), BridgeError> {
        self.current = None;
        let outcome = self
            .coordinator
            .close_batch(batch)
            .unwrap_or(FlushOutcome::Cancelled);

        match outcome {
            FlushOutcome::Committed => {
                tracing::debug!(batch, "Batch committed, notifying task");
                if let Err(e) = self.task.commit().await {
                    tracing::warn!(batch, "Task commit notification failed: {}", e);
                }
                Ok(())
            }
            other => match other.clone().into_fatal_error(batch) {
                Some(err) => Err(err),
                None => {
                    tracing::info!(
                        batch,
                        outcome = other.label(),
                        "Batch did not commit, offsets stay at the last committed position"
                    );
                    Ok(())
                }
            },
        }
    }

    /// Stops the task. A batch still waiting for acknowledgments is
    /// cancelled; one whose flush already began gets up to the flush timeout
    /// to finish, and commits if it does.
    pub async fn stop(&mut self) -> Result<(), BridgeError> {
        let mut flushed: Result<(), BridgeError> = Ok(());
        if let Some(mut open) = self.current.take() {
            let batch = open.ticket.id;
            let acknowledged = !matches!(*open.ticket.phase.borrow(), BatchPhase::Open);
            if acknowledged {
                tracing::info!(batch, "Waiting for the in-flight offset flush before stopping");
                wait_for_resolution(
                    &mut open.ticket,
                    &self.coordinator,
                    &self.interrupt,
                    self.settings.flush_timeout,
                )
                .await;
                flushed = self.finish_batch(batch).await;
            } else {
                self.coordinator.cancel(batch, FlushOutcome::Cancelled);
                self.coordinator.close_batch(batch);
            }
        }
        self.task.stop().await?;
        flushed
    }
}

/// Waits until the batch resolves, bounding the flush by `timeout` from the
/// moment it began. Acknowledgments themselves are awaited without a bound.
async fn wait_for_resolution(
    ticket: &mut BatchTicket,
    coordinator: &FlushCoordinator,
    interrupt: &Notify,
    timeout: Duration,
) {
    let batch = ticket.id;
    let interrupted = interrupt.notified();
    tokio::pin!(interrupted);

    let started = tokio::select! {
        phase = next_phase(ticket, |p| !matches!(p, BatchPhase::Open)) => match phase {
            Some(BatchPhase::Flushing(started)) => started,
            _ => return,
        },
        _ = &mut interrupted => {
            if coordinator.cancel(batch, FlushOutcome::Cancelled) {
                tracing::warn!(batch, "Interrupted while waiting for acknowledgments");
            }
            return;
        }
    };

    let deadline: Instant = started + timeout;
    tokio::select! {
        biased;
        _ = next_phase(ticket, |p| matches!(p, BatchPhase::Resolved(_))) => {}
        _ = tokio::time::sleep_until(deadline) => {
            if coordinator.cancel(batch, FlushOutcome::TimedOut) {
                tracing::error!(
                    batch,
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for offset flush, cancelled it"
                );
            }
        }
        _ = &mut interrupted => {
            if coordinator.cancel(batch, FlushOutcome::Cancelled) {
                tracing::warn!(batch, "Interrupted while waiting for offset flush, cancelled it");
            }
        }
    }
}

async fn next_phase(
    ticket: &mut BatchTicket,
    accept: impl FnMut(&BatchPhase) -> bool,
) -> Option<BatchPhase> {
    ticket.phase.wait_for(accept).await.ok().map(|phase| phase.clone())
}
