mod common;

use async_trait::async_trait;
use common::{
    Completion, MockLedger, SCRIPTED_TASK, Script, offset, open_bridge, partition, record,
    registry_with, scripted_config,
};
use rask_source_bridge::bridge::{
    BatchPoller, Bridge, BridgeError, FlushCoordinator, FlushState, PollerSettings, RecordAdapter,
};
use rask_source_bridge::domain::SourcePartition;
use rask_source_bridge::metrics::BridgeMetrics;
use rask_source_bridge::offsets::{
    BufferedLedger, LedgerError, MemoryOffsetStore, OffsetLedger, OffsetMap, OffsetStore,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;

/// Memory store whose writes take a while to land.
#[derive(Default)]
struct SlowStore {
    inner: MemoryOffsetStore,
}

#[async_trait]
impl OffsetStore for SlowStore {
    async fn get(&self, partitions: &[SourcePartition]) -> Result<OffsetMap, LedgerError> {
        self.inner.get(partitions).await
    }

    async fn set(&self, offsets: OffsetMap) -> Result<(), LedgerError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.inner.set(offsets).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_fully_acknowledged_batch_commits_once() {
    let script = Script::new()
        .batch(vec![record(0, 10), record(1, 20), record(2, 30)])
        .batch(vec![record(0, 11)]);
    let ledger = MockLedger::new(Completion::Succeed);
    let mut bridge = open_bridge(&script, &ledger, scripted_config()).await;

    let mut records = Vec::new();
    for _ in 0..3 {
        records.push(bridge.read().await.unwrap());
    }
    let first_batch = records[0].batch_id();
    assert!(records.iter().all(|r| r.batch_id() == first_batch));
    assert_eq!(records[1].destination_topic(), "public/default/events");
    assert_eq!(records[2].partition_id(), "p=2");

    for r in records {
        r.ack();
    }

    let next = bridge.read().await.unwrap();
    assert_ne!(next.batch_id(), first_batch);

    let committed = ledger.committed();
    assert_eq!(committed.len(), 3);
    assert_eq!(committed[&partition(0)], offset(10));
    assert_eq!(committed[&partition(1)], offset(20));
    assert_eq!(committed[&partition(2)], offset(30));
    assert_eq!(ledger.begins(), 1);
    assert_eq!(ledger.flushes(), 1);
    assert_eq!(script.commits(), 1);
    assert_eq!(bridge.metrics().snapshot().flushes_committed, 1);
    next.fail();
}

#[tokio::test(start_paused = true)]
async fn test_failed_record_skips_flush_and_polls_fresh_batch() {
    let script = Script::new()
        .batch(vec![record(0, 1), record(0, 2)])
        .batch(vec![record(0, 3)]);
    let ledger = MockLedger::new(Completion::Succeed);
    let mut bridge = open_bridge(&script, &ledger, scripted_config()).await;

    let first = bridge.read().await.unwrap();
    let second = bridge.read().await.unwrap();
    let failed_batch = first.batch_id();
    first.ack();
    second.fail();

    let next = bridge.read().await.unwrap();
    assert_ne!(next.batch_id(), failed_batch);
    assert_eq!(ledger.begins(), 0);
    assert_eq!(ledger.flushes(), 0);
    assert!(ledger.committed().is_empty());
    assert_eq!(script.commits(), 0);

    let snapshot = bridge.metrics().snapshot();
    assert_eq!(snapshot.flushes_failed, 1);
    assert_eq!(snapshot.fails, 1);
    next.ack();
}

#[tokio::test(start_paused = true)]
async fn test_empty_polls_back_off() {
    let script = Script::new().empty().empty().batch(vec![record(0, 1)]);
    let ledger = MockLedger::new(Completion::Succeed);
    let mut bridge = open_bridge(&script, &ledger, scripted_config()).await;

    let started = Instant::now();
    let r = bridge.read().await.unwrap();

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(2000));
    assert!(elapsed < Duration::from_millis(3000));
    assert_eq!(script.polls(), 3);
    assert_eq!(bridge.metrics().snapshot().empty_polls, 2);
    r.ack();
}

#[tokio::test(start_paused = true)]
async fn test_stuck_flush_is_cancelled_after_timeout() {
    let script = Script::new()
        .batch(vec![record(0, 1)])
        .batch(vec![record(0, 2)]);
    let ledger = MockLedger::new(Completion::Never);
    let mut bridge = open_bridge(&script, &ledger, scripted_config()).await;

    let r = bridge.read().await.unwrap();
    r.ack();
    assert_eq!(bridge.flush_state(), FlushState::Flushing);

    let started = Instant::now();
    let next = bridge.read().await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(2000));
    assert_eq!(ledger.cancels(), 1);
    assert!(ledger.committed().is_empty());
    assert_eq!(script.polls(), 2);
    assert_eq!(bridge.metrics().snapshot().flushes_timed_out, 1);

    // A completion arriving after the cancel changes nothing.
    assert_eq!(ledger.complete_held(|| Ok(())), 1);
    assert_eq!(bridge.metrics().snapshot().flushes_committed, 0);
    assert_eq!(bridge.current_batch(), Some(next.batch_id()));
    next.fail();
}

#[tokio::test(start_paused = true)]
async fn test_no_flush_before_last_ack() {
    let script = Script::new().batch(vec![record(0, 1), record(1, 2), record(2, 3)]);
    let ledger = MockLedger::new(Completion::Succeed);
    let mut bridge = open_bridge(&script, &ledger, scripted_config()).await;

    let a = bridge.read().await.unwrap();
    let b = bridge.read().await.unwrap();
    let c = bridge.read().await.unwrap();
    a.ack();
    b.ack();

    assert_eq!(ledger.begins(), 0);
    assert_eq!(bridge.flush_state(), FlushState::Accumulating);
    assert_eq!(bridge.outstanding(), 1);

    c.ack();
    assert_eq!(ledger.begins(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_next_batch_waits_for_previous_and_read_is_cancel_safe() {
    let script = Script::new()
        .batch(vec![record(0, 1)])
        .batch(vec![record(0, 2)]);
    let ledger = MockLedger::new(Completion::Succeed);
    let mut bridge = open_bridge(&script, &ledger, scripted_config()).await;

    let pending = bridge.read().await.unwrap();
    let waited = tokio::time::timeout(Duration::from_secs(60), bridge.read()).await;
    assert!(waited.is_err());
    assert_eq!(script.polls(), 1);
    assert_eq!(bridge.current_batch(), Some(pending.batch_id()));

    let first_batch = pending.batch_id();
    pending.ack();
    let next = bridge.read().await.unwrap();
    assert_eq!(next.batch_id(), first_batch + 1);
    assert_eq!(ledger.committed()[&partition(0)], offset(1));
    next.ack();
}

#[tokio::test(start_paused = true)]
async fn test_failed_batch_does_not_leak_offsets_into_next() {
    let script = Script::new()
        .batch(vec![record(0, 5)])
        .batch(vec![record(1, 7)])
        .batch(vec![record(1, 8)]);
    let ledger = MockLedger::new(Completion::Succeed);
    let mut bridge = open_bridge(&script, &ledger, scripted_config()).await;

    bridge.read().await.unwrap().fail();
    bridge.read().await.unwrap().ack();
    let third = bridge.read().await.unwrap();

    let committed = ledger.committed();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[&partition(1)], offset(7));
    assert!(!committed.contains_key(&partition(0)));
    third.ack();
}

#[tokio::test(start_paused = true)]
async fn test_storage_failure_cancels_flush_and_continues() {
    let script = Script::new()
        .batch(vec![record(0, 1)])
        .batch(vec![record(0, 2)]);
    let ledger = MockLedger::new(Completion::Fail);
    let mut bridge = open_bridge(&script, &ledger, scripted_config()).await;

    bridge.read().await.unwrap().ack();
    let next = bridge.read().await.unwrap();

    assert_eq!(ledger.flushes(), 1);
    assert_eq!(ledger.cancels(), 1);
    assert!(ledger.committed().is_empty());
    assert_eq!(script.commits(), 0);
    assert_eq!(bridge.metrics().snapshot().flushes_failed, 1);
    next.fail();
}

#[tokio::test(start_paused = true)]
async fn test_nothing_to_flush_is_fatal() {
    let script = Script::new().batch(vec![record(0, 1)]);
    let ledger = MockLedger::new(Completion::NothingToFlush);
    let mut bridge = open_bridge(&script, &ledger, scripted_config()).await;

    let r = bridge.read().await.unwrap();
    let batch = r.batch_id();
    r.ack();

    let err = bridge.read().await.unwrap_err();
    assert!(matches!(err, BridgeError::NoOffsetsPending { batch: b } if b == batch));
    assert!(err.is_contract_violation());
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_cancels_the_wait() {
    let script = Script::new()
        .batch(vec![record(0, 1)])
        .batch(vec![record(0, 2)]);
    let ledger = MockLedger::new(Completion::Succeed);
    let mut bridge = open_bridge(&script, &ledger, scripted_config()).await;

    let unacked = bridge.read().await.unwrap();
    let interrupter = bridge.interrupter();
    let (next, ()) = tokio::join!(bridge.read(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        interrupter.interrupt();
    });
    let next = next.unwrap();
    assert_ne!(next.batch_id(), unacked.batch_id());

    unacked.ack();
    let snapshot = bridge.metrics().snapshot();
    assert_eq!(snapshot.flushes_cancelled, 1);
    assert_eq!(snapshot.stale_acks, 1);
    assert_eq!(ledger.begins(), 0);
    next.fail();
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_during_flush_cancels_it() {
    let script = Script::new()
        .batch(vec![record(0, 1)])
        .batch(vec![record(0, 2)]);
    let ledger = MockLedger::new(Completion::Never);
    let mut bridge = open_bridge(&script, &ledger, scripted_config()).await;

    let first = bridge.read().await.unwrap();
    let first_batch = first.batch_id();
    first.ack();
    assert_eq!(bridge.flush_state(), FlushState::Flushing);

    let interrupter = bridge.interrupter();
    let started = Instant::now();
    let (next, ()) = tokio::join!(bridge.read(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        interrupter.interrupt();
    });
    let next = next.unwrap();

    assert!(started.elapsed() < Duration::from_millis(2000));
    assert_ne!(next.batch_id(), first_batch);
    assert_eq!(script.polls(), 2);
    assert_eq!(ledger.cancels(), 1);
    let snapshot = bridge.metrics().snapshot();
    assert_eq!(snapshot.flushes_cancelled, 1);
    assert_eq!(snapshot.flushes_timed_out, 0);

    // The held write finishing late does not commit the cancelled batch.
    assert_eq!(ledger.complete_held(|| Ok(())), 1);
    assert!(ledger.committed().is_empty());
    assert_eq!(bridge.metrics().snapshot().flushes_committed, 0);
    assert_eq!(script.commits(), 0);
    assert_eq!(bridge.current_batch(), Some(next.batch_id()));
    next.fail();
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_without_a_waiter_is_dropped() {
    let script = Script::new()
        .empty()
        .batch(vec![record(0, 1)])
        .batch(vec![record(0, 2)]);
    let ledger = MockLedger::new(Completion::Succeed);
    let mut bridge = open_bridge(&script, &ledger, scripted_config()).await;
    let interrupter = bridge.interrupter();

    // Nothing waits yet, then the read is backing off after an empty poll.
    interrupter.interrupt();
    let (first, ()) = tokio::join!(bridge.read(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        interrupter.interrupt();
    });
    let first = first.unwrap();
    assert_eq!(script.polls(), 2);

    let waited = tokio::time::timeout(Duration::from_secs(60), bridge.read()).await;
    assert!(waited.is_err());
    assert_eq!(bridge.current_batch(), Some(first.batch_id()));
    assert_eq!(bridge.metrics().snapshot().flushes_cancelled, 0);

    first.ack();
    let next = bridge.read().await.unwrap();
    assert_eq!(ledger.committed()[&partition(0)], offset(1));
    assert_eq!(script.commits(), 1);
    next.ack();
}

#[tokio::test(start_paused = true)]
async fn test_extra_ack_surfaces_as_double_acknowledgment() {
    let script = Script::new().batch(vec![record(0, 1)]);
    let registry = registry_with(&script);
    let mut value_converter = registry.create_converter("json").unwrap();
    value_converter.configure(&HashMap::new(), false).unwrap();
    let adapter = RecordAdapter::new(
        registry.create_converter("string").unwrap(),
        value_converter,
        "public/default",
    );
    let ledger: Arc<dyn OffsetLedger> = Arc::new(BufferedLedger::new(
        MemoryOffsetStore::new(),
        Handle::current(),
    ));
    let metrics = BridgeMetrics::new();
    let coordinator = FlushCoordinator::new(ledger, metrics.clone());
    let settings = PollerSettings {
        poll_backoff: Duration::from_millis(100),
        flush_timeout: Duration::from_millis(500),
    };
    let mut poller = BatchPoller::new(
        registry.create_task(SCRIPTED_TASK).unwrap(),
        adapter,
        coordinator,
        settings,
        metrics,
    );

    let record = poller.next_record().await.unwrap();
    let batch = record.batch_id();
    record.ack();
    poller.coordinator().acknowledge(batch);

    let err = poller.next_record().await.unwrap_err();
    assert!(matches!(err, BridgeError::DoubleAcknowledgment { batch: b } if b == batch));
    assert!(err.is_contract_violation());
    assert_eq!(poller.coordinator().current_batch(), None);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_record_fails_its_batch() {
    let script = Script::new()
        .batch(vec![record(0, 1)])
        .batch(vec![record(0, 2)]);
    let ledger = MockLedger::new(Completion::Succeed);
    let mut bridge = open_bridge(&script, &ledger, scripted_config()).await;

    drop(bridge.read().await.unwrap());
    let next = bridge.read().await.unwrap();

    assert_eq!(ledger.begins(), 0);
    assert_eq!(bridge.metrics().snapshot().flushes_failed, 1);
    next.ack();
}

#[tokio::test(start_paused = true)]
async fn test_poll_error_is_fatal() {
    let script = Script::new().error("source unavailable");
    let ledger = MockLedger::new(Completion::Succeed);
    let mut bridge = open_bridge(&script, &ledger, scripted_config()).await;

    let err = bridge.read().await.unwrap_err();
    assert!(matches!(err, BridgeError::Task(_)));
    assert!(err.is_fatal());
}

#[tokio::test(start_paused = true)]
async fn test_conversion_error_fails_open_batch() {
    let mut bad = record(1, 2);
    bad.value = serde_json::json!({"nested": true});
    let script = Script::new().batch(vec![record(0, 1), bad]);
    let ledger = MockLedger::new(Completion::Succeed);

    let mut config = scripted_config();
    config.value_converter = "string".to_string();
    let mut bridge = open_bridge(&script, &ledger, config).await;

    let first = bridge.read().await.unwrap();
    let err = bridge.read().await.unwrap_err();
    assert!(matches!(err, BridgeError::Conversion(_)));

    first.ack();
    assert_eq!(ledger.begins(), 0);
    assert_eq!(bridge.current_batch(), None);
}

#[tokio::test(start_paused = true)]
async fn test_close_stops_task_and_rejects_reads() {
    let script = Script::new().batch(vec![record(0, 1)]);
    let ledger = MockLedger::new(Completion::Succeed);
    let mut bridge = open_bridge(&script, &ledger, scripted_config()).await;

    let r = bridge.read().await.unwrap();
    bridge.close().await.unwrap();
    bridge.close().await.unwrap();

    assert!(bridge.is_closed());
    assert_eq!(script.stops(), 1);
    assert!(matches!(bridge.read().await, Err(BridgeError::Closed)));

    r.ack();
    assert_eq!(ledger.begins(), 0);
    assert_eq!(bridge.metrics().snapshot().flushes_cancelled, 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_lets_in_flight_flush_commit() {
    let script = Script::new().batch(vec![record(0, 1)]);
    let store = Arc::new(SlowStore::default());
    let ledger: Arc<dyn OffsetLedger> =
        Arc::new(BufferedLedger::from_shared(Arc::clone(&store), Handle::current()));
    let mut bridge = Bridge::open_with_ledger(scripted_config(), &registry_with(&script), ledger)
        .await
        .unwrap();

    bridge.read().await.unwrap().ack();
    assert_eq!(bridge.flush_state(), FlushState::Flushing);
    bridge.close().await.unwrap();

    assert_eq!(store.inner.write_count(), 1);
    assert_eq!(store.inner.snapshot()[&partition(0)], offset(1));
    let snapshot = bridge.metrics().snapshot();
    assert_eq!(snapshot.flushes_committed, 1);
    assert_eq!(snapshot.flushes_cancelled, 0);
    assert_eq!(script.commits(), 1);
    assert_eq!(script.stops(), 1);
}

#[tokio::test]
async fn test_open_rejects_invalid_config() {
    let script = Script::new().batch(vec![record(0, 1)]);
    let mut config = scripted_config();
    config.flush_timeout = Duration::ZERO;

    let result = Bridge::open(config, &registry_with(&script)).await;
    assert!(matches!(result, Err(BridgeError::Config(_))));
    assert_eq!(script.polls(), 0);
    assert_eq!(script.stops(), 0);
}

#[tokio::test]
async fn test_unknown_task_fails_open() {
    let script = Script::new();
    let ledger = MockLedger::new(Completion::Succeed);
    let registry = common::registry_with(&script);
    let ledger: std::sync::Arc<dyn rask_source_bridge::offsets::OffsetLedger> = ledger;

    let result = rask_source_bridge::Bridge::open_with_ledger(
        rask_source_bridge::BridgeConfig::new("jdbc"),
        &registry,
        ledger,
    )
    .await;
    assert!(matches!(result, Err(BridgeError::Registry(_))));
}

#[test]
fn test_ledger_error_display() {
    let err = BridgeError::from(LedgerError::FlushInProgress);
    assert_eq!(
        err.to_string(),
        "Offset ledger error: A flush is already in progress"
    );
}
