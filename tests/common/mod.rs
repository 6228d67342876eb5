#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use rask_source_bridge::bridge::{Bridge, BridgeConfig};
use rask_source_bridge::domain::{SourceOffset, SourcePartition, SourceRecord};
use rask_source_bridge::offsets::{
    FlushCallback, FlushHandle, LedgerError, OffsetLedger, OffsetMap,
};
use rask_source_bridge::registry::Registry;
use rask_source_bridge::task::{SourceTask, SourceTaskContext, TaskError};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;

pub const SCRIPTED_TASK: &str = "scripted";

pub fn partition(n: u32) -> SourcePartition {
    SourcePartition::new().with("p", n.to_string())
}

pub fn offset(n: u64) -> SourceOffset {
    SourceOffset::new().with("o", n)
}

pub fn record(p: u32, o: u64) -> SourceRecord {
    SourceRecord::new(partition(p), offset(o), "events", json!(format!("value-{o}")))
}

/// Polls answered from a shared script; an exhausted script polls empty.
#[derive(Clone, Default)]
pub struct Script {
    polls: Arc<Mutex<VecDeque<Result<Vec<SourceRecord>, String>>>>,
    pub poll_count: Arc<AtomicUsize>,
    pub commit_count: Arc<AtomicUsize>,
    pub stop_count: Arc<AtomicUsize>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch(self, records: Vec<SourceRecord>) -> Self {
        self.polls.lock().push_back(Ok(records));
        self
    }

    pub fn empty(self) -> Self {
        self.batch(Vec::new())
    }

    pub fn error(self, message: &str) -> Self {
        self.polls.lock().push_back(Err(message.to_string()));
        self
    }

    pub fn polls(&self) -> usize {
        self.poll_count.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commit_count.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stop_count.load(Ordering::SeqCst)
    }
}

pub struct ScriptedTask {
    script: Script,
}

#[async_trait]
impl SourceTask for ScriptedTask {
    async fn start(
        &mut self,
        _context: SourceTaskContext,
        _config: &HashMap<String, String>,
    ) -> Result<(), TaskError> {
        Ok(())
    }

    async fn poll(&mut self) -> Result<Vec<SourceRecord>, TaskError> {
        self.script.poll_count.fetch_add(1, Ordering::SeqCst);
        match self.script.polls.lock().pop_front() {
            Some(Ok(records)) => Ok(records),
            Some(Err(message)) => Err(TaskError::Failed(message)),
            None => Ok(Vec::new()),
        }
    }

    async fn commit(&mut self) -> Result<(), TaskError> {
        self.script.commit_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), TaskError> {
        self.script.stop_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn registry_with(script: &Script) -> Registry {
    let registry = Registry::with_builtins();
    let script = script.clone();
    registry.register_task(
        SCRIPTED_TASK,
        Arc::new(move || {
            Box::new(ScriptedTask {
                script: script.clone(),
            })
        }),
    );
    registry
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Succeed,
    Fail,
    /// Keeps the callback; `complete_held` fires it later.
    Never,
    /// `begin_flush` reports nothing to flush.
    NothingToFlush,
}

/// Ledger that counts every call and completes flushes as told.
pub struct MockLedger {
    completion: Completion,
    runtime: Handle,
    buffered: Mutex<OffsetMap>,
    to_flush: Mutex<Option<OffsetMap>>,
    committed: Arc<Mutex<OffsetMap>>,
    held: Mutex<Vec<FlushCallback>>,
    next_flush_id: AtomicUsize,
    pub begin_calls: AtomicUsize,
    pub flush_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
}

impl MockLedger {
    pub fn new(completion: Completion) -> Arc<Self> {
        Arc::new(Self {
            completion,
            runtime: Handle::current(),
            buffered: Mutex::new(OffsetMap::new()),
            to_flush: Mutex::new(None),
            committed: Arc::new(Mutex::new(OffsetMap::new())),
            held: Mutex::new(Vec::new()),
            next_flush_id: AtomicUsize::new(0),
            begin_calls: AtomicUsize::new(0),
            flush_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
        })
    }

    pub fn committed(&self) -> OffsetMap {
        self.committed.lock().clone()
    }

    pub fn begins(&self) -> usize {
        self.begin_calls.load(Ordering::SeqCst)
    }

    pub fn flushes(&self) -> usize {
        self.flush_calls.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    /// Fires callbacks held back in `Never` mode.
    pub fn complete_held(&self, result: fn() -> Result<(), LedgerError>) -> usize {
        let held: Vec<_> = self.held.lock().drain(..).collect();
        let count = held.len();
        for callback in held {
            callback(result());
        }
        count
    }
}

#[async_trait]
impl OffsetLedger for MockLedger {
    async fn start(&self) -> Result<(), LedgerError> {
        Ok(())
    }

    async fn stop(&self) {}

    async fn get(&self, partitions: &[SourcePartition]) -> Result<OffsetMap, LedgerError> {
        let committed = self.committed.lock();
        Ok(partitions
            .iter()
            .filter_map(|p| committed.get(p).map(|o| (p.clone(), o.clone())))
            .collect())
    }

    fn set(&self, partition: SourcePartition, offset: SourceOffset) {
        self.buffered.lock().insert(partition, offset);
    }

    fn begin_flush(&self) -> Result<bool, LedgerError> {
        self.begin_calls.fetch_add(1, Ordering::SeqCst);
        if self.completion == Completion::NothingToFlush {
            return Ok(false);
        }
        let mut to_flush = self.to_flush.lock();
        if to_flush.is_some() {
            return Err(LedgerError::FlushInProgress);
        }
        let buffered = std::mem::take(&mut *self.buffered.lock());
        if buffered.is_empty() {
            return Ok(false);
        }
        *to_flush = Some(buffered);
        Ok(true)
    }

    fn do_flush(&self, on_complete: FlushCallback) -> Option<FlushHandle> {
        self.flush_calls.fetch_add(1, Ordering::SeqCst);
        let id = self.next_flush_id.fetch_add(1, Ordering::SeqCst) as u64;

        match self.completion {
            Completion::Succeed => {
                let offsets = self.to_flush.lock().take()?;
                let committed = Arc::clone(&self.committed);
                self.runtime.spawn(async move {
                    committed.lock().extend(offsets);
                    on_complete(Ok(()));
                });
            }
            Completion::Fail => {
                self.to_flush.lock().as_ref()?;
                self.runtime.spawn(async move {
                    on_complete(Err(LedgerError::WriteFailed("injected".to_string())));
                });
            }
            Completion::Never => {
                self.to_flush.lock().as_ref()?;
                self.held.lock().push(on_complete);
            }
            Completion::NothingToFlush => return None,
        }
        Some(FlushHandle::new(id))
    }

    fn cancel_flush(&self) {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(to_flush) = self.to_flush.lock().take() {
            let mut buffered = self.buffered.lock();
            for (partition, offset) in to_flush {
                buffered.entry(partition).or_insert(offset);
            }
        }
    }
}

pub fn scripted_config() -> BridgeConfig {
    BridgeConfig::new(SCRIPTED_TASK)
}

pub async fn open_bridge(
    script: &Script,
    ledger: &Arc<MockLedger>,
    config: BridgeConfig,
) -> Bridge {
    let ledger: Arc<dyn OffsetLedger> = ledger.clone();
    Bridge::open_with_ledger(config, &registry_with(script), ledger)
        .await
        .unwrap()
}

/// Waits on the real clock until `check` holds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}
