use super::coordinator::{BatchId, FlushCoordinator};
use crate::domain::KeyValue;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Payload and metadata of a record handed downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordData {
    /// Base64 of the converted key bytes.
    pub key: Option<String>,
    pub value: KeyValue,
    pub topic_name: String,
    pub destination_topic: String,
    pub event_time: Option<DateTime<Utc>>,
    pub partition_id: String,
    pub properties: HashMap<String, String>,
}

/// Acknowledgment half of a [`BridgeRecord`].
///
/// Dropping it without calling `ack` or `fail` fails the record, so a lost
/// record never lets its batch commit.
pub struct RecordAck {
    batch: BatchId,
    coordinator: Option<FlushCoordinator>,
}

impl RecordAck {
    pub(crate) fn new(batch: BatchId, coordinator: FlushCoordinator) -> Self {
        Self {
            batch,
            coordinator: Some(coordinator),
        }
    }

    pub fn batch_id(&self) -> BatchId {
        self.batch
    }

    pub fn ack(mut self) {
        if let Some(coordinator) = self.coordinator.take() {
            coordinator.acknowledge(self.batch);
        }
    }

    pub fn fail(mut self) {
        if let Some(coordinator) = self.coordinator.take() {
            coordinator.fail(self.batch);
        }
    }
}

impl Drop for RecordAck {
    fn drop(&mut self) {
        if let Some(coordinator) = self.coordinator.take() {
            tracing::warn!(batch = self.batch, "Record dropped without ack or fail, failing it");
            coordinator.fail(self.batch);
        }
    }
}

impl std::fmt::Debug for RecordAck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordAck")
            .field("batch", &self.batch)
            .field("resolved", &self.coordinator.is_none())
            .finish()
    }
}

/// One record handed downstream. Exactly one of `ack`/`fail` consumes it.
#[derive(Debug)]
pub struct BridgeRecord {
    data: RecordData,
    ack: RecordAck,
}

impl BridgeRecord {
    pub(crate) fn new(data: RecordData, ack: RecordAck) -> Self {
        Self { data, ack }
    }

    pub fn key(&self) -> Option<&str> {
        self.data.key.as_deref()
    }

    pub fn value(&self) -> &KeyValue {
        &self.data.value
    }

    pub fn topic_name(&self) -> &str {
        &self.data.topic_name
    }

    pub fn destination_topic(&self) -> &str {
        &self.data.destination_topic
    }

    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        self.data.event_time
    }

    pub fn partition_id(&self) -> &str {
        &self.data.partition_id
    }

    pub fn properties(&self) -> &HashMap<String, String> {
        &self.data.properties
    }

    pub fn record_sequence(&self) -> Option<u64> {
        None
    }

    pub fn batch_id(&self) -> BatchId {
        self.ack.batch_id()
    }

    pub fn data(&self) -> &RecordData {
        &self.data
    }

    pub fn ack(self) {
        self.ack.ack();
    }

    pub fn fail(self) {
        self.ack.fail();
    }

    /// Splits the record so the payload can be moved elsewhere while the
    /// acknowledgment travels with the delivery.
    pub fn into_parts(self) -> (RecordData, RecordAck) {
        (self.data, self.ack)
    }
}
