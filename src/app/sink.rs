use crate::bridge::RecordData;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Write failed: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization failed: {0}")]
    SerializationError(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct DeliveredRecord<'a> {
    topic: &'a str,
    source_topic: &'a str,
    partition: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    event_time: Option<DateTime<Utc>>,
}

/// Writes each delivered record as one NDJSON line.
///
/// UTF-8 values are written as text, anything else as `value_base64`.
pub struct NdjsonSink<W> {
    writer: Arc<Mutex<W>>,
}

impl<W> Clone for NdjsonSink<W> {
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
        }
    }
}

impl NdjsonSink<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W: AsyncWrite + Unpin + Send> NdjsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    pub async fn deliver(&self, record: &RecordData) -> Result<(), SinkError> {
        let (value, value_base64) = split_value(record.value.value.as_ref());
        let line = DeliveredRecord {
            topic: &record.destination_topic,
            source_topic: &record.topic_name,
            partition: &record.partition_id,
            key: record.key.as_deref(),
            value,
            value_base64,
            event_time: record.event_time,
        };

        let mut encoded = serde_json::to_vec(&line)?;
        encoded.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        Ok(())
    }

    pub async fn into_inner(self) -> Option<W> {
        Arc::into_inner(self.writer).map(Mutex::into_inner)
    }
}

fn split_value(value: Option<&Bytes>) -> (Option<String>, Option<String>) {
    match value {
        None => (None, None),
        Some(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => (Some(text.to_string()), None),
            Err(_) => (None, Some(STANDARD.encode(bytes))),
        },
    }
}
