use super::record::RecordData;
use crate::convert::{ConversionError, Converter};
use crate::domain::{KeyValue, SourceRecord};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::HashMap;

/// Converts task records into downstream record data.
pub struct RecordAdapter {
    key_converter: Box<dyn Converter>,
    value_converter: Box<dyn Converter>,
    topic_namespace: String,
}

impl RecordAdapter {
    pub fn new(
        key_converter: Box<dyn Converter>,
        value_converter: Box<dyn Converter>,
        topic_namespace: impl Into<String>,
    ) -> Self {
        Self {
            key_converter,
            value_converter,
            topic_namespace: topic_namespace.into(),
        }
    }

    pub fn destination_topic(&self, topic: &str) -> String {
        format!("{}/{}", self.topic_namespace, topic)
    }

    pub fn adapt(&self, record: &SourceRecord) -> Result<RecordData, ConversionError> {
        let key_bytes = self
            .key_converter
            .from_connect_data(&record.topic, &record.key)?;
        let value_bytes = self
            .value_converter
            .from_connect_data(&record.topic, &record.value)?;

        Ok(RecordData {
            key: key_bytes.as_ref().map(|bytes| STANDARD.encode(bytes)),
            value: KeyValue {
                key: key_bytes,
                value: value_bytes,
            },
            topic_name: record.topic.clone(),
            destination_topic: self.destination_topic(&record.topic),
            event_time: record.timestamp,
            partition_id: record.partition.to_string(),
            properties: HashMap::new(),
        })
    }
}

impl std::fmt::Debug for RecordAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordAdapter")
            .field("topic_namespace", &self.topic_namespace)
            .finish_non_exhaustive()
    }
}
