use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Identifies the slice of an external system a record was read from,
/// e.g. `{"filename": "/var/log/app.log"}`.
///
/// Keys are kept ordered so the string form is stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourcePartition(BTreeMap<String, String>);

impl SourcePartition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SourcePartition {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Renders as `key=value` pairs joined with `,`.
impl fmt::Display for SourcePartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

/// Position within a [`SourcePartition`]. Opaque to the bridge; only the
/// source task interprets it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceOffset(BTreeMap<String, Value>);

impl SourceOffset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for SourceOffset {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A raw record as produced by a source task.
///
/// Key and value are connect data: JSON values that the configured
/// converters turn into bytes. `Value::Null` stands for "absent".
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub partition: SourcePartition,
    pub offset: SourceOffset,
    pub topic: String,
    pub key: Value,
    pub value: Value,
    pub timestamp: Option<DateTime<Utc>>,
}

impl SourceRecord {
    pub fn new(
        partition: SourcePartition,
        offset: SourceOffset,
        topic: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            partition,
            offset,
            topic: topic.into(),
            key: Value::Null,
            value: value.into(),
            timestamp: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<Value>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Converted key and value bytes carried by a bridge record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
}
