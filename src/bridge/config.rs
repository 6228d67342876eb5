use super::error::BridgeError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_millis(2000);
pub const DEFAULT_POLL_BACKOFF: Duration = Duration::from_millis(1000);
pub const DEFAULT_TOPIC_NAMESPACE: &str = "public/default";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OffsetStorageConfig {
    #[default]
    Memory,
    File {
        path: PathBuf,
    },
}

/// Everything [`super::Bridge::open`] needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub task: String,
    pub topic_namespace: String,
    pub key_converter: String,
    pub value_converter: String,
    #[serde(with = "duration_ms")]
    pub flush_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub poll_backoff: Duration,
    pub offset_storage: OffsetStorageConfig,
    /// Handed to the task's `start` and to both converters' `configure`.
    pub task_properties: HashMap<String, String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            task: String::new(),
            topic_namespace: DEFAULT_TOPIC_NAMESPACE.to_string(),
            key_converter: "json".to_string(),
            value_converter: "json".to_string(),
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            poll_backoff: DEFAULT_POLL_BACKOFF,
            offset_storage: OffsetStorageConfig::Memory,
            task_properties: HashMap::new(),
        }
    }
}

impl BridgeConfig {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Self::default()
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.task_properties.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.task.trim().is_empty() {
            return Err(BridgeError::Config("Source task must be set".to_string()));
        }
        if self.topic_namespace.trim().is_empty() {
            return Err(BridgeError::Config(
                "Topic namespace must not be empty".to_string(),
            ));
        }
        if self.key_converter.is_empty() || self.value_converter.is_empty() {
            return Err(BridgeError::Config(
                "Key and value converters must be set".to_string(),
            ));
        }
        if self.flush_timeout.is_zero() {
            return Err(BridgeError::Config(
                "Flush timeout must be greater than 0".to_string(),
            ));
        }
        if self.poll_backoff.is_zero() {
            return Err(BridgeError::Config(
                "Poll backoff must be greater than 0".to_string(),
            ));
        }
        if let OffsetStorageConfig::File { path } = &self.offset_storage
            && path.as_os_str().is_empty()
        {
            return Err(BridgeError::Config(
                "Offset storage path must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
