pub mod file_stream;

pub use file_stream::FileStreamSourceTask;

use crate::domain::SourceRecord;
use crate::offsets::{LedgerError, OffsetReader};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Missing required task property: {0}")]
    MissingProperty(String),
    #[error("Invalid task property '{key}': {reason}")]
    InvalidProperty { key: String, reason: String },
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Offset lookup failed: {0}")]
    OffsetError(#[from] LedgerError),
    #[error("Task not started")]
    NotStarted,
    #[error("Task failure: {0}")]
    Failed(String),
}

/// What a task gets to see of the bridge: the offsets committed by earlier
/// runs and the namespace its records are published under.
#[derive(Debug, Clone)]
pub struct SourceTaskContext {
    offset_reader: OffsetReader,
    topic_namespace: Arc<str>,
}

impl SourceTaskContext {
    pub fn new(offset_reader: OffsetReader, topic_namespace: &str) -> Self {
        Self {
            offset_reader,
            topic_namespace: Arc::from(topic_namespace),
        }
    }

    pub fn offset_reader(&self) -> &OffsetReader {
        &self.offset_reader
    }

    pub fn topic_namespace(&self) -> &str {
        &self.topic_namespace
    }
}

pub fn required_property<'a>(
    config: &'a HashMap<String, String>,
    key: &str,
) -> Result<&'a str, TaskError> {
    config
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| TaskError::MissingProperty(key.to_string()))
}

/// A stateful external record source driven by the bridge's poll loop.
///
/// `poll` may return an empty batch when nothing is available; the bridge
/// backs off and polls again. `commit` is a best-effort notification that
/// every record returned so far has been durably committed.
#[async_trait]
pub trait SourceTask: Send {
    async fn start(
        &mut self,
        context: SourceTaskContext,
        config: &HashMap<String, String>,
    ) -> Result<(), TaskError>;

    async fn poll(&mut self) -> Result<Vec<SourceRecord>, TaskError>;

    async fn commit(&mut self) -> Result<(), TaskError> {
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), TaskError>;
}
