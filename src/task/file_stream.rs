use super::{SourceTask, SourceTaskContext, TaskError, required_property};
use crate::domain::{SourceOffset, SourcePartition, SourceRecord};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};

pub const FILE_PROPERTY: &str = "file";
pub const TOPIC_PROPERTY: &str = "topic";
pub const BATCH_SIZE_PROPERTY: &str = "batch.size";

const FILENAME_KEY: &str = "filename";
const POSITION_KEY: &str = "position";
const DEFAULT_BATCH_SIZE: usize = 2000;

/// Tails a text file, emitting one record per complete line. Bytes that are
/// not UTF-8 are replaced with U+FFFD.
///
/// The partition is `{filename}` and the offset is the byte position after
/// the line, so a restart resumes right after the last committed line.
#[derive(Debug, Default)]
pub struct FileStreamSourceTask {
    path: PathBuf,
    topic: String,
    batch_size: usize,
    partition: SourcePartition,
    position: u64,
    reader: Option<BufReader<File>>,
    started: bool,
}

impl FileStreamSourceTask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    async fn open(&self) -> Result<Option<BufReader<File>>, TaskError> {
        match File::open(&self.path).await {
            Ok(file) => {
                let mut reader = BufReader::new(file);
                reader.seek(SeekFrom::Start(self.position)).await?;
                tracing::debug!(
                    path = %self.path.display(),
                    position = self.position,
                    "Opened source file"
                );
                Ok(Some(reader))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %self.path.display(), "Source file not found yet");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SourceTask for FileStreamSourceTask {
    async fn start(
        &mut self,
        context: SourceTaskContext,
        config: &HashMap<String, String>,
    ) -> Result<(), TaskError> {
        self.path = PathBuf::from(required_property(config, FILE_PROPERTY)?);
        self.topic = required_property(config, TOPIC_PROPERTY)?.to_string();
        self.batch_size = match config.get(BATCH_SIZE_PROPERTY) {
            Some(raw) => raw
                .parse()
                .ok()
                .filter(|size| *size > 0)
                .ok_or_else(|| TaskError::InvalidProperty {
                    key: BATCH_SIZE_PROPERTY.to_string(),
                    reason: format!("expected a positive integer, got '{raw}'"),
                })?,
            None => DEFAULT_BATCH_SIZE,
        };
        self.partition =
            SourcePartition::new().with(FILENAME_KEY, self.path.to_string_lossy().into_owned());

        self.position = context
            .offset_reader()
            .offset(&self.partition)
            .await?
            .and_then(|offset| offset.get(POSITION_KEY).and_then(Value::as_u64))
            .unwrap_or(0);

        tracing::info!(
            path = %self.path.display(),
            topic = %self.topic,
            position = self.position,
            "File stream task started"
        );
        self.started = true;
        Ok(())
    }

    async fn poll(&mut self) -> Result<Vec<SourceRecord>, TaskError> {
        if !self.started {
            return Err(TaskError::NotStarted);
        }
        if self.reader.is_none() {
            self.reader = self.open().await?;
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(Vec::new());
        };

        let start = self.position;
        let mut records = Vec::new();
        let mut line = Vec::new();
        while records.len() < self.batch_size {
            line.clear();
            let read = match reader.read_until(b'\n', &mut line).await {
                Ok(read) => read,
                Err(e) => {
                    // Nothing from this poll was emitted; reread it on the next one.
                    self.position = start;
                    self.reader = None;
                    return Err(e.into());
                }
            };
            if read == 0 {
                break;
            }
            if line.last() != Some(&b'\n') {
                // Writer is mid-line; pick it up once it is complete.
                reader.seek(SeekFrom::Start(self.position)).await?;
                break;
            }

            self.position += read as u64;
            let text = String::from_utf8_lossy(&line)
                .trim_end_matches(['\n', '\r'])
                .to_string();
            records.push(SourceRecord::new(
                self.partition.clone(),
                SourceOffset::new().with(POSITION_KEY, self.position),
                self.topic.clone(),
                Value::String(text),
            ));
        }

        if !records.is_empty() {
            tracing::trace!(count = records.len(), position = self.position, "Read lines");
        }
        Ok(records)
    }

    async fn stop(&mut self) -> Result<(), TaskError> {
        self.reader = None;
        self.started = false;
        tracing::info!(path = %self.path.display(), "File stream task stopped");
        Ok(())
    }
}
