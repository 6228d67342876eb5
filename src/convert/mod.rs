pub mod json;
pub mod string;

pub use json::JsonConverter;
pub use string::StringConverter;

use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Serialization failed for topic '{topic}': {source}")]
    Serialization {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unsupported value for topic '{topic}': {reason}")]
    Unsupported { topic: String, reason: String },
    #[error("Invalid converter configuration: {0}")]
    InvalidConfig(String),
}

/// Turns connect data into the bytes handed downstream.
///
/// One instance converts keys and another converts values; `configure`
/// tells each which role it plays.
pub trait Converter: Send + Sync {
    fn configure(
        &mut self,
        config: &HashMap<String, String>,
        is_key: bool,
    ) -> Result<(), ConversionError> {
        let _ = (config, is_key);
        Ok(())
    }

    /// Returns `None` for absent data (`Value::Null`).
    fn from_connect_data(&self, topic: &str, value: &Value)
    -> Result<Option<Bytes>, ConversionError>;
}
