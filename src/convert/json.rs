use super::{ConversionError, Converter};
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;

const ENVELOPE_KEY: &str = "converter.json.envelope";

/// Serializes connect data as compact JSON.
///
/// With `converter.json.envelope=true` the payload is wrapped as
/// `{"payload": ...}`.
#[derive(Debug, Default, Clone)]
pub struct JsonConverter {
    envelope: bool,
}

impl JsonConverter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Converter for JsonConverter {
    fn configure(
        &mut self,
        config: &HashMap<String, String>,
        _is_key: bool,
    ) -> Result<(), ConversionError> {
        if let Some(raw) = config.get(ENVELOPE_KEY) {
            self.envelope = raw.parse().map_err(|_| {
                ConversionError::InvalidConfig(format!(
                    "{ENVELOPE_KEY} must be true or false, got '{raw}'"
                ))
            })?;
        }
        Ok(())
    }

    fn from_connect_data(
        &self,
        topic: &str,
        value: &Value,
    ) -> Result<Option<Bytes>, ConversionError> {
        if value.is_null() {
            return Ok(None);
        }

        let encoded = if self.envelope {
            serde_json::to_vec(&serde_json::json!({ "payload": value }))
        } else {
            serde_json::to_vec(value)
        }
        .map_err(|source| ConversionError::Serialization {
            topic: topic.to_string(),
            source,
        })?;

        Ok(Some(Bytes::from(encoded)))
    }
}
