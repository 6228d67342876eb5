use super::{ConversionError, Converter};
use bytes::Bytes;
use serde_json::Value;

/// UTF-8 encodes strings as-is; other scalars use their JSON text.
#[derive(Debug, Default, Clone)]
pub struct StringConverter;

impl StringConverter {
    pub fn new() -> Self {
        Self
    }
}

impl Converter for StringConverter {
    fn from_connect_data(
        &self,
        topic: &str,
        value: &Value,
    ) -> Result<Option<Bytes>, ConversionError> {
        match value {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(Bytes::copy_from_slice(s.as_bytes()))),
            Value::Bool(_) | Value::Number(_) => Ok(Some(Bytes::from(value.to_string()))),
            Value::Array(_) | Value::Object(_) => Err(ConversionError::Unsupported {
                topic: topic.to_string(),
                reason: "string converter only handles scalar values".to_string(),
            }),
        }
    }
}
