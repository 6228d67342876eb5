use super::{Config, ConfigError, OffsetStorageKind};

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.task.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "Source task must be set".to_string(),
            ));
        }

        if self.topic_namespace.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "Topic namespace must not be empty".to_string(),
            ));
        }

        // Validate timeouts
        if self.flush_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "Flush timeout must be greater than 0".to_string(),
            ));
        }
        if self.poll_backoff_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "Poll backoff must be greater than 0".to_string(),
            ));
        }

        if self.workers == 0 {
            return Err(ConfigError::InvalidConfig(
                "At least one sink worker is required".to_string(),
            ));
        }

        if self.offset_storage == OffsetStorageKind::File
            && self.offset_storage_path.as_os_str().is_empty()
        {
            return Err(ConfigError::InvalidConfig(
                "Offset storage path must be set for file storage".to_string(),
            ));
        }

        if self.enable_metrics && self.metrics_port == 0 {
            return Err(ConfigError::InvalidConfig(
                "Metrics port must be set when metrics are enabled".to_string(),
            ));
        }

        Ok(())
    }
}
