use super::groups::{MetricsConfig, SinkConfig};
use super::serde_helpers::{load_env_path, load_env_string, load_env_var, parse_properties};
use super::{ConfigError, LogFormat, LogLevel, OffsetStorageKind};
use crate::bridge::{BridgeConfig, OffsetStorageConfig};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Registered name of the source task to run
    #[arg(long, env = "SOURCE_TASK", default_value = "file-stream")]
    pub task: String,

    /// Namespace prefixed to every destination topic
    #[arg(long, env = "TOPIC_NAMESPACE", default_value = "public/default")]
    pub topic_namespace: String,

    /// Converter used for record keys
    #[arg(long, env = "KEY_CONVERTER", default_value = "string")]
    pub key_converter: String,

    /// Converter used for record values
    #[arg(long, env = "VALUE_CONVERTER", default_value = "string")]
    pub value_converter: String,

    /// How long to wait for an offset flush before cancelling it
    #[arg(long, env = "FLUSH_TIMEOUT_MS", default_value = "2000")]
    pub flush_timeout_ms: u64,

    /// Sleep between polls that returned nothing
    #[arg(long, env = "POLL_BACKOFF_MS", default_value = "1000")]
    pub poll_backoff_ms: u64,

    /// Offset storage backend
    #[arg(long, env = "OFFSET_STORAGE", default_value = "file")]
    pub offset_storage: OffsetStorageKind,

    /// Offset document path (file storage only)
    #[arg(
        long,
        env = "OFFSET_STORAGE_PATH",
        default_value = "/tmp/rask-source-bridge/offsets.json"
    )]
    pub offset_storage_path: PathBuf,

    /// Task property as key=value, repeatable
    #[arg(long = "task-property", value_name = "KEY=VALUE")]
    #[serde(skip)]
    pub task_property_args: Vec<String>,

    /// Task properties from a config file, merged under --task-property
    #[arg(skip)]
    pub task_properties: HashMap<String, String>,

    /// Number of downstream delivery workers
    #[arg(long, env = "SINK_WORKERS", default_value = "4")]
    pub workers: usize,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    /// Enable metrics export
    #[arg(long, env = "ENABLE_METRICS")]
    pub enable_metrics: bool,

    /// Metrics export port
    #[arg(long, env = "METRICS_PORT", default_value = "9091")]
    pub metrics_port: u16,

    /// Configuration file path (optional)
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Derived fields (not CLI arguments)
    #[serde(skip)]
    #[arg(skip)]
    pub flush_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub poll_backoff: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub metrics_config: MetricsConfig,

    #[serde(skip)]
    #[arg(skip)]
    pub sink_config: SinkConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            task: "file-stream".to_string(),
            topic_namespace: "public/default".to_string(),
            key_converter: "string".to_string(),
            value_converter: "string".to_string(),
            flush_timeout_ms: 2000,
            poll_backoff_ms: 1000,
            offset_storage: OffsetStorageKind::File,
            offset_storage_path: PathBuf::from("/tmp/rask-source-bridge/offsets.json"),
            task_property_args: Vec::new(),
            task_properties: HashMap::new(),
            workers: 4,
            log_level: LogLevel::Info,
            log_format: LogFormat::Compact,
            enable_metrics: false,
            metrics_port: 9091,
            config_file: None,
            flush_timeout: Duration::from_millis(2000),
            poll_backoff: Duration::from_millis(1000),
            metrics_config: MetricsConfig::default(),
            sink_config: SinkConfig::default(),
        }
    }
}

/// Takes `base` for a field the command line left at its default.
fn keep_base<T: PartialEq>(current: &mut T, base: T, default: &T) {
    if current == default && base != *default {
        *current = base;
    }
}

impl Config {
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::parse_from(args);
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(rask_config) = std::env::var("RASK_CONFIG") {
            return Self::from_rask_config_env(&rask_config);
        }

        let mut config = Config::default();

        load_env_string("SOURCE_TASK", &mut config.task);
        load_env_string("TOPIC_NAMESPACE", &mut config.topic_namespace);
        load_env_string("KEY_CONVERTER", &mut config.key_converter);
        load_env_string("VALUE_CONVERTER", &mut config.value_converter);
        load_env_var("FLUSH_TIMEOUT_MS", &mut config.flush_timeout_ms)?;
        load_env_var("POLL_BACKOFF_MS", &mut config.poll_backoff_ms)?;

        if let Ok(storage) = std::env::var("OFFSET_STORAGE") {
            config.offset_storage = match storage.to_lowercase().as_str() {
                "memory" => OffsetStorageKind::Memory,
                "file" => OffsetStorageKind::File,
                _ => {
                    return Err(ConfigError::EnvError(format!(
                        "Invalid OFFSET_STORAGE: {storage}. Valid values: memory, file"
                    )));
                }
            };
        }
        load_env_path("OFFSET_STORAGE_PATH", &mut config.offset_storage_path);
        load_env_var("SINK_WORKERS", &mut config.workers)?;

        if let Ok(log_level) = std::env::var("LOG_LEVEL") {
            config.log_level = LogLevel::from_str(&log_level, true)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {log_level}")))?;
        }
        if let Ok(log_format) = std::env::var("LOG_FORMAT") {
            config.log_format = LogFormat::from_str(&log_format, true).map_err(|_| {
                ConfigError::EnvError(format!("Invalid LOG_FORMAT: {log_format}"))
            })?;
        }

        load_env_var("ENABLE_METRICS", &mut config.enable_metrics)?;
        load_env_var("METRICS_PORT", &mut config.metrics_port)?;

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_args_and_env<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        // RASK_CONFIG is the base; anything set on the command line or via
        // the per-field env vars wins.
        let base = if let Ok(rask_config) = std::env::var("RASK_CONFIG") {
            Self::from_rask_config_env(&rask_config)?
        } else {
            Config::default()
        };
        let defaults = Config::default();

        let mut config = Config::parse_from(args);
        keep_base(&mut config.task, base.task, &defaults.task);
        keep_base(&mut config.topic_namespace, base.topic_namespace, &defaults.topic_namespace);
        keep_base(&mut config.key_converter, base.key_converter, &defaults.key_converter);
        keep_base(&mut config.value_converter, base.value_converter, &defaults.value_converter);
        keep_base(&mut config.flush_timeout_ms, base.flush_timeout_ms, &defaults.flush_timeout_ms);
        keep_base(&mut config.poll_backoff_ms, base.poll_backoff_ms, &defaults.poll_backoff_ms);
        keep_base(&mut config.offset_storage, base.offset_storage, &defaults.offset_storage);
        keep_base(
            &mut config.offset_storage_path,
            base.offset_storage_path,
            &defaults.offset_storage_path,
        );
        keep_base(&mut config.workers, base.workers, &defaults.workers);
        keep_base(&mut config.log_level, base.log_level, &defaults.log_level);
        keep_base(&mut config.log_format, base.log_format, &defaults.log_format);
        keep_base(&mut config.enable_metrics, base.enable_metrics, &defaults.enable_metrics);
        keep_base(&mut config.metrics_port, base.metrics_port, &defaults.metrics_port);
        config.task_properties = base.task_properties;

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_rask_config_env(rask_config: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(rask_config)?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn post_process(&mut self) -> Result<(), ConfigError> {
        self.flush_timeout = Duration::from_millis(self.flush_timeout_ms);
        self.poll_backoff = Duration::from_millis(self.poll_backoff_ms);

        let overrides = parse_properties(&self.task_property_args)?;
        self.task_properties.extend(overrides);

        self.metrics_config.enabled = self.enable_metrics;
        self.metrics_config.port = self.metrics_port;
        self.sink_config.workers = self.workers;
        self.sink_config.queue_depth = self.workers.saturating_mul(2).max(1);

        Ok(())
    }

    /// Library-level configuration for [`crate::bridge::Bridge::open`].
    pub fn to_bridge_config(&self) -> BridgeConfig {
        let offset_storage = match self.offset_storage {
            OffsetStorageKind::Memory => OffsetStorageConfig::Memory,
            OffsetStorageKind::File => OffsetStorageConfig::File {
                path: self.offset_storage_path.clone(),
            },
        };

        BridgeConfig {
            task: self.task.clone(),
            topic_namespace: self.topic_namespace.clone(),
            key_converter: self.key_converter.clone(),
            value_converter: self.value_converter.clone(),
            flush_timeout: self.flush_timeout,
            poll_backoff: self.poll_backoff,
            offset_storage,
            task_properties: self.task_properties.clone(),
        }
    }
}
