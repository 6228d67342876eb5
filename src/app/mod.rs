pub mod config;
pub mod logging_system;
pub mod service;
pub mod shutdown;
pub mod sink;

pub use config::{Config, ConfigError, LogFormat, LogLevel};
pub use logging_system::{LoggingError, LoggingSystem, setup_logging};
pub use service::{ServiceError, ServiceManager};
pub use shutdown::SignalHandler;
pub use sink::{NdjsonSink, SinkError};

use tracing::{error, info};

pub struct App {
    service_manager: ServiceManager,
}

impl App {
    pub fn from_args<I, T>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Config::from_args_and_env(args)?;
        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let final_config = if let Some(config_file) = &config.config_file {
            eprintln!("Loading configuration from file: {}", config_file.display());
            Config::from_file(config_file)?
        } else {
            config
        };

        setup_logging(final_config.log_level, final_config.log_format)?;

        info!("Starting rask-source-bridge v{}", crate::VERSION);
        info!(
            "Configuration: task={}, namespace={}, flush_timeout={:?}, workers={}",
            final_config.task,
            final_config.topic_namespace,
            final_config.flush_timeout,
            final_config.workers
        );

        Ok(Self {
            service_manager: ServiceManager::new(final_config),
        })
    }

    pub fn config(&self) -> &Config {
        self.service_manager.config()
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let signals = SignalHandler::install();

        info!("rask-source-bridge is running. Press Ctrl+C to stop.");
        self.service_manager.run(signals.token()).await?;

        info!("rask-source-bridge stopped.");
        Ok(())
    }
}

pub async fn main() -> anyhow::Result<()> {
    let app = App::from_args(std::env::args_os())?;
    if let Err(e) = app.run().await {
        error!("Application error: {:#}", e);
        return Err(e);
    }
    Ok(())
}
