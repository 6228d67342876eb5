use super::config::{Config, ConfigError};
use super::sink::{NdjsonSink, SinkError};
use crate::bridge::{Bridge, BridgeError, BridgeRecord};
use crate::metrics::MetricsError;
use crate::registry::Registry;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Bridge error: {0}")]
    BridgeError(#[from] BridgeError),
    #[error("Sink error: {0}")]
    SinkError(#[from] SinkError),
    #[error("Metrics error: {0}")]
    MetricsError(#[from] MetricsError),
    #[error("Sink worker {worker} panicked")]
    WorkerPanicked { worker: usize },
}

type SharedReceiver = Arc<Mutex<mpsc::Receiver<BridgeRecord>>>;

/// Runs one bridge and fans its records out to a pool of sink workers.
pub struct ServiceManager {
    config: Config,
    registry: Registry,
    start_time: Instant,
}

impl ServiceManager {
    pub fn new(config: Config) -> Self {
        Self::with_registry(config, Registry::with_builtins())
    }

    pub fn with_registry(config: Config, registry: Registry) -> Self {
        Self {
            config,
            registry,
            start_time: Instant::now(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs until `shutdown` is cancelled or the bridge fails. Records go to
    /// stdout as NDJSON.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServiceError> {
        self.run_with_sink(NdjsonSink::stdout(), shutdown).await
    }

    pub async fn run_with_sink<W>(
        self,
        sink: NdjsonSink<W>,
        shutdown: CancellationToken,
    ) -> Result<(), ServiceError>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.config.validate()?;

        let mut bridge = Bridge::open(self.config.to_bridge_config(), &self.registry).await?;

        let exporter_token = shutdown.child_token();
        let exporter = self.spawn_exporter(&bridge, exporter_token.clone());

        let sink_config = &self.config.sink_config;
        let (tx, rx) = mpsc::channel::<BridgeRecord>(sink_config.queue_depth);
        let rx: SharedReceiver = Arc::new(Mutex::new(rx));
        let workers: Vec<JoinHandle<()>> = (0..sink_config.workers)
            .map(|id| tokio::spawn(sink_worker(id, Arc::clone(&rx), sink.clone())))
            .collect();

        info!(
            task = %self.config.task,
            workers = sink_config.workers,
            "Source bridge service started"
        );

        let mut result: Result<(), ServiceError> = Ok(());
        loop {
            let record = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping source bridge");
                    break;
                }
                record = bridge.read() => record,
            };

            match record {
                Ok(record) => {
                    if tx.send(record).await.is_err() {
                        error!("All sink workers have exited, stopping source bridge");
                        break;
                    }
                }
                Err(BridgeError::Closed) => break,
                Err(e) => {
                    error!("Source bridge failed: {}", e);
                    result = Err(e.into());
                    break;
                }
            }
        }

        // Workers drain what is already queued, then exit on the closed channel.
        drop(tx);
        for (worker, joined) in join_all(workers).await.into_iter().enumerate() {
            if joined.is_err() {
                error!(worker, "Sink worker panicked");
                if result.is_ok() {
                    result = Err(ServiceError::WorkerPanicked { worker });
                }
            }
        }

        if let Err(e) = bridge.close().await {
            warn!("Error while closing source bridge: {}", e);
            if result.is_ok() {
                result = Err(e.into());
            }
        }

        exporter_token.cancel();
        if let Some(exporter) = exporter {
            match exporter.await {
                Ok(Err(e)) => warn!("Metrics exporter stopped with error: {}", e),
                Err(e) => warn!("Metrics exporter task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }

        let snapshot = bridge.metrics().snapshot();
        info!(
            uptime_secs = self.start_time.elapsed().as_secs(),
            records_emitted = snapshot.records_emitted,
            flushes_committed = snapshot.flushes_committed,
            "Source bridge service stopped"
        );

        result
    }

    #[cfg(feature = "metrics")]
    fn spawn_exporter(
        &self,
        bridge: &Bridge,
        token: CancellationToken,
    ) -> Option<JoinHandle<Result<(), MetricsError>>> {
        let metrics_config = &self.config.metrics_config;
        if !metrics_config.enabled {
            return None;
        }

        let exporter =
            crate::metrics::PrometheusExporter::new(bridge.metrics().clone(), metrics_config.port);
        info!(addr = %exporter.addr(), "Starting metrics exporter");
        Some(tokio::spawn(exporter.serve(token)))
    }

    #[cfg(not(feature = "metrics"))]
    fn spawn_exporter(
        &self,
        _bridge: &Bridge,
        _token: CancellationToken,
    ) -> Option<JoinHandle<Result<(), MetricsError>>> {
        if self.config.metrics_config.enabled {
            warn!("Metrics requested but the binary was built without the metrics feature");
        }
        None
    }
}

async fn sink_worker<W>(id: usize, rx: SharedReceiver, sink: NdjsonSink<W>)
where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        let next = rx.lock().await.recv().await;
        let Some(record) = next else {
            debug!(worker = id, "Sink worker exiting");
            return;
        };

        let (data, ack) = record.into_parts();
        match sink.deliver(&data).await {
            Ok(()) => ack.ack(),
            Err(e) => {
                warn!(worker = id, batch = ack.batch_id(), "Delivery failed: {}", e);
                ack.fail();
            }
        }
    }
}
