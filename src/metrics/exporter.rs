use super::{BridgeMetrics, MetricsError};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use warp::{Filter, Reply};

/// Serves `/metrics` (prometheus text format) and `/health`.
pub struct PrometheusExporter {
    metrics: BridgeMetrics,
    addr: SocketAddr,
}

impl PrometheusExporter {
    pub fn new(metrics: BridgeMetrics, port: u16) -> Self {
        Self {
            metrics,
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Runs until `shutdown` is cancelled.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), MetricsError> {
        let metrics = self.metrics.clone();
        let metrics_route = warp::path!("metrics")
            .and(warp::get())
            .map(move || match metrics.export_text() {
                Ok(text) => {
                    warp::reply::with_header(text, "content-type", "text/plain; version=0.0.4")
                        .into_response()
                }
                Err(_) => warp::reply::with_status(
                    "Internal Server Error",
                    warp::http::StatusCode::INTERNAL_SERVER_ERROR,
                )
                .into_response(),
            });
        let health = warp::path!("health").and(warp::get()).map(|| "OK");
        let routes = metrics_route.or(health);

        let (bound, server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(self.addr, async move {
                shutdown.cancelled().await;
            })
            .map_err(|e| MetricsError::HttpError(e.to_string()))?;

        tracing::info!("Starting Prometheus metrics server on {}", bound);
        server.await;
        tracing::info!("Metrics server stopped");
        Ok(())
    }
}
