#[cfg(feature = "metrics")]
pub mod exporter;

#[cfg(feature = "metrics")]
pub use exporter::PrometheusExporter;

use crate::bridge::FlushOutcome;
#[cfg(feature = "metrics")]
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[cfg(feature = "metrics")]
    #[error("Prometheus error: {0}")]
    PrometheusError(#[from] prometheus::Error),
    #[error("HTTP server error: {0}")]
    HttpError(String),
    #[error("Metrics disabled")]
    Disabled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub batches_opened: u64,
    pub records_emitted: u64,
    pub acks: u64,
    pub fails: u64,
    pub stale_acks: u64,
    pub empty_polls: u64,
    pub flushes_committed: u64,
    pub flushes_failed: u64,
    pub flushes_timed_out: u64,
    pub flushes_cancelled: u64,
}

impl MetricsSnapshot {
    pub fn flushes_resolved(&self) -> u64 {
        self.flushes_committed + self.flushes_failed + self.flushes_timed_out + self.flushes_cancelled
    }
}

#[derive(Default)]
struct Counters {
    batches_opened: AtomicU64,
    records_emitted: AtomicU64,
    acks: AtomicU64,
    fails: AtomicU64,
    stale_acks: AtomicU64,
    empty_polls: AtomicU64,
    flushes_committed: AtomicU64,
    flushes_failed: AtomicU64,
    flushes_timed_out: AtomicU64,
    flushes_cancelled: AtomicU64,
}

#[cfg(feature = "metrics")]
struct PrometheusMetrics {
    registry: Registry,
    batches_opened: IntCounter,
    records_emitted: IntCounter,
    acknowledgments: IntCounterVec,
    empty_polls: IntCounter,
    flushes: IntCounterVec,
    flush_duration: Histogram,
}

#[cfg(feature = "metrics")]
impl PrometheusMetrics {
    fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let batches_opened = IntCounter::new(
            "rask_bridge_batches_opened_total",
            "Total number of non-empty batches polled from the source task",
        )?;
        registry.register(Box::new(batches_opened.clone()))?;

        let records_emitted = IntCounter::new(
            "rask_bridge_records_emitted_total",
            "Total number of records handed downstream",
        )?;
        registry.register(Box::new(records_emitted.clone()))?;

        let acknowledgments = IntCounterVec::new(
            Opts::new(
                "rask_bridge_acknowledgments_total",
                "Downstream acknowledgments by kind",
            ),
            &["kind"], // ack, fail, stale
        )?;
        registry.register(Box::new(acknowledgments.clone()))?;

        let empty_polls = IntCounter::new(
            "rask_bridge_empty_polls_total",
            "Polls that returned no records",
        )?;
        registry.register(Box::new(empty_polls.clone()))?;

        let flushes = IntCounterVec::new(
            Opts::new("rask_bridge_flushes_total", "Resolved batches by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(flushes.clone()))?;

        let flush_duration = Histogram::with_opts(HistogramOpts::new(
            "rask_bridge_flush_duration_seconds",
            "Time from flush begin to resolution",
        ))?;
        registry.register(Box::new(flush_duration.clone()))?;

        Ok(Self {
            registry,
            batches_opened,
            records_emitted,
            acknowledgments,
            empty_polls,
            flushes,
            flush_duration,
        })
    }
}

struct Inner {
    counters: Counters,
    #[cfg(feature = "metrics")]
    prometheus: Option<PrometheusMetrics>,
}

/// Bridge event counters. Cheap to clone; all clones share state.
///
/// The atomic counters always work. With the `metrics` feature the same
/// events also feed a per-instance prometheus registry.
#[derive(Clone)]
pub struct BridgeMetrics {
    inner: Arc<Inner>,
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeMetrics {
    pub fn new() -> Self {
        #[cfg(feature = "metrics")]
        let prometheus = match PrometheusMetrics::new() {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                tracing::warn!("Failed to register prometheus metrics: {}", e);
                None
            }
        };

        Self {
            inner: Arc::new(Inner {
                counters: Counters::default(),
                #[cfg(feature = "metrics")]
                prometheus,
            }),
        }
    }

    pub fn record_batch_opened(&self, size: usize) {
        self.inner.counters.batches_opened.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        {
            if let Some(prom) = &self.inner.prometheus {
                prom.batches_opened.inc();
            }
        }
        tracing::trace!(size, "Batch opened");
    }

    pub fn record_emitted(&self) {
        self.inner.counters.records_emitted.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        {
            if let Some(prom) = &self.inner.prometheus {
                prom.records_emitted.inc();
            }
        }
    }

    pub fn record_ack(&self) {
        self.inner.counters.acks.fetch_add(1, Ordering::Relaxed);
        self.observe_acknowledgment("ack");
    }

    pub fn record_fail(&self) {
        self.inner.counters.fails.fetch_add(1, Ordering::Relaxed);
        self.observe_acknowledgment("fail");
    }

    pub fn record_stale_ack(&self) {
        self.inner.counters.stale_acks.fetch_add(1, Ordering::Relaxed);
        self.observe_acknowledgment("stale");
    }

    pub fn record_empty_poll(&self) {
        self.inner.counters.empty_polls.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        {
            if let Some(prom) = &self.inner.prometheus {
                prom.empty_polls.inc();
            }
        }
    }

    /// `elapsed` is measured from flush begin; `None` when the batch never
    /// reached a flush.
    pub fn record_outcome(&self, outcome: &FlushOutcome, elapsed: Option<Duration>) {
        let counters = &self.inner.counters;
        let counter = match outcome {
            FlushOutcome::Committed => &counters.flushes_committed,
            FlushOutcome::Failed(_) => &counters.flushes_failed,
            FlushOutcome::TimedOut => &counters.flushes_timed_out,
            FlushOutcome::Cancelled => &counters.flushes_cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        {
            if let Some(prom) = &self.inner.prometheus {
                prom.flushes.with_label_values(&[outcome.label()]).inc();
                if let Some(elapsed) = elapsed {
                    prom.flush_duration.observe(elapsed.as_secs_f64());
                }
            }
        }
        #[cfg(not(feature = "metrics"))]
        let _ = elapsed;
    }

    fn observe_acknowledgment(&self, kind: &str) {
        #[cfg(feature = "metrics")]
        {
            if let Some(prom) = &self.inner.prometheus {
                prom.acknowledgments.with_label_values(&[kind]).inc();
            }
        }
        #[cfg(not(feature = "metrics"))]
        let _ = kind;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.inner.counters;
        MetricsSnapshot {
            batches_opened: c.batches_opened.load(Ordering::Relaxed),
            records_emitted: c.records_emitted.load(Ordering::Relaxed),
            acks: c.acks.load(Ordering::Relaxed),
            fails: c.fails.load(Ordering::Relaxed),
            stale_acks: c.stale_acks.load(Ordering::Relaxed),
            empty_polls: c.empty_polls.load(Ordering::Relaxed),
            flushes_committed: c.flushes_committed.load(Ordering::Relaxed),
            flushes_failed: c.flushes_failed.load(Ordering::Relaxed),
            flushes_timed_out: c.flushes_timed_out.load(Ordering::Relaxed),
            flushes_cancelled: c.flushes_cancelled.load(Ordering::Relaxed),
        }
    }

    #[cfg(feature = "metrics")]
    pub fn export_text(&self) -> Result<String, MetricsError> {
        let prom = self.inner.prometheus.as_ref().ok_or(MetricsError::Disabled)?;
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&prom.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }

    #[cfg(not(feature = "metrics"))]
    pub fn export_text(&self) -> Result<String, MetricsError> {
        Ok("# Metrics disabled\n".to_string())
    }
}

impl std::fmt::Debug for BridgeMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BridgeMetrics").field(&self.snapshot()).finish()
    }
}
