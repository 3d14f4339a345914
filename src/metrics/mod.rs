// Private module declarations
mod instrumented;
mod server;

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

// Re-export for public API
pub use instrumented::{InstrumentedCache, InstrumentedStore};
pub use server::{start_http_server, AppState};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Components never touch Prometheus directly; they get an `Arc<dyn Reporter>`.
// `Metrics` is the Prometheus-backed reporter and owns its own `Registry`,
// which the HTTP server renders on /metrics.
//
// Recorded:
// - Kafka message outcomes (ok / invalid / error) and processing latency
// - Dead-letter publish failures
// - Storage operations per store, operation and result
// - Repository liveness (from the periodic ping)
//
// ============================================================================

pub const RESULT_OK: &str = "ok";
pub const RESULT_INVALID: &str = "invalid";
pub const RESULT_ERROR: &str = "error";

/// Sink for every counter and gauge the service records.
pub trait Reporter: Send + Sync {
    /// One consumed Kafka message reached a result: "ok", "invalid" or "error".
    fn inc_result(&self, kind: &str);

    fn inc_dlq_publish_failure(&self);

    /// One call on a storage component (`store` is e.g. "postgres" or "cache").
    fn inc_storage_op(&self, store: &str, op: &str, result: &str);

    fn set_up(&self, up: bool);

    /// Wall time spent handling one message, dead-lettering included.
    fn observe_processing(&self, seconds: f64);
}

pub struct Metrics {
    registry: Registry,

    pub kafka_messages: IntCounterVec,
    pub dlq_publish_failures: IntCounter,
    pub storage_ops: IntCounterVec,
    pub repository_up: IntGauge,
    pub processing_duration: Histogram,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let kafka_messages = IntCounterVec::new(
            Opts::new("kafka_messages_total", "Kafka messages consumed, by result"),
            &["result"],
        )?;
        registry.register(Box::new(kafka_messages.clone()))?;

        let dlq_publish_failures = IntCounter::new(
            "kafka_dlq_publish_failures_total",
            "Failed attempts to publish a record to the dead-letter topic",
        )?;
        registry.register(Box::new(dlq_publish_failures.clone()))?;

        let storage_ops = IntCounterVec::new(
            Opts::new("storage_ops_total", "Storage operations by store, operation and result"),
            &["store", "op", "result"],
        )?;
        registry.register(Box::new(storage_ops.clone()))?;

        let repository_up = IntGauge::new(
            "repository_up",
            "Whether the last repository ping succeeded (1) or not (0)",
        )?;
        registry.register(Box::new(repository_up.clone()))?;

        let processing_duration = Histogram::with_opts(
            HistogramOpts::new("kafka_message_processing_seconds", "Time to handle one Kafka message")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(processing_duration.clone()))?;

        Ok(Self {
            registry,
            kafka_messages,
            dlq_publish_failures,
            storage_ops,
            repository_up,
            processing_duration,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Reporter for Metrics {
    fn inc_result(&self, kind: &str) {
        self.kafka_messages.with_label_values(&[kind]).inc();
    }

    fn inc_dlq_publish_failure(&self) {
        self.dlq_publish_failures.inc();
    }

    fn inc_storage_op(&self, store: &str, op: &str, result: &str) {
        self.storage_ops.with_label_values(&[store, op, result]).inc();
    }

    fn set_up(&self, up: bool) {
        self.repository_up.set(i64::from(up));
    }

    fn observe_processing(&self, seconds: f64) {
        self.processing_duration.observe(seconds);
    }
}
