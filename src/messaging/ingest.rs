use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::order::{MappingError, Order, OrderMessage, ValidationError};
use crate::health::{HealthRegistry, HealthStatus, COMPONENT_CONSUMER};
use crate::metrics::{Reporter, RESULT_ERROR, RESULT_INVALID, RESULT_OK};
use crate::service::OrderSink;
use crate::store::StoreError;
use crate::utils::{retry_on_transient, RetryConfig, RetryResult};
use super::{DeadLetterSink, InboundRecord, RecordSource};

// ============================================================================
// Order Ingestor - Kafka → decode → validate → map → persist | dead-letter
// ============================================================================
//
// Per record:
//
//   decode ──✗──┐
//     │         │
//   validate ─✗─┤
//     │         ├──► dead-letter (original key/value/headers + dlq_* headers)
//   map ────✗───┤
//     │         │
//   persist ─✗──┘
//     │
//   committed
//
// Records are handled one at a time in fetch order. The offset is stored once
// the record is committed or dead-lettered. When the dead-letter publish
// itself fails the offset is not stored, but a later record of the same
// partition that does finish moves the committed position past it.
//
// ============================================================================

const FETCH_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("unmarshal error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("mapping failed: {0}")]
    Mapping(#[from] MappingError),

    #[error("persist order: {0}")]
    Persistence(#[from] StoreError),
}

impl IngestError {
    /// Label for the `kafka_messages_total{result}` counter.
    pub fn result_kind(&self) -> &'static str {
        match self {
            IngestError::Decode(_) | IngestError::Validation(_) | IngestError::Mapping(_) => RESULT_INVALID,
            IngestError::Persistence(_) => RESULT_ERROR,
        }
    }
}

/// Terminal state of one record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Committed(Uuid),
    DeadLettered { cause: String },
    /// Handling failed and so did the dead-letter publish.
    Dropped { cause: String },
}

impl RecordOutcome {
    pub fn stores_offset(&self) -> bool {
        !matches!(self, RecordOutcome::Dropped { .. })
    }
}

pub struct OrderIngestor {
    source: Arc<dyn RecordSource>,
    sink: Arc<dyn OrderSink>,
    dead_letters: Arc<dyn DeadLetterSink>,
    reporter: Arc<dyn Reporter>,
    health: Arc<HealthRegistry>,
    retry: RetryConfig,
    max_batch: usize,
}

impl OrderIngestor {
    pub fn new(
        source: Arc<dyn RecordSource>,
        sink: Arc<dyn OrderSink>,
        dead_letters: Arc<dyn DeadLetterSink>,
        reporter: Arc<dyn Reporter>,
        health: Arc<HealthRegistry>,
    ) -> Self {
        Self {
            source,
            sink,
            dead_letters,
            reporter,
            health,
            retry: RetryConfig::disabled(),
            max_batch: 100,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }

    /// Fetch and handle batches until `shutdown` fires. Cancellation is
    /// observed while waiting for a fetch and between records; a record
    /// already being handled always finishes.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(max_batch = self.max_batch, retry_enabled = self.retry.is_enabled(), "Ingestion started");

        let mut handled: u64 = 0;

        'outer: loop {
            let fetched = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                fetched = self.source.fetch(self.max_batch) => fetched,
            };

            let batch = match fetched {
                Ok(batch) => {
                    self.health.update(COMPONENT_CONSUMER, HealthStatus::Healthy);
                    batch
                }
                Err(e) => {
                    tracing::error!(error = %e, "Kafka fetch failed");
                    self.health.update(COMPONENT_CONSUMER, HealthStatus::Degraded(e.to_string()));
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(FETCH_ERROR_BACKOFF) => continue,
                    }
                }
            };

            for record in &batch {
                if shutdown.is_cancelled() {
                    break 'outer;
                }
                self.process(record).await;
                handled += 1;
            }
        }

        tracing::info!(handled = handled, "Ingestion stopped");
    }

    /// Drive one record to a terminal state and store its offset if allowed.
    pub async fn process(&self, record: &InboundRecord) -> RecordOutcome {
        let started = Instant::now();

        let outcome = match self.handle(record).await {
            Ok(id) => {
                self.reporter.inc_result(RESULT_OK);
                tracing::debug!(
                    order_id = %id,
                    partition = record.partition,
                    offset = record.offset,
                    "Order ingested"
                );
                RecordOutcome::Committed(id)
            }
            Err(e) => {
                self.reporter.inc_result(e.result_kind());
                self.dead_letter(record, &e).await
            }
        };

        self.reporter.observe_processing(started.elapsed().as_secs_f64());

        if outcome.stores_offset() {
            if let Err(e) = self.source.commit(record) {
                tracing::warn!(error = %e, "Failed to store offset");
            }
        }

        outcome
    }

    async fn handle(&self, record: &InboundRecord) -> Result<Uuid, IngestError> {
        let message = OrderMessage::decode(record.payload())?;
        message.validate()?;
        let order = Order::try_from(message)?;

        match retry_on_transient(&self.retry, |_attempt| self.sink.create_order(&order)).await {
            RetryResult::Success(()) => Ok(order.id),
            RetryResult::Exhausted { error, attempts } | RetryResult::Permanent { error, attempts } => {
                if attempts > 1 {
                    tracing::warn!(order_id = %order.id, attempts = attempts, "Persist failed after retries");
                }
                Err(IngestError::Persistence(error))
            }
        }
    }

    async fn dead_letter(&self, record: &InboundRecord, error: &IngestError) -> RecordOutcome {
        let cause = error.to_string();

        tracing::warn!(
            error = %cause,
            key = %record.key_for_log(),
            partition = record.partition,
            offset = record.offset,
            "Routing record to dead-letter topic"
        );

        match self.dead_letters.publish(record, &cause).await {
            Ok(()) => RecordOutcome::DeadLettered { cause },
            Err(e) => {
                self.reporter.inc_dlq_publish_failure();
                tracing::error!(
                    error = %e,
                    cause = %cause,
                    partition = record.partition,
                    offset = record.offset,
                    "Dead-letter publish failed, offset not stored"
                );
                RecordOutcome::Dropped { cause }
            }
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
