use async_trait::async_trait;
use futures_util::FutureExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::{Offset, TopicPartitionList};

use crate::config::KafkaSettings;
use super::InboundRecord;

// ============================================================================
// Order Topic Consumer
// ============================================================================
//
// Auto-commit stays on but automatic offset *storing* is off: the ingestor
// stores an offset only once the record reached a terminal state (persisted
// or dead-lettered), and librdkafka commits stored offsets in the background.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("kafka consumer setup: {0}")]
    Setup(#[source] KafkaError),

    #[error("kafka fetch: {0}")]
    Fetch(#[source] KafkaError),

    #[error("store offset {topic}[{partition}]@{offset}: {source}")]
    StoreOffset {
        topic: String,
        partition: i32,
        offset: i64,
        #[source]
        source: KafkaError,
    },
}

/// Where the ingestor pulls records from.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Wait for at least one record, then return it together with whatever
    /// else is already buffered, up to `max` records, in partition order.
    async fn fetch(&self, max: usize) -> Result<Vec<InboundRecord>, SourceError>;

    /// Mark `record` as done so the next commit moves past it.
    fn commit(&self, record: &InboundRecord) -> Result<(), SourceError>;
}

pub struct KafkaOrderSource {
    consumer: StreamConsumer,
}

impl KafkaOrderSource {
    pub fn new(settings: &KafkaSettings) -> Result<Self, SourceError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", settings.bootstrap_servers())
            .set("group.id", &settings.group_id)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "6000")
            .create()
            .map_err(SourceError::Setup)?;

        consumer
            .subscribe(&[settings.topic.as_str()])
            .map_err(SourceError::Setup)?;

        tracing::info!(
            topic = %settings.topic,
            group_id = %settings.group_id,
            brokers = %settings.bootstrap_servers(),
            "Kafka consumer subscribed"
        );

        Ok(Self { consumer })
    }
}

#[async_trait]
impl RecordSource for KafkaOrderSource {
    async fn fetch(&self, max: usize) -> Result<Vec<InboundRecord>, SourceError> {
        let first = self.consumer.recv().await.map_err(SourceError::Fetch)?;
        let mut batch = vec![InboundRecord::from(&first.detach())];

        while batch.len() < max {
            match self.consumer.recv().now_or_never() {
                Some(Ok(msg)) => batch.push(InboundRecord::from(&msg.detach())),
                Some(Err(e)) => {
                    // The records already taken are still handed out.
                    tracing::warn!(error = %e, "Kafka error while draining batch");
                    break;
                }
                None => break,
            }
        }

        tracing::debug!(
            count = batch.len(),
            first_offset = batch[0].offset,
            partition = batch[0].partition,
            "Fetched batch"
        );

        Ok(batch)
    }

    fn commit(&self, record: &InboundRecord) -> Result<(), SourceError> {
        let store_err = |source| SourceError::StoreOffset {
            topic: record.topic.clone(),
            partition: record.partition,
            offset: record.offset,
            source,
        };

        // The stored offset is the next one to consume.
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&record.topic, record.partition, Offset::Offset(record.offset + 1))
            .map_err(store_err)?;
        self.consumer.store_offsets(&tpl).map_err(store_err)
    }
}
