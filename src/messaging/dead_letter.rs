use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;

use crate::config::KafkaSettings;
use super::InboundRecord;

// ============================================================================
// Dead-Letter Publisher
// ============================================================================
//
// A failed record is republished to the DLQ topic with its key, value and
// headers untouched, plus five diagnostic headers. The publisher waits for
// the broker acknowledgement and never retries; the caller decides what a
// failed publish means for the offset.
//
// ============================================================================

pub const HEADER_ERROR: &str = "dlq_error";
pub const HEADER_SOURCE_TOPIC: &str = "dlq_source_topic";
pub const HEADER_SOURCE_PARTITION: &str = "dlq_source_partition";
pub const HEADER_SOURCE_OFFSET: &str = "dlq_source_offset";
pub const HEADER_TIMESTAMP: &str = "dlq_ts";

#[derive(Debug, thiserror::Error)]
pub enum DeadLetterError {
    #[error("kafka producer setup: {0}")]
    Setup(#[source] KafkaError),

    #[error("publish to {topic}: {source}")]
    Publish {
        topic: String,
        #[source]
        source: KafkaError,
    },
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn publish(&self, record: &InboundRecord, cause: &str) -> Result<(), DeadLetterError>;
}

/// Original headers followed by the `dlq_*` diagnostics.
pub fn dead_letter_headers(
    record: &InboundRecord,
    cause: &str,
    at: DateTime<Utc>,
) -> Vec<(String, Option<Vec<u8>>)> {
    let mut headers = record.headers.clone();
    headers.reserve(5);

    let mut push = |key: &str, value: String| headers.push((key.to_string(), Some(value.into_bytes())));
    push(HEADER_ERROR, cause.to_string());
    push(HEADER_SOURCE_TOPIC, record.topic.clone());
    push(HEADER_SOURCE_PARTITION, record.partition.to_string());
    push(HEADER_SOURCE_OFFSET, record.offset.to_string());
    push(HEADER_TIMESTAMP, at.to_rfc3339_opts(SecondsFormat::Nanos, true));

    headers
}

pub struct KafkaDeadLetterPublisher {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl KafkaDeadLetterPublisher {
    pub fn new(settings: &KafkaSettings) -> Result<Self, DeadLetterError> {
        let timeout = settings.dlq_publish_timeout();
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", settings.bootstrap_servers())
            .set("message.timeout.ms", settings.dlq_publish_timeout_ms.to_string())
            .set("acks", "all")
            .create()
            .map_err(DeadLetterError::Setup)?;

        tracing::info!(topic = %settings.dlq_topic, "Dead-letter producer ready");

        Ok(Self {
            producer,
            topic: settings.dlq_topic.clone(),
            timeout,
        })
    }
}

#[async_trait]
impl DeadLetterSink for KafkaDeadLetterPublisher {
    async fn publish(&self, record: &InboundRecord, cause: &str) -> Result<(), DeadLetterError> {
        let diagnostics = dead_letter_headers(record, cause, Utc::now());
        let headers = diagnostics
            .iter()
            .fold(OwnedHeaders::new_with_capacity(diagnostics.len()), |hs, (key, value)| {
                hs.insert(Header { key: key.as_str(), value: value.as_deref() })
            });

        let mut out = FutureRecord::<[u8], [u8]>::to(&self.topic).headers(headers);
        if let Some(key) = record.key.as_deref() {
            out = out.key(key);
        }
        if let Some(payload) = record.payload.as_deref() {
            out = out.payload(payload);
        }

        self.producer
            .send(out, Timeout::After(self.timeout))
            .await
            .map_err(|(source, _)| DeadLetterError::Publish {
                topic: self.topic.clone(),
                source,
            })?;

        tracing::info!(
            dlq_topic = %self.topic,
            source_topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            "Record dead-lettered"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::record::tests::record;

    fn header<'a>(headers: &'a [(String, Option<Vec<u8>>)], key: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.as_deref())
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    #[test]
    fn test_headers_keep_originals_and_add_diagnostics() {
        let mut source = record(17, b"{}");
        source.partition = 2;
        let at = DateTime::parse_from_rfc3339("2024-05-01T10:20:30.123456789Z")
            .unwrap()
            .with_timezone(&Utc);

        let headers = dead_letter_headers(&source, "validation failed: items must not be empty", at);

        assert_eq!(headers.len(), source.headers.len() + 5);
        assert_eq!(headers[0], source.headers[0]);
        assert_eq!(header(&headers, HEADER_ERROR), Some("validation failed: items must not be empty"));
        assert_eq!(header(&headers, HEADER_SOURCE_TOPIC), Some("orders"));
        assert_eq!(header(&headers, HEADER_SOURCE_PARTITION), Some("2"));
        assert_eq!(header(&headers, HEADER_SOURCE_OFFSET), Some("17"));
        assert_eq!(header(&headers, HEADER_TIMESTAMP), Some("2024-05-01T10:20:30.123456789Z"));
    }

    #[test]
    fn test_timestamp_is_utc_with_nanoseconds() {
        let headers = dead_letter_headers(&record(0, b""), "x", Utc::now());
        let ts = header(&headers, HEADER_TIMESTAMP).unwrap();

        assert!(ts.ends_with('Z'));
        let fraction = ts.rsplit('.').next().unwrap().trim_end_matches('Z');
        assert_eq!(fraction.len(), 9);
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }
}
