// ============================================================================
// Messaging - Kafka in, dead-letter topic out
// ============================================================================

pub mod consumer;
pub mod dead_letter;
pub mod ingest;
pub mod record;

pub use consumer::{KafkaOrderSource, RecordSource, SourceError};
pub use dead_letter::{DeadLetterError, DeadLetterSink, KafkaDeadLetterPublisher};
pub use ingest::{IngestError, OrderIngestor, RecordOutcome};
pub use record::InboundRecord;
