// Backend log abstraction
//
// The broker never talks to the messaging cluster directly; it goes
// through these traits. The surface mirrors a Pulsar-style client:
// producers publish individual messages and learn the id the broker
// assigned, readers iterate a partition topic from a seekable position,
// and the client can resolve the latest message of a topic for the
// ListOffsets/OffsetForLeaderEpoch paths.
//
// Implementations own connection management; the broker only holds the
// trait objects and closes them when the owning session goes away.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::kafka::error::Result;

/// Position of a message in the backend log.
///
/// Ordering is lexicographic over (ledger, entry, batch), matching the
/// order in which the backend assigns ids to published messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId {
    pub ledger_id: i64,
    pub entry_id: i64,
    pub batch_index: i32,
    pub partition_index: i32,
}

impl MessageId {
    /// Position before the first message of a topic.
    pub const EARLIEST: MessageId = MessageId {
        ledger_id: -1,
        entry_id: -1,
        batch_index: -1,
        partition_index: -1,
    };

    /// Position after the last message of a topic.
    pub const LATEST: MessageId = MessageId {
        ledger_id: i64::MAX,
        entry_id: i64::MAX,
        batch_index: -1,
        partition_index: -1,
    };
}

/// A message read back from the backend.
#[derive(Debug, Clone)]
pub struct LogMessage {
    pub id: MessageId,
    pub topic: String,
    pub key: Option<String>,
    pub payload: Bytes,
    /// Publish time in epoch milliseconds
    pub publish_time: i64,
    /// Broker-side entry index, when the backend exposes one. This is the
    /// source of continuous offsets.
    pub index: Option<i64>,
}

impl LogMessage {
    /// Approximate wire size used by the fetch loop's byte accounting.
    pub fn encoded_len(&self) -> usize {
        self.key.as_ref().map_or(0, |k| k.len()) + self.payload.len()
    }
}

/// A message to publish.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub key: Option<String>,
    pub payload: Bytes,
}

/// Options for creating a producer on a backend topic.
#[derive(Debug, Clone)]
pub struct ProducerOptions {
    pub topic: String,
    pub max_pending_messages: i32,
    pub batching_max_size: i32,
}

/// Options for creating a reader on a backend partition topic.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub topic: String,
    /// Reader / durable-cursor name, derived from the consumer group
    pub name: String,
    /// Resume position; `MessageId::EARLIEST` to read from the start
    pub start_message_id: MessageId,
    pub receive_queue_size: i32,
}

/// Opens connections to the backend cluster.
///
/// The broker keeps one shared client for producers and opens a dedicated
/// client per (partition topic, kafka client) for readers, so tearing a
/// consumer down cannot disturb unrelated sessions.
#[async_trait]
pub trait LogClientFactory: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn LogClient>>;
}

/// A connection to the backend cluster.
#[async_trait]
pub trait LogClient: Send + Sync {
    async fn create_producer(&self, options: ProducerOptions) -> Result<Arc<dyn LogProducer>>;

    async fn create_reader(&self, options: ReaderOptions) -> Result<Box<dyn LogReader>>;

    /// Resolve and read the last message currently in `topic`, waiting at
    /// most `max_wait_ms`. Returns `None` for an empty topic.
    async fn latest_message(&self, topic: &str, max_wait_ms: i32) -> Result<Option<LogMessage>>;

    async fn close(&self);
}

/// A producer bound to one backend topic.
#[async_trait]
pub trait LogProducer: Send + Sync {
    /// Publish one message and return the id the backend assigned.
    async fn send(&self, message: OutboundMessage) -> Result<MessageId>;

    async fn close(&self);
}

/// A reader over one backend partition topic.
#[async_trait]
pub trait LogReader: Send + Sync {
    /// Wait for and return the next message after the current position.
    async fn next(&mut self) -> Result<LogMessage>;

    /// Move the position so the next read returns the message following `id`.
    async fn seek(&mut self, id: MessageId) -> Result<()>;

    async fn close(&mut self);
}
