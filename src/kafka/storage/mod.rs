// Offset persistence
//
// Committed offsets are the only durable state the broker owns. They are
// written through the `OffsetStore` trait so the embedding deployment
// decides where checkpoints live; group membership itself is in-memory
// and rebuilt by clients rejoining after a restart.
//
// Each checkpoint stores the concrete backend message id next to the
// derived Kafka offset, so a restarted reader can seek the backend
// precisely instead of reconstructing a position from the offset alone.

use async_trait::async_trait;

use crate::kafka::error::Result;
use crate::kafka::offset::MessageIdPair;

/// Durable store for consumer group offsets.
///
/// Keys are (tenant username, kafka topic, group id, partition).
#[async_trait]
pub trait OffsetStore: Send + Sync {
    /// Bring the store online. Called once before the broker serves
    /// requests; implementations load or warm whatever they need.
    async fn start(&self) -> Result<()>;

    /// Persist the checkpoint for one partition.
    async fn commit_offset(
        &self,
        username: &str,
        kafka_topic: &str,
        group_id: &str,
        partition_id: i32,
        pair: MessageIdPair,
    ) -> Result<()>;

    /// Load the checkpoint for one partition, or `None` when the group
    /// has never committed there.
    async fn acquire_offset(
        &self,
        username: &str,
        kafka_topic: &str,
        group_id: &str,
        partition_id: i32,
    ) -> Result<Option<MessageIdPair>>;

    /// Release resources. The broker calls this once on shutdown.
    fn close(&self);
}

// Submodules
pub mod memory;

// Re-export main types
pub use memory::MemoryOffsetStore;
