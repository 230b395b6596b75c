// In-memory offset store
//
// Backs the Standalone deployment and the test suites. Checkpoints do not
// survive a process restart, which matches the Standalone contract: on
// restart clients find an unknown group, get REBALANCE_IN_PROGRESS from
// their next heartbeat, and rejoin from the backend's retained cursor.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::kafka::error::Result;
use crate::kafka::offset::MessageIdPair;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct OffsetKey {
    username: String,
    kafka_topic: String,
    group_id: String,
    partition_id: i32,
}

/// `OffsetStore` holding checkpoints in a process-local map.
#[derive(Default)]
pub struct MemoryOffsetStore {
    offsets: RwLock<HashMap<OffsetKey, MessageIdPair>>,
}

impl MemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl super::OffsetStore for MemoryOffsetStore {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn commit_offset(
        &self,
        username: &str,
        kafka_topic: &str,
        group_id: &str,
        partition_id: i32,
        pair: MessageIdPair,
    ) -> Result<()> {
        let key = OffsetKey {
            username: username.to_string(),
            kafka_topic: kafka_topic.to_string(),
            group_id: group_id.to_string(),
            partition_id,
        };
        self.offsets.write().insert(key, pair);
        Ok(())
    }

    async fn acquire_offset(
        &self,
        username: &str,
        kafka_topic: &str,
        group_id: &str,
        partition_id: i32,
    ) -> Result<Option<MessageIdPair>> {
        let key = OffsetKey {
            username: username.to_string(),
            kafka_topic: kafka_topic.to_string(),
            group_id: group_id.to_string(),
            partition_id,
        };
        Ok(self.offsets.read().get(&key).copied())
    }

    fn close(&self) {
        self.offsets.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MessageId;
    use crate::kafka::storage::OffsetStore;

    fn pair(offset: i64) -> MessageIdPair {
        MessageIdPair {
            message_id: MessageId {
                ledger_id: 1,
                entry_id: offset,
                batch_index: 0,
                partition_index: 0,
            },
            offset,
        }
    }

    #[tokio::test]
    async fn test_commit_then_acquire_round_trip() {
        let store = MemoryOffsetStore::new();
        store
            .commit_offset("alice", "orders", "g1", 0, pair(42))
            .await
            .unwrap();

        let loaded = store
            .acquire_offset("alice", "orders", "g1", 0)
            .await
            .unwrap()
            .expect("checkpoint should exist");
        assert_eq!(loaded.offset, 42);
    }

    #[tokio::test]
    async fn test_acquire_missing_partition_returns_none() {
        let store = MemoryOffsetStore::new();
        store
            .commit_offset("alice", "orders", "g1", 0, pair(1))
            .await
            .unwrap();

        assert!(store
            .acquire_offset("alice", "orders", "g1", 1)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .acquire_offset("bob", "orders", "g1", 0)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_recommit_overwrites() {
        let store = MemoryOffsetStore::new();
        store
            .commit_offset("alice", "orders", "g1", 0, pair(1))
            .await
            .unwrap();
        store
            .commit_offset("alice", "orders", "g1", 0, pair(7))
            .await
            .unwrap();

        let loaded = store
            .acquire_offset("alice", "orders", "g1", 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.offset, 7);
    }
}
