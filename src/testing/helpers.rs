//! In-memory backend and fixtures for broker tests

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::backend::{
    LogClient, LogClientFactory, LogMessage, LogProducer, LogReader, MessageId, OutboundMessage,
    ProducerOptions, ReaderOptions,
};
use crate::config::BrokerConfig;
use crate::kafka::error::{BridgeError, Result};
use crate::kafka::hooks::ServerHooks;

/// Broker config with timings tightened for tests.
pub fn test_config() -> BrokerConfig {
    BrokerConfig {
        group_min_session_timeout_ms: 100,
        group_max_session_timeout_ms: 60_000,
        initial_delayed_join_ms: 100,
        rebalance_tick_ms: 50,
        max_fetch_wait_ms: 200,
        min_fetch_wait_ms: 10,
        ..Default::default()
    }
}

/// Distinct fake client address per connection under test.
pub fn client_addr(n: u16) -> SocketAddr {
    format!("127.0.0.1:{}", 40_000 + n).parse().unwrap()
}

/// Hooks that admit everything and translate names deterministically.
#[derive(Default)]
pub struct StaticHooks {
    /// Partition topics for which the flow quota is exhausted
    pub quota_denied: Mutex<Vec<String>>,
}

impl StaticHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_quota(&self, partitioned_topic: &str) {
        self.quota_denied.lock().push(partitioned_topic.to_string());
    }
}

#[async_trait]
impl ServerHooks for StaticHooks {
    async fn auth(&self, _username: &str, _password: &str, _client_id: &str) -> Result<bool> {
        Ok(true)
    }

    async fn auth_topic(
        &self,
        _username: &str,
        _password: &str,
        _client_id: &str,
        _topic: &str,
        _permission: &str,
    ) -> Result<bool> {
        Ok(true)
    }

    async fn auth_topic_group(
        &self,
        _username: &str,
        _password: &str,
        _client_id: &str,
        _group_id: &str,
    ) -> Result<bool> {
        Ok(true)
    }

    async fn backend_topic(&self, username: &str, kafka_topic: &str) -> Result<String> {
        Ok(format!("{}/{}", username, kafka_topic))
    }

    async fn partition_count(&self, _username: &str, _kafka_topic: &str) -> Result<i32> {
        Ok(1)
    }

    async fn subscription_name(&self, group_id: &str) -> Result<String> {
        Ok(format!("sub-{}", group_id))
    }

    async fn list_topics(&self, _username: &str) -> Result<Vec<String>> {
        Ok(vec!["topic".to_string()])
    }

    fn has_flow_quota(&self, _username: &str, partitioned_topic: &str) -> bool {
        !self
            .quota_denied
            .lock()
            .iter()
            .any(|t| t == partitioned_topic)
    }
}

struct MemoryLogInner {
    topics: Mutex<HashMap<String, Vec<LogMessage>>>,
    appended: Notify,
}

/// Shared in-memory log store. Clones share the same topics.
#[derive(Clone)]
pub struct MemoryLog {
    inner: Arc<MemoryLogInner>,
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLog {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryLogInner {
                topics: Mutex::new(HashMap::new()),
                appended: Notify::new(),
            }),
        }
    }

    /// Append a message directly; lets tests seed topics without a producer.
    pub fn publish(&self, topic: &str, key: Option<String>, payload: Bytes) -> MessageId {
        let mut topics = self.inner.topics.lock();
        let messages = topics.entry(topic.to_string()).or_default();
        let seq = messages.len() as i64;
        let id = MessageId {
            ledger_id: 1,
            entry_id: seq,
            batch_index: -1,
            partition_index: 0,
        };
        messages.push(LogMessage {
            id,
            topic: topic.to_string(),
            key,
            payload,
            publish_time: seq,
            index: Some(seq),
        });
        drop(topics);
        self.inner.appended.notify_waiters();
        id
    }

    pub fn topic_len(&self, topic: &str) -> usize {
        self.inner
            .topics
            .lock()
            .get(topic)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    fn message_at(&self, topic: &str, position: usize) -> Option<LogMessage> {
        self.inner
            .topics
            .lock()
            .get(topic)
            .and_then(|m| m.get(position))
            .cloned()
    }

    fn last_message(&self, topic: &str) -> Option<LogMessage> {
        self.inner
            .topics
            .lock()
            .get(topic)
            .and_then(|m| m.last())
            .cloned()
    }

    /// Read position immediately after `id` (exclusive start semantics).
    fn position_after(&self, topic: &str, id: MessageId) -> usize {
        if id == MessageId::EARLIEST {
            return 0;
        }
        let topics = self.inner.topics.lock();
        let messages = match topics.get(topic) {
            Some(messages) => messages,
            None => return 0,
        };
        if id == MessageId::LATEST {
            return messages.len();
        }
        messages.iter().take_while(|m| m.id <= id).count()
    }
}

/// Factory handing out clients over one shared `MemoryLog`.
pub struct MemoryLogFactory {
    log: MemoryLog,
}

impl MemoryLogFactory {
    pub fn new(log: MemoryLog) -> Self {
        Self { log }
    }
}

#[async_trait]
impl LogClientFactory for MemoryLogFactory {
    async fn connect(&self) -> Result<Arc<dyn LogClient>> {
        Ok(Arc::new(MemoryLogClient {
            log: self.log.clone(),
        }))
    }
}

struct MemoryLogClient {
    log: MemoryLog,
}

#[async_trait]
impl LogClient for MemoryLogClient {
    async fn create_producer(&self, options: ProducerOptions) -> Result<Arc<dyn LogProducer>> {
        Ok(Arc::new(MemoryProducer {
            log: self.log.clone(),
            topic: options.topic,
        }))
    }

    async fn create_reader(&self, options: ReaderOptions) -> Result<Box<dyn LogReader>> {
        let position = self.log.position_after(&options.topic, options.start_message_id);
        Ok(Box::new(MemoryReader {
            log: self.log.clone(),
            topic: options.topic,
            position,
        }))
    }

    async fn latest_message(&self, topic: &str, _max_wait_ms: i32) -> Result<Option<LogMessage>> {
        Ok(self.log.last_message(topic))
    }

    async fn close(&self) {}
}

struct MemoryProducer {
    log: MemoryLog,
    topic: String,
}

#[async_trait]
impl LogProducer for MemoryProducer {
    async fn send(&self, message: OutboundMessage) -> Result<MessageId> {
        // producers publish to the unpartitioned topic name; readers go
        // through partition topics, so tests seed those directly
        Ok(self.log.publish(&self.topic, message.key, message.payload))
    }

    async fn close(&self) {}
}

struct MemoryReader {
    log: MemoryLog,
    topic: String,
    position: usize,
}

#[async_trait]
impl LogReader for MemoryReader {
    async fn next(&mut self) -> Result<LogMessage> {
        loop {
            let notified = self.log.inner.appended.notified();
            if let Some(message) = self.log.message_at(&self.topic, self.position) {
                self.position += 1;
                return Ok(message);
            }
            notified.await;
        }
    }

    async fn seek(&mut self, id: MessageId) -> Result<()> {
        if id == MessageId::LATEST && self.log.topic_len(&self.topic) == 0 {
            return Err(BridgeError::backend("seek on empty topic"));
        }
        self.position = self.log.position_after(&self.topic, id);
        Ok(())
    }

    async fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_reader_sees_seeded_messages_in_order() {
        let log = MemoryLog::new();
        log.publish("t", None, Bytes::from_static(b"a"));
        log.publish("t", None, Bytes::from_static(b"b"));

        let client = MemoryLogFactory::new(log).connect().await.unwrap();
        let mut reader = client
            .create_reader(ReaderOptions {
                topic: "t".to_string(),
                name: "sub".to_string(),
                start_message_id: MessageId::EARLIEST,
                receive_queue_size: 10,
            })
            .await
            .unwrap();

        assert_eq!(reader.next().await.unwrap().payload, Bytes::from_static(b"a"));
        assert_eq!(reader.next().await.unwrap().payload, Bytes::from_static(b"b"));
    }

    #[tokio::test]
    async fn test_reader_blocks_until_publish() {
        let log = MemoryLog::new();
        let client = MemoryLogFactory::new(log.clone()).connect().await.unwrap();
        let mut reader = client
            .create_reader(ReaderOptions {
                topic: "t".to_string(),
                name: "sub".to_string(),
                start_message_id: MessageId::EARLIEST,
                receive_queue_size: 10,
            })
            .await
            .unwrap();

        let pending = tokio::spawn(async move { reader.next().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        log.publish("t", None, Bytes::from_static(b"late"));

        let message = pending.await.unwrap().unwrap();
        assert_eq!(message.payload, Bytes::from_static(b"late"));
    }

    #[tokio::test]
    async fn test_reader_starts_after_given_id() {
        let log = MemoryLog::new();
        let first = log.publish("t", None, Bytes::from_static(b"a"));
        log.publish("t", None, Bytes::from_static(b"b"));

        let client = MemoryLogFactory::new(log).connect().await.unwrap();
        let mut reader = client
            .create_reader(ReaderOptions {
                topic: "t".to_string(),
                name: "sub".to_string(),
                start_message_id: first,
                receive_queue_size: 10,
            })
            .await
            .unwrap();

        assert_eq!(reader.next().await.unwrap().payload, Bytes::from_static(b"b"));
    }

    #[tokio::test]
    async fn test_latest_message_returns_tail() {
        let log = MemoryLog::new();
        log.publish("t", None, Bytes::from_static(b"a"));
        log.publish("t", None, Bytes::from_static(b"b"));

        let client = MemoryLogFactory::new(log).connect().await.unwrap();
        let latest = client.latest_message("t", 100).await.unwrap().unwrap();
        assert_eq!(latest.payload, Bytes::from_static(b"b"));
        assert!(client.latest_message("empty", 100).await.unwrap().is_none());
    }
}
