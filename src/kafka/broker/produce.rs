// Produce pipeline
//
// Records of one partition batch are published to the backend in batch
// order; Kafka guarantees per-partition ordering, so each publish is
// awaited before the next is enqueued. The response carries the offset of
// the last message the backend acknowledged. Individual publish failures
// are logged and do not fail the batch.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info};

use crate::backend::{LogProducer, OutboundMessage, ProducerOptions};
use crate::kafka::constants::{ERROR_NONE, ERROR_TOPIC_AUTHORIZATION_FAILED};
use crate::kafka::error::Result;
use crate::kafka::messages::{ProducePartitionReq, ProducePartitionResp};
use crate::kafka::offset::pack_message_id;

use super::Broker;

impl Broker {
    /// Publish one partition's record batch to the backend topic the
    /// tenant's kafka topic maps to.
    pub async fn produce(
        &self,
        addr: SocketAddr,
        kafka_topic: &str,
        partition_id: i32,
        req: ProducePartitionReq,
    ) -> ProducePartitionResp {
        let user = match self.user_info(&addr) {
            Some(user) => user,
            None => {
                error!(addr = %addr, topic = kafka_topic, "produce from unauthenticated connection");
                return ProducePartitionResp {
                    partition_id,
                    error_code: ERROR_TOPIC_AUTHORIZATION_FAILED,
                    ..Default::default()
                };
            }
        };
        let producer = match self
            .get_or_create_producer(&addr, &user.username, kafka_topic)
            .await
        {
            Ok(producer) => producer,
            Err(e) => {
                error!(
                    username = %user.username,
                    topic = kafka_topic,
                    error = %e,
                    "create producer failed"
                );
                return ProducePartitionResp {
                    partition_id,
                    error_code: ERROR_TOPIC_AUTHORIZATION_FAILED,
                    ..Default::default()
                };
            }
        };

        let batch = req.record_batch.records;
        let mut last_offset = 0i64;
        for record in batch {
            let message = OutboundMessage {
                key: record
                    .key
                    .map(|k| String::from_utf8_lossy(&k).into_owned()),
                payload: record.value,
            };
            match producer.send(message).await {
                Ok(id) => {
                    last_offset = pack_message_id(id);
                }
                Err(e) => {
                    error!(
                        username = %user.username,
                        topic = kafka_topic,
                        error = %e,
                        "send msg failed"
                    );
                }
            }
        }

        ProducePartitionResp {
            partition_id,
            error_code: ERROR_NONE,
            offset: last_offset,
            log_append_time: -1,
            log_start_offset: 0,
        }
    }

    /// One backend producer per connection, created on first use.
    async fn get_or_create_producer(
        &self,
        addr: &SocketAddr,
        username: &str,
        kafka_topic: &str,
    ) -> Result<Arc<dyn LogProducer>> {
        let backend_topic = self.hooks.backend_topic(username, kafka_topic).await?;
        let key = addr.to_string();
        if let Some(producer) = self.registry.read().producers.get(&key) {
            return Ok(producer.clone());
        }
        let _create = self.create_lock.lock().await;
        if let Some(producer) = self.registry.read().producers.get(&key) {
            return Ok(producer.clone());
        }
        let producer = self
            .common_client
            .create_producer(ProducerOptions {
                topic: backend_topic,
                max_pending_messages: self.config.max_pending_producer_records,
                batching_max_size: self.config.max_batch_size,
            })
            .await?;
        self.registry.write().producers.insert(key, producer.clone());
        info!(addr = %addr, "created producer");
        Ok(producer)
    }
}
