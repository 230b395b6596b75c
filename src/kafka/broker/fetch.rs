// Fetch pipeline
//
// A fetch fans out per topic and partition. Each partition enters a
// bounded read loop against its backend reader: the loop ends on record
// count, byte caps, the min-bytes/min-wait pair, the request deadline or a
// flow-quota denial. Every message handed out is recorded in the reader's
// pending FIFO so a later commit can ack the exact backend message.
//
// A partition without a reader is not an error: either the group is
// rebalancing (the client will retry after rejoining) or the partition is
// assigned to another member. Both answer an empty batch with no error.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::kafka::constants::{ERROR_NONE, ERROR_UNKNOWN_SERVER_ERROR};
use crate::kafka::coordinator::GroupStatus;
use crate::kafka::messages::{
    FetchPartitionReq, FetchPartitionResp, FetchReq, FetchTopicResp, Record, RecordBatch,
};
use crate::kafka::offset::{conv_offset, MessageIdPair};

use super::Broker;

impl Broker {
    /// Serve a fetch request, splitting the wait budget across the
    /// partitions of each topic.
    pub async fn fetch(&self, addr: SocketAddr, req: FetchReq) -> Vec<FetchTopicResp> {
        let max_wait_ms = req.max_wait_ms.min(self.config.max_fetch_wait_ms);
        let mut result = Vec::with_capacity(req.topics.len());
        for topic_req in req.topics {
            let partition_wait_ms = max_wait_ms / topic_req.partitions.len().max(1) as i32;
            let mut partitions = Vec::with_capacity(topic_req.partitions.len());
            for partition_req in &topic_req.partitions {
                partitions.push(
                    self.fetch_partition(
                        addr,
                        &topic_req.topic,
                        &req.client_id,
                        partition_req,
                        req.max_bytes,
                        req.min_bytes,
                        partition_wait_ms,
                    )
                    .await,
                );
            }
            result.push(FetchTopicResp {
                topic: topic_req.topic,
                partitions,
            });
        }
        result
    }

    /// Read one partition. Visible for testing.
    #[allow(clippy::too_many_arguments)]
    pub async fn fetch_partition(
        &self,
        addr: SocketAddr,
        kafka_topic: &str,
        client_id: &str,
        req: &FetchPartitionReq,
        max_bytes: i32,
        min_bytes: i32,
        max_wait_ms: i32,
    ) -> FetchPartitionResp {
        let start = Instant::now();
        let user = match self.user_info(&addr) {
            Some(user) => user,
            None => {
                error!(addr = %addr, topic = kafka_topic, "fetch from unauthenticated connection");
                return error_resp(req.partition_id, ERROR_UNKNOWN_SERVER_ERROR);
            }
        };
        info!(addr = %addr, topic = kafka_topic, partition = req.partition_id, "fetching partition");
        let partitioned_topic = match self
            .partitioned_topic(&user, kafka_topic, req.partition_id)
            .await
        {
            Ok(topic) => topic,
            Err(e) => {
                error!(topic = kafka_topic, error = %e, "fetch failed resolving backend topic");
                return error_resp(req.partition_id, ERROR_UNKNOWN_SERVER_ERROR);
            }
        };

        let reader_metadata = {
            self.registry
                .read()
                .readers
                .get(&Self::reader_key(&partitioned_topic, client_id))
                .cloned()
        };
        let reader_metadata = match reader_metadata {
            Some(metadata) => metadata,
            None => {
                let group_id = {
                    self.registry
                        .read()
                        .topic_groups
                        .get(&partitioned_topic)
                        .cloned()
                };
                if let Some(group_id) = group_id {
                    if let Some(group) = self.coordinator.get_group(&user.username, &group_id) {
                        if group.status() != GroupStatus::Stable {
                            info!(
                                group = %group_id,
                                topic = %partitioned_topic,
                                "group is rebalancing, returning empty batch"
                            );
                            return empty_resp(req.partition_id);
                        }
                    }
                }
                // the partition topic may be assigned to another member
                warn!(
                    topic = %partitioned_topic,
                    client = client_id,
                    "no reader for partition topic"
                );
                return empty_resp(req.partition_id);
            }
        };

        let deadline = Duration::from_millis(max_wait_ms.max(0) as u64);
        let mut byte_length = 0usize;
        let mut base_offset = 0i64;
        let mut first_message = true;
        let mut records: Vec<Record> = Vec::new();
        let mut reader = reader_metadata.reader.lock().await;
        loop {
            if start.elapsed() >= deadline || records.len() >= self.config.max_fetch_record {
                break;
            }
            if !self.hooks.has_flow_quota(&user.username, &partitioned_topic) {
                break;
            }
            let remaining = deadline.saturating_sub(start.elapsed());
            let message = match tokio::time::timeout(remaining, reader.next()).await {
                Err(_) => break,
                Ok(Err(e)) => {
                    warn!(topic = %partitioned_topic, error = %e, "read msg failed");
                    continue;
                }
                Ok(Ok(message)) => message,
            };
            byte_length += message.encoded_len();
            debug!(id = ?message.id, topic = %message.topic, "received msg");
            let offset = conv_offset(&message, self.config.continuous_offset);
            if first_message {
                first_message = false;
                base_offset = offset;
            }
            records.push(Record {
                key: None,
                value: message.payload.clone(),
                relative_offset: offset - base_offset,
            });
            reader_metadata.push_pending(MessageIdPair {
                message_id: message.id,
                offset,
            });
            if byte_length > min_bytes as usize
                && start.elapsed().as_millis() >= self.config.min_fetch_wait_ms as u128
            {
                break;
            }
            if byte_length > max_bytes as usize {
                break;
            }
        }

        FetchPartitionResp {
            partition_id: req.partition_id,
            error_code: ERROR_NONE,
            last_stable_offset: 0,
            log_start_offset: 0,
            record_batch: RecordBatch {
                base_offset,
                records,
            },
        }
    }
}

fn empty_resp(partition_id: i32) -> FetchPartitionResp {
    FetchPartitionResp {
        partition_id,
        error_code: ERROR_NONE,
        ..Default::default()
    }
}

fn error_resp(partition_id: i32, error_code: i16) -> FetchPartitionResp {
    FetchPartitionResp {
        partition_id,
        error_code,
        ..Default::default()
    }
}
