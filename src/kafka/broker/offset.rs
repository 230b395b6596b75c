// Offset APIs
//
// OffsetFetch is where a consumer's backend resources come to life: the
// committed checkpoint is loaded, a dedicated client plus reader is
// created seeked to the checkpointed message id, and the partition topic
// is bound to its group for status gating and later teardown.
//
// OffsetCommit walks the reader's pending FIFO ("commit up to" semantics)
// and persists the concrete backend message id through the offset store.

use std::net::SocketAddr;

use tracing::{error, info, warn};

use crate::backend::MessageId;
use crate::kafka::constants::{
    DEFAULT_OFFSET, ERROR_LEADER_NOT_AVAILABLE, ERROR_NONE, ERROR_REBALANCE_IN_PROGRESS,
    ERROR_UNKNOWN_SERVER_ERROR, TIME_EARLIEST, TIME_LATEST, UNKNOWN_OFFSET,
};
use crate::kafka::coordinator::GroupStatus;
use crate::kafka::messages::{
    ListOffsetsPartitionReq, ListOffsetsPartitionResp, OffsetCommitPartitionReq,
    OffsetCommitPartitionResp, OffsetFetchPartitionReq, OffsetFetchPartitionResp,
    OffsetLeaderEpochPartitionReq, OffsetLeaderEpochPartitionResp,
};
use crate::kafka::offset::conv_offset;
use crate::kafka::reader::ReaderMetadata;

use super::Broker;

impl Broker {
    /// Return the committed offset for a partition and make sure a reader
    /// exists, positioned at the checkpointed message id.
    pub async fn offset_fetch(
        &self,
        addr: SocketAddr,
        kafka_topic: &str,
        client_id: &str,
        group_id: &str,
        req: OffsetFetchPartitionReq,
    ) -> OffsetFetchPartitionResp {
        let user = match self.user_info(&addr) {
            Some(user) => user,
            None => {
                error!(addr = %addr, topic = kafka_topic, "offset fetch from unauthenticated connection");
                return OffsetFetchPartitionResp {
                    partition_id: req.partition_id,
                    error_code: ERROR_UNKNOWN_SERVER_ERROR,
                    ..Default::default()
                };
            }
        };
        info!(addr = %addr, topic = kafka_topic, partition = req.partition_id, "fetching committed offset");
        let partitioned_topic = match self
            .partitioned_topic(&user, kafka_topic, req.partition_id)
            .await
        {
            Ok(topic) => topic,
            Err(e) => {
                error!(topic = kafka_topic, error = %e, "offset fetch failed resolving backend topic");
                return OffsetFetchPartitionResp {
                    partition_id: req.partition_id,
                    error_code: ERROR_UNKNOWN_SERVER_ERROR,
                    ..Default::default()
                };
            }
        };
        let subscription_name = match self.hooks.subscription_name(group_id).await {
            Ok(name) => name,
            Err(e) => {
                error!(group = %group_id, error = %e, "subscription name lookup failed");
                return OffsetFetchPartitionResp {
                    partition_id: req.partition_id,
                    error_code: ERROR_UNKNOWN_SERVER_ERROR,
                    ..Default::default()
                };
            }
        };
        let committed = match self
            .offset_store
            .acquire_offset(&user.username, kafka_topic, group_id, req.partition_id)
            .await
        {
            Ok(pair) => pair,
            Err(e) => {
                error!(group = %group_id, topic = kafka_topic, error = %e, "acquire offset failed");
                return OffsetFetchPartitionResp {
                    partition_id: req.partition_id,
                    error_code: ERROR_UNKNOWN_SERVER_ERROR,
                    ..Default::default()
                };
            }
        };
        let (start_message_id, kafka_offset) = match committed {
            Some(pair) => (pair.message_id, pair.offset),
            None => (MessageId::EARLIEST, UNKNOWN_OFFSET),
        };

        let reader_key = Self::reader_key(&partitioned_topic, client_id);
        let reader_exists = self.registry.read().readers.contains_key(&reader_key);
        if !reader_exists {
            let _create = self.create_lock.lock().await;
            if !self.registry.read().readers.contains_key(&reader_key) {
                let reader = match self
                    .create_reader(&partitioned_topic, &subscription_name, start_message_id, client_id)
                    .await
                {
                    Ok(reader) => reader,
                    Err(e) => {
                        error!(topic = %partitioned_topic, error = %e, "create reader failed");
                        return OffsetFetchPartitionResp {
                            partition_id: req.partition_id,
                            error_code: ERROR_UNKNOWN_SERVER_ERROR,
                            ..Default::default()
                        };
                    }
                };
                self.registry.write().readers.insert(
                    reader_key,
                    std::sync::Arc::new(ReaderMetadata::new(group_id.to_string(), reader)),
                );
            }
        }

        let group = match self.coordinator.get_group(&user.username, group_id) {
            Some(group) => group,
            None => {
                error!(group = %group_id, "offset fetch for unknown group");
                return OffsetFetchPartitionResp {
                    partition_id: req.partition_id,
                    error_code: ERROR_UNKNOWN_SERVER_ERROR,
                    ..Default::default()
                };
            }
        };
        group.add_partitioned_topic(&partitioned_topic);
        self.registry
            .write()
            .topic_groups
            .insert(partitioned_topic, group.group_id().to_string());

        OffsetFetchPartitionResp {
            partition_id: req.partition_id,
            error_code: ERROR_NONE,
            offset: kafka_offset,
            leader_epoch: -1,
            metadata: None,
        }
    }

    /// Translate a committed Kafka offset into an ack of the backend
    /// message that produced it.
    pub async fn offset_commit_partition(
        &self,
        addr: SocketAddr,
        kafka_topic: &str,
        client_id: &str,
        req: OffsetCommitPartitionReq,
    ) -> OffsetCommitPartitionResp {
        let user = match self.user_info(&addr) {
            Some(user) => user,
            None => {
                error!(addr = %addr, topic = kafka_topic, "offset commit from unauthenticated connection");
                return OffsetCommitPartitionResp {
                    partition_id: req.partition_id,
                    error_code: ERROR_UNKNOWN_SERVER_ERROR,
                };
            }
        };
        let partitioned_topic = match self
            .partitioned_topic(&user, kafka_topic, req.partition_id)
            .await
        {
            Ok(topic) => topic,
            Err(e) => {
                error!(topic = kafka_topic, error = %e, "offset commit failed resolving backend topic");
                return OffsetCommitPartitionResp {
                    partition_id: req.partition_id,
                    error_code: ERROR_UNKNOWN_SERVER_ERROR,
                };
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
                // either the group is mid-rebalance or the reader moved to
                // another member; both mean "rejoin, then retry"
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
                            warn!(
                                group = %group_id,
                                topic = %partitioned_topic,
                                "offset commit while group is rebalancing"
                            );
                            return OffsetCommitPartitionResp {
                                partition_id: req.partition_id,
                                error_code: ERROR_REBALANCE_IN_PROGRESS,
                            };
                        }
                    }
                }
                warn!(topic = %partitioned_topic, "offset commit without reader");
                return OffsetCommitPartitionResp {
                    partition_id: req.partition_id,
                    error_code: ERROR_REBALANCE_IN_PROGRESS,
                };
            }
        };

        if let Some(ack) = reader_metadata.commit_scan(req.offset) {
            if let Err(e) = self
                .offset_store
                .commit_offset(
                    &user.username,
                    kafka_topic,
                    &reader_metadata.group_id,
                    req.partition_id,
                    ack,
                )
                .await
            {
                error!(topic = kafka_topic, error = %e, "commit offset failed");
                return OffsetCommitPartitionResp {
                    partition_id: req.partition_id,
                    error_code: ERROR_UNKNOWN_SERVER_ERROR,
                };
            }
            info!(
                topic = %partitioned_topic,
                id = ?ack.message_id,
                offset = ack.offset,
                "acked backend message"
            );
            reader_metadata.complete_commit();
        }
        OffsetCommitPartitionResp {
            partition_id: req.partition_id,
            error_code: ERROR_NONE,
        }
    }

    /// ListOffsets for one partition: earliest answers the default offset,
    /// latest reads the backend's last message and seeks the reader to it.
    pub async fn offset_list_partition(
        &self,
        addr: SocketAddr,
        kafka_topic: &str,
        client_id: &str,
        req: ListOffsetsPartitionReq,
    ) -> ListOffsetsPartitionResp {
        let user = match self.user_info(&addr) {
            Some(user) => user,
            None => {
                error!(addr = %addr, topic = kafka_topic, "offset list from unauthenticated connection");
                return ListOffsetsPartitionResp {
                    partition_id: req.partition_id,
                    error_code: ERROR_UNKNOWN_SERVER_ERROR,
                    ..Default::default()
                };
            }
        };
        info!(addr = %addr, topic = kafka_topic, partition = req.partition_id, "listing offsets");
        let partitioned_topic = match self
            .partitioned_topic(&user, kafka_topic, req.partition_id)
            .await
        {
            Ok(topic) => topic,
            Err(e) => {
                error!(topic = kafka_topic, error = %e, "offset list failed resolving backend topic");
                return ListOffsetsPartitionResp {
                    partition_id: req.partition_id,
                    error_code: ERROR_UNKNOWN_SERVER_ERROR,
                    ..Default::default()
                };
            }
        };
        let reader_key = Self::reader_key(&partitioned_topic, client_id);
        let client = { self.registry.read().clients.get(&reader_key).cloned() };
        let client = match client {
            Some(client) => client,
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
                                "offset list while group is rebalancing"
                            );
                            return ListOffsetsPartitionResp {
                                partition_id: req.partition_id,
                                error_code: ERROR_LEADER_NOT_AVAILABLE,
                                timestamp: TIME_EARLIEST,
                                ..Default::default()
                            };
                        }
                    }
                }
                error!(topic = %partitioned_topic, "offset list without backend client");
                return ListOffsetsPartitionResp {
                    partition_id: req.partition_id,
                    error_code: ERROR_UNKNOWN_SERVER_ERROR,
                    timestamp: TIME_EARLIEST,
                    ..Default::default()
                };
            }
        };
        let reader_metadata = { self.registry.read().readers.get(&reader_key).cloned() };
        let reader_metadata = match reader_metadata {
            Some(metadata) => metadata,
            None => {
                error!(topic = %partitioned_topic, "offset list without reader");
                return ListOffsetsPartitionResp {
                    partition_id: req.partition_id,
                    error_code: ERROR_UNKNOWN_SERVER_ERROR,
                    ..Default::default()
                };
            }
        };

        let mut offset = DEFAULT_OFFSET;
        if req.time == TIME_LATEST {
            let latest = match client
                .latest_message(&partitioned_topic, self.config.max_fetch_wait_ms)
                .await
            {
                Ok(latest) => latest,
                Err(e) => {
                    error!(topic = %partitioned_topic, error = %e, "latest message lookup failed");
                    return ListOffsetsPartitionResp {
                        partition_id: req.partition_id,
                        error_code: ERROR_UNKNOWN_SERVER_ERROR,
                        ..Default::default()
                    };
                }
            };
            if let Some(message) = latest {
                if let Err(e) = reader_metadata.reader.lock().await.seek(message.id).await {
                    error!(topic = %partitioned_topic, error = %e, "seek to latest failed");
                    return ListOffsetsPartitionResp {
                        partition_id: req.partition_id,
                        error_code: ERROR_UNKNOWN_SERVER_ERROR,
                        ..Default::default()
                    };
                }
                offset = conv_offset(&message, self.config.continuous_offset);
            }
        }
        ListOffsetsPartitionResp {
            partition_id: req.partition_id,
            error_code: ERROR_NONE,
            timestamp: TIME_EARLIEST,
            offset,
        }
    }

    /// Answer OffsetForLeaderEpoch with the offset of the backend's
    /// latest message; the epoch itself is echoed back.
    pub async fn offset_leader_epoch(
        &self,
        addr: SocketAddr,
        kafka_topic: &str,
        req: OffsetLeaderEpochPartitionReq,
    ) -> OffsetLeaderEpochPartitionResp {
        let user = match self.user_info(&addr) {
            Some(user) => user,
            None => {
                error!(addr = %addr, topic = kafka_topic, "offset leader epoch from unauthenticated connection");
                return OffsetLeaderEpochPartitionResp {
                    partition_id: req.partition_id,
                    error_code: ERROR_UNKNOWN_SERVER_ERROR,
                    ..Default::default()
                };
            }
        };
        info!(addr = %addr, topic = kafka_topic, partition = req.partition_id, "offset for leader epoch");
        let partitioned_topic = match self
            .partitioned_topic(&user, kafka_topic, req.partition_id)
            .await
        {
            Ok(topic) => topic,
            Err(e) => {
                error!(topic = kafka_topic, error = %e, "leader epoch failed resolving backend topic");
                return OffsetLeaderEpochPartitionResp {
                    partition_id: req.partition_id,
                    error_code: ERROR_UNKNOWN_SERVER_ERROR,
                    ..Default::default()
                };
            }
        };
        let offset = match self
            .common_client
            .latest_message(&partitioned_topic, self.config.max_fetch_wait_ms)
            .await
        {
            Ok(Some(message)) => conv_offset(&message, self.config.continuous_offset),
            Ok(None) => DEFAULT_OFFSET,
            Err(e) => {
                error!(topic = %partitioned_topic, error = %e, "latest message lookup failed");
                return OffsetLeaderEpochPartitionResp {
                    partition_id: req.partition_id,
                    error_code: ERROR_UNKNOWN_SERVER_ERROR,
                    ..Default::default()
                };
            }
        };
        OffsetLeaderEpochPartitionResp {
            partition_id: req.partition_id,
            error_code: ERROR_NONE,
            leader_epoch: req.leader_epoch,
            offset,
        }
    }
}
