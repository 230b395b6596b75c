// Broker data-plane round trips over the in-memory backend
//
// Produce, fetch, offset commit/fetch and the lifecycle couplings
// (status gating, leave/disconnect teardown) exercised the way the wire
// layer drives them.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use pulsar_kafka::backend::MessageId;
use pulsar_kafka::kafka::constants::{
    DEFAULT_OFFSET, ERROR_NONE, ERROR_REBALANCE_IN_PROGRESS, ERROR_TOPIC_AUTHORIZATION_FAILED,
    ERROR_UNKNOWN_SERVER_ERROR, TIME_EARLIEST, TIME_LATEST, UNKNOWN_OFFSET,
};
use pulsar_kafka::kafka::coordinator::GroupStatus;
use pulsar_kafka::kafka::messages::{
    FetchPartitionReq, FetchReq, FetchTopicReq, GroupAssignment, GroupProtocol, HeartbeatReq,
    JoinGroupReq, LeaveGroupMember, LeaveGroupReq, ListOffsetsPartitionReq,
    OffsetCommitPartitionReq, OffsetFetchPartitionReq, OffsetLeaderEpochPartitionReq,
    ProducePartitionReq, Record, RecordBatch, SaslAuthenticateReq, SyncGroupReq,
};
use pulsar_kafka::kafka::offset::pack_message_id;
use pulsar_kafka::testing::{client_addr, test_config, MemoryLog, MemoryLogFactory, StaticHooks};
use pulsar_kafka::{Broker, MemoryOffsetStore};

const USERNAME: &str = "alice";
const CLIENT_ID: &str = "cli";
const GROUP_ID: &str = "g1";
const TOPIC: &str = "orders";

async fn new_broker(log: &MemoryLog) -> Broker {
    Broker::new(
        Arc::new(StaticHooks::new()),
        Arc::new(MemoryLogFactory::new(log.clone())),
        Arc::new(MemoryOffsetStore::new()),
        test_config(),
    )
    .await
    .expect("broker should start")
}

async fn new_broker_with_hooks(log: &MemoryLog, hooks: Arc<StaticHooks>) -> Broker {
    Broker::new(
        hooks,
        Arc::new(MemoryLogFactory::new(log.clone())),
        Arc::new(MemoryOffsetStore::new()),
        test_config(),
    )
    .await
    .expect("broker should start")
}

async fn authenticate(broker: &Broker, addr: SocketAddr) {
    let (ok, code) = broker
        .sasl_auth(
            addr,
            SaslAuthenticateReq {
                username: USERNAME.to_string(),
                password: "pw".to_string(),
                client_id: CLIENT_ID.to_string(),
            },
        )
        .await;
    assert!(ok);
    assert_eq!(code, ERROR_NONE);
}

/// Join and sync a single-member group so data-plane gating sees Stable.
async fn stabilize_group(broker: &Broker, addr: SocketAddr) -> String {
    let join = broker
        .group_join(
            addr,
            JoinGroupReq {
                client_id: CLIENT_ID.to_string(),
                group_id: GROUP_ID.to_string(),
                member_id: String::new(),
                group_instance_id: None,
                protocol_type: "consumer".to_string(),
                session_timeout_ms: 10_000,
                protocols: vec![GroupProtocol {
                    name: "range".to_string(),
                    metadata: Bytes::from_static(b"m1"),
                }],
            },
        )
        .await;
    assert_eq!(join.error_code, ERROR_NONE);
    let sync = broker
        .group_sync(
            addr,
            SyncGroupReq {
                client_id: CLIENT_ID.to_string(),
                group_id: GROUP_ID.to_string(),
                member_id: join.member_id.clone(),
                generation_id: join.generation_id,
                protocol_type: "consumer".to_string(),
                protocol_name: "range".to_string(),
                assignments: vec![GroupAssignment {
                    member_id: join.member_id.clone(),
                    assignment: Bytes::from_static(b"a1"),
                }],
            },
        )
        .await;
    assert_eq!(sync.error_code, ERROR_NONE);
    assert_eq!(sync.protocol_name, "range");
    join.member_id
}

fn partitioned_topic() -> String {
    format!("{}/{}-partition-0", USERNAME, TOPIC)
}

fn fetch_req(max_wait_ms: i32) -> FetchReq {
    FetchReq {
        client_id: CLIENT_ID.to_string(),
        max_wait_ms,
        min_bytes: 1,
        max_bytes: 1_048_576,
        topics: vec![FetchTopicReq {
            topic: TOPIC.to_string(),
            partitions: vec![FetchPartitionReq {
                partition_id: 0,
                fetch_offset: 0,
            }],
        }],
    }
}

#[tokio::test]
async fn test_produce_publishes_batch_and_returns_last_offset() {
    let log = MemoryLog::new();
    let broker = new_broker(&log).await;
    let addr = client_addr(1);
    authenticate(&broker, addr).await;

    let resp = broker
        .produce(
            addr,
            TOPIC,
            0,
            ProducePartitionReq {
                partition_id: 0,
                record_batch: RecordBatch {
                    base_offset: 0,
                    records: vec![
                        Record {
                            key: None,
                            value: Bytes::from_static(b"one"),
                            relative_offset: 0,
                        },
                        Record {
                            key: Some(Bytes::from_static(b"k")),
                            value: Bytes::from_static(b"two"),
                            relative_offset: 1,
                        },
                    ],
                },
            },
        )
        .await;

    assert_eq!(resp.error_code, ERROR_NONE);
    let backend_topic = format!("{}/{}", USERNAME, TOPIC);
    assert_eq!(log.topic_len(&backend_topic), 2);
    assert_eq!(
        resp.offset,
        pack_message_id(MessageId {
            ledger_id: 1,
            entry_id: 1,
            batch_index: -1,
            partition_index: 0,
        })
    );
}

#[tokio::test]
async fn test_produce_without_auth_rejected() {
    let log = MemoryLog::new();
    let broker = new_broker(&log).await;

    let resp = broker
        .produce(
            client_addr(2),
            TOPIC,
            0,
            ProducePartitionReq {
                partition_id: 0,
                record_batch: RecordBatch::default(),
            },
        )
        .await;
    assert_eq!(resp.error_code, ERROR_TOPIC_AUTHORIZATION_FAILED);
}

#[tokio::test]
async fn test_consume_commit_round_trip() {
    let log = MemoryLog::new();
    let broker = new_broker(&log).await;
    let addr = client_addr(3);
    authenticate(&broker, addr).await;
    stabilize_group(&broker, addr).await;

    // OffsetFetch creates the reader; nothing committed yet
    let offset_fetch = broker
        .offset_fetch(
            addr,
            TOPIC,
            CLIENT_ID,
            GROUP_ID,
            OffsetFetchPartitionReq { partition_id: 0 },
        )
        .await;
    assert_eq!(offset_fetch.error_code, ERROR_NONE);
    assert_eq!(offset_fetch.offset, UNKNOWN_OFFSET);

    for payload in [&b"a"[..], b"b", b"c"] {
        log.publish(&partitioned_topic(), None, Bytes::copy_from_slice(payload));
    }

    let fetched = broker.fetch(addr, fetch_req(150)).await;
    assert_eq!(fetched.len(), 1);
    let partition = &fetched[0].partitions[0];
    assert_eq!(partition.error_code, ERROR_NONE);
    assert_eq!(partition.record_batch.records.len(), 3);
    assert_eq!(partition.record_batch.records[0].relative_offset, 0);

    // commit the second record's offset and read it back
    let second_offset = partition.record_batch.base_offset
        + partition.record_batch.records[1].relative_offset;
    let commit = broker
        .offset_commit_partition(
            addr,
            TOPIC,
            CLIENT_ID,
            OffsetCommitPartitionReq {
                partition_id: 0,
                offset: second_offset,
            },
        )
        .await;
    assert_eq!(commit.error_code, ERROR_NONE);

    let refetched = broker
        .offset_fetch(
            addr,
            TOPIC,
            CLIENT_ID,
            GROUP_ID,
            OffsetFetchPartitionReq { partition_id: 0 },
        )
        .await;
    assert_eq!(refetched.error_code, ERROR_NONE);
    assert_eq!(refetched.offset, second_offset);
}

#[tokio::test]
async fn test_fetch_without_reader_returns_empty_batch() {
    let log = MemoryLog::new();
    let broker = new_broker(&log).await;
    let addr = client_addr(4);
    authenticate(&broker, addr).await;

    let fetched = broker.fetch(addr, fetch_req(50)).await;
    let partition = &fetched[0].partitions[0];
    assert_eq!(partition.error_code, ERROR_NONE);
    assert!(partition.record_batch.records.is_empty());
}

#[tokio::test]
async fn test_flow_quota_denial_stops_the_read_loop() {
    let log = MemoryLog::new();
    let hooks = Arc::new(StaticHooks::new());
    let broker = new_broker_with_hooks(&log, hooks.clone()).await;
    let addr = client_addr(5);
    authenticate(&broker, addr).await;
    stabilize_group(&broker, addr).await;
    broker
        .offset_fetch(
            addr,
            TOPIC,
            CLIENT_ID,
            GROUP_ID,
            OffsetFetchPartitionReq { partition_id: 0 },
        )
        .await;
    log.publish(&partitioned_topic(), None, Bytes::from_static(b"x"));

    hooks.deny_quota(&partitioned_topic());
    let fetched = broker.fetch(addr, fetch_req(150)).await;
    let partition = &fetched[0].partitions[0];
    assert_eq!(partition.error_code, ERROR_NONE);
    assert!(partition.record_batch.records.is_empty());
}

#[tokio::test]
async fn test_leave_group_tears_down_readers() {
    let log = MemoryLog::new();
    let broker = new_broker(&log).await;
    let addr = client_addr(6);
    authenticate(&broker, addr).await;
    let member_id = stabilize_group(&broker, addr).await;
    broker
        .offset_fetch(
            addr,
            TOPIC,
            CLIENT_ID,
            GROUP_ID,
            OffsetFetchPartitionReq { partition_id: 0 },
        )
        .await;

    let leave = broker
        .group_leave(
            addr,
            LeaveGroupReq {
                client_id: CLIENT_ID.to_string(),
                group_id: GROUP_ID.to_string(),
                members: vec![LeaveGroupMember {
                    member_id,
                    group_instance_id: None,
                }],
            },
        )
        .await;
    assert_eq!(leave.error_code, ERROR_NONE);

    // without its reader the commit path tells the client to rejoin
    let commit = broker
        .offset_commit_partition(
            addr,
            TOPIC,
            CLIENT_ID,
            OffsetCommitPartitionReq {
                partition_id: 0,
                offset: 0,
            },
        )
        .await;
    assert_eq!(commit.error_code, ERROR_REBALANCE_IN_PROGRESS);

    let group = broker.coordinator().get_group(USERNAME, GROUP_ID).unwrap();
    assert_eq!(group.status(), GroupStatus::Empty);
}

#[tokio::test]
async fn test_disconnect_synthesizes_leave_group() {
    let log = MemoryLog::new();
    let broker = new_broker(&log).await;
    let addr = client_addr(7);
    authenticate(&broker, addr).await;
    stabilize_group(&broker, addr).await;

    broker.disconnect(addr).await;

    let group = broker.coordinator().get_group(USERNAME, GROUP_ID).unwrap();
    assert_eq!(group.status(), GroupStatus::Empty);
    assert_eq!(group.members_len(), 0);

    // the session is gone too
    let heartbeat = broker
        .heart_beat(
            addr,
            HeartbeatReq {
                client_id: CLIENT_ID.to_string(),
                group_id: GROUP_ID.to_string(),
                member_id: "whatever".to_string(),
            },
        )
        .await;
    assert_eq!(heartbeat.error_code, ERROR_UNKNOWN_SERVER_ERROR);
}

#[tokio::test]
async fn test_list_offsets_earliest_and_latest() {
    let log = MemoryLog::new();
    let broker = new_broker(&log).await;
    let addr = client_addr(8);
    authenticate(&broker, addr).await;
    stabilize_group(&broker, addr).await;
    broker
        .offset_fetch(
            addr,
            TOPIC,
            CLIENT_ID,
            GROUP_ID,
            OffsetFetchPartitionReq { partition_id: 0 },
        )
        .await;
    log.publish(&partitioned_topic(), None, Bytes::from_static(b"a"));
    let last = log.publish(&partitioned_topic(), None, Bytes::from_static(b"b"));

    let earliest = broker
        .offset_list_partition(
            addr,
            TOPIC,
            CLIENT_ID,
            ListOffsetsPartitionReq {
                partition_id: 0,
                time: TIME_EARLIEST,
            },
        )
        .await;
    assert_eq!(earliest.error_code, ERROR_NONE);
    assert_eq!(earliest.offset, DEFAULT_OFFSET);

    let latest = broker
        .offset_list_partition(
            addr,
            TOPIC,
            CLIENT_ID,
            ListOffsetsPartitionReq {
                partition_id: 0,
                time: TIME_LATEST,
            },
        )
        .await;
    assert_eq!(latest.error_code, ERROR_NONE);
    assert_eq!(latest.offset, pack_message_id(last));
    assert_eq!(latest.timestamp, TIME_EARLIEST);

    // the reader was seeked past the existing messages
    let fetched = broker.fetch(addr, fetch_req(50)).await;
    assert!(fetched[0].partitions[0].record_batch.records.is_empty());
}

#[tokio::test]
async fn test_offset_leader_epoch_reports_latest_offset() {
    let log = MemoryLog::new();
    let broker = new_broker(&log).await;
    let addr = client_addr(9);
    authenticate(&broker, addr).await;
    log.publish(&partitioned_topic(), None, Bytes::from_static(b"a"));
    let last = log.publish(&partitioned_topic(), None, Bytes::from_static(b"b"));

    let resp = broker
        .offset_leader_epoch(
            addr,
            TOPIC,
            OffsetLeaderEpochPartitionReq {
                partition_id: 0,
                leader_epoch: 7,
            },
        )
        .await;
    assert_eq!(resp.error_code, ERROR_NONE);
    assert_eq!(resp.leader_epoch, 7);
    assert_eq!(resp.offset, pack_message_id(last));
}

#[tokio::test]
async fn test_metadata_goes_through_hooks() {
    let log = MemoryLog::new();
    let broker = new_broker(&log).await;
    let addr = client_addr(10);
    authenticate(&broker, addr).await;

    assert_eq!(broker.partition_num(addr, TOPIC).await.unwrap(), 1);
    assert_eq!(
        broker.topic_list(addr).await.unwrap(),
        vec!["topic".to_string()]
    );
    assert!(broker.partition_num(client_addr(11), TOPIC).await.is_err());
}
