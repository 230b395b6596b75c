// Parsed request and response records
//
// The wire codec (owned by the embedding server) decodes Kafka frames into
// these structs and serializes the responses the broker returns. Only the
// fields the broker acts on are represented; framing concerns such as
// correlation ids and tagged fields stay on the codec side.

use bytes::Bytes;

// ===== SASL =====

#[derive(Debug, Clone)]
pub struct SaslAuthenticateReq {
    pub username: String,
    pub password: String,
    pub client_id: String,
}

// ===== Consumer Groups =====

/// One (assignor name, subscription metadata) pair offered by a joining member
#[derive(Debug, Clone)]
pub struct GroupProtocol {
    pub name: String,
    pub metadata: Bytes,
}

#[derive(Debug, Clone)]
pub struct JoinGroupReq {
    pub client_id: String,
    pub group_id: String,
    /// Empty for a brand-new member
    pub member_id: String,
    pub group_instance_id: Option<String>,
    pub protocol_type: String,
    pub session_timeout_ms: i32,
    pub protocols: Vec<GroupProtocol>,
}

/// A member entry in the leader's JoinGroup response
#[derive(Debug, Clone)]
pub struct JoinedMember {
    pub member_id: String,
    pub group_instance_id: Option<String>,
    pub metadata: Bytes,
}

#[derive(Debug, Clone, Default)]
pub struct JoinGroupResp {
    pub error_code: i16,
    pub generation_id: i32,
    pub protocol_type: String,
    pub protocol_name: String,
    pub leader_id: String,
    pub member_id: String,
    /// Populated only in the leader's response
    pub members: Vec<JoinedMember>,
}

/// Leader-computed assignment for one member
#[derive(Debug, Clone)]
pub struct GroupAssignment {
    pub member_id: String,
    pub assignment: Bytes,
}

#[derive(Debug, Clone)]
pub struct SyncGroupReq {
    pub client_id: String,
    pub group_id: String,
    pub member_id: String,
    pub generation_id: i32,
    pub protocol_type: String,
    pub protocol_name: String,
    /// Non-empty only when the caller is the leader
    pub assignments: Vec<GroupAssignment>,
}

#[derive(Debug, Clone, Default)]
pub struct SyncGroupResp {
    pub error_code: i16,
    pub protocol_type: String,
    pub protocol_name: String,
    pub assignment: Bytes,
}

#[derive(Debug, Clone)]
pub struct HeartbeatReq {
    pub client_id: String,
    pub group_id: String,
    pub member_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct HeartbeatResp {
    pub error_code: i16,
}

#[derive(Debug, Clone)]
pub struct LeaveGroupMember {
    pub member_id: String,
    pub group_instance_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LeaveGroupReq {
    pub client_id: String,
    pub group_id: String,
    pub members: Vec<LeaveGroupMember>,
}

#[derive(Debug, Clone, Default)]
pub struct LeaveGroupResp {
    pub error_code: i16,
    pub members: Vec<LeaveGroupMember>,
}

// ===== Produce / Fetch =====

/// A single record inside a batch.
///
/// Produce fills `key`/`value`; fetch responses additionally carry the
/// record's offset relative to the batch base offset.
#[derive(Debug, Clone, Default)]
pub struct Record {
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub relative_offset: i64,
}

#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    /// Offset of the first record in the batch
    pub base_offset: i64,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone)]
pub struct ProducePartitionReq {
    pub partition_id: i32,
    pub record_batch: RecordBatch,
}

#[derive(Debug, Clone, Default)]
pub struct ProducePartitionResp {
    pub partition_id: i32,
    pub error_code: i16,
    /// Offset of the last record the backend reported
    pub offset: i64,
    pub log_append_time: i64,
    pub log_start_offset: i64,
}

#[derive(Debug, Clone)]
pub struct FetchPartitionReq {
    pub partition_id: i32,
    pub fetch_offset: i64,
}

#[derive(Debug, Clone)]
pub struct FetchTopicReq {
    pub topic: String,
    pub partitions: Vec<FetchPartitionReq>,
}

#[derive(Debug, Clone)]
pub struct FetchReq {
    pub client_id: String,
    pub max_wait_ms: i32,
    pub min_bytes: i32,
    pub max_bytes: i32,
    pub topics: Vec<FetchTopicReq>,
}

#[derive(Debug, Clone, Default)]
pub struct FetchPartitionResp {
    pub partition_id: i32,
    pub error_code: i16,
    pub last_stable_offset: i64,
    pub log_start_offset: i64,
    pub record_batch: RecordBatch,
}

#[derive(Debug, Clone, Default)]
pub struct FetchTopicResp {
    pub topic: String,
    pub partitions: Vec<FetchPartitionResp>,
}

// ===== Offsets =====

#[derive(Debug, Clone)]
pub struct OffsetFetchPartitionReq {
    pub partition_id: i32,
}

#[derive(Debug, Clone, Default)]
pub struct OffsetFetchPartitionResp {
    pub partition_id: i32,
    pub error_code: i16,
    pub offset: i64,
    pub leader_epoch: i32,
    pub metadata: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OffsetCommitPartitionReq {
    pub partition_id: i32,
    pub offset: i64,
}

#[derive(Debug, Clone, Default)]
pub struct OffsetCommitPartitionResp {
    pub partition_id: i32,
    pub error_code: i16,
}

#[derive(Debug, Clone)]
pub struct ListOffsetsPartitionReq {
    pub partition_id: i32,
    /// `TIME_EARLIEST`, `TIME_LATEST`, or a timestamp in epoch millis
    pub time: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ListOffsetsPartitionResp {
    pub partition_id: i32,
    pub error_code: i16,
    pub timestamp: i64,
    pub offset: i64,
}

#[derive(Debug, Clone)]
pub struct OffsetLeaderEpochPartitionReq {
    pub partition_id: i32,
    pub leader_epoch: i32,
}

#[derive(Debug, Clone, Default)]
pub struct OffsetLeaderEpochPartitionResp {
    pub partition_id: i32,
    pub error_code: i16,
    pub leader_epoch: i32,
    pub offset: i64,
}
