// Configuration for the bridge broker
//
// Every tunable that governs the coordinator and the data-plane pipelines
// lives here. The struct deserializes from whatever config source the
// embedding server uses (file, env); defaults come from
// `kafka::constants`.

use serde::Deserialize;

use crate::kafka::constants::{
    DEFAULT_CONSUMER_RECEIVE_QUEUE_SIZE, DEFAULT_GROUP_MAX_SESSION_TIMEOUT_MS,
    DEFAULT_GROUP_MIN_SESSION_TIMEOUT_MS, DEFAULT_INITIAL_DELAYED_JOIN_MS, DEFAULT_MAX_BATCH_SIZE,
    DEFAULT_MAX_CONSUMERS_PER_GROUP, DEFAULT_MAX_FETCH_RECORD, DEFAULT_MAX_FETCH_WAIT_MS,
    DEFAULT_MAX_PENDING_PRODUCER_RECORDS, DEFAULT_MIN_FETCH_WAIT_MS, DEFAULT_REBALANCE_TICK_MS,
};
use crate::kafka::error::{BridgeError, Result};

/// Which coordinator implementation serves consumer groups.
///
/// Standalone keeps all group state in this broker's memory; clients
/// rebuild membership by rejoining after a restart. Cluster coordination
/// is not implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum GroupCoordinatorType {
    #[default]
    Standalone,
    Cluster,
}

/// Broker configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Lower bound accepted for a member's session timeout (ms)
    pub group_min_session_timeout_ms: i32,
    /// Upper bound accepted for a member's session timeout (ms)
    pub group_max_session_timeout_ms: i32,
    /// Window the first joiner holds a rebalance open so concurrent
    /// joiners coalesce into one generation bump (ms)
    pub initial_delayed_join_ms: i32,
    /// Poll period of the join/sync/rebalance barriers (ms)
    pub rebalance_tick_ms: i32,
    /// Maximum members per group; zero means unlimited
    pub max_consumers_per_group: i32,
    /// Ceiling applied to a fetch request's max wait time (ms)
    pub max_fetch_wait_ms: i32,
    /// A fetch returns early only after this much time has passed, even
    /// when min_bytes is already satisfied (ms)
    pub min_fetch_wait_ms: i32,
    /// Maximum records accumulated by one partition fetch
    pub max_fetch_record: usize,
    /// Receive queue depth requested for backend readers
    pub consumer_receive_queue_size: i32,
    /// Maximum publishes a connection's producer may have in flight
    pub max_pending_producer_records: i32,
    /// Batch size limit requested from backend producers (bytes)
    pub max_batch_size: i32,
    /// Derive offsets from the backend's broker-side entry index instead
    /// of packing message-id components
    pub continuous_offset: bool,
    /// Coordinator flavor; only Standalone is implemented
    pub group_coordinator_type: GroupCoordinatorType,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            group_min_session_timeout_ms: DEFAULT_GROUP_MIN_SESSION_TIMEOUT_MS,
            group_max_session_timeout_ms: DEFAULT_GROUP_MAX_SESSION_TIMEOUT_MS,
            initial_delayed_join_ms: DEFAULT_INITIAL_DELAYED_JOIN_MS,
            rebalance_tick_ms: DEFAULT_REBALANCE_TICK_MS,
            max_consumers_per_group: DEFAULT_MAX_CONSUMERS_PER_GROUP,
            max_fetch_wait_ms: DEFAULT_MAX_FETCH_WAIT_MS,
            min_fetch_wait_ms: DEFAULT_MIN_FETCH_WAIT_MS,
            max_fetch_record: DEFAULT_MAX_FETCH_RECORD,
            consumer_receive_queue_size: DEFAULT_CONSUMER_RECEIVE_QUEUE_SIZE,
            max_pending_producer_records: DEFAULT_MAX_PENDING_PRODUCER_RECORDS,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            continuous_offset: false,
            group_coordinator_type: GroupCoordinatorType::default(),
        }
    }
}

impl BrokerConfig {
    /// Reject configurations the coordinator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.group_min_session_timeout_ms <= 0
            || self.group_max_session_timeout_ms < self.group_min_session_timeout_ms
        {
            return Err(BridgeError::InvalidConfig {
                key: "group_session_timeout".to_string(),
                message: format!(
                    "bounds {}-{} are not a valid range",
                    self.group_min_session_timeout_ms, self.group_max_session_timeout_ms
                ),
            });
        }
        if self.rebalance_tick_ms <= 0 {
            return Err(BridgeError::InvalidConfig {
                key: "rebalance_tick_ms".to_string(),
                message: "tick must be positive".to_string(),
            });
        }
        if self.initial_delayed_join_ms < 0 {
            return Err(BridgeError::InvalidConfig {
                key: "initial_delayed_join_ms".to_string(),
                message: "delay must not be negative".to_string(),
            });
        }
        if self.max_fetch_wait_ms <= 0 || self.min_fetch_wait_ms < 0 {
            return Err(BridgeError::InvalidConfig {
                key: "fetch_wait".to_string(),
                message: format!(
                    "min {}ms / max {}ms are not a valid range",
                    self.min_fetch_wait_ms, self.max_fetch_wait_ms
                ),
            });
        }
        if self.max_fetch_record == 0 {
            return Err(BridgeError::InvalidConfig {
                key: "max_fetch_record".to_string(),
                message: "a fetch must be allowed at least one record".to_string(),
            });
        }
        Ok(())
    }
}
