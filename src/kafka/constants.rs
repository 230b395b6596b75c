//! Protocol constants and configuration defaults
//!
//! This module centralizes the Kafka error codes the broker returns, the
//! special timestamp/offset sentinels of the ListOffsets API, and the
//! default values for every tunable in [`crate::config::BrokerConfig`].

// ===== Kafka Error Codes =====
// See: https://kafka.apache.org/protocol.html#protocol_error_codes

/// No error
pub const ERROR_NONE: i16 = 0;

/// Unknown server error
pub const ERROR_UNKNOWN_SERVER_ERROR: i16 = -1;

/// Leader for the partition is not available (used while a group is
/// rebalancing and the reader has not been re-established)
pub const ERROR_LEADER_NOT_AVAILABLE: i16 = 5;

/// Coordinator is still loading group state; the client should retry
pub const ERROR_COORDINATOR_LOAD_IN_PROGRESS: i16 = 14;

/// Generation id does not match the group's current generation
pub const ERROR_ILLEGAL_GENERATION: i16 = 22;

/// Member's protocol type or protocol list is incompatible with the group
pub const ERROR_INCONSISTENT_GROUP_PROTOCOL: i16 = 23;

/// Group id is empty or unknown
pub const ERROR_INVALID_GROUP_ID: i16 = 24;

/// Member id is not known to the group
pub const ERROR_UNKNOWN_MEMBER_ID: i16 = 25;

/// Session timeout outside the broker's configured bounds
pub const ERROR_INVALID_SESSION_TIMEOUT: i16 = 26;

/// Group is rebalancing; the member must rejoin
pub const ERROR_REBALANCE_IN_PROGRESS: i16 = 27;

/// Client is not authorized to access the topic
pub const ERROR_TOPIC_AUTHORIZATION_FAILED: i16 = 29;

/// SASL authentication failed
pub const ERROR_SASL_AUTHENTICATION_FAILED: i16 = 58;

/// JoinGroup was sent without a member id where one is required
pub const ERROR_MEMBER_ID_REQUIRED: i16 = 79;

/// Group already holds the configured maximum number of members
pub const ERROR_GROUP_MAX_SIZE_REACHED: i16 = 81;

// ===== ListOffsets Sentinels =====

/// Timestamp value requesting the earliest available offset
pub const TIME_EARLIEST: i64 = -2;

/// Timestamp value requesting the latest offset
pub const TIME_LATEST: i64 = -1;

/// Offset returned for "earliest" when the backend has no index to consult
pub const DEFAULT_OFFSET: i64 = 0;

/// Offset returned by OffsetFetch when the group has no committed position
pub const UNKNOWN_OFFSET: i64 = -1;

// ===== Topic Naming =====

/// Suffix joining a backend topic name to a partition index,
/// e.g. `my-topic-partition-3`
pub const PARTITION_SUFFIX: &str = "-partition-";

/// The member id a client sends on its first JoinGroup
pub const EMPTY_MEMBER_ID: &str = "";

// ===== Configuration Defaults =====

/// Lower bound accepted for a member's session timeout (milliseconds)
pub const DEFAULT_GROUP_MIN_SESSION_TIMEOUT_MS: i32 = 6000;

/// Upper bound accepted for a member's session timeout (milliseconds)
pub const DEFAULT_GROUP_MAX_SESSION_TIMEOUT_MS: i32 = 300_000;

/// How long the first joiner holds a rebalance open so that concurrent
/// joiners coalesce into one generation bump (milliseconds)
pub const DEFAULT_INITIAL_DELAYED_JOIN_MS: i32 = 3000;

/// Poll period of the join/sync/rebalance barriers (milliseconds)
pub const DEFAULT_REBALANCE_TICK_MS: i32 = 100;

/// Maximum members per group; zero means unlimited
pub const DEFAULT_MAX_CONSUMERS_PER_GROUP: i32 = 0;

/// Ceiling applied to a fetch request's max wait time (milliseconds)
pub const DEFAULT_MAX_FETCH_WAIT_MS: i32 = 500;

/// A fetch returns early only after this much time has passed, even when
/// min_bytes is already satisfied (milliseconds)
pub const DEFAULT_MIN_FETCH_WAIT_MS: i32 = 10;

/// Maximum records accumulated by one partition fetch
pub const DEFAULT_MAX_FETCH_RECORD: usize = 500;

/// Receive queue depth requested for backend readers
pub const DEFAULT_CONSUMER_RECEIVE_QUEUE_SIZE: i32 = 1000;

/// Maximum publishes a connection's producer may have in flight
pub const DEFAULT_MAX_PENDING_PRODUCER_RECORDS: i32 = 1000;

/// Batch size limit requested from backend producers (bytes)
pub const DEFAULT_MAX_BATCH_SIZE: i32 = 131_072;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_match_kafka_spec() {
        // Verify against the Kafka protocol error code table
        assert_eq!(ERROR_NONE, 0);
        assert_eq!(ERROR_UNKNOWN_SERVER_ERROR, -1);
        assert_eq!(ERROR_LEADER_NOT_AVAILABLE, 5);
        assert_eq!(ERROR_COORDINATOR_LOAD_IN_PROGRESS, 14);
        assert_eq!(ERROR_ILLEGAL_GENERATION, 22);
        assert_eq!(ERROR_INCONSISTENT_GROUP_PROTOCOL, 23);
        assert_eq!(ERROR_INVALID_GROUP_ID, 24);
        assert_eq!(ERROR_UNKNOWN_MEMBER_ID, 25);
        assert_eq!(ERROR_INVALID_SESSION_TIMEOUT, 26);
        assert_eq!(ERROR_REBALANCE_IN_PROGRESS, 27);
        assert_eq!(ERROR_TOPIC_AUTHORIZATION_FAILED, 29);
        assert_eq!(ERROR_SASL_AUTHENTICATION_FAILED, 58);
        assert_eq!(ERROR_MEMBER_ID_REQUIRED, 79);
        assert_eq!(ERROR_GROUP_MAX_SIZE_REACHED, 81);
    }

    #[test]
    fn test_list_offsets_sentinels() {
        assert_eq!(TIME_EARLIEST, -2);
        assert_eq!(TIME_LATEST, -1);
        assert!(DEFAULT_OFFSET >= 0);
        assert_eq!(UNKNOWN_OFFSET, -1);
    }

    #[test]
    fn test_session_timeout_bounds_ordered() {
        assert!(DEFAULT_GROUP_MIN_SESSION_TIMEOUT_MS > 0);
        assert!(DEFAULT_GROUP_MAX_SESSION_TIMEOUT_MS > DEFAULT_GROUP_MIN_SESSION_TIMEOUT_MS);
    }

    #[test]
    fn test_rebalance_tick_shorter_than_join_delay() {
        // The barrier poll period must be able to observe the join delay window
        assert!(DEFAULT_REBALANCE_TICK_MS < DEFAULT_INITIAL_DELAYED_JOIN_MS);
    }

    #[test]
    fn test_fetch_wait_bounds_ordered() {
        assert!(DEFAULT_MIN_FETCH_WAIT_MS < DEFAULT_MAX_FETCH_WAIT_MS);
    }
}
