//! Broker error types
//!
//! A single typed error for everything the broker can fail at, following
//! the two-tier model of the protocol:
//!
//! 1. **Validation failures** map to a Kafka error code via
//!    [`BridgeError::error_code`] and are returned to the client inside a
//!    normal response; no error propagates.
//! 2. **Operational failures** (backend publish/read problems, hook
//!    failures, barrier timeouts) propagate as `Err` until the handler
//!    that owns the response converts them, usually to
//!    `UNKNOWN_SERVER_ERROR` or `REBALANCE_IN_PROGRESS` depending on
//!    whether a retry should reuse the same group membership.

use thiserror::Error;

use crate::kafka::constants::{
    ERROR_COORDINATOR_LOAD_IN_PROGRESS, ERROR_GROUP_MAX_SIZE_REACHED,
    ERROR_INCONSISTENT_GROUP_PROTOCOL, ERROR_INVALID_GROUP_ID, ERROR_INVALID_SESSION_TIMEOUT,
    ERROR_LEADER_NOT_AVAILABLE, ERROR_MEMBER_ID_REQUIRED, ERROR_REBALANCE_IN_PROGRESS,
    ERROR_SASL_AUTHENTICATION_FAILED, ERROR_TOPIC_AUTHORIZATION_FAILED, ERROR_UNKNOWN_MEMBER_ID,
    ERROR_UNKNOWN_SERVER_ERROR,
};

/// Errors raised by the broker and the group coordinator
#[derive(Error, Debug)]
pub enum BridgeError {
    // ===== Group Coordination =====
    /// Group id is empty or names no known group
    #[error("Invalid group id: '{group_id}'")]
    InvalidGroupId { group_id: String },

    /// A request that requires a member id arrived without one
    #[error("Member id required for group '{group_id}'")]
    MemberIdRequired { group_id: String },

    /// Member id is not present in the group
    #[error("Unknown member '{member_id}' in group '{group_id}'")]
    UnknownMemberId { group_id: String, member_id: String },

    /// Session timeout outside the configured bounds
    #[error("Invalid session timeout {session_timeout_ms}ms (allowed {min_ms}-{max_ms}ms)")]
    InvalidSessionTimeout {
        session_timeout_ms: i32,
        min_ms: i32,
        max_ms: i32,
    },

    /// Group already holds the configured maximum number of members
    #[error("Group '{group_id}' reached its maximum size of {max_members}")]
    GroupMaxSizeReached { group_id: String, max_members: i32 },

    /// Protocol type or protocol list incompatible with the group
    #[error("Inconsistent group protocol for '{group_id}': {message}")]
    InconsistentGroupProtocol { group_id: String, message: String },

    /// The group is mid-rebalance and the member must rejoin
    #[error("Rebalance in progress for group '{group_id}'")]
    RebalanceInProgress { group_id: String },

    /// A join/sync/rebalance barrier did not clear within the session timeout
    #[error("Timed out awaiting {phase} barrier in group '{group_id}'")]
    BarrierTimeout { group_id: String, phase: String },

    // ===== Authentication / Authorization =====
    /// SASL credentials rejected by the auth hook
    #[error("SASL authentication failed for user '{username}'")]
    SaslAuthenticationFailed { username: String },

    /// No authenticated user bound to the connection address
    #[error("No authenticated session for address {addr}")]
    UnauthenticatedAddress { addr: String },

    /// The auth hook denied access to a topic
    #[error("Not authorized for topic '{topic}'")]
    TopicAuthorizationFailed { topic: String },

    /// The group for a topic is not Stable, so the partition has no reader
    #[error("Leader not available for topic '{topic}'")]
    LeaderNotAvailable { topic: String },

    // ===== Collaborators =====
    /// Backend client, producer or reader operation failed
    #[error("Backend error: {message}")]
    Backend { message: String },

    /// An application hook returned an error
    #[error("Hook error: {message}")]
    Hook { message: String },

    /// The offset store failed to persist or load a committed position
    #[error("Offset store error: {message}")]
    OffsetStore { message: String },

    // ===== Configuration =====
    /// Invalid configuration value
    #[error("Invalid configuration '{key}': {message}")]
    InvalidConfig { key: String, message: String },

    // ===== Generic (use sparingly) =====
    /// Catch-all internal error (prefer specific variants)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Map this error to the Kafka protocol error code a client should see.
    pub fn error_code(&self) -> i16 {
        match self {
            BridgeError::InvalidGroupId { .. } => ERROR_INVALID_GROUP_ID,
            BridgeError::MemberIdRequired { .. } => ERROR_MEMBER_ID_REQUIRED,
            BridgeError::UnknownMemberId { .. } => ERROR_UNKNOWN_MEMBER_ID,
            BridgeError::InvalidSessionTimeout { .. } => ERROR_INVALID_SESSION_TIMEOUT,
            BridgeError::GroupMaxSizeReached { .. } => ERROR_GROUP_MAX_SIZE_REACHED,
            BridgeError::InconsistentGroupProtocol { .. } => ERROR_INCONSISTENT_GROUP_PROTOCOL,
            BridgeError::RebalanceInProgress { .. } => ERROR_REBALANCE_IN_PROGRESS,
            BridgeError::BarrierTimeout { .. } => ERROR_COORDINATOR_LOAD_IN_PROGRESS,
            BridgeError::SaslAuthenticationFailed { .. } => ERROR_SASL_AUTHENTICATION_FAILED,
            BridgeError::UnauthenticatedAddress { .. } => ERROR_UNKNOWN_SERVER_ERROR,
            BridgeError::TopicAuthorizationFailed { .. } => ERROR_TOPIC_AUTHORIZATION_FAILED,
            BridgeError::LeaderNotAvailable { .. } => ERROR_LEADER_NOT_AVAILABLE,
            BridgeError::Backend { .. }
            | BridgeError::Hook { .. }
            | BridgeError::OffsetStore { .. }
            | BridgeError::InvalidConfig { .. }
            | BridgeError::Internal(_) => ERROR_UNKNOWN_SERVER_ERROR,
        }
    }

    /// True for failures that indicate a broker-side problem and deserve a
    /// warning-or-higher log level; client-induced errors stay at debug.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            BridgeError::Backend { .. }
                | BridgeError::Hook { .. }
                | BridgeError::OffsetStore { .. }
                | BridgeError::InvalidConfig { .. }
                | BridgeError::Internal(_)
        )
    }

    pub fn invalid_group(group_id: impl Into<String>) -> Self {
        BridgeError::InvalidGroupId {
            group_id: group_id.into(),
        }
    }

    pub fn unknown_member(group_id: impl Into<String>, member_id: impl Into<String>) -> Self {
        BridgeError::UnknownMemberId {
            group_id: group_id.into(),
            member_id: member_id.into(),
        }
    }

    pub fn inconsistent_protocol(group_id: impl Into<String>, message: impl Into<String>) -> Self {
        BridgeError::InconsistentGroupProtocol {
            group_id: group_id.into(),
            message: message.into(),
        }
    }

    pub fn barrier_timeout(group_id: impl Into<String>, phase: impl Into<String>) -> Self {
        BridgeError::BarrierTimeout {
            group_id: group_id.into(),
            phase: phase.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        BridgeError::Backend {
            message: message.into(),
        }
    }

    pub fn hook(message: impl Into<String>) -> Self {
        BridgeError::Hook {
            message: message.into(),
        }
    }

    pub fn offset_store(message: impl Into<String>) -> Self {
        BridgeError::OffsetStore {
            message: message.into(),
        }
    }
}

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::InvalidSessionTimeout {
            session_timeout_ms: 100,
            min_ms: 6000,
            max_ms: 300_000,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("100ms"));
        assert!(msg.contains("6000-300000ms"));
    }

    #[test]
    fn test_coordination_error_codes() {
        assert_eq!(
            BridgeError::invalid_group("g").error_code(),
            ERROR_INVALID_GROUP_ID
        );
        assert_eq!(
            BridgeError::unknown_member("g", "m").error_code(),
            ERROR_UNKNOWN_MEMBER_ID
        );
        assert_eq!(
            BridgeError::MemberIdRequired {
                group_id: "g".to_string()
            }
            .error_code(),
            ERROR_MEMBER_ID_REQUIRED
        );
        assert_eq!(
            BridgeError::RebalanceInProgress {
                group_id: "g".to_string()
            }
            .error_code(),
            ERROR_REBALANCE_IN_PROGRESS
        );
        assert_eq!(
            BridgeError::barrier_timeout("g", "join").error_code(),
            ERROR_COORDINATOR_LOAD_IN_PROGRESS
        );
        assert_eq!(
            BridgeError::GroupMaxSizeReached {
                group_id: "g".to_string(),
                max_members: 5
            }
            .error_code(),
            ERROR_GROUP_MAX_SIZE_REACHED
        );
        assert_eq!(
            BridgeError::inconsistent_protocol("g", "types differ").error_code(),
            ERROR_INCONSISTENT_GROUP_PROTOCOL
        );
    }

    #[test]
    fn test_collaborator_errors_are_server_errors() {
        assert!(BridgeError::backend("publish failed").is_server_error());
        assert!(BridgeError::hook("auth hook down").is_server_error());
        assert!(BridgeError::offset_store("write failed").is_server_error());
        assert!(BridgeError::Internal("boom".to_string()).is_server_error());
    }

    #[test]
    fn test_client_errors_are_not_server_errors() {
        assert!(!BridgeError::invalid_group("g").is_server_error());
        assert!(!BridgeError::unknown_member("g", "m").is_server_error());
        assert!(!BridgeError::SaslAuthenticationFailed {
            username: "alice".to_string()
        }
        .is_server_error());
        assert!(!BridgeError::LeaderNotAvailable {
            topic: "t".to_string()
        }
        .is_server_error());
    }

    #[test]
    fn test_collaborator_errors_map_to_unknown_server_error() {
        assert_eq!(
            BridgeError::backend("x").error_code(),
            ERROR_UNKNOWN_SERVER_ERROR
        );
        assert_eq!(
            BridgeError::offset_store("x").error_code(),
            ERROR_UNKNOWN_SERVER_ERROR
        );
        assert_eq!(
            BridgeError::UnauthenticatedAddress {
                addr: "1.2.3.4:5".to_string()
            }
            .error_code(),
            ERROR_UNKNOWN_SERVER_ERROR
        );
    }
}
