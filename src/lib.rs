// pulsar_kafka - Kafka broker semantics over a Pulsar-style log backend
//
// This crate implements the broker side of the Kafka protocol (produce,
// fetch, consumer groups, offsets) and translates every client interaction
// into operations against a log-backed messaging backend.
//
// Architecture Overview:
// =====================
//
// The crate is a library. Two collaborators live outside it:
//
// 1. THE WIRE LAYER: a TCP server plus Kafka codec that frames and decodes
//    requests into the parsed records in `kafka::messages`, calls the
//    matching method on `kafka::Broker`, and serializes the returned
//    response records back onto the socket.
//
// 2. THE BACKEND: a Pulsar-style log cluster reached through the traits in
//    `backend` (client factory, producer, reader-with-seek, latest-message
//    lookup). Committed offsets are persisted through
//    `kafka::storage::OffsetStore`.
//
// In between sits what this crate owns: the consumer-group coordinator
// (join/sync/heartbeat/leave rebalancing with generation barriers), the
// per-connection session registry, per-(topic, client) backend readers with
// in-flight message-id bookkeeping, and the produce/fetch pipelines that
// translate record batches to and from backend publishes and reads.

pub mod backend;
pub mod config;
pub mod kafka;
pub mod testing;

// Re-export the types an embedding server touches most.
pub use backend::{LogClient, LogClientFactory, LogMessage, LogProducer, LogReader, MessageId};
pub use config::{BrokerConfig, GroupCoordinatorType};
pub use kafka::broker::Broker;
pub use kafka::coordinator::{GroupCoordinator, GroupCoordinatorStandalone, GroupStatus};
pub use kafka::error::{BridgeError, Result};
pub use kafka::hooks::ServerHooks;
pub use kafka::storage::{MemoryOffsetStore, OffsetStore};
