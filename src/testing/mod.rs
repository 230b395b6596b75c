// Test utilities
//
// Mocks for the collaborator traits plus an in-memory log backend that
// behaves enough like the real thing (ordered ids, blocking reads,
// seek) to drive the broker end to end without a cluster.

pub mod helpers;
pub mod mocks;

pub use helpers::{client_addr, test_config, MemoryLog, MemoryLogFactory, StaticHooks};
pub use mocks::{MockOffsetStore, MockServerHooks};
