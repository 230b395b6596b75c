//! Offset translation
//!
//! Kafka clients reason about 64-bit partition offsets; the backend
//! addresses messages by (ledger, entry, batch) ids. The mapping here must
//! be strictly non-decreasing in backend id order and stable for the same
//! message across restarts, because committed offsets round-trip through
//! the offset store and come back as seek positions.
//!
//! Two modes:
//! - **packed** (default): the id components are packed into one i64.
//!   Monotonicity follows from the backend's id ordering as long as entry
//!   ids stay under 2^16 per ledger and batch indexes under 2^12.
//! - **continuous**: the backend's broker-side entry index is used
//!   directly when the message carries one, yielding gap-free offsets.

use crate::backend::{LogMessage, MessageId};

/// Bits reserved for the entry id inside a packed offset
const ENTRY_BITS: u32 = 16;
/// Bits reserved for the batch index inside a packed offset
const BATCH_BITS: u32 = 12;

/// A backend message id together with the Kafka offset derived from it.
///
/// The pair travels through the pending-commit FIFO and the offset store,
/// so an ack can address the backend precisely while the client keeps
/// speaking in offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageIdPair {
    pub message_id: MessageId,
    pub offset: i64,
}

/// Pack a message id into a single i64, preserving id order.
pub fn pack_message_id(id: MessageId) -> i64 {
    // Non-batched messages report batch index -1; they occupy slot 0 of
    // their entry and never coexist with batched messages in that entry.
    let batch = i64::from(id.batch_index.max(0));
    (id.ledger_id << (ENTRY_BITS + BATCH_BITS))
        | ((id.entry_id & ((1 << ENTRY_BITS) - 1)) << BATCH_BITS)
        | (batch & ((1 << BATCH_BITS) - 1))
}

/// Derive the Kafka offset for a backend message.
pub fn conv_offset(message: &LogMessage, continuous_offset: bool) -> i64 {
    if continuous_offset {
        if let Some(index) = message.index {
            return index;
        }
    }
    pack_message_id(message.id)
}
