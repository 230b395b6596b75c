// Per-(partition topic, client) reader state
//
// Every consumer connection gets its own backend reader per partition
// topic, created on OffsetFetch and torn down when the member leaves or
// the group rebalances. Next to the reader lives the pending FIFO: every
// message handed to the client by a fetch is recorded as a
// (backend id, offset) pair so a later OffsetCommit can be translated
// into an ack of the exact backend message.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::backend::LogReader;
use crate::kafka::offset::MessageIdPair;

/// Reader plus in-flight bookkeeping for one (partition topic, client id).
pub struct ReaderMetadata {
    /// Consumer group the reader serves; commits are persisted under it
    pub group_id: String,
    /// The backend reader. Async mutex: `next()` is awaited under a fetch
    /// deadline while other requests may need the handle for seek/close.
    pub reader: AsyncMutex<Box<dyn LogReader>>,
    /// Fetched-but-uncommitted messages in delivery order
    pending: Mutex<VecDeque<MessageIdPair>>,
}

impl ReaderMetadata {
    pub fn new(group_id: String, reader: Box<dyn LogReader>) -> Self {
        Self {
            group_id,
            reader: AsyncMutex::new(reader),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Record a message the fetch path just handed to the client.
    pub fn push_pending(&self, pair: MessageIdPair) {
        self.pending.lock().push_back(pair);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Walk the FIFO for a commit of `target` and return the entry to ack.
    ///
    /// Entries below the target are dropped (the commit covers them); the
    /// entry that equals the target - or the final entry when the client
    /// committed past everything we handed out - is left at the head and
    /// returned so the caller can persist it first. Entries above the
    /// target stay untouched.
    pub fn commit_scan(&self, target: i64) -> Option<MessageIdPair> {
        let mut pending = self.pending.lock();
        while let Some(front) = pending.front().copied() {
            if front.offset == target {
                return Some(front);
            }
            if front.offset > target {
                return None;
            }
            // kafka commit offsets may run past the last delivered message
            if pending.len() == 1 {
                return Some(front);
            }
            pending.pop_front();
        }
        None
    }

    /// Drop the head entry once its ack has been persisted.
    pub fn complete_commit(&self) {
        self.pending.lock().pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LogMessage, MessageId};
    use crate::kafka::error::Result;
    use async_trait::async_trait;

    struct NoopReader;

    #[async_trait]
    impl LogReader for NoopReader {
        async fn next(&mut self) -> Result<LogMessage> {
            unimplemented!("not used by FIFO tests")
        }
        async fn seek(&mut self, _id: MessageId) -> Result<()> {
            Ok(())
        }
        async fn close(&mut self) {}
    }

    fn metadata_with(offsets: &[i64]) -> ReaderMetadata {
        let meta = ReaderMetadata::new("g1".to_string(), Box::new(NoopReader));
        for &offset in offsets {
            meta.push_pending(MessageIdPair {
                message_id: MessageId {
                    ledger_id: 1,
                    entry_id: offset,
                    batch_index: 0,
                    partition_index: 0,
                },
                offset,
            });
        }
        meta
    }

    #[test]
    fn test_commit_exact_match_drops_earlier_entries() {
        let meta = metadata_with(&[10, 20, 30]);

        let ack = meta.commit_scan(20).expect("entry 20 should be acked");
        assert_eq!(ack.offset, 20);
        meta.complete_commit();

        // 10 was covered by the commit, 30 remains in flight
        assert_eq!(meta.pending_len(), 1);
        assert_eq!(meta.commit_scan(30).unwrap().offset, 30);
    }

    #[test]
    fn test_commit_between_entries_acks_nothing() {
        let meta = metadata_with(&[10, 20, 30]);

        assert!(meta.commit_scan(25).is_none());
        // entries below the target were consumed, 30 survives
        assert_eq!(meta.pending_len(), 1);
    }

    #[test]
    fn test_commit_past_end_acks_final_entry() {
        let meta = metadata_with(&[10]);

        let ack = meta.commit_scan(25).expect("final entry acked on overshoot");
        assert_eq!(ack.offset, 10);
        meta.complete_commit();
        assert_eq!(meta.pending_len(), 0);
    }

    #[test]
    fn test_commit_below_head_is_a_no_op() {
        let meta = metadata_with(&[10, 20]);

        assert!(meta.commit_scan(5).is_none());
        assert_eq!(meta.pending_len(), 2);
    }

    #[test]
    fn test_commit_on_empty_fifo() {
        let meta = metadata_with(&[]);
        assert!(meta.commit_scan(10).is_none());
    }
}
