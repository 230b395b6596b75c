// Property tests for the offset mapping and the commit walk

use bytes::Bytes;
use proptest::prelude::*;

use pulsar_kafka::backend::{LogMessage, MessageId};
use pulsar_kafka::kafka::offset::{conv_offset, pack_message_id};

fn message(id: MessageId, index: Option<i64>) -> LogMessage {
    LogMessage {
        id,
        topic: "t-partition-0".to_string(),
        key: None,
        payload: Bytes::from_static(b"payload"),
        publish_time: 0,
        index,
    }
}

/// Ordered, deduplicated message ids within the packing bit budget.
fn id_sequence() -> impl Strategy<Value = Vec<MessageId>> {
    prop::collection::vec(
        (0i64..1_000, 0i64..65_536, -1i32..4_096),
        1..64,
    )
    .prop_map(|raw| {
        let mut ids: Vec<MessageId> = raw
            .into_iter()
            .map(|(ledger_id, entry_id, batch_index)| MessageId {
                ledger_id,
                entry_id,
                // -1 and 0 alias the same slot; normalize so dedup sees it
                batch_index: batch_index.max(0),
                partition_index: 0,
            })
            .collect();
        ids.sort();
        ids.dedup();
        ids
    })
}

proptest! {
    #[test]
    fn test_packed_offsets_strictly_increase_with_id_order(ids in id_sequence()) {
        let offsets: Vec<i64> = ids.iter().map(|&id| pack_message_id(id)).collect();
        for window in offsets.windows(2) {
            prop_assert!(window[0] < window[1], "offsets not increasing: {:?}", offsets);
        }
    }

    #[test]
    fn test_packed_offset_is_deterministic(
        ledger_id in 0i64..1_000,
        entry_id in 0i64..65_536,
        batch_index in -1i32..4_096,
    ) {
        let id = MessageId { ledger_id, entry_id, batch_index, partition_index: 0 };
        prop_assert_eq!(pack_message_id(id), pack_message_id(id));
    }

    #[test]
    fn test_continuous_mode_uses_index_when_present(
        ledger_id in 0i64..1_000,
        entry_id in 0i64..65_536,
        index in 0i64..1_000_000,
    ) {
        let id = MessageId { ledger_id, entry_id, batch_index: -1, partition_index: 0 };
        prop_assert_eq!(conv_offset(&message(id, Some(index)), true), index);
        prop_assert_eq!(conv_offset(&message(id, None), true), pack_message_id(id));
    }
}

mod commit_walk {
    use super::*;
    use async_trait::async_trait;
    use pulsar_kafka::backend::LogReader;
    use pulsar_kafka::kafka::error::Result;
    use pulsar_kafka::kafka::offset::MessageIdPair;
    use pulsar_kafka::kafka::reader::ReaderMetadata;

    struct NoopReader;

    #[async_trait]
    impl LogReader for NoopReader {
        async fn next(&mut self) -> Result<LogMessage> {
            unreachable!("commit walk never reads")
        }
        async fn seek(&mut self, _id: MessageId) -> Result<()> {
            Ok(())
        }
        async fn close(&mut self) {}
    }

    fn fifo(offsets: &[i64]) -> ReaderMetadata {
        let metadata = ReaderMetadata::new("g".to_string(), Box::new(NoopReader));
        for &offset in offsets {
            metadata.push_pending(MessageIdPair {
                message_id: MessageId {
                    ledger_id: 0,
                    entry_id: offset,
                    batch_index: -1,
                    partition_index: 0,
                },
                offset,
            });
        }
        metadata
    }

    proptest! {
        #[test]
        fn test_commit_never_acks_past_the_target(
            mut offsets in prop::collection::vec(0i64..10_000, 1..32),
            target in 0i64..12_000,
        ) {
            offsets.sort();
            offsets.dedup();
            let metadata = fifo(&offsets);
            if let Some(ack) = metadata.commit_scan(target) {
                prop_assert!(ack.offset <= target);
                // an ack below the target is only allowed for the final entry
                if ack.offset < target {
                    prop_assert_eq!(ack.offset, *offsets.last().unwrap());
                }
            }
        }

        #[test]
        fn test_commit_of_exact_entry_always_acks_it(
            mut offsets in prop::collection::vec(0i64..10_000, 1..32),
            pick in any::<prop::sample::Index>(),
        ) {
            offsets.sort();
            offsets.dedup();
            let target = offsets[pick.index(offsets.len())];
            let metadata = fifo(&offsets);
            let ack = metadata.commit_scan(target);
            prop_assert_eq!(ack.map(|a| a.offset), Some(target));
        }
    }
}
