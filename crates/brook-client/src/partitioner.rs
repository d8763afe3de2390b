//! Partition selection
//!
//! A [`Partitioner`] picks one partition out of the topic's current
//! partition set. Implementations must return a member of that set and fail
//! with [`Error::PartitionSelection`] when the set is empty.

use crate::{Error, Result, SerializedRecord};
use brook_core::hash::murmur2_partition;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Keyless records stay on one partition for this many sends
pub const STICKY_BATCH_THRESHOLD: usize = 8;

/// Chooses the target partition for a serialized record
pub trait Partitioner: Send + Sync {
    fn partition(&self, record: &SerializedRecord, partitions: &[u32]) -> Result<u32>;
}

fn ensure_partitions(record: &SerializedRecord, partitions: &[u32]) -> Result<()> {
    if partitions.is_empty() {
        return Err(Error::PartitionSelection {
            topic: record.topic().to_string(),
            reason: "topic has no partitions".to_string(),
        });
    }
    Ok(())
}

/// Murmur2 for keyed records, sticky partitioning for keyless ones.
///
/// Keyed records land on the same partition as long as the partition count
/// does not change, matching the Kafka Java client. Keyless records stick to
/// one partition for [`STICKY_BATCH_THRESHOLD`] sends so they fill batches,
/// then move on to the next partition.
#[derive(Debug, Default)]
pub struct DefaultPartitioner {
    sticky: Mutex<HashMap<String, StickyState>>,
}

#[derive(Debug)]
struct StickyState {
    /// Index into the partition set
    index: usize,
    /// Records sent since the last switch
    batch_count: usize,
    /// Partition count the index was chosen for
    total_partitions: usize,
}

impl DefaultPartitioner {
    pub fn new() -> Self {
        Self::default()
    }

    fn sticky_index(&self, topic: &str, total: usize) -> usize {
        let mut sticky = self.sticky.lock();
        let state = sticky
            .entry(topic.to_string())
            .or_insert_with(|| StickyState {
                index: rand::random::<usize>() % total,
                batch_count: 0,
                total_partitions: total,
            });

        if state.total_partitions != total {
            state.index = rand::random::<usize>() % total;
            state.batch_count = 0;
            state.total_partitions = total;
        }

        let index = state.index;
        state.batch_count += 1;
        if state.batch_count >= STICKY_BATCH_THRESHOLD {
            state.index = (state.index + 1) % total;
            state.batch_count = 0;
        }
        index
    }
}

impl Partitioner for DefaultPartitioner {
    fn partition(&self, record: &SerializedRecord, partitions: &[u32]) -> Result<u32> {
        ensure_partitions(record, partitions)?;

        let index = match record.key() {
            Some(key) => murmur2_partition(key, partitions.len() as u32) as usize,
            None => self.sticky_index(record.topic(), partitions.len()),
        };
        Ok(partitions[index])
    }
}

/// Spreads records evenly over the partition set, ignoring keys
#[derive(Debug, Default)]
pub struct RoundRobinPartitioner {
    counters: Mutex<HashMap<String, usize>>,
}

impl RoundRobinPartitioner {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Partitioner for RoundRobinPartitioner {
    fn partition(&self, record: &SerializedRecord, partitions: &[u32]) -> Result<u32> {
        ensure_partitions(record, partitions)?;

        let mut counters = self.counters.lock();
        let next = counters.entry(record.topic().to_string()).or_insert(0);
        let index = *next % partitions.len();
        *next = next.wrapping_add(1);
        Ok(partitions[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn keyed(topic: &str, key: &str) -> SerializedRecord {
        SerializedRecord::new(
            topic,
            Some(Bytes::copy_from_slice(key.as_bytes())),
            Bytes::from_static(b"v"),
            0,
        )
    }

    fn keyless(topic: &str) -> SerializedRecord {
        SerializedRecord::new(topic, None, Bytes::from_static(b"v"), 0)
    }

    #[test]
    fn test_keyed_records_are_deterministic() {
        let partitioner = DefaultPartitioner::new();
        let partitions = [0, 1, 2, 3, 4, 5];

        let first = partitioner.partition(&keyed("orders", "user-9"), &partitions).unwrap();
        for _ in 0..20 {
            let again = partitioner.partition(&keyed("orders", "user-9"), &partitions).unwrap();
            assert_eq!(first, again);
        }
    }

    #[test]
    fn test_keyed_records_follow_kafka_hash() {
        let partitioner = DefaultPartitioner::new();
        let partitions = [10, 20, 30];
        let expected = partitions[murmur2_partition(b"abc", 3) as usize];
        assert_eq!(partitioner.partition(&keyed("t", "abc"), &partitions).unwrap(), expected);
    }

    #[test]
    fn test_result_is_member_of_set() {
        let partitioner = DefaultPartitioner::new();
        let round_robin = RoundRobinPartitioner::new();
        let sets: [&[u32]; 4] = [&[7], &[3, 9], &[0, 1, 2], &[42, 5, 17, 8, 100]];

        for set in sets {
            for i in 0..50 {
                let record = if i % 2 == 0 {
                    keyed("t", &format!("k{i}"))
                } else {
                    keyless("t")
                };
                assert!(set.contains(&partitioner.partition(&record, set).unwrap()));
                assert!(set.contains(&round_robin.partition(&record, set).unwrap()));
            }
        }
    }

    #[test]
    fn test_empty_partition_set_fails() {
        let record = keyed("orders", "k");
        for result in [
            DefaultPartitioner::new().partition(&record, &[]),
            DefaultPartitioner::new().partition(&keyless("orders"), &[]),
            RoundRobinPartitioner::new().partition(&record, &[]),
        ] {
            match result {
                Err(Error::PartitionSelection { topic, .. }) => assert_eq!(topic, "orders"),
                other => panic!("expected partition selection error, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_sticky_for_keyless() {
        let partitioner = DefaultPartitioner::new();
        let partitions = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9];

        let picks: Vec<u32> = (0..STICKY_BATCH_THRESHOLD)
            .map(|_| partitioner.partition(&keyless("events"), &partitions).unwrap())
            .collect();
        assert!(picks.iter().all(|&p| p == picks[0]));

        // the next batch moves to the following partition
        let next = partitioner.partition(&keyless("events"), &partitions).unwrap();
        assert_eq!(next, (picks[0] + 1) % 10);
    }

    #[test]
    fn test_sticky_resets_on_partition_change() {
        let partitioner = DefaultPartitioner::new();
        let p = partitioner.partition(&keyless("t"), &[0, 1, 2, 3]).unwrap();
        assert!(p < 4);
        let p = partitioner.partition(&keyless("t"), &[4, 5]).unwrap();
        assert!(p == 4 || p == 5);
    }

    #[test]
    fn test_round_robin_cycles_per_topic() {
        let partitioner = RoundRobinPartitioner::new();
        let partitions = [0, 1, 2];

        let a: Vec<u32> = (0..6)
            .map(|_| partitioner.partition(&keyed("a", "same"), &partitions).unwrap())
            .collect();
        assert_eq!(a, vec![0, 1, 2, 0, 1, 2]);

        // independent counter for another topic
        assert_eq!(partitioner.partition(&keyless("b"), &partitions).unwrap(), 0);
    }
}
