//! Record types flowing through the send path

use crate::completion::CompletionSender;
use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

/// A record as handed to [`Producer::send`](crate::Producer::send)
#[derive(Debug, Clone)]
pub struct ProducerRecord<K, V> {
    /// Topic name
    pub topic: String,
    /// Optional key; absent keys are not passed to the key serializer
    pub key: Option<K>,
    /// Message value
    pub value: V,
    /// Explicit partition. Skips the partitioner but must still exist in the
    /// topic's current metadata.
    pub partition: Option<u32>,
    /// Millis since epoch; the send time is used when unset
    pub timestamp: Option<i64>,
}

impl<K, V> ProducerRecord<K, V> {
    pub fn new(topic: impl Into<String>, value: V) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            value,
            partition: None,
            timestamp: None,
        }
    }

    pub fn with_key(mut self, key: K) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_partition(mut self, partition: u32) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Metadata returned after a successful send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    /// Topic name
    pub topic: String,
    /// Partition
    pub partition: u32,
    /// Offset within partition
    pub offset: u64,
    /// Record timestamp (millis since epoch)
    pub timestamp: i64,
}

/// Partition placement as last seen in the metadata cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionInfo {
    pub topic: String,
    pub partition: u32,
    pub leader: Option<String>,
    pub replicas: Vec<String>,
    pub in_sync_replicas: Vec<String>,
    pub offline: bool,
}

impl PartitionInfo {
    pub(crate) fn from_metadata(topic: &str, partition: &brook_core::PartitionMetadata) -> Self {
        Self {
            topic: topic.to_string(),
            partition: partition.partition,
            leader: partition.leader.clone(),
            replicas: partition.replicas.clone(),
            in_sync_replicas: partition.isr.clone(),
            offline: partition.offline,
        }
    }
}

/// Record after key and value serialization, as seen by a [`Partitioner`](crate::Partitioner)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedRecord {
    topic: String,
    key: Option<Bytes>,
    value: Bytes,
    timestamp: i64,
}

impl SerializedRecord {
    pub fn new(
        topic: impl Into<String>,
        key: Option<Bytes>,
        value: Bytes,
        timestamp: i64,
    ) -> Self {
        Self {
            topic: topic.into(),
            key,
            value,
            timestamp,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn key(&self) -> Option<&Bytes> {
        self.key.as_ref()
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Encoded key plus value length in bytes
    pub fn size(&self) -> usize {
        self.value.len() + self.key.as_ref().map_or(0, Bytes::len)
    }
}

/// A fully resolved record on its way into the accumulator.
///
/// The partition and encoded payload are fixed at construction; whoever
/// holds the record owns the single write into its completion cell.
#[derive(Debug)]
pub struct PreparedRecord {
    record: SerializedRecord,
    partition: u32,
    completion: CompletionSender,
}

impl PreparedRecord {
    pub(crate) fn new(
        record: SerializedRecord,
        partition: u32,
        completion: CompletionSender,
    ) -> Self {
        Self {
            record,
            partition,
            completion,
        }
    }

    pub fn topic(&self) -> &str {
        self.record.topic()
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    pub fn key(&self) -> Option<&Bytes> {
        self.record.key()
    }

    pub fn value(&self) -> &Bytes {
        self.record.value()
    }

    pub fn timestamp(&self) -> i64 {
        self.record.timestamp()
    }

    pub fn size(&self) -> usize {
        self.record.size()
    }

    /// Split into the payload and the completion cell
    pub fn into_parts(self) -> (SerializedRecord, u32, CompletionSender) {
        (self.record, self.partition, self.completion)
    }
}

/// Current wall clock in millis since epoch
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
