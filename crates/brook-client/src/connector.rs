//! Network seam between the producer and the cluster
//!
//! The producer never speaks a wire protocol itself. Everything that crosses
//! the network goes through a [`Connector`]: metadata fetches from the
//! metadata cache and batch transmission from the accumulator. Retry and
//! timeout behaviour inside a connector is its own business.

use crate::config::{Acks, CompressionType};
use crate::Result;
use async_trait::async_trait;
use brook_core::ClusterMetadata;
use bytes::Bytes;
use std::time::Duration;

/// Cluster access used by the producer
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Fetch metadata for `topics` in one round trip.
    ///
    /// Topics unknown to the cluster are left out of the response rather
    /// than reported as an error.
    async fn get_topic_metadata(&self, topics: &[String]) -> Result<ClusterMetadata>;

    /// Append one batch to one topic-partition
    async fn produce(&self, request: ProduceRequest) -> Result<ProduceResponse>;
}

/// One record inside a produce request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceEntry {
    pub key: Option<Bytes>,
    pub value: Bytes,
    /// Millis since epoch
    pub timestamp: i64,
}

/// A batch for a single topic-partition
#[derive(Debug, Clone)]
pub struct ProduceRequest {
    pub client_id: String,
    pub topic: String,
    pub partition: u32,
    pub acks: Acks,
    pub compression: CompressionType,
    /// How long the broker may take to answer
    pub timeout: Duration,
    pub records: Vec<ProduceEntry>,
}

impl ProduceRequest {
    /// Sum of encoded key and value bytes
    pub fn payload_size(&self) -> usize {
        self.records
            .iter()
            .map(|r| r.value.len() + r.key.as_ref().map_or(0, Bytes::len))
            .sum()
    }
}

/// Broker answer to a [`ProduceRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProduceResponse {
    /// Offset assigned to the first record; the i-th record gets `base_offset + i`
    pub base_offset: u64,
}
