//! Brook producer client
//!
//! Asynchronous producer for a partitioned, replicated log. A [`Producer`]
//! serializes records, routes them to a partition using cached topic
//! metadata, and hands them to a [`RecordAccumulator`] that batches and
//! sends them through a [`Connector`]. Every send yields a [`RecordFuture`]
//! that resolves exactly once.

pub mod accumulator;
pub mod completion;
pub mod config;
pub mod connector;
pub mod error;
pub mod metadata_cache;
pub mod partitioner;
pub mod producer;
pub mod record;
pub mod serializer;
pub mod stats;

pub use accumulator::RecordAccumulator;
pub use completion::{CompletionSender, RecordFuture};
pub use config::{Acks, CompressionType, ProducerConfig, ProducerConfigBuilder};
pub use connector::{Connector, ProduceEntry, ProduceRequest, ProduceResponse};
pub use error::{Error, Result};
pub use metadata_cache::TopicMetadataCache;
pub use partitioner::{DefaultPartitioner, Partitioner, RoundRobinPartitioner};
pub use producer::{Producer, ProducerBuilder};
pub use record::{
    PartitionInfo, PreparedRecord, ProducerRecord, RecordMetadata, SerializedRecord,
};
pub use serializer::{BytesSerializer, JsonSerializer, Serializer, StringSerializer};
pub use stats::{Metric, ProducerStatsSnapshot};

pub use brook_core::{BrokerInfo, ClusterMetadata, PartitionMetadata, TopicMetadata};
