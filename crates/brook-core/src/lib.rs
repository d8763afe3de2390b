//! Building blocks shared by Brook clients: cluster metadata types, the
//! Kafka-compatible key hash and a few serde helpers.

pub mod error;
pub mod hash;
pub mod metadata;
pub mod serde_utils;

pub use error::{Error, Result};
pub use metadata::{BrokerInfo, ClusterMetadata, PartitionMetadata, TopicMetadata};
