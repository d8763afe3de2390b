//! Cluster and topic metadata as returned by a metadata fetch

use serde::{Deserialize, Serialize};

/// Broker reachable by clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrokerInfo {
    /// Node ID
    pub node_id: String,
    pub host: String,
    pub port: u16,
    /// Optional rack ID
    pub rack: Option<String>,
}

impl BrokerInfo {
    pub fn new(node_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            node_id: node_id.into(),
            host: host.into(),
            port,
            rack: None,
        }
    }

    pub fn with_rack(mut self, rack: impl Into<String>) -> Self {
        self.rack = Some(rack.into());
        self
    }
}

/// Result of one metadata round trip
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterMetadata {
    /// Controller node ID, if known
    pub controller_id: Option<String>,
    pub brokers: Vec<BrokerInfo>,
    /// Metadata for the requested topics. Topics the cluster does not know
    /// are simply absent.
    pub topics: Vec<TopicMetadata>,
}

impl ClusterMetadata {
    pub fn new(topics: Vec<TopicMetadata>) -> Self {
        Self {
            topics,
            ..Default::default()
        }
    }

    pub fn with_brokers(mut self, brokers: Vec<BrokerInfo>) -> Self {
        self.brokers = brokers;
        self
    }
}

/// Partition layout of one topic
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopicMetadata {
    pub name: String,
    /// Internal topics start with an underscore (e.g. `__consumer_offsets`)
    pub is_internal: bool,
    /// Partitions in the order the cluster reported them
    pub partitions: Vec<PartitionMetadata>,
}

impl TopicMetadata {
    pub fn new(name: impl Into<String>, partitions: Vec<PartitionMetadata>) -> Self {
        let name = name.into();
        let is_internal = name.starts_with('_');
        Self {
            name,
            is_internal,
            partitions,
        }
    }

    /// Topic with partitions `0..count`, all led by `leader`
    pub fn with_partition_count(
        name: impl Into<String>,
        count: u32,
        leader: impl Into<String>,
    ) -> Self {
        let leader = leader.into();
        let partitions = (0..count)
            .map(|id| PartitionMetadata::new(id).with_leader(leader.clone()))
            .collect();
        Self::new(name, partitions)
    }

    /// Partition IDs in reported order
    pub fn partition_ids(&self) -> Vec<u32> {
        self.partitions.iter().map(|p| p.partition).collect()
    }

    pub fn has_offline_partitions(&self) -> bool {
        self.partitions.iter().any(|p| p.offline)
    }
}

/// One partition's placement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionMetadata {
    /// Partition ID
    pub partition: u32,
    /// Leader node ID (None if no leader)
    pub leader: Option<String>,
    pub replicas: Vec<String>,
    /// In-sync replica node IDs
    pub isr: Vec<String>,
    /// No leader available
    pub offline: bool,
}

impl PartitionMetadata {
    /// Leaderless partition; use [`with_leader`](Self::with_leader) to bring it online
    pub fn new(partition: u32) -> Self {
        Self {
            partition,
            leader: None,
            replicas: Vec::new(),
            isr: Vec::new(),
            offline: true,
        }
    }

    pub fn with_leader(mut self, leader: impl Into<String>) -> Self {
        self.leader = Some(leader.into());
        self.offline = false;
        self
    }

    pub fn with_replicas(mut self, replicas: Vec<String>) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn with_isr(mut self, isr: Vec<String>) -> Self {
        self.isr = isr;
        self
    }
}
