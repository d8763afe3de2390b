//! Producer configuration
//!
//! A [`ProducerConfig`] can only be obtained from
//! [`ProducerConfigBuilder::build`], which validates every setting once. The
//! resulting value is never mutated and is shared read-only by the metadata
//! cache, the send pipeline and the accumulator.
//!
//! The builder is also `Deserialize`, so settings can come from a file:
//!
//! ```rust
//! use brook_client::ProducerConfigBuilder;
//!
//! let builder: ProducerConfigBuilder = serde_json::from_str(
//!     r#"{ "client_id": "billing", "linger": 5, "acks": "all" }"#,
//! ).unwrap();
//! let config = builder.build().unwrap();
//! assert_eq!(config.client_id(), "billing");
//! ```

use crate::{Error, Result};
use brook_core::serde_utils::duration_ms;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default batch size in bytes
pub const DEFAULT_BATCH_SIZE: usize = 16384;
/// Default linger time
pub const DEFAULT_LINGER: Duration = Duration::ZERO;
/// Default buffer memory limit
pub const DEFAULT_BUFFER_MEMORY: usize = 32 * 1024 * 1024;
/// Default maximum size of a single record
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 1024 * 1024;
/// Default metadata TTL
pub const DEFAULT_METADATA_MAX_AGE: Duration = Duration::from_secs(300);
/// Default bound on one metadata round trip
pub const DEFAULT_METADATA_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Acknowledgements the leader must collect before answering a produce request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Acks {
    /// Fire and forget (`acks=0`)
    None,
    /// Leader write only (`acks=1`)
    #[default]
    Leader,
    /// All in-sync replicas (`acks=-1`)
    All,
}

impl Acks {
    /// Wire representation
    pub fn as_i16(self) -> i16 {
        match self {
            Acks::None => 0,
            Acks::Leader => 1,
            Acks::All => -1,
        }
    }
}

/// Compression codec requested for produced batches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    #[default]
    None,
    Gzip,
    Snappy,
    Lz4,
    Zstd,
}

/// Validated, immutable producer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProducerConfig {
    client_id: String,
    #[serde(with = "duration_ms")]
    metadata_max_age: Duration,
    #[serde(with = "duration_ms")]
    metadata_fetch_timeout: Duration,
    batch_size: usize,
    #[serde(with = "duration_ms")]
    linger: Duration,
    buffer_memory: usize,
    max_request_size: usize,
    block_on_buffer_full: bool,
    acks: Acks,
    compression_type: CompressionType,
    #[serde(with = "duration_ms")]
    request_timeout: Duration,
    #[serde(with = "duration_ms")]
    delivery_timeout: Duration,
    retries: u32,
    #[serde(with = "duration_ms")]
    retry_backoff: Duration,
    #[serde(with = "duration_ms")]
    retry_backoff_max: Duration,
}

impl ProducerConfig {
    /// Create a new builder
    pub fn builder() -> ProducerConfigBuilder {
        ProducerConfigBuilder::default()
    }

    /// Client identifier reported to the cluster
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Age after which cached topic metadata is refreshed
    pub fn metadata_max_age(&self) -> Duration {
        self.metadata_max_age
    }

    /// Upper bound for one metadata round trip
    pub fn metadata_fetch_timeout(&self) -> Duration {
        self.metadata_fetch_timeout
    }

    /// Batch size in bytes that makes a batch ready
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// How long a batch waits for more records
    pub fn linger(&self) -> Duration {
        self.linger
    }

    pub fn buffer_memory(&self) -> usize {
        self.buffer_memory
    }

    /// Largest encoded key + value accepted by `send`
    pub fn max_request_size(&self) -> usize {
        self.max_request_size
    }

    /// Wait for room in the accumulator instead of failing the record
    pub fn block_on_buffer_full(&self) -> bool {
        self.block_on_buffer_full
    }

    pub fn acks(&self) -> Acks {
        self.acks
    }

    pub fn compression_type(&self) -> CompressionType {
        self.compression_type
    }

    /// Bound on one produce round trip
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Bound on `flush`
    pub fn delivery_timeout(&self) -> Duration {
        self.delivery_timeout
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn retry_backoff(&self) -> Duration {
        self.retry_backoff
    }

    pub fn retry_backoff_max(&self) -> Duration {
        self.retry_backoff_max
    }

    /// Capacity of the accumulator ingress channel, in records
    pub fn ingress_capacity(&self) -> usize {
        (self.buffer_memory / self.batch_size).max(1)
    }
}

/// Builder for [`ProducerConfig`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProducerConfigBuilder {
    client_id: String,
    #[serde(with = "duration_ms")]
    metadata_max_age: Duration,
    #[serde(with = "duration_ms")]
    metadata_fetch_timeout: Duration,
    batch_size: usize,
    #[serde(with = "duration_ms")]
    linger: Duration,
    buffer_memory: usize,
    max_request_size: usize,
    block_on_buffer_full: bool,
    acks: Acks,
    compression_type: CompressionType,
    #[serde(with = "duration_ms")]
    request_timeout: Duration,
    #[serde(with = "duration_ms")]
    delivery_timeout: Duration,
    retries: u32,
    #[serde(with = "duration_ms")]
    retry_backoff: Duration,
    #[serde(with = "duration_ms")]
    retry_backoff_max: Duration,
}

impl Default for ProducerConfigBuilder {
    fn default() -> Self {
        Self {
            client_id: "brook-producer".to_string(),
            metadata_max_age: DEFAULT_METADATA_MAX_AGE,
            metadata_fetch_timeout: DEFAULT_METADATA_FETCH_TIMEOUT,
            batch_size: DEFAULT_BATCH_SIZE,
            linger: DEFAULT_LINGER,
            buffer_memory: DEFAULT_BUFFER_MEMORY,
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
            block_on_buffer_full: true,
            acks: Acks::Leader,
            compression_type: CompressionType::None,
            request_timeout: Duration::from_secs(30),
            delivery_timeout: Duration::from_secs(120),
            retries: 3,
            retry_backoff: Duration::from_millis(100),
            retry_backoff_max: Duration::from_secs(1),
        }
    }
}

impl ProducerConfigBuilder {
    /// Larger, compressed batches that linger a little
    pub fn high_throughput() -> Self {
        Self {
            batch_size: 65536,
            linger: Duration::from_millis(10),
            compression_type: CompressionType::Lz4,
            ..Default::default()
        }
    }

    /// Send every record as soon as it arrives
    pub fn low_latency() -> Self {
        Self {
            batch_size: 1,
            linger: Duration::ZERO,
            compression_type: CompressionType::None,
            ..Default::default()
        }
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Set metadata max age (TTL)
    pub fn metadata_max_age(mut self, ttl: Duration) -> Self {
        self.metadata_max_age = ttl;
        self
    }

    pub fn metadata_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.metadata_fetch_timeout = timeout;
        self
    }

    /// Set batch size in bytes
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    /// Set buffer memory limit
    pub fn buffer_memory(mut self, bytes: usize) -> Self {
        self.buffer_memory = bytes;
        self
    }

    pub fn max_request_size(mut self, bytes: usize) -> Self {
        self.max_request_size = bytes;
        self
    }

    pub fn block_on_buffer_full(mut self, block: bool) -> Self {
        self.block_on_buffer_full = block;
        self
    }

    pub fn acks(mut self, acks: Acks) -> Self {
        self.acks = acks;
        self
    }

    pub fn compression_type(mut self, compression: CompressionType) -> Self {
        self.compression_type = compression;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Set number of retries per batch
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn retry_backoff_max(mut self, backoff: Duration) -> Self {
        self.retry_backoff_max = backoff;
        self
    }

    /// Validate the settings and freeze them
    pub fn build(self) -> Result<ProducerConfig> {
        if self.metadata_max_age.is_zero() {
            return Err(invalid("metadata_max_age must be greater than zero"));
        }
        if self.metadata_fetch_timeout.is_zero() {
            return Err(invalid("metadata_fetch_timeout must be greater than zero"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size must be greater than zero"));
        }
        if self.buffer_memory < self.batch_size {
            return Err(invalid(format!(
                "buffer_memory ({}) must be at least batch_size ({})",
                self.buffer_memory, self.batch_size
            )));
        }
        if self.max_request_size == 0 {
            return Err(invalid("max_request_size must be greater than zero"));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("request_timeout must be greater than zero"));
        }
        if self.delivery_timeout < self.linger + self.request_timeout {
            return Err(invalid(
                "delivery_timeout must be at least linger + request_timeout",
            ));
        }
        if self.retry_backoff_max < self.retry_backoff {
            return Err(invalid("retry_backoff_max must not be below retry_backoff"));
        }

        Ok(ProducerConfig {
            client_id: self.client_id,
            metadata_max_age: self.metadata_max_age,
            metadata_fetch_timeout: self.metadata_fetch_timeout,
            batch_size: self.batch_size,
            linger: self.linger,
            buffer_memory: self.buffer_memory,
            max_request_size: self.max_request_size,
            block_on_buffer_full: self.block_on_buffer_full,
            acks: self.acks,
            compression_type: self.compression_type,
            request_timeout: self.request_timeout,
            delivery_timeout: self.delivery_timeout,
            retries: self.retries,
            retry_backoff: self.retry_backoff,
            retry_backoff_max: self.retry_backoff_max,
        })
    }
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidConfig(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ProducerConfig::builder().build().unwrap();
        assert_eq!(config.batch_size(), DEFAULT_BATCH_SIZE);
        assert_eq!(config.metadata_max_age(), DEFAULT_METADATA_MAX_AGE);
        assert_eq!(config.acks(), Acks::Leader);
        assert_eq!(config.ingress_capacity(), DEFAULT_BUFFER_MEMORY / DEFAULT_BATCH_SIZE);
        assert!(config.block_on_buffer_full());
    }

    #[test]
    fn test_builder_setters() {
        let config = ProducerConfig::builder()
            .client_id("payments")
            .batch_size(32768)
            .linger(Duration::from_millis(10))
            .buffer_memory(64 * 1024 * 1024)
            .retries(5)
            .acks(Acks::All)
            .build()
            .unwrap();

        assert_eq!(config.client_id(), "payments");
        assert_eq!(config.batch_size(), 32768);
        assert_eq!(config.linger(), Duration::from_millis(10));
        assert_eq!(config.buffer_memory(), 64 * 1024 * 1024);
        assert_eq!(config.retries(), 5);
        assert_eq!(config.acks().as_i16(), -1);
    }

    #[test]
    fn test_presets() {
        let config = ProducerConfigBuilder::high_throughput().build().unwrap();
        assert_eq!(config.batch_size(), 65536);
        assert_eq!(config.compression_type(), CompressionType::Lz4);

        let config = ProducerConfigBuilder::low_latency().build().unwrap();
        assert_eq!(config.batch_size(), 1);
        assert_eq!(config.linger(), Duration::ZERO);
    }

    #[test]
    fn test_rejects_invalid_settings() {
        let cases = [
            ProducerConfig::builder().metadata_max_age(Duration::ZERO),
            ProducerConfig::builder().metadata_fetch_timeout(Duration::ZERO),
            ProducerConfig::builder().batch_size(0),
            ProducerConfig::builder().batch_size(1024).buffer_memory(512),
            ProducerConfig::builder().max_request_size(0),
            ProducerConfig::builder().request_timeout(Duration::ZERO),
            ProducerConfig::builder()
                .request_timeout(Duration::from_secs(30))
                .delivery_timeout(Duration::from_secs(10)),
            ProducerConfig::builder()
                .retry_backoff(Duration::from_secs(2))
                .retry_backoff_max(Duration::from_secs(1)),
        ];

        for builder in cases {
            let err = builder.clone().build().unwrap_err();
            assert!(matches!(err, Error::InvalidConfig(_)), "{builder:?}");
        }
    }

    #[test]
    fn test_deserialize_builder() {
        let builder: ProducerConfigBuilder = serde_json::from_str(
            r#"{
                "client_id": "ingest",
                "metadata_max_age": 5000,
                "batch_size": 1024,
                "acks": "none",
                "compression_type": "zstd"
            }"#,
        )
        .unwrap();
        let config = builder.build().unwrap();

        assert_eq!(config.client_id(), "ingest");
        assert_eq!(config.metadata_max_age(), Duration::from_secs(5));
        assert_eq!(config.acks(), Acks::None);
        assert_eq!(config.compression_type(), CompressionType::Zstd);
        // untouched keys keep their defaults
        assert_eq!(config.retries(), 3);
    }

    #[test]
    fn test_deserialize_rejects_unknown_keys() {
        let parsed = serde_json::from_str::<ProducerConfigBuilder>(r#"{"lingerMs": 5}"#);
        assert!(parsed.is_err());
    }
}
