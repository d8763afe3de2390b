//! Producer façade and send pipeline
//!
//! [`Producer::send`] runs the local part of a send on the caller's task:
//!
//! 1. reject the record if the producer is closing
//! 2. serialize key and value
//! 3. check the encoded size
//! 4. look up the topic's partitions in the metadata cache (this may wait for
//!    one metadata round trip)
//! 5. pick the partition
//! 6. hand the record to the accumulator
//!
//! A failure in steps 1-5 resolves the returned [`RecordFuture`] right away
//! and nothing further runs. After step 6 only the accumulator resolves it.
//! Either way the future resolves exactly once.
//!
//! # Example
//!
//! ```rust,ignore
//! use brook_client::{Producer, ProducerConfig, ProducerRecord, StringSerializer};
//! use std::sync::Arc;
//!
//! let config = ProducerConfig::builder().linger(Duration::from_millis(5)).build()?;
//! let producer = Producer::new(config, StringSerializer, StringSerializer, connector);
//!
//! let delivery = producer
//!     .send(ProducerRecord::new("orders", "created".to_string()).with_key("user-1".to_string()))
//!     .await;
//! let metadata = delivery.await?;
//! println!("stored at {}/{}@{}", metadata.topic, metadata.partition, metadata.offset);
//!
//! producer.close(Duration::from_secs(5)).await?;
//! ```

use crate::accumulator::RecordAccumulator;
use crate::completion::{self, InFlight, RecordFuture};
use crate::metadata_cache::TopicMetadataCache;
use crate::partitioner::{DefaultPartitioner, Partitioner};
use crate::record::now_millis;
use crate::serializer::Serializer;
use crate::stats::{Metric, ProducerStats, ProducerStatsSnapshot};
use crate::{
    Connector, Error, PartitionInfo, PreparedRecord, ProducerConfig, ProducerRecord, Result,
    SerializedRecord,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Thread-safe, cloneable producer for records with keys of type `K` and
/// values of type `V`
pub struct Producer<K, V> {
    inner: Arc<ProducerInner<K, V>>,
}

struct ProducerInner<K, V> {
    config: Arc<ProducerConfig>,
    key_serializer: Box<dyn Serializer<K>>,
    value_serializer: Box<dyn Serializer<V>>,
    partitioner: Box<dyn Partitioner>,
    metadata_cache: TopicMetadataCache,
    /// Taken by `close`; `None` means no more records may be enqueued
    ingress: RwLock<Option<mpsc::Sender<PreparedRecord>>>,
    accumulator: RecordAccumulator,
    in_flight: Arc<InFlight>,
    stats: Arc<ProducerStats>,
    closed: AtomicBool,
}

impl<K, V> Clone for Producer<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Producer<K, V> {
    /// Create a producer with the default partitioner.
    ///
    /// Spawns the accumulator, so it must be called from within a tokio
    /// runtime.
    pub fn new(
        config: ProducerConfig,
        key_serializer: impl Serializer<K> + 'static,
        value_serializer: impl Serializer<V> + 'static,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self::assemble(
            config,
            Box::new(key_serializer),
            Box::new(value_serializer),
            Box::new(DefaultPartitioner::new()),
            connector,
        )
    }

    pub fn builder() -> ProducerBuilder<K, V> {
        ProducerBuilder::default()
    }

    fn assemble(
        config: ProducerConfig,
        key_serializer: Box<dyn Serializer<K>>,
        value_serializer: Box<dyn Serializer<V>>,
        partitioner: Box<dyn Partitioner>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let config = Arc::new(config);
        let stats = Arc::new(ProducerStats::new());
        let metadata_cache = TopicMetadataCache::new(
            Arc::clone(&connector),
            config.metadata_max_age(),
            config.metadata_fetch_timeout(),
        );
        let in_flight = Arc::new(InFlight::new());
        let (accumulator, ingress) = RecordAccumulator::spawn(
            Arc::clone(&config),
            connector,
            Arc::clone(&stats),
            Arc::clone(&in_flight),
        );

        info!(
            "Producer '{}' started (batch_size={}, linger={:?}, metadata_max_age={:?})",
            config.client_id(),
            config.batch_size(),
            config.linger(),
            config.metadata_max_age()
        );

        Self {
            inner: Arc::new(ProducerInner {
                config,
                key_serializer,
                value_serializer,
                partitioner,
                metadata_cache,
                ingress: RwLock::new(Some(ingress)),
                accumulator,
                in_flight,
                stats,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Send a record.
    ///
    /// Returns once the record has been handed to the accumulator or has
    /// failed locally. The returned future resolves exactly once with the
    /// record's metadata or the error that ended it.
    pub async fn send(&self, record: ProducerRecord<K, V>) -> RecordFuture {
        if self.is_closed() {
            ProducerStats::incr(&self.inner.stats.local_errors);
            return RecordFuture::ready(Err(Error::Closed));
        }

        let (completion, future) = completion::channel();

        match self.prepare(record).await {
            Ok((record, partition)) => {
                let completion = completion.track(&self.inner.in_flight);
                self.hand_off(PreparedRecord::new(record, partition, completion))
                    .await;
            }
            Err(e) => {
                ProducerStats::incr(&self.inner.stats.local_errors);
                debug!("Record failed before hand-off: {}", e);
                completion.resolve(Err(e));
            }
        }

        future
    }

    /// Serialize and route a record
    async fn prepare(&self, record: ProducerRecord<K, V>) -> Result<(SerializedRecord, u32)> {
        let ProducerRecord {
            topic,
            key,
            value,
            partition,
            timestamp,
        } = record;

        let key = key
            .map(|k| self.inner.key_serializer.serialize(&topic, &k))
            .transpose()?;
        let value = self.inner.value_serializer.serialize(&topic, &value)?;
        let serialized =
            SerializedRecord::new(topic, key, value, timestamp.unwrap_or_else(now_millis));

        let max = self.inner.config.max_request_size();
        if serialized.size() > max {
            return Err(Error::RecordTooLarge {
                size: serialized.size(),
                max,
            });
        }

        let partitions = self.inner.metadata_cache.get(serialized.topic()).await?;

        let partition = match partition {
            Some(p) if partitions.contains(&p) => p,
            Some(p) => {
                return Err(Error::PartitionSelection {
                    topic: serialized.topic().to_string(),
                    reason: format!("partition {p} not in {partitions:?}"),
                })
            }
            None => self.inner.partitioner.partition(&serialized, &partitions)?,
        };

        Ok((serialized, partition))
    }

    /// Push onto the accumulator ingress; failures resolve the record here
    async fn hand_off(&self, record: PreparedRecord) {
        let ingress = self.inner.ingress.read().await;
        let Some(tx) = ingress.as_ref() else {
            self.fail_hand_off(record, Error::Closed);
            return;
        };

        let outcome = if self.inner.config.block_on_buffer_full() {
            tx.send(record).await.map_err(|e| (e.0, Error::Closed))
        } else {
            tx.try_send(record).map_err(|e| match e {
                TrySendError::Full(record) => (record, Error::BufferExhausted),
                TrySendError::Closed(record) => (record, Error::Closed),
            })
        };

        match outcome {
            Ok(()) => ProducerStats::incr(&self.inner.stats.records_sent),
            Err((record, e)) => self.fail_hand_off(record, e),
        }
    }

    fn fail_hand_off(&self, record: PreparedRecord, error: Error) {
        ProducerStats::incr(&self.inner.stats.local_errors);
        debug!(
            "Record for {}/{} not accepted: {}",
            record.topic(),
            record.partition(),
            error
        );
        let (_, _, completion) = record.into_parts();
        completion.resolve(Err(error));
    }

    /// Send lingering batches and wait until every record handed to the
    /// accumulator before this call has a result.
    ///
    /// Records sent while the flush waits are not waited for and keep their
    /// normal linger. Bounded by the configured delivery timeout.
    pub async fn flush(&self) -> Result<()> {
        let in_flight = &self.inner.in_flight;
        let generation = in_flight.begin_flush();
        if in_flight.count_through(generation) == 0 {
            return Ok(());
        }

        self.inner.accumulator.request_flush();
        let timeout = self.inner.config.delivery_timeout();
        tokio::time::timeout(timeout, in_flight.wait_through(generation))
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "{} records still pending after {:?}",
                    in_flight.count_through(generation),
                    timeout
                ))
            })
    }

    /// Partitions of `topic` as currently cached.
    ///
    /// Never fetches; returns an empty list for topics the producer has not
    /// seen yet. The layout changes over time, so do not hold on to it.
    pub fn partitions_for(&self, topic: &str) -> Vec<PartitionInfo> {
        self.inner
            .metadata_cache
            .snapshot(topic)
            .unwrap_or_default()
    }

    /// Force a metadata refresh for `topics`
    pub async fn refresh_metadata(&self, topics: &[String]) -> Result<()> {
        self.inner.metadata_cache.refresh(topics).await
    }

    /// Get producer statistics
    pub fn stats(&self) -> ProducerStatsSnapshot {
        let cache = &self.inner.metadata_cache;
        self.inner.stats.snapshot(
            &self.inner.in_flight,
            cache.fetch_count(),
            cache.fetch_error_count(),
        )
    }

    /// Producer metrics by name
    pub fn metrics(&self) -> HashMap<String, Metric> {
        self.stats().to_metrics()
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stop accepting records and deliver what is pending within `timeout`.
    ///
    /// New sends fail with [`Error::Closed`] as soon as this is called. If
    /// the accumulator has not drained when `timeout` elapses, it is stopped
    /// and every record still pending resolves with an error; `close` then
    /// returns [`Error::Timeout`]. Closing a closed producer is a no-op.
    pub async fn close(&self, timeout: Duration) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Closing producer '{}'", self.inner.config.client_id());
        let deadline = Instant::now() + timeout;

        match tokio::time::timeout(timeout, self.inner.ingress.write()).await {
            Ok(mut ingress) => {
                // Dropping the sender lets the accumulator drain and stop
                ingress.take();
            }
            Err(_) => {
                // A sender is stuck on a full ingress; stopping the
                // accumulator unblocks it with a closed channel.
                warn!("Producer ingress still busy after {:?}, forcing close", timeout);
                let _ = self.inner.accumulator.close(Duration::ZERO).await;
                self.inner.ingress.write().await.take();
                return Err(Error::Timeout(format!(
                    "close did not complete within {timeout:?}"
                )));
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let result = self.inner.accumulator.close(remaining).await;
        info!("Producer '{}' closed", self.inner.config.client_id());
        result
    }
}

/// Builder for [`Producer`] with a custom partitioner
pub struct ProducerBuilder<K, V> {
    config: Option<ProducerConfig>,
    key_serializer: Option<Box<dyn Serializer<K>>>,
    value_serializer: Option<Box<dyn Serializer<V>>>,
    partitioner: Option<Box<dyn Partitioner>>,
    connector: Option<Arc<dyn Connector>>,
}

impl<K, V> Default for ProducerBuilder<K, V> {
    fn default() -> Self {
        Self {
            config: None,
            key_serializer: None,
            value_serializer: None,
            partitioner: None,
            connector: None,
        }
    }
}

impl<K, V> ProducerBuilder<K, V> {
    /// Defaults to `ProducerConfig::builder().build()`
    pub fn config(mut self, config: ProducerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn key_serializer(mut self, serializer: impl Serializer<K> + 'static) -> Self {
        self.key_serializer = Some(Box::new(serializer));
        self
    }

    pub fn value_serializer(mut self, serializer: impl Serializer<V> + 'static) -> Self {
        self.value_serializer = Some(Box::new(serializer));
        self
    }

    /// Defaults to [`DefaultPartitioner`]
    pub fn partitioner(mut self, partitioner: impl Partitioner + 'static) -> Self {
        self.partitioner = Some(Box::new(partitioner));
        self
    }

    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Must be called from within a tokio runtime
    pub fn build(self) -> Result<Producer<K, V>> {
        let config = match self.config {
            Some(config) => config,
            None => ProducerConfig::builder().build()?,
        };
        let key_serializer = self
            .key_serializer
            .ok_or_else(|| Error::InvalidConfig("key serializer is required".into()))?;
        let value_serializer = self
            .value_serializer
            .ok_or_else(|| Error::InvalidConfig("value serializer is required".into()))?;
        let connector = self
            .connector
            .ok_or_else(|| Error::InvalidConfig("connector is required".into()))?;
        let partitioner = self
            .partitioner
            .unwrap_or_else(|| Box::new(DefaultPartitioner::new()));

        Ok(Producer::assemble(
            config,
            key_serializer,
            value_serializer,
            partitioner,
            connector,
        ))
    }
}
