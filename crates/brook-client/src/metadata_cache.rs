//! Topic metadata cache with TTL
//!
//! Serves partition sets for the send path and goes to the cluster through
//! the [`Connector`] when an entry is missing or older than the configured
//! TTL.
//!
//! # Locking
//!
//! - The topic -> entry map sits behind one `RwLock`. Entries are immutable
//!   `Arc`s that a refresh swaps out whole, so readers see either the old or
//!   the new partition list and never a mix.
//! - All refreshes, whatever topics they target, serialise on a single async
//!   mutex held across the fetch. At most one metadata request is in flight
//!   per producer. Concurrent misses queue up and each performs its own
//!   fetch once it holds the lock.
//!
//! # Staleness
//!
//! A stale entry whose refresh fails is *not* served: [`get`](TopicMetadataCache::get)
//! returns the refresh error instead of partitions that may be outdated.

use crate::{Connector, Error, PartitionInfo, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Partition list of one topic as of one fetch
#[derive(Debug)]
struct CacheEntry {
    partitions: Vec<PartitionInfo>,
    fetched_at: Instant,
}

impl CacheEntry {
    fn is_stale(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() >= ttl
    }

    fn partition_ids(&self) -> Vec<u32> {
        self.partitions.iter().map(|p| p.partition).collect()
    }
}

/// Per-topic partition cache shared by all senders of one producer
pub struct TopicMetadataCache {
    connector: Arc<dyn Connector>,
    ttl: Duration,
    fetch_timeout: Duration,
    entries: RwLock<HashMap<String, Arc<CacheEntry>>>,
    refresh_lock: Mutex<()>,
    fetches: AtomicU64,
    fetch_errors: AtomicU64,
}

impl TopicMetadataCache {
    pub fn new(connector: Arc<dyn Connector>, ttl: Duration, fetch_timeout: Duration) -> Self {
        Self {
            connector,
            ttl,
            fetch_timeout,
            entries: RwLock::new(HashMap::new()),
            refresh_lock: Mutex::new(()),
            fetches: AtomicU64::new(0),
            fetch_errors: AtomicU64::new(0),
        }
    }

    /// Partition IDs of `topic`, refreshing first when the entry is missing
    /// or stale.
    ///
    /// May wait for the refresh lock and one metadata round trip.
    pub async fn get(&self, topic: &str) -> Result<Vec<u32>> {
        if let Some(entry) = self.entry(topic) {
            if !entry.is_stale(self.ttl) {
                return Ok(entry.partition_ids());
            }
            debug!("Metadata for topic '{}' is stale, refreshing", topic);
        }

        let refreshed = self.refresh_topics(&[topic.to_string()]).await?;
        let missing = || brook_core::Error::TopicNotFound(topic.to_string());
        if !refreshed.iter().any(|t| t == topic) {
            return Err(missing().into());
        }

        self.entry(topic)
            .map(|entry| entry.partition_ids())
            .ok_or_else(|| missing().into())
    }

    /// Fetch metadata for `topics` and replace their entries.
    ///
    /// On failure no entry is touched.
    pub async fn refresh(&self, topics: &[String]) -> Result<()> {
        self.refresh_topics(topics).await.map(|_| ())
    }

    /// Last cached partitions of `topic`, stale or not, without fetching
    pub fn snapshot(&self, topic: &str) -> Option<Vec<PartitionInfo>> {
        self.entry(topic).map(|entry| entry.partitions.clone())
    }

    /// Number of cached topics
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Metadata requests issued so far
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Metadata requests that failed or timed out
    pub fn fetch_error_count(&self) -> u64 {
        self.fetch_errors.load(Ordering::Relaxed)
    }

    fn entry(&self, topic: &str) -> Option<Arc<CacheEntry>> {
        self.entries.read().get(topic).cloned()
    }

    /// Returns the names of the topics whose entries were replaced
    async fn refresh_topics(&self, topics: &[String]) -> Result<Vec<String>> {
        let _guard = self.refresh_lock.lock().await;

        self.fetches.fetch_add(1, Ordering::Relaxed);
        let fetched = tokio::time::timeout(
            self.fetch_timeout,
            self.connector.get_topic_metadata(topics),
        )
        .await;

        let metadata = match fetched {
            Ok(Ok(metadata)) => metadata,
            Ok(Err(e)) => {
                self.fetch_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Metadata fetch for {:?} failed: {}", topics, e);
                return Err(fetch_error(topics, e.to_string()));
            }
            Err(_) => {
                self.fetch_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Metadata fetch for {:?} timed out after {:?}",
                    topics, self.fetch_timeout
                );
                return Err(fetch_error(
                    topics,
                    format!("timed out after {:?}", self.fetch_timeout),
                ));
            }
        };

        let fetched_at = Instant::now();
        let mut refreshed = Vec::with_capacity(metadata.topics.len());
        {
            let mut entries = self.entries.write();
            for topic in metadata.topics {
                let partitions = topic
                    .partitions
                    .iter()
                    .map(|p| PartitionInfo::from_metadata(&topic.name, p))
                    .collect::<Vec<_>>();
                debug!(
                    "Refreshed metadata for topic '{}': {} partitions",
                    topic.name,
                    partitions.len()
                );
                if topic.has_offline_partitions() {
                    warn!("Topic '{}' has partitions without a leader", topic.name);
                }
                entries.insert(
                    topic.name.clone(),
                    Arc::new(CacheEntry {
                        partitions,
                        fetched_at,
                    }),
                );
                refreshed.push(topic.name);
            }
        }

        Ok(refreshed)
    }
}

fn fetch_error(topics: &[String], reason: String) -> Error {
    Error::MetadataFetch {
        topic: topics.join(","),
        reason,
    }
}
