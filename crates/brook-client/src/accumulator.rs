//! Default record accumulator
//!
//! Single consumer of the producer's ingress channel. Records are grouped per
//! topic-partition and a batch is sent through the [`Connector`] when
//!
//! - its payload reaches `batch_size` bytes,
//! - it is older than `linger` (immediately when `linger` is zero),
//! - it holds a record tracked before the latest flush started, or
//! - the ingress channel closed and the accumulator is draining.
//!
//! Batches are sent one at a time. A failed produce request is retried with
//! exponential backoff; once retries are exhausted every record of the batch
//! is resolved with [`Error::Delivery`].

use crate::completion::{CompletionSender, InFlight};
use crate::connector::{ProduceEntry, ProduceRequest};
use crate::stats::ProducerStats;
use crate::{Connector, Error, PreparedRecord, ProducerConfig, RecordMetadata, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Records for one topic-partition waiting to be sent
struct RecordBatch {
    topic: String,
    partition: u32,
    entries: Vec<ProduceEntry>,
    completions: Vec<CompletionSender>,
    size_bytes: usize,
    created_at: Instant,
    /// Oldest flush generation among the tracked records
    oldest_generation: Option<u64>,
}

impl RecordBatch {
    fn new(topic: String, partition: u32) -> Self {
        Self {
            topic,
            partition,
            entries: Vec::new(),
            completions: Vec::new(),
            size_bytes: 0,
            created_at: Instant::now(),
            oldest_generation: None,
        }
    }

    fn add(&mut self, record: PreparedRecord) {
        let (record, _, completion) = record.into_parts();
        if let Some(generation) = completion.generation() {
            self.oldest_generation = Some(
                self.oldest_generation
                    .map_or(generation, |oldest| oldest.min(generation)),
            );
        }
        self.size_bytes += record.size();
        self.entries.push(ProduceEntry {
            key: record.key().cloned(),
            value: record.value().clone(),
            timestamp: record.timestamp(),
        });
        self.completions.push(completion);
    }

    /// Full, lingered long enough, or holding records a flush waits for
    fn is_ready(&self, config: &ProducerConfig, flush_through: u64) -> bool {
        self.size_bytes >= config.batch_size()
            || self.created_at.elapsed() >= config.linger()
            || self
                .oldest_generation
                .is_some_and(|generation| generation <= flush_through)
    }

    fn deadline(&self, linger: Duration) -> Instant {
        self.created_at + linger
    }
}

/// Handle to the background batching task
pub struct RecordAccumulator {
    flush_requested: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RecordAccumulator {
    /// Spawn the batching task on the current tokio runtime and return the
    /// handle together with the ingress sender.
    pub(crate) fn spawn(
        config: Arc<ProducerConfig>,
        connector: Arc<dyn Connector>,
        stats: Arc<ProducerStats>,
        in_flight: Arc<InFlight>,
    ) -> (Self, mpsc::Sender<PreparedRecord>) {
        let (ingress_tx, ingress_rx) = mpsc::channel(config.ingress_capacity());
        let flush_requested = Arc::new(Notify::new());

        let worker = Worker {
            config,
            connector,
            stats,
            in_flight,
            flush_requested: Arc::clone(&flush_requested),
            batches: HashMap::new(),
        };
        let task = tokio::spawn(worker.run(ingress_rx));

        (
            Self {
                flush_requested,
                task: Mutex::new(Some(task)),
            },
            ingress_tx,
        )
    }

    /// Ask the task to send every batch now, regardless of linger
    pub(crate) fn request_flush(&self) {
        self.flush_requested.notify_one();
    }

    /// Wait for the task to drain after the ingress channel was closed.
    ///
    /// If `timeout` elapses the task is aborted; its unsent records resolve
    /// with a delivery error as their completion cells are dropped.
    pub(crate) async fn close(&self, timeout: Duration) -> Result<()> {
        let Some(mut task) = self.task.lock().take() else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(_) => Ok(()),
            Err(_) => {
                warn!(
                    "Accumulator did not drain within {:?}, failing pending records",
                    timeout
                );
                task.abort();
                // Wait until the aborted task is dropped so every pending
                // completion cell has been resolved before returning.
                let _ = task.await;
                Err(Error::Timeout(format!(
                    "close did not complete within {timeout:?}"
                )))
            }
        }
    }
}

struct Worker {
    config: Arc<ProducerConfig>,
    connector: Arc<dyn Connector>,
    stats: Arc<ProducerStats>,
    in_flight: Arc<InFlight>,
    flush_requested: Arc<Notify>,
    batches: HashMap<(String, u32), RecordBatch>,
}

impl Worker {
    async fn run(mut self, mut ingress: mpsc::Receiver<PreparedRecord>) {
        debug!("Accumulator started");

        loop {
            let next_deadline = self
                .batches
                .values()
                .map(|b| b.deadline(self.config.linger()))
                .min();
            let linger_armed = next_deadline.is_some();
            let linger_deadline = next_deadline.unwrap_or_else(Instant::now);

            tokio::select! {
                biased;
                _ = self.flush_requested.notified() => {
                    // Records queued before the flush request belong to it
                    while let Ok(record) = ingress.try_recv() {
                        self.append(record);
                    }
                    self.send_all().await;
                    continue;
                }
                received = ingress.recv() => match received {
                    Some(record) => self.append(record),
                    None => break,
                },
                _ = tokio::time::sleep_until(linger_deadline), if linger_armed => {}
            }

            self.send_ready().await;
        }

        // Ingress closed: everything still buffered goes out now
        self.send_all().await;
        info!("Accumulator drained and stopped");
    }

    fn append(&mut self, record: PreparedRecord) {
        let key = (record.topic().to_string(), record.partition());
        self.batches
            .entry(key)
            .or_insert_with(|| RecordBatch::new(record.topic().to_string(), record.partition()))
            .add(record);
    }

    async fn send_ready(&mut self) {
        let flush_through = self.in_flight.flush_through();
        let ready: Vec<(String, u32)> = self
            .batches
            .iter()
            .filter(|(_, batch)| batch.is_ready(&self.config, flush_through))
            .map(|(key, _)| key.clone())
            .collect();

        for key in ready {
            if let Some(batch) = self.batches.remove(&key) {
                self.send_batch(batch).await;
            }
        }
    }

    async fn send_all(&mut self) {
        let batches: Vec<RecordBatch> = self.batches.drain().map(|(_, b)| b).collect();
        for batch in batches {
            self.send_batch(batch).await;
        }
    }

    async fn send_batch(&self, batch: RecordBatch) {
        let RecordBatch {
            topic,
            partition,
            entries,
            completions,
            ..
        } = batch;
        let timestamps: Vec<i64> = entries.iter().map(|e| e.timestamp).collect();
        let request = ProduceRequest {
            client_id: self.config.client_id().to_string(),
            topic,
            partition,
            acks: self.config.acks(),
            compression: self.config.compression_type(),
            timeout: self.config.request_timeout(),
            records: entries,
        };
        let count = completions.len();

        match self.produce_with_retry(&request).await {
            Ok(base_offset) => {
                ProducerStats::add(&self.stats.records_delivered, count as u64);
                for (i, (completion, timestamp)) in
                    completions.into_iter().zip(timestamps).enumerate()
                {
                    completion.resolve(Ok(RecordMetadata {
                        topic: request.topic.clone(),
                        partition: request.partition,
                        offset: base_offset + i as u64,
                        timestamp,
                    }));
                }
                debug!(
                    "Sent batch of {} records ({} bytes) to {}/{}",
                    count,
                    request.payload_size(),
                    request.topic,
                    request.partition
                );
            }
            Err(e) => {
                ProducerStats::add(&self.stats.delivery_errors, count as u64);
                warn!(
                    "Failed to send batch of {} records to {}/{}: {}",
                    count, request.topic, request.partition, e
                );
                let error = Error::Delivery(e.to_string());
                for completion in completions {
                    completion.resolve(Err(error.clone()));
                }
            }
        }
    }

    /// Returns the base offset of the batch
    async fn produce_with_retry(&self, request: &ProduceRequest) -> Result<u64> {
        let mut attempt = 0u32;
        let mut backoff = self.config.retry_backoff();

        loop {
            ProducerStats::incr(&self.stats.batches_sent);
            let outcome = tokio::time::timeout(
                self.config.request_timeout(),
                self.connector.produce(request.clone()),
            )
            .await
            .unwrap_or_else(|_| {
                Err(Error::Timeout(format!(
                    "produce to {}/{} timed out",
                    request.topic, request.partition
                )))
            });

            match outcome {
                Ok(response) => return Ok(response.base_offset),
                Err(e) if attempt < self.config.retries() => {
                    attempt += 1;
                    ProducerStats::incr(&self.stats.retries);
                    debug!(
                        "Produce to {}/{} failed (attempt {}): {}, retrying in {:?}",
                        request.topic, request.partition, attempt, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.config.retry_backoff_max());
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion;
    use crate::connector::ProduceResponse;
    use crate::record::SerializedRecord;
    use async_trait::async_trait;
    use brook_core::ClusterMetadata;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    /// Assigns offsets per partition; fails the first `failures` produce calls
    #[derive(Default)]
    struct RecordingConnector {
        requests: parking_lot::Mutex<Vec<ProduceRequest>>,
        next_offset: AtomicU64,
        failures: AtomicUsize,
        stall: bool,
    }

    #[async_trait]
    impl Connector for RecordingConnector {
        async fn get_topic_metadata(&self, _topics: &[String]) -> Result<ClusterMetadata> {
            Ok(ClusterMetadata::default())
        }

        async fn produce(&self, request: ProduceRequest) -> Result<ProduceResponse> {
            if self.stall {
                std::future::pending::<()>().await;
            }
            let count = request.records.len() as u64;
            self.requests.lock().push(request);
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::Connector("leader not available".into()));
            }
            Ok(ProduceResponse {
                base_offset: self.next_offset.fetch_add(count, Ordering::SeqCst),
            })
        }
    }

    fn config(batch_size: usize, linger: Duration) -> Arc<ProducerConfig> {
        Arc::new(
            ProducerConfig::builder()
                .batch_size(batch_size)
                .linger(linger)
                .delivery_timeout(linger + Duration::from_secs(60))
                .retries(2)
                .retry_backoff(Duration::from_millis(10))
                .retry_backoff_max(Duration::from_millis(20))
                .build()
                .unwrap(),
        )
    }

    fn start(
        config: Arc<ProducerConfig>,
        connector: Arc<RecordingConnector>,
        stats: Arc<ProducerStats>,
    ) -> (RecordAccumulator, mpsc::Sender<PreparedRecord>) {
        RecordAccumulator::spawn(config, connector, stats, Arc::new(InFlight::new()))
    }

    fn prepared(
        topic: &str,
        partition: u32,
        value: &'static [u8],
    ) -> (PreparedRecord, completion::RecordFuture) {
        let (tx, rx) = completion::channel();
        let record = SerializedRecord::new(topic, None, Bytes::from_static(value), 1_000);
        (PreparedRecord::new(record, partition, tx), rx)
    }

    #[tokio::test]
    async fn test_zero_linger_sends_each_record() {
        let connector = Arc::new(RecordingConnector::default());
        let (acc, ingress) = start(
            config(16384, Duration::ZERO),
            connector.clone(),
            Arc::new(ProducerStats::new()),
        );

        let (a, ra) = prepared("t", 0, b"a");
        let (b, rb) = prepared("t", 1, b"b");
        ingress.send(a).await.unwrap();
        ingress.send(b).await.unwrap();

        let ma = ra.await.unwrap();
        let mb = rb.await.unwrap();
        assert_eq!((ma.topic.as_str(), ma.partition, ma.timestamp), ("t", 0, 1_000));
        assert_eq!(mb.partition, 1);
        assert_ne!(ma.offset, mb.offset);

        drop(ingress);
        acc.close(Duration::from_secs(1)).await.unwrap();
        assert_eq!(connector.requests.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_linger_groups_records_per_partition() {
        let connector = Arc::new(RecordingConnector::default());
        let (acc, ingress) = start(
            config(16384, Duration::from_millis(50)),
            connector.clone(),
            Arc::new(ProducerStats::new()),
        );

        let mut futures = Vec::new();
        for value in [&b"1"[..], b"2", b"3"] {
            let (record, rx) = prepared("orders", 2, value);
            ingress.send(record).await.unwrap();
            futures.push(rx);
        }

        let mut offsets = Vec::new();
        for rx in futures {
            offsets.push(rx.await.unwrap().offset);
        }
        assert_eq!(offsets, vec![0, 1, 2]);

        let requests = connector.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].records.len(), 3);
        assert_eq!(requests[0].partition, 2);
        drop(requests);

        drop(ingress);
        acc.close(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_batch_is_sent_before_linger() {
        let connector = Arc::new(RecordingConnector::default());
        let (acc, ingress) = start(
            config(4, Duration::from_secs(3600)),
            connector.clone(),
            Arc::new(ProducerStats::new()),
        );

        let (a, ra) = prepared("t", 0, b"ab");
        let (b, rb) = prepared("t", 0, b"cd");
        ingress.send(a).await.unwrap();
        ingress.send(b).await.unwrap();

        let start = Instant::now();
        ra.await.unwrap();
        rb.await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(3600));

        drop(ingress);
        acc.close(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_request_skips_linger() {
        let connector = Arc::new(RecordingConnector::default());
        let (acc, ingress) = start(
            config(16384, Duration::from_secs(3600)),
            connector.clone(),
            Arc::new(ProducerStats::new()),
        );

        let (a, mut ra) = prepared("t", 0, b"a");
        ingress.send(a).await.unwrap();
        tokio::task::yield_now().await;
        ra = ra.try_result().unwrap_err();

        acc.request_flush();
        assert_eq!(ra.await.unwrap().offset, 0);

        drop(ingress);
        acc.close(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_tracked_before_flush_skip_linger() {
        let connector = Arc::new(RecordingConnector::default());
        let in_flight = Arc::new(InFlight::new());
        let (acc, ingress) = RecordAccumulator::spawn(
            config(16384, Duration::from_secs(3600)),
            connector.clone(),
            Arc::new(ProducerStats::new()),
            in_flight.clone(),
        );

        let (tx, before) = completion::channel();
        let tx = tx.track(&in_flight);
        let record = SerializedRecord::new("t", None, Bytes::from_static(b"a"), 1_000);
        let early = PreparedRecord::new(record, 0, tx);
        in_flight.begin_flush();

        // Arrives after the flush generation was closed, still sent at once
        ingress.send(early).await.unwrap();
        let start = Instant::now();
        assert_eq!(before.await.unwrap().offset, 0);
        assert!(start.elapsed() < Duration::from_secs(3600));

        // Records tracked after the flush started wait for linger
        let (tx, after) = completion::channel();
        let tx = tx.track(&in_flight);
        let record = SerializedRecord::new("t", None, Bytes::from_static(b"b"), 1_000);
        ingress.send(PreparedRecord::new(record, 1, tx)).await.unwrap();
        tokio::task::yield_now().await;
        let after = after.try_result().unwrap_err();
        assert_eq!(connector.requests.lock().len(), 1);

        drop(ingress);
        acc.close(Duration::from_secs(1)).await.unwrap();
        assert!(after.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let connector = Arc::new(RecordingConnector::default());
        connector.failures.store(2, Ordering::SeqCst);
        let stats = Arc::new(ProducerStats::new());
        let (acc, ingress) = start(config(1, Duration::ZERO), connector.clone(), stats.clone());

        let (a, ra) = prepared("t", 0, b"a");
        ingress.send(a).await.unwrap();
        assert!(ra.await.is_ok());
        assert_eq!(connector.requests.lock().len(), 3);

        let snapshot = stats.snapshot(&InFlight::new(), 0, 0);
        assert_eq!(snapshot.retries, 2);
        assert_eq!(snapshot.batches_sent, 3);
        assert_eq!(snapshot.records_delivered, 1);

        drop(ingress);
        acc.close(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_fail_whole_batch() {
        let connector = Arc::new(RecordingConnector::default());
        connector.failures.store(10, Ordering::SeqCst);
        let stats = Arc::new(ProducerStats::new());
        let (acc, ingress) = start(
            config(16384, Duration::from_millis(5)),
            connector.clone(),
            stats.clone(),
        );

        let (a, ra) = prepared("t", 0, b"a");
        let (b, rb) = prepared("t", 0, b"b");
        ingress.send(a).await.unwrap();
        ingress.send(b).await.unwrap();

        for rx in [ra, rb] {
            match rx.await {
                Err(Error::Delivery(msg)) => assert!(msg.contains("leader not available")),
                other => panic!("expected delivery error, got {other:?}"),
            }
        }
        // one attempt plus two retries
        assert_eq!(connector.requests.lock().len(), 3);
        assert_eq!(stats.snapshot(&InFlight::new(), 0, 0).delivery_errors, 2);

        drop(ingress);
        acc.close(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_drains_buffered_records() {
        let connector = Arc::new(RecordingConnector::default());
        let (acc, ingress) = start(
            config(16384, Duration::from_secs(3600)),
            connector.clone(),
            Arc::new(ProducerStats::new()),
        );

        let (a, ra) = prepared("t", 0, b"a");
        ingress.send(a).await.unwrap();
        drop(ingress);

        acc.close(Duration::from_secs(1)).await.unwrap();
        assert!(ra.await.is_ok());
        // second close is a no-op
        acc.close(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_timeout_fails_pending_records() {
        let connector = Arc::new(RecordingConnector {
            stall: true,
            ..Default::default()
        });
        let config = Arc::new(
            ProducerConfig::builder()
                .linger(Duration::ZERO)
                .request_timeout(Duration::from_secs(3600))
                .delivery_timeout(Duration::from_secs(7200))
                .build()
                .unwrap(),
        );
        let (acc, ingress) = start(config, connector, Arc::new(ProducerStats::new()));

        let (a, ra) = prepared("t", 0, b"a");
        let (b, rb) = prepared("t", 0, b"b");
        ingress.send(a).await.unwrap();
        ingress.send(b).await.unwrap();
        drop(ingress);

        let err = acc.close(Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(matches!(ra.await, Err(Error::Delivery(_))));
        assert!(matches!(rb.await, Err(Error::Delivery(_))));
    }
}
