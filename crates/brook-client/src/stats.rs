//! Producer counters

use crate::completion::InFlight;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct ProducerStats {
    pub(crate) records_sent: AtomicU64,
    pub(crate) records_delivered: AtomicU64,
    pub(crate) local_errors: AtomicU64,
    pub(crate) delivery_errors: AtomicU64,
    pub(crate) batches_sent: AtomicU64,
    pub(crate) retries: AtomicU64,
}

impl ProducerStats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Records resolved by dropping their completion cell (an aborted
    /// accumulator) count as delivery errors
    pub(crate) fn snapshot(
        &self,
        in_flight: &InFlight,
        metadata_fetches: u64,
        metadata_errors: u64,
    ) -> ProducerStatsSnapshot {
        ProducerStatsSnapshot {
            records_sent: self.records_sent.load(Ordering::Relaxed),
            records_delivered: self.records_delivered.load(Ordering::Relaxed),
            local_errors: self.local_errors.load(Ordering::Relaxed),
            delivery_errors: self.delivery_errors.load(Ordering::Relaxed) + in_flight.dropped(),
            pending: in_flight.count(),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            metadata_fetches,
            metadata_errors,
        }
    }
}

/// Producer statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducerStatsSnapshot {
    /// Records handed to the accumulator
    pub records_sent: u64,
    /// Records acknowledged by the cluster
    pub records_delivered: u64,
    /// Records that failed before reaching the accumulator
    pub local_errors: u64,
    /// Records the accumulator failed to deliver
    pub delivery_errors: u64,
    /// Produce requests issued, retries included
    pub batches_sent: u64,
    /// Produce requests that were retries
    pub retries: u64,
    /// Records handed over and not yet resolved
    pub pending: u64,
    pub metadata_fetches: u64,
    pub metadata_errors: u64,
}

impl ProducerStatsSnapshot {
    /// Delivered share of the records handed to the accumulator
    pub fn success_rate(&self) -> f64 {
        if self.records_sent == 0 {
            1.0
        } else {
            self.records_delivered as f64 / self.records_sent as f64
        }
    }

    /// Flatten into the name -> metric map returned by
    /// [`Producer::metrics`](crate::Producer::metrics)
    pub fn to_metrics(&self) -> HashMap<String, Metric> {
        [
            ("record-send-total", "Records handed to the accumulator", self.records_sent),
            (
                "record-delivered-total",
                "Records acknowledged by the cluster",
                self.records_delivered,
            ),
            ("record-local-error-total", "Records failed before hand-off", self.local_errors),
            ("record-error-total", "Records failed after hand-off", self.delivery_errors),
            ("batch-send-total", "Produce requests issued", self.batches_sent),
            ("record-retry-total", "Produce requests retried", self.retries),
            ("metadata-fetch-total", "Metadata requests issued", self.metadata_fetches),
            ("metadata-error-total", "Metadata requests failed", self.metadata_errors),
            ("record-pending", "Records awaiting a result", self.pending),
        ]
        .into_iter()
        .map(|(name, description, value)| {
            (
                name.to_string(),
                Metric {
                    description,
                    value: value as f64,
                },
            )
        })
        .chain(std::iter::once((
            "record-success-rate".to_string(),
            Metric {
                description: "Delivered share of handed-off records",
                value: self.success_rate(),
            },
        )))
        .collect()
    }
}

/// A single named producer metric
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub description: &'static str,
    pub value: f64,
}
