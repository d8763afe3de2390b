//! One-shot completion cell for per-record results
//!
//! Every accepted record owns exactly one [`CompletionSender`] and the caller
//! holds the matching [`RecordFuture`].
//!
//! - **At most once**: [`CompletionSender::resolve`] consumes the sender.
//! - **At least once**: dropping an unresolved sender resolves it with
//!   [`Error::Delivery`], so an aborted accumulator or a lost batch still
//!   produces a terminal result.
//!
//! Senders attached to the accumulator are additionally counted as in flight
//! so [`Producer::flush`](crate::Producer::flush) can wait for them.

use crate::{Error, RecordMetadata, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{oneshot, Notify};

const DROPPED: &str = "record dropped before completion";

/// Create a linked sender / future pair
pub fn channel() -> (CompletionSender, RecordFuture) {
    let (tx, rx) = oneshot::channel();
    (
        CompletionSender {
            tx: Some(tx),
            in_flight: None,
        },
        RecordFuture { rx },
    )
}

/// Write side of a record's completion cell
pub struct CompletionSender {
    tx: Option<oneshot::Sender<Result<RecordMetadata>>>,
    /// In-flight registry and the generation this record was counted under
    in_flight: Option<(Arc<InFlight>, u64)>,
}

impl CompletionSender {
    /// Count this record as in flight until it resolves
    pub(crate) fn track(mut self, in_flight: &Arc<InFlight>) -> Self {
        let generation = in_flight.acquire();
        self.in_flight = Some((Arc::clone(in_flight), generation));
        self
    }

    /// Flush generation of a tracked record
    pub(crate) fn generation(&self) -> Option<u64> {
        self.in_flight.as_ref().map(|(_, generation)| *generation)
    }

    /// Deliver the terminal result
    pub fn resolve(mut self, result: Result<RecordMetadata>) {
        self.finish(result);
    }

    fn finish(&mut self, result: Result<RecordMetadata>) {
        if let Some(tx) = self.tx.take() {
            // The caller may have stopped listening; the result is still final.
            let _ = tx.send(result);
        }
        if let Some((in_flight, generation)) = self.in_flight.take() {
            in_flight.release(generation);
        }
    }
}

impl Drop for CompletionSender {
    fn drop(&mut self) {
        if self.tx.is_some() {
            if let Some((in_flight, _)) = &self.in_flight {
                in_flight.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.finish(Err(Error::Delivery(DROPPED.to_string())));
    }
}

impl fmt::Debug for CompletionSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSender")
            .field("resolved", &self.tx.is_none())
            .field("generation", &self.generation())
            .finish()
    }
}

/// Read side of a record's completion cell.
///
/// Resolves exactly once with the record's metadata or the error that ended
/// it. Can be awaited, polled with [`try_result`](Self::try_result), or read
/// from synchronous code with [`blocking_wait`](Self::blocking_wait).
#[derive(Debug)]
pub struct RecordFuture {
    rx: oneshot::Receiver<Result<RecordMetadata>>,
}

impl RecordFuture {
    /// A future that is already resolved
    pub(crate) fn ready(result: Result<RecordMetadata>) -> Self {
        let (tx, future) = channel();
        tx.resolve(result);
        future
    }

    /// Take the result if it is available, otherwise hand the future back
    pub fn try_result(mut self) -> std::result::Result<Result<RecordMetadata>, Self> {
        match self.rx.try_recv() {
            Ok(result) => Ok(result),
            Err(oneshot::error::TryRecvError::Empty) => Err(self),
            Err(oneshot::error::TryRecvError::Closed) => Ok(Err(Error::Delivery(DROPPED.into()))),
        }
    }

    /// Block the current thread until the result arrives.
    ///
    /// Must not be called from within an async runtime worker.
    pub fn blocking_wait(self) -> Result<RecordMetadata> {
        self.rx
            .blocking_recv()
            .unwrap_or_else(|_| Err(Error::Delivery(DROPPED.into())))
    }
}

impl Future for RecordFuture {
    type Output = Result<RecordMetadata>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(Error::Delivery(DROPPED.into()))))
    }
}

/// Records handed to the accumulator and not yet resolved, grouped by
/// flush generation.
///
/// Every record is counted under the generation current when it was
/// tracked. [`begin_flush`](Self::begin_flush) closes the current generation
/// so a flush waits only for records tracked before it started, however
/// many arrive while it waits.
#[derive(Debug)]
pub(crate) struct InFlight {
    state: Mutex<Generations>,
    /// Newest generation a flush has closed; 0 when none has
    flush_through: AtomicU64,
    /// Tracked records resolved by drop rather than by the accumulator
    dropped: AtomicU64,
    released: Notify,
}

#[derive(Debug)]
struct Generations {
    current: u64,
    pending: BTreeMap<u64, u64>,
}

impl Default for InFlight {
    fn default() -> Self {
        Self {
            state: Mutex::new(Generations {
                current: 1,
                pending: BTreeMap::new(),
            }),
            flush_through: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            released: Notify::new(),
        }
    }
}

impl InFlight {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// All unresolved records
    pub(crate) fn count(&self) -> u64 {
        self.state.lock().pending.values().sum()
    }

    /// Unresolved records of generation `generation` or older
    pub(crate) fn count_through(&self, generation: u64) -> u64 {
        self.state.lock().pending.range(..=generation).map(|(_, n)| n).sum()
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Newest generation a flush is waiting on
    pub(crate) fn flush_through(&self) -> u64 {
        self.flush_through.load(Ordering::Acquire)
    }

    /// Close the current generation and return it; records tracked from now
    /// on belong to the next one
    pub(crate) fn begin_flush(&self) -> u64 {
        let mut state = self.state.lock();
        let closed = state.current;
        state.current += 1;
        self.flush_through.fetch_max(closed, Ordering::AcqRel);
        closed
    }

    fn acquire(&self) -> u64 {
        let mut state = self.state.lock();
        let generation = state.current;
        *state.pending.entry(generation).or_insert(0) += 1;
        generation
    }

    fn release(&self, generation: u64) {
        {
            let mut state = self.state.lock();
            if let Some(n) = state.pending.get_mut(&generation) {
                *n -= 1;
                if *n == 0 {
                    state.pending.remove(&generation);
                }
            }
        }
        self.released.notify_waiters();
    }

    /// Wait until every record of `generation` or older has resolved
    pub(crate) async fn wait_through(&self, generation: u64) {
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not missed
            notified.as_mut().enable();
            if self.count_through(generation) == 0 {
                return;
            }
            notified.await;
        }
    }
}
