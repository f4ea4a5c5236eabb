use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};

use super::Sample;

// ─── Configuration ───────────────────────────────────────────────

/// Default number of samples a queue holds before it starts dropping.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

// ─── Public types ────────────────────────────────────────────────

/// What happened to a pushed sample. Producers are free to ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queue was at capacity; the new sample was discarded.
    Dropped,
    /// Queue has been closed for shutdown.
    Closed,
}

/// Bounded multi-producer / single-consumer sample FIFO.
///
/// `push` never blocks: a full queue rejects the incoming sample. The
/// consumer half is handed out once via [`SampleQueue::take_receiver`].
pub struct SampleQueue {
    sender: RwLock<Option<mpsc::Sender<Sample>>>,
    receiver: Mutex<Option<mpsc::Receiver<Sample>>>,
    capacity: usize,
    accepted: AtomicU64,
    dropped: AtomicU64,
}

/// Consumer half of a [`SampleQueue`], owned by one aggregator task.
pub struct SampleReceiver {
    inner: mpsc::Receiver<Sample>,
}

// ─── SampleQueue impl ────────────────────────────────────────────

impl SampleQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender: RwLock::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            capacity,
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Fire-and-forget insert. Never blocks beyond a shared read lock.
    pub fn push(&self, sample: Sample) -> PushOutcome {
        let guard = self.sender.read();
        let Some(tx) = guard.as_ref() else {
            return PushOutcome::Closed;
        };

        match tx.try_send(sample) {
            Ok(()) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                PushOutcome::Queued
            }
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => PushOutcome::Closed,
        }
    }

    /// Hand out the consumer half. Returns `None` after the first call.
    pub fn take_receiver(&self) -> Option<SampleReceiver> {
        self.receiver
            .lock()
            .take()
            .map(|inner| SampleReceiver { inner })
    }

    /// Stop accepting samples. The consumer still drains what is queued
    /// and then observes the shutdown signal.
    pub fn close(&self) {
        self.sender.write().take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples waiting to be consumed. Reports 0 once closed.
    pub fn len(&self) -> usize {
        self.sender
            .read()
            .as_ref()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total samples accepted since creation.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Total samples rejected because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ─── SampleReceiver impl ─────────────────────────────────────────

impl SampleReceiver {
    /// Wait for the next sample. `None` means the queue was closed and
    /// everything queued before the close has been consumed.
    pub async fn pop(&mut self) -> Option<Sample> {
        self.inner.recv().await
    }

    /// Non-waiting variant, used by tests and final drains.
    pub fn try_pop(&mut self) -> Option<Sample> {
        self.inner.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(i: usize) -> Sample {
        Sample::new("q", "k", i as f64)
    }

    #[test]
    fn overflow_rejects_without_blocking() {
        let queue = SampleQueue::new(4);
        let outcomes: Vec<_> = (0..5).map(|i| queue.push(sample(i))).collect();

        assert_eq!(&outcomes[..4], &[PushOutcome::Queued; 4]);
        assert_eq!(outcomes[4], PushOutcome::Dropped);
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.accepted(), 4);
        assert_eq!(queue.dropped(), 1);

        let mut rx = queue.take_receiver().unwrap();
        let drained: Vec<_> = std::iter::from_fn(|| rx.try_pop()).collect();
        assert_eq!(drained.len(), 4);
        // FIFO: the rejected sample was the newest one.
        assert_eq!(drained.last().unwrap().value, 3.0);
    }

    #[test]
    fn receiver_is_handed_out_once() {
        let queue = SampleQueue::new(1);
        assert!(queue.take_receiver().is_some());
        assert!(queue.take_receiver().is_none());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let queue = SampleQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        assert_eq!(queue.push(sample(0)), PushOutcome::Queued);
        assert_eq!(queue.push(sample(1)), PushOutcome::Dropped);
    }

    #[tokio::test]
    async fn close_drains_then_signals_shutdown() {
        let queue = SampleQueue::new(8);
        let mut rx = queue.take_receiver().unwrap();
        queue.push(sample(1));
        queue.push(sample(2));
        queue.close();

        assert!(queue.is_closed());
        assert_eq!(queue.push(sample(3)), PushOutcome::Closed);
        assert_eq!(rx.pop().await.map(|s| s.value), Some(1.0));
        assert_eq!(rx.pop().await.map(|s| s.value), Some(2.0));
        assert!(rx.pop().await.is_none());
    }
}
