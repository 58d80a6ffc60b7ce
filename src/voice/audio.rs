//! Bounded hand-off queue between the WebSocket receiver and the
//! transcription feed loop.
//!
//! The transport side must never stall on audio, so [`AudioIngestChannel::push`]
//! is synchronous and applies a drop-oldest policy once `capacity` chunks are
//! queued: stale audio is worth less than fresh audio for live transcription.
//! The consumer side suspends in [`AudioIngestChannel::pull`] until a chunk
//! arrives or the channel is closed.
//!
//! The channel starts closed. A listening episode re-opens it with
//! [`AudioIngestChannel::reset`]; audio that arrives while nobody is listening is
//! rejected rather than replayed into the next episode.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

/// Default queue bound: ~10 s of 100 ms chunks.
pub const DEFAULT_AUDIO_QUEUE_CAPACITY: usize = 100;

/// What happened to a pushed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting the oldest chunk.
    DroppedOldest,
    /// Channel closed; the chunk was discarded.
    Closed,
}

#[derive(Debug)]
struct Inner {
    queue: VecDeque<Vec<u8>>,
    closed: bool,
}

#[derive(Debug)]
pub struct AudioIngestChannel {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl AudioIngestChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity.max(1)),
                closed: true,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a chunk without blocking.
    pub fn push(&self, chunk: Vec<u8>) -> PushOutcome {
        if chunk.is_empty() {
            return PushOutcome::Queued;
        }

        let outcome = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return PushOutcome::Closed;
            }
            let outcome = if inner.queue.len() >= self.capacity {
                inner.queue.pop_front();
                PushOutcome::DroppedOldest
            } else {
                PushOutcome::Queued
            };
            inner.queue.push_back(chunk);
            outcome
        };

        if outcome == PushOutcome::DroppedOldest {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped == 1 || dropped.is_multiple_of(50) {
                tracing::warn!(
                    dropped,
                    capacity = self.capacity,
                    "Audio ingest queue full, dropping oldest chunk"
                );
            }
        }

        self.notify.notify_one();
        outcome
    }

    /// Wait for the next chunk. Returns `None` once closed and drained.
    pub async fn pull(&self) -> Option<Vec<u8>> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock();
                if let Some(chunk) = inner.queue.pop_front() {
                    return Some(chunk);
                }
                if inner.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Close the channel and wake any waiting consumer. Idempotent.
    ///
    /// Chunks already queued are still handed out by `pull`; use
    /// [`drain`](Self::drain) to discard them.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Discard queued audio, returning the number of chunks dropped.
    pub fn drain(&self) -> usize {
        let mut inner = self.inner.lock();
        let n = inner.queue.len();
        inner.queue.clear();
        n
    }

    /// Re-open an empty channel for a new listening episode.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.queue.clear();
        inner.closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Chunks evicted by the overflow policy since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for AudioIngestChannel {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIO_QUEUE_CAPACITY)
    }
}
