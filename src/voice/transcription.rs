//! Streaming transcription lifecycle.
//!
//! A [`TranscriptionSession`] binds the session's [`AudioIngestChannel`] to one
//! provider stream. It runs two background tasks:
//! 1. **Feed loop**: pulls audio chunks and forwards them to the provider.
//! 2. **Event relay**: forwards provider events to the coordinator, tagged with
//!    the session's generation so events from a closed stream can be discarded.
//!
//! Provider callbacks never touch session state; they only send on the
//! per-stream event channel handed to [`TranscriptionProvider::open`].

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::audio::AudioIngestChannel;
use crate::error::{Result, SessionError};

/// Upper bound on how long `close` waits for background tasks.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Buffer between a provider stream and its event relay.
const STREAM_EVENT_BUFFER: usize = 64;

/// One transcript hypothesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    pub text: String,
    /// Finals close an utterance; partials replace the previous partial.
    pub is_final: bool,
}

impl TranscriptEvent {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// Event produced by a provider stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Transcript(TranscriptEvent),
    /// Non-fatal provider error (logged, stream keeps running).
    Error(String),
    /// The provider ended the stream.
    Closed,
}

/// A [`StreamEvent`] tagged with the generation of the stream that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptionUpdate {
    pub generation: u64,
    pub event: StreamEvent,
}

/// An open provider stream.
#[async_trait]
pub trait TranscriptionStream: Send + Sync {
    /// Forward one audio chunk (PCM16 mono).
    async fn send_audio(&self, chunk: Vec<u8>) -> anyhow::Result<()>;

    /// Release provider resources. Must be idempotent and must not fail.
    async fn close(&self);
}

/// Streaming speech-to-text provider.
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    /// Open a stream for `language_tag`. Events are delivered on `events`.
    async fn open(
        &self,
        language_tag: &str,
        events: mpsc::Sender<StreamEvent>,
    ) -> anyhow::Result<Arc<dyn TranscriptionStream>>;

    fn name(&self) -> &str;
}

struct Running {
    stream: Arc<dyn TranscriptionStream>,
    cancel: CancellationToken,
    feed: JoinHandle<()>,
    relay: JoinHandle<()>,
}

/// Handle to one live transcription stream.
pub struct TranscriptionSession {
    generation: u64,
    running: Option<Running>,
}

impl TranscriptionSession {
    /// Open a provider stream and start the feed loop and event relay.
    pub async fn open(
        provider: &dyn TranscriptionProvider,
        language_tag: &str,
        generation: u64,
        audio: Arc<AudioIngestChannel>,
        updates: mpsc::Sender<TranscriptionUpdate>,
    ) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::channel::<StreamEvent>(STREAM_EVENT_BUFFER);

        let stream = provider
            .open(language_tag, event_tx)
            .await
            .map_err(SessionError::provider_connect)?;

        tracing::debug!(
            provider = provider.name(),
            language = language_tag,
            generation,
            "Transcription stream opened"
        );

        let cancel = CancellationToken::new();

        let feed = {
            let stream = Arc::clone(&stream);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                Self::feed_loop(audio, stream, cancel, generation).await;
            })
        };

        let relay = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                Self::relay_loop(event_rx, updates, cancel, generation).await;
            })
        };

        Ok(Self {
            generation,
            running: Some(Running {
                stream,
                cancel,
                feed,
                relay,
            }),
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_open(&self) -> bool {
        self.running.is_some()
    }

    /// Stop the feed loop and event relay, then close the provider stream.
    ///
    /// Idempotent; never fails. Once this returns no further events from this
    /// stream reach the coordinator.
    pub async fn close(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.cancel.cancel();
        Self::join_or_abort(running.feed, "feed").await;
        if tokio::time::timeout(CLOSE_GRACE, running.stream.close())
            .await
            .is_err()
        {
            tracing::warn!(
                generation = self.generation,
                "Transcription provider did not close in time, abandoning stream"
            );
        }
        Self::join_or_abort(running.relay, "relay").await;

        tracing::debug!(generation = self.generation, "Transcription stream closed");
    }

    async fn join_or_abort(handle: JoinHandle<()>, task: &'static str) {
        let abort = handle.abort_handle();
        if tokio::time::timeout(CLOSE_GRACE, handle).await.is_err() {
            tracing::warn!(task, "Transcription task did not stop in time, aborting");
            abort.abort();
        }
    }

    // ── Internal: feed loop ──────────────────────────────────────

    async fn feed_loop(
        audio: Arc<AudioIngestChannel>,
        stream: Arc<dyn TranscriptionStream>,
        cancel: CancellationToken,
        generation: u64,
    ) {
        let mut chunks: u64 = 0;

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => break,
                chunk = audio.pull() => chunk,
            };
            let Some(chunk) = chunk else {
                break;
            };

            chunks += 1;
            if chunks == 1 || chunks.is_multiple_of(100) {
                tracing::debug!(generation, chunks, bytes = chunk.len(), "Feeding audio");
            }

            let sent = tokio::select! {
                _ = cancel.cancelled() => break,
                sent = stream.send_audio(chunk) => sent,
            };
            if let Err(e) = sent {
                tracing::warn!(generation, error = %e, "Failed to forward audio to transcription");
                break;
            }
        }

        tracing::debug!(generation, chunks, "Feed loop stopped");
    }

    // ── Internal: event relay ────────────────────────────────────

    async fn relay_loop(
        mut events: mpsc::Receiver<StreamEvent>,
        updates: mpsc::Sender<TranscriptionUpdate>,
        cancel: CancellationToken,
        generation: u64,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                break;
            };
            let ended = event == StreamEvent::Closed;

            let update = TranscriptionUpdate { generation, event };
            let delivered = tokio::select! {
                _ = cancel.cancelled() => false,
                sent = updates.send(update) => sent.is_ok(),
            };
            if !delivered || ended {
                break;
            }
        }

        tracing::debug!(generation, "Transcript relay stopped");
    }
}

impl Drop for TranscriptionSession {
    fn drop(&mut self) {
        // Best effort when dropped without `close` (e.g. runtime shutdown).
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            running.feed.abort();
            running.relay.abort();
        }
    }
}
