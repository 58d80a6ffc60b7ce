//! Outbound event path for one session.
//!
//! The coordinator is the only producer. A single writer task drains the
//! receiving end onto the transport, so client-visible order is exactly the
//! order of `emit` calls.

use tokio::sync::mpsc;

use super::events::ServerMessage;

/// Default number of events buffered between the coordinator and the writer.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

pub struct EventEmitter {
    session_id: String,
    tx: mpsc::Sender<ServerMessage>,
    closed: bool,
    sent: u64,
}

impl EventEmitter {
    pub fn new(session_id: impl Into<String>, tx: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            session_id: session_id.into(),
            tx,
            closed: false,
            sent: 0,
        }
    }

    /// Create an emitter plus the receiver the transport writer drains.
    pub fn channel(
        session_id: impl Into<String>,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(session_id, tx), rx)
    }

    /// Queue one event. Returns `false` once the writer has gone away;
    /// later calls are no-ops.
    pub async fn emit(&mut self, message: ServerMessage) -> bool {
        if self.closed {
            return false;
        }

        let kind = message.kind();
        if self.tx.send(message).await.is_err() {
            self.closed = true;
            tracing::debug!(
                session_id = %self.session_id,
                kind,
                "Outbound channel closed, dropping event"
            );
            return false;
        }

        self.sent += 1;
        tracing::trace!(session_id = %self.session_id, kind, "Event queued");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed || self.tx.is_closed()
    }

    /// Number of events queued so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn preserves_emission_order() {
        let (mut emitter, mut rx) = EventEmitter::channel("s1", 8);
        emitter.emit(ServerMessage::AudioStarting).await;
        emitter
            .emit(ServerMessage::AudioData { data: "AAA=".into() })
            .await;
        emitter.emit(ServerMessage::AudioCompleted).await;

        assert_eq!(rx.recv().await, Some(ServerMessage::AudioStarting));
        assert!(matches!(rx.recv().await, Some(ServerMessage::AudioData { .. })));
        assert_eq!(rx.recv().await, Some(ServerMessage::AudioCompleted));
        assert_eq!(emitter.sent(), 3);
    }

    #[tokio::test]
    async fn closed_writer_turns_emit_into_noop() {
        let (mut emitter, rx) = EventEmitter::channel("s1", 8);
        drop(rx);
        assert!(emitter.is_closed());
        assert!(!emitter.emit(ServerMessage::Pong).await);
        assert!(!emitter.emit(ServerMessage::Pong).await);
        assert_eq!(emitter.sent(), 0);
    }
}
