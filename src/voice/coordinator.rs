//! Per-connection session coordinator.
//!
//! One task per connection owns the [`SessionState`], the active
//! [`TranscriptionSession`] and the [`EventEmitter`]. It multiplexes two
//! inputs:
//! - commands from the transport reader ([`SessionInput`])
//! - transcript updates relayed from the provider stream
//!
//! Everything that mutates state or emits events happens here, one input at a
//! time, so translation and synthesis calls for a session never overlap and
//! events leave in the order they were produced.

use base64::Engine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::audio::AudioIngestChannel;
use super::emitter::EventEmitter;
use super::events::{ClientCommand, Handshake, ParsedCommand, ServerMessage};
use super::languages::LanguageRegistry;
use super::state::{LifecyclePhase, SessionState};
use super::synthesis::SpeechSynthesizer;
use super::transcription::{
    StreamEvent, TranscriptionProvider, TranscriptionSession, TranscriptionUpdate,
};
use super::translation::Translator;
use crate::error::{Result, SessionError};

/// Buffer for transcript updates awaiting the coordinator.
const UPDATE_BUFFER: usize = 64;

/// Default upper bound, in seconds, on a single translation or synthesis round
/// trip, on top of the provider client's own timeout.
pub const DEFAULT_PROVIDER_DEADLINE_SECS: u64 = 60;

/// The three external providers plus the synthesis voice. Shared by all sessions.
#[derive(Clone)]
pub struct Providers {
    pub transcription: Arc<dyn TranscriptionProvider>,
    pub translator: Arc<dyn Translator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub voice_id: String,
}

/// Input from the transport reader.
#[derive(Debug)]
pub enum SessionInput {
    Command(ParsedCommand),
    /// A transport-level problem. Fatal errors end the session; the rest
    /// (malformed frames) are logged and ignored.
    Error(SessionError),
}

pub struct SessionCoordinator {
    session_id: String,
    registry: LanguageRegistry,
    providers: Providers,
    state: SessionState,
    audio: Arc<AudioIngestChannel>,
    transcription: Option<TranscriptionSession>,
    generation: u64,
    emitter: EventEmitter,
    updates_tx: mpsc::Sender<TranscriptionUpdate>,
    updates_rx: mpsc::Receiver<TranscriptionUpdate>,
    provider_deadline: Duration,
    torn_down: bool,
}

impl SessionCoordinator {
    /// Create a coordinator with the default language pair.
    pub fn new(
        session_id: impl Into<String>,
        registry: LanguageRegistry,
        providers: Providers,
        audio: Arc<AudioIngestChannel>,
        emitter: EventEmitter,
    ) -> Self {
        let (source, target) = registry.defaults();
        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_BUFFER);
        Self {
            session_id: session_id.into(),
            registry,
            providers,
            state: SessionState::new(source, target),
            audio,
            transcription: None,
            generation: 0,
            emitter,
            updates_tx,
            updates_rx,
            provider_deadline: Duration::from_secs(DEFAULT_PROVIDER_DEADLINE_SECS),
            torn_down: false,
        }
    }

    /// Override the deadline applied to each translation and synthesis call.
    pub fn with_provider_deadline(mut self, deadline: Duration) -> Self {
        self.provider_deadline = deadline;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Whether a transcription stream is currently open.
    pub fn is_transcribing(&self) -> bool {
        self.transcription.as_ref().is_some_and(TranscriptionSession::is_open)
    }

    /// Apply the connection handshake and acknowledge it with `config_received`.
    ///
    /// Unregistered codes fall back to the defaults and are reported as errors.
    pub async fn accept_handshake(&mut self, handshake: &Handshake) {
        let (state, rejected) = SessionState::from_handshake(
            &self.registry,
            handshake.source_language.as_deref(),
            handshake.target_language.as_deref(),
        );
        self.state = state;

        for code in rejected {
            tracing::warn!(session_id = %self.session_id, code = %code, "Handshake language not registered, using default");
            self.emitter
                .emit(ServerMessage::error(SessionError::unknown_language(code)))
                .await;
        }

        tracing::info!(
            session_id = %self.session_id,
            source = self.state.source().code,
            target = self.state.target().code,
            "Session configured"
        );
        self.emitter
            .emit(ServerMessage::ConfigReceived {
                source_language: self.state.source().code.to_string(),
                target_language: self.state.target().code.to_string(),
            })
            .await;
    }

    /// Process inputs until the transport disconnects, then tear down.
    ///
    /// The input queue is unbounded so the socket reader never waits on a
    /// provider call in progress here.
    pub async fn run(mut self, mut inputs: mpsc::UnboundedReceiver<SessionInput>) {
        loop {
            tokio::select! {
                input = inputs.recv() => match input {
                    Some(SessionInput::Command(parsed)) => self.handle_command(parsed).await,
                    Some(SessionInput::Error(err)) if err.is_fatal() => {
                        tracing::info!(session_id = %self.session_id, reason = %err, "Transport closed");
                        break;
                    }
                    Some(SessionInput::Error(err)) => {
                        tracing::warn!(session_id = %self.session_id, error = %err, "Ignoring malformed client message");
                    }
                    None => break,
                },
                Some(update) = self.updates_rx.recv() => {
                    self.handle_transcription_update(update).await;
                }
            }
        }

        self.teardown().await;
    }

    // ── Commands ─────────────────────────────────────────────────

    pub async fn handle_command(&mut self, parsed: ParsedCommand) {
        let command = match parsed {
            ParsedCommand::Known(command) => command,
            ParsedCommand::Unknown(name) => {
                tracing::info!(session_id = %self.session_id, command = %name, "Ignoring unknown command");
                return;
            }
        };

        if let ClientCommand::Speak { text } = &command {
            if text.as_deref().map_or(true, |t| t.trim().is_empty()) {
                tracing::info!(session_id = %self.session_id, "Ignoring speak without text");
                return;
            }
        }

        let phase = self.state.phase();
        tracing::info!(
            session_id = %self.session_id,
            command = command.name(),
            phase = ?phase,
            "Command received"
        );

        if LifecyclePhase::closes_transcription(&command) {
            self.suspend_capture().await;
        }

        let outcome = match &command {
            ClientCommand::StartListening => self.start_listening().await,
            ClientCommand::StopListening => self.stop_listening().await,
            ClientCommand::Speak { text } => self.speak(text.as_deref().unwrap_or_default()).await,
            ClientCommand::UpdateLanguages {
                source_language,
                target_language,
            } => {
                self.update_languages(source_language.as_deref(), target_language.as_deref())
                    .await
            }
            ClientCommand::Ping => {
                self.emitter.emit(ServerMessage::Pong).await;
                Ok(())
            }
        };

        match outcome {
            Ok(()) => self.state.set_phase(phase.after(&command)),
            Err(err) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    command = command.name(),
                    error = %err,
                    "Command failed"
                );
                self.state.set_phase(phase.after_failure(&command));
                self.emitter.emit(ServerMessage::error(err)).await;
            }
        }
    }

    async fn start_listening(&mut self) -> Result<()> {
        self.state.begin_listening_episode();
        let source = self.registry.resolve(self.state.source().code)?;

        self.audio.reset();
        self.generation += 1;
        let opened = TranscriptionSession::open(
            self.providers.transcription.as_ref(),
            source.transcription_tag,
            self.generation,
            Arc::clone(&self.audio),
            self.updates_tx.clone(),
        )
        .await;

        match opened {
            Ok(session) => {
                tracing::info!(
                    session_id = %self.session_id,
                    generation = self.generation,
                    language = source.transcription_tag,
                    "Listening"
                );
                self.transcription = Some(session);
                self.emitter.emit(ServerMessage::ListeningStarted).await;
                Ok(())
            }
            Err(err) => {
                self.audio.close();
                self.audio.drain();
                Err(err)
            }
        }
    }

    async fn stop_listening(&mut self) -> Result<()> {
        self.emitter.emit(ServerMessage::ListeningStopped).await;
        Ok(())
    }

    async fn speak(&mut self, text: &str) -> Result<()> {
        let synthesis = self
            .providers
            .synthesizer
            .synthesize(text, &self.providers.voice_id);
        let audio = match tokio::time::timeout(self.provider_deadline, synthesis).await {
            Ok(result) => result.map_err(SessionError::synthesis)?,
            Err(_) => return Err(SessionError::synthesis("request timed out")),
        };

        tracing::info!(
            session_id = %self.session_id,
            chars = text.chars().count(),
            bytes = audio.len(),
            "Speaking"
        );
        let data = base64::engine::general_purpose::STANDARD.encode(&audio);
        self.emitter.emit(ServerMessage::AudioStarting).await;
        self.emitter.emit(ServerMessage::AudioData { data }).await;
        self.emitter.emit(ServerMessage::AudioCompleted).await;
        Ok(())
    }

    async fn update_languages(&mut self, source: Option<&str>, target: Option<&str>) -> Result<()> {
        self.state.update_languages(&self.registry, source, target)?;

        tracing::info!(
            session_id = %self.session_id,
            source = self.state.source().code,
            target = self.state.target().code,
            "Languages updated"
        );
        self.emitter
            .emit(ServerMessage::LanguagesUpdated {
                source_language: self.state.source().code.to_string(),
                target_language: self.state.target().code.to_string(),
            })
            .await;
        Ok(())
    }

    // ── Transcription events ─────────────────────────────────────

    async fn handle_transcription_update(&mut self, update: TranscriptionUpdate) {
        let active = self.transcription.as_ref().map(TranscriptionSession::generation);
        if active != Some(update.generation) {
            tracing::trace!(
                session_id = %self.session_id,
                generation = update.generation,
                "Discarding event from closed transcription stream"
            );
            return;
        }

        match update.event {
            StreamEvent::Transcript(event) if event.is_final => {
                self.handle_final_transcript(event.text).await;
            }
            StreamEvent::Transcript(event) => {
                tracing::debug!(session_id = %self.session_id, text = %event.text, "Partial transcript");
                self.emitter
                    .emit(ServerMessage::Transcript {
                        text: event.text,
                        is_final: false,
                    })
                    .await;
            }
            StreamEvent::Error(message) => {
                tracing::warn!(session_id = %self.session_id, error = %message, "Transcription provider error");
            }
            StreamEvent::Closed => {
                tracing::info!(session_id = %self.session_id, "Transcription stream ended by provider");
                self.suspend_capture().await;
                self.state.set_phase(LifecyclePhase::Idle);
                self.emitter.emit(ServerMessage::ListeningStopped).await;
            }
        }
    }

    async fn handle_final_transcript(&mut self, text: String) {
        let at = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        tracing::info!(session_id = %self.session_id, %at, text = %text, "Final transcript");

        self.state.record_user_turn(&text);
        self.emitter
            .emit(ServerMessage::Transcript {
                text: text.clone(),
                is_final: true,
            })
            .await;

        let source = self.state.source().translation_tag;
        let target = self.state.target().translation_tag;
        let call = self.providers.translator.translate(&text, source, target);
        let translated = match tokio::time::timeout(self.provider_deadline, call).await {
            Ok(result) => result.map_err(SessionError::translation),
            Err(_) => Err(SessionError::translation("request timed out")),
        };

        match translated {
            Ok(translated) => {
                let full_translation = self.state.record_translation(&translated).to_string();
                let at = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
                tracing::info!(session_id = %self.session_id, %at, text = %translated, "Translation");
                self.emitter
                    .emit(ServerMessage::Translation {
                        text: translated,
                        full_translation,
                    })
                    .await;
            }
            Err(err) => {
                tracing::error!(session_id = %self.session_id, error = %err, "Translation failed");
                self.emitter.emit(ServerMessage::error(err)).await;
            }
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Close the active transcription stream and stop accepting audio.
    async fn suspend_capture(&mut self) {
        if let Some(mut session) = self.transcription.take() {
            session.close().await;
        }
        self.audio.close();
        let dropped = self.audio.drain();
        if dropped > 0 {
            tracing::debug!(session_id = %self.session_id, chunks = dropped, "Discarded queued audio");
        }
    }

    /// Release every session resource. Idempotent.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.suspend_capture().await;
        self.state.set_phase(LifecyclePhase::Idle);
        tracing::info!(
            session_id = %self.session_id,
            events = self.emitter.sent(),
            audio_overflow = self.audio.dropped(),
            "Session closed"
        );
    }

    #[cfg(test)]
    async fn process_next_update(&mut self) {
        let update = tokio::time::timeout(Duration::from_secs(1), self.updates_rx.recv())
            .await
            .expect("timed out waiting for transcription update")
            .expect("update channel closed");
        self.handle_transcription_update(update).await;
    }
}
