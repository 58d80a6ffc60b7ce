//! Live interpretation sessions.
//!
//! One WebSocket connection = one session. Audio frames stream into a
//! transcription provider; each final transcript is translated and sent back;
//! on request, text is synthesized to speech.
//!
//! ## Design
//! - One coordinator task per session owns all state and all emission
//!   (`coordinator`, `state`, `emitter`)
//! - Provider traits at the seams (`TranscriptionProvider`, `Translator`,
//!   `SpeechSynthesizer`) with AssemblyAI / OpenAI / ElevenLabs implementations
//! - Bounded drop-oldest audio queue between the socket reader and the
//!   transcription feed (`audio`)
//! - Static 22-language registry (`languages`)

pub mod assemblyai;
pub mod audio;
pub mod coordinator;
pub mod emitter;
pub mod events;
pub mod languages;
pub mod state;
pub mod synthesis;
pub mod transcription;
pub mod translation;

pub use audio::{AudioIngestChannel, PushOutcome};
pub use coordinator::{Providers, SessionCoordinator, SessionInput};
pub use emitter::EventEmitter;
pub use events::{ClientCommand, Handshake, ParsedCommand, ServerMessage};
pub use languages::{LanguagePair, LanguageRegistry};
pub use state::{LifecyclePhase, SessionState};
pub use synthesis::{ElevenLabsSynthesizer, SpeechSynthesizer};
pub use transcription::{TranscriptionProvider, TranscriptionSession, TranscriptionStream};
pub use translation::{OpenAiTranslator, Translator};
