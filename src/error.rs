//! Error taxonomy for interpretation sessions.
//!
//! Provider failures are converted into a single client-facing `error` event at
//! the call site; only [`SessionError::TransportDisconnect`] ends a session.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Client supplied a language code that is not in the registry.
    #[error("Unknown language: {code}")]
    UnknownLanguage { code: String },

    /// The streaming transcription provider refused or failed to open a stream.
    #[error("Transcription connect error: {message}")]
    ProviderConnect { message: String },

    /// A translation or synthesis round trip failed or timed out.
    #[error("{provider} error: {message}")]
    ProviderCall {
        provider: &'static str,
        message: String,
    },

    /// The client connection dropped. Expected, not a failure condition.
    #[error("Client disconnected")]
    TransportDisconnect,

    /// Malformed frame from the client.
    #[error("Invalid client message: {message}")]
    InvalidMessage { message: String },
}

impl SessionError {
    pub fn unknown_language(code: impl Into<String>) -> Self {
        Self::UnknownLanguage { code: code.into() }
    }

    pub fn provider_connect(err: impl std::fmt::Display) -> Self {
        Self::ProviderConnect {
            message: err.to_string(),
        }
    }

    pub fn translation(err: impl std::fmt::Display) -> Self {
        Self::ProviderCall {
            provider: "Translation",
            message: err.to_string(),
        }
    }

    pub fn synthesis(err: impl std::fmt::Display) -> Self {
        Self::ProviderCall {
            provider: "Audio",
            message: err.to_string(),
        }
    }

    /// Whether this error ends the session rather than being reported to the client.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::TransportDisconnect)
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
