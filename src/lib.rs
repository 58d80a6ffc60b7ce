//! Live medical interpretation relay.
//!
//! A WebSocket server that streams client audio to a transcription provider,
//! translates every finished utterance and synthesizes speech on request.

pub mod config;
pub mod error;
pub mod gateway;
pub mod voice;

pub use config::Config;
pub use error::{Result, SessionError};
