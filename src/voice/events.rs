//! WebSocket message schema for interpretation sessions.
//!
//! ## Protocol
//!
//! ```text
//! Client ──handshake──▸ Server          {"source_language": "en-US", "target_language": "es-ES"}
//! Client ──binary─────▸ Server          raw PCM16 audio chunks
//! Client ──commands───▸ Server          {"command": "start_listening"} ...
//!        ◂──events──────                {"type": "transcript", "text": "...", "is_final": false} ...
//! ```
//!
//! Text frames are JSON. Synthesized audio is base64 inside `audio_data`.

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

// ── Client → Server messages ──────────────────────────────────────

/// First text frame of every connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,
}

/// Control commands sent after the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClientCommand {
    StartListening,
    StopListening,
    Speak {
        #[serde(default)]
        text: Option<String>,
    },
    UpdateLanguages {
        #[serde(default)]
        source_language: Option<String>,
        #[serde(default)]
        target_language: Option<String>,
    },
    Ping,
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartListening => "start_listening",
            Self::StopListening => "stop_listening",
            Self::Speak { .. } => "speak",
            Self::UpdateLanguages { .. } => "update_languages",
            Self::Ping => "ping",
        }
    }
}

/// Result of parsing a command frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    Known(ClientCommand),
    /// A well-formed frame whose `command` this server does not recognize.
    Unknown(String),
}

/// Parse a command text frame.
///
/// Unrecognized or missing `command` values are reported as
/// [`ParsedCommand::Unknown`] so newer clients keep working; only invalid JSON
/// or a known command with malformed fields is an error.
pub fn parse_command(text: &str) -> Result<ParsedCommand, SessionError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| SessionError::InvalidMessage {
            message: e.to_string(),
        })?;

    let name = value
        .get("command")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    match name.as_str() {
        "start_listening" | "stop_listening" | "speak" | "update_languages" | "ping" => {
            serde_json::from_value(value)
                .map(ParsedCommand::Known)
                .map_err(|e| SessionError::InvalidMessage {
                    message: e.to_string(),
                })
        }
        _ => Ok(ParsedCommand::Unknown(name)),
    }
}

/// Parse the handshake frame. Invalid JSON yields the all-defaults handshake.
pub fn parse_handshake(text: &str) -> Handshake {
    serde_json::from_str(text).unwrap_or_default()
}

// ── Server → Client messages ──────────────────────────────────────

/// Events sent from the server to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake accepted; echoes the languages actually in effect.
    ConfigReceived {
        source_language: String,
        target_language: String,
    },
    /// Source-language transcript. Partials replace the previous partial.
    Transcript { text: String, is_final: bool },
    /// Translation of the latest final transcript.
    Translation {
        text: String,
        /// Everything translated during the current listening episode.
        full_translation: String,
    },
    ListeningStarted,
    ListeningStopped,
    LanguagesUpdated {
        source_language: String,
        target_language: String,
    },
    AudioStarting,
    /// Base64-encoded synthesized audio (MPEG).
    AudioData { data: String },
    AudioCompleted,
    Error { message: String },
    Pong,
}

impl ServerMessage {
    pub fn error(err: impl std::fmt::Display) -> Self {
        Self::Error {
            message: err.to_string(),
        }
    }

    /// The `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigReceived { .. } => "config_received",
            Self::Transcript { .. } => "transcript",
            Self::Translation { .. } => "translation",
            Self::ListeningStarted => "listening_started",
            Self::ListeningStopped => "listening_stopped",
            Self::LanguagesUpdated { .. } => "languages_updated",
            Self::AudioStarting => "audio_starting",
            Self::AudioData { .. } => "audio_data",
            Self::AudioCompleted => "audio_completed",
            Self::Error { .. } => "error",
            Self::Pong => "pong",
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_known_command() {
        let cases = [
            (r#"{"command": "start_listening"}"#, ClientCommand::StartListening),
            (r#"{"command": "stop_listening"}"#, ClientCommand::StopListening),
            (
                r#"{"command": "speak", "text": "Hello"}"#,
                ClientCommand::Speak {
                    text: Some("Hello".into()),
                },
            ),
            (
                r#"{"command": "update_languages", "source_language": "fr-FR", "target_language": "de"}"#,
                ClientCommand::UpdateLanguages {
                    source_language: Some("fr-FR".into()),
                    target_language: Some("de".into()),
                },
            ),
            (r#"{"command": "ping"}"#, ClientCommand::Ping),
        ];
        for (json, expected) in cases {
            assert_eq!(
                parse_command(json).unwrap(),
                ParsedCommand::Known(expected),
                "{json}"
            );
        }
    }

    #[test]
    fn speak_without_text_parses() {
        assert_eq!(
            parse_command(r#"{"command": "speak"}"#).unwrap(),
            ParsedCommand::Known(ClientCommand::Speak { text: None })
        );
    }

    #[test]
    fn unknown_command_is_tolerated() {
        assert_eq!(
            parse_command(r#"{"command": "rewind", "steps": 3}"#).unwrap(),
            ParsedCommand::Unknown("rewind".into())
        );
        assert_eq!(
            parse_command(r#"{"hello": "world"}"#).unwrap(),
            ParsedCommand::Unknown(String::new())
        );
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(matches!(
            parse_command("not json"),
            Err(SessionError::InvalidMessage { .. })
        ));
    }

    #[test]
    fn handshake_fields_are_optional() {
        assert_eq!(parse_handshake("{}"), Handshake::default());
        assert_eq!(parse_handshake("garbage"), Handshake::default());
        let hs = parse_handshake(r#"{"source_language": "ja", "target_language": "en-GB"}"#);
        assert_eq!(hs.source_language.as_deref(), Some("ja"));
        assert_eq!(hs.target_language.as_deref(), Some("en-GB"));
    }

    #[test]
    fn server_message_wire_format() {
        let msg = ServerMessage::Transcript {
            text: "chest pain".into(),
            is_final: true,
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "transcript");
        assert_eq!(json["text"], "chest pain");
        assert_eq!(json["is_final"], true);

        let msg = ServerMessage::Translation {
            text: "dolor".into(),
            full_translation: "dolor".into(),
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "translation");
        assert_eq!(json["full_translation"], "dolor");
    }

    #[test]
    fn unit_events_serialize_as_bare_type() {
        assert_eq!(
            serde_json::to_string(&ServerMessage::Pong).unwrap(),
            r#"{"type":"pong"}"#
        );
        assert_eq!(
            serde_json::to_string(&ServerMessage::ListeningStarted).unwrap(),
            r#"{"type":"listening_started"}"#
        );
        assert_eq!(ServerMessage::AudioCompleted.kind(), "audio_completed");
    }
}
