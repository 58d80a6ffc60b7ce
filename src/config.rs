//! Server configuration.
//!
//! Loaded from an optional TOML file; provider API keys may be supplied (and are
//! overridden) through the environment. Every field has a default.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::voice::assemblyai::{
    ASSEMBLYAI_REALTIME_WS_URL, DEFAULT_END_UTTERANCE_SILENCE_MS, DEFAULT_SAMPLE_RATE,
};
use crate::voice::audio::DEFAULT_AUDIO_QUEUE_CAPACITY;
use crate::voice::coordinator::DEFAULT_PROVIDER_DEADLINE_SECS;
use crate::voice::emitter::DEFAULT_OUTBOUND_BUFFER;
use crate::voice::languages::{
    LanguageRegistry, DEFAULT_SOURCE_LANGUAGE, DEFAULT_TARGET_LANGUAGE,
};
use crate::voice::synthesis::{DEFAULT_TTS_MODEL, DEFAULT_VOICE_ID, ELEVENLABS_API_URL};
use crate::voice::translation::{DEFAULT_TRANSLATION_MODEL, OPENAI_API_URL};

/// Environment variables that override the provider keys.
pub const ASSEMBLYAI_API_KEY_ENV: &str = "ASSEMBLYAI_API_KEY";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const ELEVENLABS_API_KEY_ENV: &str = "ELEVENLABS_API_KEY";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub providers: ProvidersConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Timeout for plain HTTP routes. WebSocket sessions are not affected.
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub assemblyai_api_key: Option<String>,
    pub assemblyai_url: String,
    pub sample_rate: u32,
    pub end_utterance_silence_ms: u64,
    pub connect_timeout_secs: u64,

    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub translation_model: String,

    pub elevenlabs_api_key: Option<String>,
    pub elevenlabs_base_url: String,
    pub tts_model: String,
    pub voice_id: String,

    /// Timeout for each translation or synthesis request.
    pub request_timeout_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            assemblyai_api_key: None,
            assemblyai_url: ASSEMBLYAI_REALTIME_WS_URL.into(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            end_utterance_silence_ms: DEFAULT_END_UTTERANCE_SILENCE_MS,
            connect_timeout_secs: 15,
            openai_api_key: None,
            openai_base_url: OPENAI_API_URL.into(),
            translation_model: DEFAULT_TRANSLATION_MODEL.into(),
            elevenlabs_api_key: None,
            elevenlabs_base_url: ELEVENLABS_API_URL.into(),
            tts_model: DEFAULT_TTS_MODEL.into(),
            voice_id: DEFAULT_VOICE_ID.into(),
            request_timeout_secs: 30,
        }
    }
}

// Keys stay out of logs.
impl std::fmt::Debug for ProvidersConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn redact(key: &Option<String>) -> &'static str {
            if key.is_some() {
                "<set>"
            } else {
                "<unset>"
            }
        }
        f.debug_struct("ProvidersConfig")
            .field("assemblyai_api_key", &redact(&self.assemblyai_api_key))
            .field("assemblyai_url", &self.assemblyai_url)
            .field("sample_rate", &self.sample_rate)
            .field("end_utterance_silence_ms", &self.end_utterance_silence_ms)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("openai_base_url", &self.openai_base_url)
            .field("translation_model", &self.translation_model)
            .field("elevenlabs_api_key", &redact(&self.elevenlabs_api_key))
            .field("elevenlabs_base_url", &self.elevenlabs_base_url)
            .field("tts_model", &self.tts_model)
            .field("voice_id", &self.voice_id)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl ProvidersConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Audio chunks buffered before the oldest is dropped.
    pub audio_queue_capacity: usize,
    /// Events buffered between a session and its socket writer.
    pub outbound_buffer: usize,
    /// Coordinator-side deadline for one translation or synthesis call.
    pub provider_deadline_secs: u64,
    pub default_source_language: String,
    pub default_target_language: String,
}

impl SessionConfig {
    pub fn provider_deadline(&self) -> Duration {
        Duration::from_secs(self.provider_deadline_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            audio_queue_capacity: DEFAULT_AUDIO_QUEUE_CAPACITY,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            provider_deadline_secs: DEFAULT_PROVIDER_DEADLINE_SECS,
            default_source_language: DEFAULT_SOURCE_LANGUAGE.into(),
            default_target_language: DEFAULT_TARGET_LANGUAGE.into(),
        }
    }
}

impl Config {
    /// Parse a TOML file. Missing fields use defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Resolve the effective configuration.
    ///
    /// An explicit path must exist. Without one, the platform config file is
    /// used when present, otherwise defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let config = match explicit {
            Some(path) => Self::load(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load(&path)?,
                _ => Self::default(),
            },
        };
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// `<platform config dir>/medrelay/config.toml`, if a home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "medrelay")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply key overrides from `lookup`. Empty values are ignored.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(key) = non_empty(ASSEMBLYAI_API_KEY_ENV) {
            self.providers.assemblyai_api_key = Some(key);
        }
        if let Some(key) = non_empty(OPENAI_API_KEY_ENV) {
            self.providers.openai_api_key = Some(key);
        }
        if let Some(key) = non_empty(ELEVENLABS_API_KEY_ENV) {
            self.providers.elevenlabs_api_key = Some(key);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.session.audio_queue_capacity == 0 {
            anyhow::bail!("session.audio_queue_capacity must be greater than 0");
        }
        if self.session.outbound_buffer == 0 {
            anyhow::bail!("session.outbound_buffer must be greater than 0");
        }
        if self.session.provider_deadline_secs == 0 {
            anyhow::bail!("session.provider_deadline_secs must be greater than 0");
        }
        if self.providers.request_timeout_secs == 0 {
            anyhow::bail!("providers.request_timeout_secs must be greater than 0");
        }
        if self.providers.sample_rate == 0 {
            anyhow::bail!("providers.sample_rate must be greater than 0");
        }
        self.language_registry()?;
        Ok(())
    }

    /// Registry carrying the configured handshake defaults.
    pub fn language_registry(&self) -> Result<LanguageRegistry> {
        LanguageRegistry::with_defaults(
            &self.session.default_source_language,
            &self.session.default_target_language,
        )
        .context("Invalid default language in [session]")
    }

    /// Names of the provider keys that are still missing.
    pub fn missing_keys(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.providers.assemblyai_api_key.is_none() {
            missing.push(ASSEMBLYAI_API_KEY_ENV);
        }
        if self.providers.openai_api_key.is_none() {
            missing.push(OPENAI_API_KEY_ENV);
        }
        if self.providers.elevenlabs_api_key.is_none() {
            missing.push(ELEVENLABS_API_KEY_ENV);
        }
        missing
    }
}
