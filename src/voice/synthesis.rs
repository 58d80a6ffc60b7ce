//! Text-to-speech via the ElevenLabs streaming endpoint.
//!
//! The provider answers with a chunked audio stream; it is collected in full
//! before the coordinator forwards it, so the client receives one payload.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;
use std::time::Duration;

/// ElevenLabs API base URL.
pub const ELEVENLABS_API_URL: &str = "https://api.elevenlabs.io";
/// Default voice ("Alice").
pub const DEFAULT_VOICE_ID: &str = "EXAVITQu4vr4xnSDxMaL";
/// Default synthesis model.
pub const DEFAULT_TTS_MODEL: &str = "eleven_turbo_v2";

/// Request/response speech synthesis provider.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` with `voice_id`, returning the complete audio payload.
    async fn synthesize(&self, text: &str, voice_id: &str) -> anyhow::Result<Vec<u8>>;
}

#[derive(Debug, Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    model_id: &'a str,
}

pub struct ElevenLabsSynthesizer {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl ElevenLabsSynthesizer {
    /// `base_url` is normally [`ELEVENLABS_API_URL`].
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: &str,
        model: Option<&str>,
        timeout: Duration,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.unwrap_or(DEFAULT_TTS_MODEL).to_string(),
            client: reqwest::Client::builder()
                .timeout(timeout)
                .connect_timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn synthesize(&self, text: &str, voice_id: &str) -> anyhow::Result<Vec<u8>> {
        let url = format!("{}/v1/text-to-speech/{voice_id}/stream", self.base_url);
        let body = TtsRequest {
            text,
            model_id: &self.model,
        };

        let resp = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header(reqwest::header::ACCEPT, "audio/mpeg")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            anyhow::bail!("speech provider returned {status}: {}", detail.trim());
        }

        let mut audio = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            audio.extend_from_slice(&chunk?);
        }

        if audio.is_empty() {
            anyhow::bail!("speech provider returned no audio");
        }
        tracing::debug!(voice_id, bytes = audio.len(), "Synthesized speech");
        Ok(audio)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    pub struct MockSynthesizer {
        pub log: Arc<Mutex<Vec<String>>>,
        pub fail_with: Mutex<Option<String>>,
        /// When set, calls never complete.
        pub stall: AtomicBool,
    }

    impl MockSynthesizer {
        pub fn with_log(log: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                log,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for MockSynthesizer {
        async fn synthesize(&self, text: &str, voice_id: &str) -> anyhow::Result<Vec<u8>> {
            self.log.lock().push(format!("synthesize:{text}:{voice_id}"));
            if self.stall.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if let Some(message) = self.fail_with.lock().clone() {
                anyhow::bail!(message);
            }
            Ok(text.as_bytes().to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn synthesize_collects_full_body() {
        let server = MockServer::start().await;
        let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        Mock::given(method("POST"))
            .and(path(format!("/v1/text-to-speech/{DEFAULT_VOICE_ID}/stream")))
            .and(header("xi-api-key", "el-key"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let tts =
            ElevenLabsSynthesizer::with_base_url("el-key", &server.uri(), None, Duration::from_secs(5));
        let audio = tts.synthesize("Hello", DEFAULT_VOICE_ID).await.unwrap();
        assert_eq!(audio, payload);
    }

    #[tokio::test]
    async fn synthesize_surfaces_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let tts = ElevenLabsSynthesizer::with_base_url("bad", &server.uri(), None, Duration::from_secs(5));
        let err = tts.synthesize("Hello", "voice").await.unwrap_err();
        assert!(err.to_string().contains("401"));
        assert!(err.to_string().contains("invalid api key"));
    }

    #[tokio::test]
    async fn synthesize_rejects_empty_audio() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let tts = ElevenLabsSynthesizer::with_base_url("k", &server.uri(), None, Duration::from_secs(5));
        assert!(tts.synthesize("Hello", "voice").await.is_err());
    }
}
