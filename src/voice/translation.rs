//! Text translation via an OpenAI-compatible chat completions endpoint.
//!
//! One request per finalized utterance, no retries. The coordinator serializes
//! calls within a session; the client itself is stateless and shared.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default chat completions base URL.
pub const OPENAI_API_URL: &str = "https://api.openai.com/v1";
/// Default translation model.
pub const DEFAULT_TRANSLATION_MODEL: &str = "gpt-4o";
/// Sampling temperature used for translations.
pub const TRANSLATION_TEMPERATURE: f64 = 0.3;

/// Build the fixed translation instruction.
pub fn translation_instruction(source: &str, target: &str) -> String {
    format!(
        "You are a medical translator. Translate the following from {source} to {target}. \
         Focus on medical terminology accuracy. Only respond with the translation."
    )
}

/// Request/response translation provider.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text`. `source` and `target` are the registry translation tags.
    async fn translate(&self, text: &str, source: &str, target: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI chat completions translator.
pub struct OpenAiTranslator {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiTranslator {
    /// `base_url` is any OpenAI-compatible endpoint (default [`OPENAI_API_URL`]).
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: &str,
        model: Option<&str>,
        timeout: Duration,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.unwrap_or(DEFAULT_TRANSLATION_MODEL).to_string(),
            client: reqwest::Client::builder()
                .timeout(timeout)
                .connect_timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

#[async_trait]
impl Translator for OpenAiTranslator {
    async fn translate(&self, text: &str, source: &str, target: &str) -> anyhow::Result<String> {
        let instruction = translation_instruction(source, target);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &instruction,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
            temperature: TRANSLATION_TEMPERATURE,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            anyhow::bail!("translation provider returned {status}: {}", detail.trim());
        }

        let chat: ChatResponse = resp.json().await?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            anyhow::bail!("translation provider returned an empty response");
        }
        Ok(content)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Scripted translator: pops one result per call, records every call.
    #[derive(Default)]
    pub struct MockTranslator {
        pub log: Arc<Mutex<Vec<String>>>,
        pub calls: Mutex<Vec<(String, String, String)>>,
        /// When set, calls never complete.
        pub stall: AtomicBool,
        results: Mutex<VecDeque<Result<String, String>>>,
    }

    impl MockTranslator {
        pub fn with_log(log: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                log,
                ..Self::default()
            }
        }

        pub fn push_ok(&self, text: &str) {
            self.results.lock().push_back(Ok(text.to_string()));
        }

        pub fn push_err(&self, message: &str) {
            self.results.lock().push_back(Err(message.to_string()));
        }
    }

    #[async_trait]
    impl Translator for MockTranslator {
        async fn translate(
            &self,
            text: &str,
            source: &str,
            target: &str,
        ) -> anyhow::Result<String> {
            self.log.lock().push(format!("translate:{text}"));
            self.calls
                .lock()
                .push((text.to_string(), source.to_string(), target.to_string()));
            if self.stall.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            match self.results.lock().pop_front() {
                Some(Ok(text)) => Ok(text),
                Some(Err(message)) => Err(anyhow::anyhow!(message)),
                None => Ok(format!("[{target}] {text}")),
            }
        }
    }
}
