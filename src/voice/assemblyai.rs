//! AssemblyAI real-time transcription WebSocket client.
//!
//! ## Protocol Overview
//!
//! 1. **Connect**: WebSocket to `wss://api.assemblyai.com/v2/realtime/ws?sample_rate=...`
//!    with the API key in the `Authorization` header
//! 2. **Begin**: wait for `SessionBegins`, then send the end-of-utterance
//!    silence threshold
//! 3. **Stream**: send `{"audio_data": <base64 PCM16>}`, receive
//!    `PartialTranscript` / `FinalTranscript`
//! 4. **Close**: send `{"terminate_session": true}` and close the socket

use async_trait::async_trait;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::transcription::{StreamEvent, TranscriptEvent, TranscriptionProvider, TranscriptionStream};

// ── Constants ──────────────────────────────────────────────────────

/// AssemblyAI real-time WebSocket endpoint.
pub const ASSEMBLYAI_REALTIME_WS_URL: &str = "wss://api.assemblyai.com/v2/realtime/ws";

/// Input audio: PCM16, 16kHz, mono.
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Silence that ends an utterance.
pub const DEFAULT_END_UTTERANCE_SILENCE_MS: u64 = 1_000;

/// How long `close` waits for `SessionTerminated` before dropping the socket.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

// ── Provider ───────────────────────────────────────────────────────

/// Opens AssemblyAI real-time streams.
pub struct AssemblyAiProvider {
    api_key: String,
    url: String,
    sample_rate: u32,
    end_utterance_silence_ms: u64,
    connect_timeout: Duration,
}

impl AssemblyAiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            url: ASSEMBLYAI_REALTIME_WS_URL.to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            end_utterance_silence_ms: DEFAULT_END_UTTERANCE_SILENCE_MS,
            connect_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_end_utterance_silence_ms(mut self, ms: u64) -> Self {
        self.end_utterance_silence_ms = ms;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn stream_url(&self, language_tag: &str) -> String {
        format!(
            "{}?sample_rate={}&language_code={language_tag}",
            self.url, self.sample_rate
        )
    }

    async fn connect(&self, language_tag: &str) -> anyhow::Result<(WsStream, String)> {
        let mut request = self
            .stream_url(language_tag)
            .into_client_request()
            .map_err(|e| anyhow::anyhow!("Failed to build WebSocket request: {e}"))?;
        request.headers_mut().insert(
            "Authorization",
            self.api_key
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid auth header: {e}"))?,
        );

        let (mut ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to AssemblyAI: {e}"))?;

        // The provider reports auth and quota failures before SessionBegins.
        let session_id = loop {
            let Some(msg) = ws_stream.next().await else {
                anyhow::bail!("Stream ended before SessionBegins");
            };
            match msg {
                Ok(WsMessage::Text(text)) => {
                    let value: serde_json::Value = serde_json::from_str(text.as_str())?;
                    if let Some(err) = value.get("error").and_then(|v| v.as_str()) {
                        anyhow::bail!("AssemblyAI rejected session: {err}");
                    }
                    if value.get("message_type").and_then(|v| v.as_str()) == Some("SessionBegins")
                    {
                        break value
                            .get("session_id")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string();
                    }
                }
                Ok(WsMessage::Close(frame)) => {
                    anyhow::bail!("Connection closed before SessionBegins: {frame:?}");
                }
                Ok(_) => {}
                Err(e) => anyhow::bail!("WebSocket error before SessionBegins: {e}"),
            }
        };

        let config = serde_json::json!({
            "end_utterance_silence_threshold": self.end_utterance_silence_ms,
        });
        ws_stream
            .send(WsMessage::Text(config.to_string().into()))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send session config: {e}"))?;

        Ok((ws_stream, session_id))
    }
}

#[async_trait]
impl TranscriptionProvider for AssemblyAiProvider {
    async fn open(
        &self,
        language_tag: &str,
        events: mpsc::Sender<StreamEvent>,
    ) -> anyhow::Result<Arc<dyn TranscriptionStream>> {
        tracing::info!(
            language = language_tag,
            sample_rate = self.sample_rate,
            "Connecting to AssemblyAI real-time"
        );

        let (ws_stream, session_id) =
            tokio::time::timeout(self.connect_timeout, self.connect(language_tag))
                .await
                .map_err(|_| {
                    anyhow::anyhow!(
                        "AssemblyAI SessionBegins timeout ({}s)",
                        self.connect_timeout.as_secs()
                    )
                })??;

        tracing::info!(provider_session = %session_id, "AssemblyAI session opened");

        let (ws_sender, ws_receiver) = ws_stream.split();
        let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundMessage>(256);

        let sid_out = session_id.clone();
        let outbound = tokio::spawn(async move {
            outbound_loop(outbound_rx, ws_sender, sid_out).await;
        });

        let sid_in = session_id.clone();
        let inbound = tokio::spawn(async move {
            inbound_loop(ws_receiver, events, sid_in).await;
        });

        Ok(Arc::new(AssemblyAiStream::new(
            session_id,
            outbound_tx,
            outbound,
            inbound,
            TERMINATE_GRACE,
        )))
    }

    fn name(&self) -> &str {
        "assemblyai"
    }
}

// ── Stream handle ──────────────────────────────────────────────────

#[derive(Debug)]
enum OutboundMessage {
    Audio(Vec<u8>),
    Terminate,
}

struct AssemblyAiStream {
    outbound_tx: mpsc::Sender<OutboundMessage>,
    closed: AtomicBool,
    session_id: String,
    loops: Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
    terminate_grace: Duration,
}

impl AssemblyAiStream {
    fn new(
        session_id: String,
        outbound_tx: mpsc::Sender<OutboundMessage>,
        outbound: JoinHandle<()>,
        inbound: JoinHandle<()>,
        terminate_grace: Duration,
    ) -> Self {
        Self {
            outbound_tx,
            closed: AtomicBool::new(false),
            session_id,
            loops: Mutex::new(Some((outbound, inbound))),
            terminate_grace,
        }
    }
}

#[async_trait]
impl TranscriptionStream for AssemblyAiStream {
    async fn send_audio(&self, chunk: Vec<u8>) -> anyhow::Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.outbound_tx
            .send(OutboundMessage::Audio(chunk))
            .await
            .map_err(|_| anyhow::anyhow!("Audio channel closed"))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(provider_session = %self.session_id, "Closing AssemblyAI session");

        // Never wait on a stalled sink; the loops are aborted below regardless.
        if let Err(e) = self.outbound_tx.try_send(OutboundMessage::Terminate) {
            tracing::warn!(
                provider_session = %self.session_id,
                error = %e,
                "Could not queue terminate message"
            );
        }

        let Some((outbound, inbound)) = self.loops.lock().take() else {
            return;
        };
        let abort_inbound = inbound.abort_handle();
        if tokio::time::timeout(self.terminate_grace, inbound).await.is_err() {
            tracing::warn!(
                provider_session = %self.session_id,
                "No SessionTerminated from AssemblyAI, dropping connection"
            );
            abort_inbound.abort();
        }
        outbound.abort();
    }
}

// ── Internal loops ─────────────────────────────────────────────────

async fn outbound_loop(
    mut rx: mpsc::Receiver<OutboundMessage>,
    mut ws_sender: futures_util::stream::SplitSink<WsStream, WsMessage>,
    session_id: String,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            OutboundMessage::Audio(pcm) => {
                let json = audio_message(&pcm).to_string();
                if ws_sender.send(WsMessage::Text(json.into())).await.is_err() {
                    tracing::warn!(
                        provider_session = %session_id,
                        "WebSocket send failed, closing outbound loop"
                    );
                    break;
                }
            }
            OutboundMessage::Terminate => {
                let terminate = serde_json::json!({"terminate_session": true}).to_string();
                let _ = ws_sender.send(WsMessage::Text(terminate.into())).await;
                let _ = ws_sender.send(WsMessage::Close(None)).await;
                break;
            }
        }
    }

    tracing::debug!(provider_session = %session_id, "AssemblyAI outbound loop terminated");
}

async fn inbound_loop(
    mut ws_receiver: futures_util::stream::SplitStream<WsStream>,
    events: mpsc::Sender<StreamEvent>,
    session_id: String,
) {
    while let Some(msg_result) = ws_receiver.next().await {
        let parsed = match msg_result {
            Ok(WsMessage::Text(text)) => parse_server_message(text.as_str()),
            Ok(WsMessage::Close(frame)) => {
                tracing::info!(
                    provider_session = %session_id,
                    close_frame = ?frame,
                    "AssemblyAI connection closed"
                );
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::error!(
                    provider_session = %session_id,
                    error = %e,
                    "AssemblyAI WebSocket error"
                );
                Some(StreamEvent::Error(format!("WebSocket error: {e}")))
            }
        };

        let Some(event) = parsed else {
            continue;
        };
        let ended = event == StreamEvent::Closed;
        if events.send(event).await.is_err() {
            tracing::debug!(
                provider_session = %session_id,
                "Event receiver dropped, closing inbound loop"
            );
            return;
        }
        if ended {
            return;
        }
    }

    let _ = events.send(StreamEvent::Closed).await;
    tracing::debug!(provider_session = %session_id, "AssemblyAI inbound loop terminated");
}

// ── Message encoding / parsing ─────────────────────────────────────

fn audio_message(pcm: &[u8]) -> serde_json::Value {
    serde_json::json!({
        "audio_data": base64::engine::general_purpose::STANDARD.encode(pcm),
    })
}

/// Parse one server message. Empty transcripts and bookkeeping messages yield `None`.
fn parse_server_message(json_text: &str) -> Option<StreamEvent> {
    let value: serde_json::Value = match serde_json::from_str(json_text) {
        Ok(v) => v,
        Err(e) => {
            return Some(StreamEvent::Error(format!(
                "Failed to parse AssemblyAI message: {e}"
            )))
        }
    };

    if let Some(err) = value.get("error").and_then(|v| v.as_str()) {
        return Some(StreamEvent::Error(err.to_string()));
    }

    let message_type = value
        .get("message_type")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let text = value
        .get("text")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim();

    match message_type {
        "PartialTranscript" if !text.is_empty() => {
            Some(StreamEvent::Transcript(TranscriptEvent::partial(text)))
        }
        "FinalTranscript" if !text.is_empty() => {
            Some(StreamEvent::Transcript(TranscriptEvent::final_text(text)))
        }
        "SessionTerminated" => Some(StreamEvent::Closed),
        other => {
            tracing::trace!(message_type = other, "AssemblyAI message (ignored)");
            None
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
