//! Axum-based HTTP/WebSocket gateway.
//!
//! Routes:
//! - `GET /`: liveness text
//! - `GET /health`: JSON status with the number of live sessions
//! - `GET /api/languages`: the language registry
//! - `GET /ws/medical-translator`: one interpretation session per socket

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use uuid::Uuid;

use crate::config::{Config, SessionConfig};
use crate::error::SessionError;
use crate::voice::assemblyai::AssemblyAiProvider;
use crate::voice::audio::{AudioIngestChannel, PushOutcome};
use crate::voice::coordinator::{Providers, SessionCoordinator, SessionInput};
use crate::voice::emitter::EventEmitter;
use crate::voice::events::{parse_command, parse_handshake, Handshake};
use crate::voice::languages::LanguageRegistry;
use crate::voice::synthesis::ElevenLabsSynthesizer;
use crate::voice::translation::OpenAiTranslator;

/// Path of the interpretation WebSocket.
pub const SESSION_WS_PATH: &str = "/ws/medical-translator";
/// How long a new socket may take to send its handshake.
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub providers: Providers,
    pub registry: LanguageRegistry,
    pub session: SessionConfig,
    /// Sessions with a live socket.
    pub active_sessions: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(providers: Providers, registry: LanguageRegistry, session: SessionConfig) -> Self {
        Self {
            providers,
            registry,
            session,
            active_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn active_session_count(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }
}

/// Build the production providers from configuration.
pub fn build_providers(config: &Config) -> Providers {
    let p = &config.providers;
    for key in config.missing_keys() {
        tracing::warn!(key, "Provider API key not configured; requests will be rejected");
    }

    let transcription = AssemblyAiProvider::new(p.assemblyai_api_key.clone().unwrap_or_default())
        .with_url(p.assemblyai_url.clone())
        .with_sample_rate(p.sample_rate)
        .with_end_utterance_silence_ms(p.end_utterance_silence_ms)
        .with_connect_timeout(p.connect_timeout());
    let translator = OpenAiTranslator::with_base_url(
        p.openai_api_key.clone().unwrap_or_default(),
        &p.openai_base_url,
        Some(&p.translation_model),
        p.request_timeout(),
    );
    let synthesizer = ElevenLabsSynthesizer::with_base_url(
        p.elevenlabs_api_key.clone().unwrap_or_default(),
        &p.elevenlabs_base_url,
        Some(&p.tts_model),
        p.request_timeout(),
    );

    Providers {
        transcription: Arc::new(transcription),
        translator: Arc::new(translator),
        synthesizer: Arc::new(synthesizer),
        voice_id: p.voice_id.clone(),
    }
}

/// Router with all routes and middleware.
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    // The timeout only covers plain HTTP; upgraded sockets outlive the request.
    let http = Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/api/languages", get(handle_languages))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ));

    Router::new()
        .route(SESSION_WS_PATH, get(handle_session_ws))
        .merge(http)
        .with_state(state)
        .layer(cors)
}

/// Run the HTTP gateway.
pub async fn run_gateway(config: Config) -> Result<()> {
    let registry = config.language_registry()?;
    let providers = build_providers(&config);
    let state = AppState::new(providers, registry, config.session.clone());

    let addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;

    let app = router(state, Duration::from_secs(config.gateway.request_timeout_secs));

    tracing::info!(address = %local, path = SESSION_WS_PATH, "Gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// GET /
async fn handle_root() -> &'static str {
    "server is running"
}

/// GET /health
async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "active_sessions": state.active_session_count(),
        "languages": state.registry.len(),
    }))
}

/// GET /api/languages: registry manifest for client language pickers.
async fn handle_languages(State(state): State<AppState>) -> impl IntoResponse {
    let (source, target) = state.registry.defaults();
    Json(serde_json::json!({
        "default_source_language": source.code,
        "default_target_language": target.code,
        "languages": state.registry.all(),
    }))
}

/// GET /ws/medical-translator: WebSocket upgrade for an interpretation session.
///
/// ## Protocol
///
/// 1. Client sends the handshake text frame `{"source_language", "target_language"}`
/// 2. Server answers `{"type": "config_received", ...}`
/// 3. Client sends binary frames (PCM16 mono audio) and JSON command frames
/// 4. Server sends JSON event frames (see [`crate::voice::events::ServerMessage`])
async fn handle_session_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session_connection(socket, state))
}

/// Decrements the live-session counter when the connection ends.
struct ActiveSession(Arc<AtomicUsize>);

impl ActiveSession {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Wait for the first text frame. `None` if the socket closes or stalls first.
async fn read_handshake<S>(receiver: &mut S, session_id: &str) -> Option<Handshake>
where
    S: futures_util::Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let wait = async {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => return Some(parse_handshake(text.as_str())),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(Message::Binary(_)) => {
                    tracing::debug!(session_id, "Ignoring audio before handshake");
                }
                Ok(_) => {}
            }
        }
        None
    };

    match tokio::time::timeout(Duration::from_secs(HANDSHAKE_TIMEOUT_SECS), wait).await {
        Ok(handshake) => handshake,
        Err(_) => {
            tracing::info!(session_id, "Handshake timed out");
            None
        }
    }
}

/// Handle a single interpretation WebSocket connection.
///
/// Three tasks per connection:
/// Browser → (reader, this task) → AudioIngestChannel / SessionInput
///                                   ↓
/// Browser ← (writer task) ← EventEmitter ← (coordinator task)
async fn handle_session_connection(socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4().to_string();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Some(handshake) = read_handshake(&mut ws_receiver, &session_id).await else {
        tracing::info!(session_id = %session_id, "Connection closed before handshake");
        return;
    };

    let _active = ActiveSession::enter(&state.active_sessions);
    tracing::info!(
        session_id = %session_id,
        active_sessions = state.active_session_count(),
        "Interpretation session started"
    );

    let audio = Arc::new(AudioIngestChannel::new(state.session.audio_queue_capacity));
    let (emitter, mut outbound) = EventEmitter::channel(session_id.clone(), state.session.outbound_buffer);

    // Writer: coordinator events → browser, in emission order
    let session_id_writer = session_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(session_id = %session_id_writer, error = %e, "Failed to encode event");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
        tracing::debug!(session_id = %session_id_writer, "Event writer ended");
    });

    let mut coordinator = SessionCoordinator::new(
        session_id.clone(),
        state.registry,
        state.providers.clone(),
        Arc::clone(&audio),
        emitter,
    )
    .with_provider_deadline(state.session.provider_deadline());
    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let coordinator_task = tokio::spawn(async move {
        coordinator.accept_handshake(&handshake).await;
        coordinator.run(input_rx).await;
    });

    // Reader: browser frames → audio channel / coordinator
    let mut rejected_chunks: u64 = 0;
    while let Some(frame) = ws_receiver.next().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "Socket read failed");
                break;
            }
        };
        match msg {
            Message::Binary(data) => {
                if audio.push(data.to_vec()) == PushOutcome::Closed {
                    rejected_chunks += 1;
                    if rejected_chunks == 1 || rejected_chunks.is_multiple_of(50) {
                        tracing::debug!(
                            session_id = %session_id,
                            rejected_chunks,
                            "Audio received while not listening"
                        );
                    }
                }
            }
            Message::Text(text) => {
                let input = match parse_command(text.as_str()) {
                    Ok(parsed) => SessionInput::Command(parsed),
                    Err(err) => SessionInput::Error(err),
                };
                if input_tx.send(input).is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    tracing::info!(session_id = %session_id, "Client disconnected");
    let _ = input_tx.send(SessionInput::Error(SessionError::TransportDisconnect));
    drop(input_tx);

    if let Err(e) = coordinator_task.await {
        tracing::error!(session_id = %session_id, error = %e, "Session coordinator panicked");
        audio.close();
    }
    let _ = writer.await;

    tracing::info!(session_id = %session_id, "Interpretation session ended");
}
