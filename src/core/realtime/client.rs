//! Realtime protocol client.
//!
//! The client owns exactly one upstream connection at a time. Structured
//! commands are translated into framed wire messages; inbound frames are
//! translated into store mutations followed by typed events. Connection
//! loss is handled with exponential-backoff reconnection, after which the
//! accumulated conversation context is silently replayed so the provider
//! session is transparently rebuilt.
//!
//! # Thread Safety
//!
//! All mutable state lives behind `Arc` wrappers shared between the caller
//! and the spawned connection task. The `connected` flag uses
//! `Arc<AtomicBool>` for lock-free precondition checks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::base::{
    ClientConfig, ConnectionState, RealtimeError, RealtimeErrorCallback, RealtimeResult,
    ReconnectionConfig, ServerEventCallback, TurnDetectionConfig,
};
use super::config::{DEFAULT_REALTIME_URL, ProviderVariant, RealtimeVoice};
use super::messages::{
    ClientEvent, ConversationItem, InputAudioTranscription, MaxTokens, OutboundFrame,
    ResponseConfig, ServerEvent, SessionConfig, ToolDef, TurnDetection,
};
use super::store::{ConversationStore, ItemPatch};
use super::transport::{
    ConnectRequest, RealtimeTransport, TransportFrame, TransportSink, TransportStream,
};
use futures_util::{SinkExt, StreamExt};

/// Channel capacity for WebSocket message sending.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Shared state handed to the spawned connection task.
struct ConnectionShared {
    store: Arc<RwLock<ConversationStore>>,
    baseline: Arc<RwLock<Option<SessionConfig>>>,
    session_config: Arc<RwLock<SessionConfig>>,
    session_id: Arc<RwLock<Option<String>>>,
    state: Arc<RwLock<ConnectionState>>,
    connected: Arc<AtomicBool>,
    intentional_disconnect: Arc<AtomicBool>,
    ws_sender: Arc<Mutex<Option<mpsc::Sender<OutboundFrame>>>>,
    event_callback: Arc<Mutex<Option<ServerEventCallback>>>,
    error_callback: Arc<Mutex<Option<RealtimeErrorCallback>>>,
    transport: Arc<dyn RealtimeTransport>,
    connect_request: ConnectRequest,
    reconnection: ReconnectionConfig,
    debug_frames: bool,
}

/// Realtime protocol client.
///
/// One instance owns one upstream connection and the transcription store
/// fed by it. Commands are only valid while connected; anything else fails
/// with [`RealtimeError::NotConnected`].
pub struct RealtimeClient {
    variant: ProviderVariant,
    voice: RealtimeVoice,
    reconnection: ReconnectionConfig,
    connect_request: ConnectRequest,
    debug_frames: bool,

    session_config: Arc<RwLock<SessionConfig>>,
    baseline: Arc<RwLock<Option<SessionConfig>>>,
    store: Arc<RwLock<ConversationStore>>,
    state: Arc<RwLock<ConnectionState>>,
    connected: Arc<AtomicBool>,
    session_id: Arc<RwLock<Option<String>>>,

    ws_sender: Arc<Mutex<Option<mpsc::Sender<OutboundFrame>>>>,
    event_callback: Arc<Mutex<Option<ServerEventCallback>>>,
    error_callback: Arc<Mutex<Option<RealtimeErrorCallback>>>,
    connection_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
    intentional_disconnect: Arc<AtomicBool>,
    transport: Arc<dyn RealtimeTransport>,
}

impl RealtimeClient {
    /// Create a new client.
    ///
    /// The provider variant is inferred once from the base URL, and the
    /// configured voice is validated against that variant's allowed set
    /// before any connection attempt is made.
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn RealtimeTransport>,
    ) -> RealtimeResult<Self> {
        if config.api_key.is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        let base_url = config
            .base_url
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_REALTIME_URL.to_string());
        let variant = ProviderVariant::from_url(&base_url);

        let voice = match config.voice.as_deref() {
            Some(v) => {
                let parsed = RealtimeVoice::parse(v).ok_or_else(|| {
                    RealtimeError::InvalidConfiguration(format!("unknown voice: {v}"))
                })?;
                if !variant.allowed_voices().contains(&parsed) {
                    return Err(RealtimeError::InvalidConfiguration(format!(
                        "voice {parsed} is not available on the {variant} variant"
                    )));
                }
                parsed
            }
            None => RealtimeVoice::default_for(variant),
        };

        let connect_request = build_connect_request(&base_url, variant, &config);
        let session_config = build_session_config(&config, voice);
        let reconnection = config.reconnection.clone().unwrap_or_default();

        Ok(Self {
            variant,
            voice,
            reconnection,
            connect_request,
            debug_frames: config.debug,
            session_config: Arc::new(RwLock::new(session_config)),
            baseline: Arc::new(RwLock::new(None)),
            store: Arc::new(RwLock::new(ConversationStore::new())),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            connected: Arc::new(AtomicBool::new(false)),
            session_id: Arc::new(RwLock::new(None)),
            ws_sender: Arc::new(Mutex::new(None)),
            event_callback: Arc::new(Mutex::new(None)),
            error_callback: Arc::new(Mutex::new(None)),
            connection_handle: Arc::new(Mutex::new(None)),
            intentional_disconnect: Arc::new(AtomicBool::new(false)),
            transport,
        })
    }

    /// Get the active provider variant.
    pub fn variant(&self) -> ProviderVariant {
        self.variant
    }

    /// Get the validated voice.
    pub fn voice(&self) -> RealtimeVoice {
        self.voice
    }

    /// Get the provider session ID if one has been confirmed.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    /// Get the current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Check whether the client is connected and ready for commands.
    pub fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Look up a stored conversation item by id.
    pub fn get_item(&self, id: &str) -> Option<ConversationItem> {
        self.store.read().get_item(id).cloned()
    }

    /// Snapshot of the transcription store in ledger order.
    pub fn ordered_items(&self) -> Vec<ConversationItem> {
        self.store.read().ordered_items()
    }

    /// Number of items currently in the transcription store.
    pub fn item_count(&self) -> usize {
        self.store.read().len()
    }

    /// The last provider-confirmed session config, if any.
    pub fn confirmed_config(&self) -> Option<SessionConfig> {
        self.baseline.read().clone()
    }

    /// Append extra text to the desired instructions before connecting.
    /// Does not require a connection and does not send anything.
    pub fn append_instructions(&self, extra: &str) {
        if extra.is_empty() {
            return;
        }
        let mut config = self.session_config.write();
        match config.instructions.as_mut() {
            Some(current) => {
                current.push_str("\n\n");
                current.push_str(extra);
            }
            None => config.instructions = Some(extra.to_string()),
        }
    }

    /// Register the subscriber for server events. The callback runs on the
    /// connection task after the store has been updated for the same frame,
    /// so `get_item` from within a handler sees consistent state.
    pub fn on_server_event(&self, callback: ServerEventCallback) {
        if let Ok(mut guard) = self.event_callback.try_lock() {
            *guard = Some(callback);
        } else {
            let slot = self.event_callback.clone();
            tokio::spawn(async move {
                *slot.lock().await = Some(callback);
            });
        }
    }

    /// Register the subscriber for transport-level errors.
    pub fn on_error(&self, callback: RealtimeErrorCallback) {
        if let Ok(mut guard) = self.error_callback.try_lock() {
            *guard = Some(callback);
        } else {
            let slot = self.error_callback.clone();
            tokio::spawn(async move {
                *slot.lock().await = Some(callback);
            });
        }
    }

    /// Connect to the realtime provider and negotiate the initial session.
    pub async fn connect(&self) -> RealtimeResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.intentional_disconnect.store(false, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Connecting;

        let (sink, stream) = match self.transport.open(&self.connect_request).await {
            Ok(halves) => halves,
            Err(e) => {
                *self.state.write() = ConnectionState::Disconnected;
                return Err(e);
            }
        };

        info!(variant = %self.variant, "connected to realtime provider");

        let (tx, rx) = mpsc::channel::<OutboundFrame>(WS_CHANNEL_CAPACITY);
        *self.ws_sender.lock().await = Some(tx);

        self.connected.store(true, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Connected;

        let shared = ConnectionShared {
            store: self.store.clone(),
            baseline: self.baseline.clone(),
            session_config: self.session_config.clone(),
            session_id: self.session_id.clone(),
            state: self.state.clone(),
            connected: self.connected.clone(),
            intentional_disconnect: self.intentional_disconnect.clone(),
            ws_sender: self.ws_sender.clone(),
            event_callback: self.event_callback.clone(),
            error_callback: self.error_callback.clone(),
            transport: self.transport.clone(),
            connect_request: self.connect_request.clone(),
            reconnection: self.reconnection.clone(),
            debug_frames: self.debug_frames,
        };

        let handle = tokio::spawn(run_connection(shared, sink, stream, rx));
        *self.connection_handle.lock().await = Some(handle);

        // Negotiate the initial session configuration.
        let session = self.session_config.read().clone();
        self.send_event(ClientEvent::SessionUpdate { session }).await
    }

    /// Disconnect without reconnecting. Used for intentional teardown.
    pub async fn disconnect(&self) {
        self.intentional_disconnect.store(true, Ordering::SeqCst);

        *self.ws_sender.lock().await = None;

        if let Some(handle) = self.connection_handle.lock().await.take() {
            handle.abort();
        }

        self.connected.store(false, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Disconnected;
        *self.session_id.write() = None;

        info!("disconnected from realtime provider");
    }

    // -------------------------------------------------------------------------
    // Commands (valid only while connected)
    // -------------------------------------------------------------------------

    /// Merge a partial config into the negotiation state and send the result.
    pub async fn update_session(&self, overlay: SessionConfig) -> RealtimeResult<()> {
        self.ensure_connected()?;
        let merged = {
            let mut config = self.session_config.write();
            config.merge(overlay);
            config.clone()
        };
        self.send_event(ClientEvent::SessionUpdate { session: merged })
            .await
    }

    /// Append an audio chunk to the input buffer. Empty chunks are skipped.
    pub async fn append_input_audio(&self, chunk: &[u8]) -> RealtimeResult<()> {
        self.ensure_connected()?;
        if chunk.is_empty() {
            return Ok(());
        }
        self.send_event(ClientEvent::audio_append(chunk)).await
    }

    /// Commit the input audio buffer as a user turn.
    pub async fn commit_input_audio(&self) -> RealtimeResult<()> {
        self.ensure_connected()?;
        self.send_event(ClientEvent::InputAudioBufferCommit).await
    }

    /// Clear the input audio buffer.
    pub async fn clear_input_audio(&self) -> RealtimeResult<()> {
        self.ensure_connected()?;
        self.send_event(ClientEvent::InputAudioBufferClear).await
    }

    /// Ask the provider to create a conversation item.
    ///
    /// The store records the item only when the provider echoes its
    /// creation; local calls are never applied optimistically, which keeps
    /// the provider as the ordering authority.
    pub async fn create_conversation_item(
        &self,
        item: ConversationItem,
        previous_item_id: Option<String>,
    ) -> RealtimeResult<()> {
        self.ensure_connected()?;
        self.send_event(ClientEvent::ConversationItemCreate {
            item,
            previous_item_id,
        })
        .await
    }

    /// Truncate an already-played conversation item.
    pub async fn truncate_conversation_item(
        &self,
        item_id: &str,
        content_index: u32,
        audio_end_ms: u32,
    ) -> RealtimeResult<()> {
        self.ensure_connected()?;
        self.send_event(ClientEvent::ConversationItemTruncate {
            item_id: item_id.to_string(),
            content_index,
            audio_end_ms,
        })
        .await
    }

    /// Delete a conversation item.
    pub async fn delete_conversation_item(&self, item_id: &str) -> RealtimeResult<()> {
        self.ensure_connected()?;
        self.send_event(ClientEvent::ConversationItemDelete {
            item_id: item_id.to_string(),
        })
        .await
    }

    /// Request the model to generate a response.
    pub async fn create_response(&self, response: Option<ResponseConfig>) -> RealtimeResult<()> {
        self.ensure_connected()?;
        self.send_event(ClientEvent::ResponseCreate { response })
            .await
    }

    /// Cancel the in-flight response.
    pub async fn cancel_response(&self) -> RealtimeResult<()> {
        self.ensure_connected()?;
        self.send_event(ClientEvent::ResponseCancel).await
    }

    // -------------------------------------------------------------------------
    // Internal
    // -------------------------------------------------------------------------

    fn ensure_connected(&self) -> RealtimeResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RealtimeError::NotConnected)
        }
    }

    async fn send_event(&self, event: ClientEvent) -> RealtimeResult<()> {
        let guard = self.ws_sender.lock().await;
        match guard.as_ref() {
            Some(sender) => sender
                .send(OutboundFrame::new(event))
                .await
                .map_err(|e| RealtimeError::WebSocketError(e.to_string())),
            None => Err(RealtimeError::NotConnected),
        }
    }
}

/// Build the connect request (URL + auth headers) for the active variant.
fn build_connect_request(
    base_url: &str,
    variant: ProviderVariant,
    config: &ClientConfig,
) -> ConnectRequest {
    let url = match variant {
        ProviderVariant::Direct if !config.model.is_empty() => {
            let sep = if base_url.contains('?') { '&' } else { '?' };
            format!("{base_url}{sep}model={}", config.model)
        }
        // Azure encodes the deployment in the caller-provided URL.
        _ => base_url.to_string(),
    };

    let headers = match variant {
        ProviderVariant::Direct => vec![
            (
                "Authorization".to_string(),
                format!("Bearer {}", config.api_key),
            ),
            ("OpenAI-Beta".to_string(), "realtime=v1".to_string()),
            ("Sec-WebSocket-Protocol".to_string(), "realtime".to_string()),
        ],
        ProviderVariant::Azure => vec![("api-key".to_string(), config.api_key.clone())],
    };

    ConnectRequest { url, headers }
}

/// Translate the construction config into the initial wire session config.
fn build_session_config(config: &ClientConfig, voice: RealtimeVoice) -> SessionConfig {
    SessionConfig {
        modalities: Some(
            config
                .modalities
                .clone()
                .unwrap_or_else(|| vec!["text".to_string(), "audio".to_string()]),
        ),
        instructions: config.instructions.clone(),
        voice: Some(voice.as_str().to_string()),
        input_audio_format: Some(
            config
                .input_audio_format
                .clone()
                .unwrap_or_else(|| "pcm16".to_string()),
        ),
        output_audio_format: Some(
            config
                .output_audio_format
                .clone()
                .unwrap_or_else(|| "pcm16".to_string()),
        ),
        input_audio_transcription: config
            .transcription_model
            .as_ref()
            .map(|model| InputAudioTranscription {
                model: model.clone(),
            }),
        turn_detection: config.turn_detection.as_ref().map(|td| match td {
            TurnDetectionConfig::ServerVad {
                threshold,
                prefix_padding_ms,
                silence_duration_ms,
                create_response,
                interrupt_response,
            } => TurnDetection::ServerVad {
                threshold: *threshold,
                prefix_padding_ms: *prefix_padding_ms,
                silence_duration_ms: *silence_duration_ms,
                create_response: *create_response,
                interrupt_response: *interrupt_response,
            },
            TurnDetectionConfig::SemanticVad {
                eagerness,
                create_response,
                interrupt_response,
            } => TurnDetection::SemanticVad {
                eagerness: eagerness.clone(),
                create_response: *create_response,
                interrupt_response: *interrupt_response,
            },
            TurnDetectionConfig::None => TurnDetection::None {},
        }),
        tools: config.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|t| ToolDef {
                    tool_type: t.tool_type.clone(),
                    name: t.function.name.clone(),
                    description: t.function.description.clone(),
                    parameters: t.function.parameters.clone(),
                })
                .collect()
        }),
        tool_choice: config.tool_choice.clone(),
        temperature: config.temperature,
        max_response_output_tokens: config.max_response_output_tokens.map(|t| {
            if t < 0 {
                MaxTokens::Infinite("inf".to_string())
            } else {
                MaxTokens::Number(t)
            }
        }),
    }
}

/// Connection task: pumps outbound frames, dispatches inbound frames, and
/// drives the reconnect-with-replay loop.
async fn run_connection(
    shared: ConnectionShared,
    mut sink: TransportSink,
    mut stream: TransportStream,
    mut rx: mpsc::Receiver<OutboundFrame>,
) {
    let mut reconnect_attempt: u32 = 0;

    'outer: loop {
        // Main message processing loop.
        loop {
            tokio::select! {
                outbound = rx.recv() => {
                    let Some(frame) = outbound else {
                        // Sender dropped: intentional disconnect in progress.
                        break;
                    };
                    let json = match serde_json::to_string(&frame) {
                        Ok(j) => j,
                        Err(e) => {
                            error!("failed to serialize outbound frame: {e}");
                            continue;
                        }
                    };
                    if shared.debug_frames {
                        debug!(frame = %json, "-> realtime");
                    }
                    if let Err(e) = sink.send(TransportFrame::Text(json)).await {
                        error!("failed to send frame: {e}");
                        break;
                    }
                }

                inbound = stream.next() => {
                    match inbound {
                        Some(Ok(TransportFrame::Text(text))) => {
                            reconnect_attempt = 0;
                            if shared.debug_frames {
                                debug!(frame = %text, "<- realtime");
                            }
                            match serde_json::from_str::<ServerEvent>(&text) {
                                Ok(event) => dispatch_server_event(&shared, event).await,
                                Err(e) => {
                                    warn!("failed to parse server event: {e} - {text}");
                                }
                            }
                        }
                        Some(Ok(TransportFrame::Ping(data))) => {
                            if let Err(e) = sink.send(TransportFrame::Pong(data)).await {
                                error!("failed to send pong: {e}");
                            }
                        }
                        Some(Ok(TransportFrame::Close)) => {
                            info!("connection closed by provider");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!("transport error: {e}");
                            break;
                        }
                        None => {
                            info!("transport stream ended");
                            break;
                        }
                    }
                }
            }
        }

        // Connection ended.
        shared.connected.store(false, Ordering::SeqCst);

        if shared.intentional_disconnect.load(Ordering::SeqCst) {
            *shared.state.write() = ConnectionState::Disconnected;
            break 'outer;
        }

        if !shared.reconnection.should_retry(reconnect_attempt) {
            warn!(
                "reconnection disabled or max attempts ({}) reached",
                shared.reconnection.max_attempts
            );
            if let Some(cb) = shared.error_callback.lock().await.as_ref() {
                cb(RealtimeError::ConnectionFailed(format!(
                    "connection lost after {reconnect_attempt} reconnection attempts"
                )))
                .await;
            }
            *shared.state.write() = ConnectionState::Disconnected;
            break 'outer;
        }

        reconnect_attempt += 1;
        *shared.state.write() = ConnectionState::Reconnecting;

        let delay_ms = shared.reconnection.calculate_delay(reconnect_attempt);
        info!(
            "attempting reconnection {}/{} in {}ms",
            reconnect_attempt,
            if shared.reconnection.max_attempts == 0 {
                "∞".to_string()
            } else {
                shared.reconnection.max_attempts.to_string()
            },
            delay_ms
        );
        tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;

        if shared.intentional_disconnect.load(Ordering::SeqCst) {
            *shared.state.write() = ConnectionState::Disconnected;
            break 'outer;
        }

        *shared.state.write() = ConnectionState::Connecting;
        match shared.transport.open(&shared.connect_request).await {
            Ok((new_sink, new_stream)) => {
                sink = new_sink;
                stream = new_stream;

                shared.connected.store(true, Ordering::SeqCst);
                *shared.state.write() = ConnectionState::Connected;
                // A fresh provider session will be created.
                *shared.session_id.write() = None;

                // Subscribers are deliberately not re-notified here: the
                // reconnect is transparent, and the context replay below
                // rebuilds the provider session silently.
                if let Err(e) = replay_context(&shared, &mut sink).await {
                    error!("context replay after reconnection failed: {e}");
                }
            }
            Err(e) => {
                error!("reconnection attempt {reconnect_attempt} failed: {e}");
                continue;
            }
        }
    }

    *shared.ws_sender.lock().await = None;
    info!("realtime connection task ended");
}

/// Resend the cached session baseline followed by every stored item, in
/// ledger order, each with its recorded previous-item reference.
async fn replay_context(
    shared: &ConnectionShared,
    sink: &mut TransportSink,
) -> RealtimeResult<()> {
    let session = shared
        .baseline
        .read()
        .clone()
        .unwrap_or_else(|| shared.session_config.read().clone());

    let mut frames = vec![OutboundFrame::new(ClientEvent::SessionUpdate { session })];
    let entries = shared.store.read().entries();
    let replayed = entries.len();
    for entry in entries {
        frames.push(OutboundFrame::new(ClientEvent::ConversationItemCreate {
            item: entry.item,
            previous_item_id: entry.previous_item_id,
        }));
    }

    for frame in frames {
        let json = serde_json::to_string(&frame)
            .map_err(|e| RealtimeError::SerializationError(e.to_string()))?;
        sink.send(TransportFrame::Text(json)).await?;
    }

    info!(items = replayed, "rebuilt upstream context after reconnection");
    Ok(())
}

/// Apply store mutations for a server event, then emit it to the
/// subscriber. Mutation strictly precedes notification so a handler's own
/// store reads observe consistent state.
async fn dispatch_server_event(shared: &ConnectionShared, event: ServerEvent) {
    match &event {
        ServerEvent::SessionCreated { session } => {
            info!(session_id = %session.id, "realtime session created");
            *shared.session_id.write() = Some(session.id.clone());
            *shared.baseline.write() = Some(session.clone().into_baseline());
        }
        ServerEvent::SessionUpdated { session } => {
            debug!(session_id = %session.id, "realtime session updated");
            *shared.baseline.write() = Some(session.clone().into_baseline());
        }
        ServerEvent::ConversationItemCreated {
            previous_item_id,
            item,
        } => {
            shared
                .store
                .write()
                .add_item(item.clone(), previous_item_id.clone());
        }
        ServerEvent::OutputItemAdded { item, .. } => {
            shared.store.write().add_item(item.clone(), None);
        }
        ServerEvent::OutputItemDone { item, .. } => {
            if let Some(id) = item.id.as_deref() {
                shared.store.write().update_item(id, ItemPatch::from_item(item));
            }
        }
        ServerEvent::TranscriptionCompleted {
            item_id, transcript, ..
        } => {
            shared
                .store
                .write()
                .add_transcript_to_item(item_id, transcript);
        }
        ServerEvent::ConversationItemDeleted { item_id } => {
            shared.store.write().remove_item(item_id);
        }
        ServerEvent::Error { error } => {
            error!("provider error: {} - {}", error.error_type, error.message);
            if let Some(cb) = shared.error_callback.lock().await.as_ref() {
                cb(RealtimeError::ProviderError(format!(
                    "{}: {}",
                    error.error_type, error.message
                )))
                .await;
            }
        }
        _ => {}
    }

    if let Some(cb) = shared.event_callback.lock().await.as_ref() {
        cb(event).await;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_transport() -> Arc<dyn RealtimeTransport> {
        struct Unreachable;

        #[async_trait::async_trait]
        impl RealtimeTransport for Unreachable {
            async fn open(
                &self,
                _request: &ConnectRequest,
            ) -> RealtimeResult<(TransportSink, TransportStream)> {
                panic!("transport must not be touched at construction time");
            }
        }

        Arc::new(Unreachable)
    }

    fn direct_config(voice: &str) -> ClientConfig {
        ClientConfig {
            api_key: "test_key".to_string(),
            model: "gpt-4o-realtime-preview".to_string(),
            voice: Some(voice.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_client_creation() {
        let client = RealtimeClient::new(direct_config("shimmer"), unreachable_transport()).unwrap();
        assert!(!client.is_ready());
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert_eq!(client.variant(), ProviderVariant::Direct);
        assert_eq!(client.voice(), RealtimeVoice::Shimmer);
        assert_eq!(client.item_count(), 0);
    }

    #[tokio::test]
    async fn test_api_key_required() {
        let config = ClientConfig::default();
        let result = RealtimeClient::new(config, unreachable_transport());
        assert!(matches!(
            result,
            Err(RealtimeError::AuthenticationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_voice_outside_direct_set_rejected_before_connect() {
        // "breeze" belongs to the Azure set only. The transport panics if
        // touched, proving validation happens before any connection attempt.
        let result = RealtimeClient::new(direct_config("breeze"), unreachable_transport());
        assert!(matches!(
            result,
            Err(RealtimeError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_voice_outside_azure_set_rejected() {
        let config = ClientConfig {
            api_key: "test_key".to_string(),
            base_url: Some("wss://myres.openai.azure.com/openai/realtime".to_string()),
            voice: Some("alloy".to_string()),
            ..Default::default()
        };
        let result = RealtimeClient::new(config, unreachable_transport());
        assert!(matches!(
            result,
            Err(RealtimeError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_voice_rejected() {
        let result = RealtimeClient::new(direct_config("nightingale"), unreachable_transport());
        assert!(matches!(
            result,
            Err(RealtimeError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_azure_variant_default_voice() {
        let config = ClientConfig {
            api_key: "test_key".to_string(),
            base_url: Some("wss://myres.openai.azure.com/openai/realtime".to_string()),
            ..Default::default()
        };
        let client = RealtimeClient::new(config, unreachable_transport()).unwrap();
        assert_eq!(client.variant(), ProviderVariant::Azure);
        assert_eq!(client.voice(), RealtimeVoice::Breeze);
    }

    #[tokio::test]
    async fn test_commands_require_connection() {
        let client = RealtimeClient::new(direct_config("alloy"), unreachable_transport()).unwrap();

        assert!(matches!(
            client.append_input_audio(&[0u8; 16]).await,
            Err(RealtimeError::NotConnected)
        ));
        assert!(matches!(
            client.commit_input_audio().await,
            Err(RealtimeError::NotConnected)
        ));
        assert!(matches!(
            client.create_response(None).await,
            Err(RealtimeError::NotConnected)
        ));
        assert!(matches!(
            client.cancel_response().await,
            Err(RealtimeError::NotConnected)
        ));
        assert!(matches!(
            client
                .create_conversation_item(ConversationItem::user_message("hi"), None)
                .await,
            Err(RealtimeError::NotConnected)
        ));
        assert!(matches!(
            client.update_session(SessionConfig::default()).await,
            Err(RealtimeError::NotConnected)
        ));
    }

    #[test]
    fn test_direct_connect_request() {
        let config = direct_config("alloy");
        let request = build_connect_request(DEFAULT_REALTIME_URL, ProviderVariant::Direct, &config);
        assert!(request.url.contains("model=gpt-4o-realtime-preview"));
        assert!(
            request
                .headers
                .iter()
                .any(|(n, v)| n == "Authorization" && v == "Bearer test_key")
        );
        assert!(
            request
                .headers
                .iter()
                .any(|(n, v)| n == "OpenAI-Beta" && v == "realtime=v1")
        );
    }

    #[test]
    fn test_azure_connect_request() {
        let config = ClientConfig {
            api_key: "azure_key".to_string(),
            model: "ignored".to_string(),
            ..Default::default()
        };
        let url = "wss://myres.openai.azure.com/openai/realtime?api-version=2024-10-01";
        let request = build_connect_request(url, ProviderVariant::Azure, &config);
        // Azure deployment is encoded in the URL; no model parameter added.
        assert!(!request.url.contains("model=ignored"));
        assert!(
            request
                .headers
                .iter()
                .any(|(n, v)| n == "api-key" && v == "azure_key")
        );
        assert!(!request.headers.iter().any(|(n, _)| n == "Authorization"));
    }

    #[test]
    fn test_initial_session_config_defaults() {
        let config = direct_config("alloy");
        let session = build_session_config(&config, RealtimeVoice::Alloy);
        assert_eq!(session.voice.as_deref(), Some("alloy"));
        assert_eq!(session.input_audio_format.as_deref(), Some("pcm16"));
        assert_eq!(
            session.modalities.as_deref(),
            Some(&["text".to_string(), "audio".to_string()][..])
        );
        assert!(session.input_audio_transcription.is_none());
    }

    #[test]
    fn test_max_tokens_mapping() {
        let mut config = direct_config("alloy");
        config.max_response_output_tokens = Some(-1);
        let session = build_session_config(&config, RealtimeVoice::Alloy);
        assert!(matches!(
            session.max_response_output_tokens,
            Some(MaxTokens::Infinite(_))
        ));
    }
}
