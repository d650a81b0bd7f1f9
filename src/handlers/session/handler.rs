//! Downstream session WebSocket handler.
//!
//! Upgrades the HTTP connection, binds the socket to a new session
//! orchestrator and pumps messages both ways. The downstream client doubles
//! as the tool executor: `function_call` requests are forwarded to it and
//! resolved by its `function_result` replies.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::StreamExt;
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::collab::tools::transcript_from_items;
use crate::collab::{ToolDispatcher, ToolError, TranscriptEntry};
use crate::core::realtime::{
    ClientConfig, DEFAULT_REALTIME_URL, FunctionDefinition, ProviderVariant, RealtimeClient,
    ReconnectionConfig, ToolDefinition, TurnDetectionConfig, WebSocketTransport,
};
use crate::session::{SessionDescriptor, SessionEvent, SessionOrchestrator};
use crate::state::AppState;

use super::messages::{IncomingSessionMessage, OutgoingSessionMessage, SessionStartConfig};

/// Channel buffer size for outgoing messages
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Session WebSocket handler.
///
/// # Protocol
///
/// After the upgrade, the client sends a `start` message to bind the socket
/// to a session. The gateway responds with `ready`, then streams
/// `conversation_updated` / `conversation_interrupted` / `function_call`
/// events. Binary frames carry raw user audio.
pub async fn session_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!("session WebSocket upgrade requested");
    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_session_socket(socket, state))
}

async fn handle_session_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<OutgoingSessionMessage>(CHANNEL_BUFFER_SIZE);

    // Sender task owns the ws sink; a `closing` message also closes the socket.
    let sender_task = tokio::spawn(async move {
        use futures::SinkExt;
        while let Some(message) = out_rx.recv().await {
            let closing = matches!(message, OutgoingSessionMessage::Closing { .. });
            match serde_json::to_string(&message) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("failed to serialize outgoing message: {e}");
                    continue;
                }
            }
            if closing {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    });

    // The first message must be `start`.
    let start = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<IncomingSessionMessage>(&text) {
                    Ok(message) => {
                        if let Err(e) = message.validate() {
                            send_error(&out_tx, &e.to_string()).await;
                            continue;
                        }
                        match message {
                            IncomingSessionMessage::Start(config) => break config,
                            _ => {
                                send_error(&out_tx, "session not started: send a start message")
                                    .await;
                            }
                        }
                    }
                    Err(e) => send_error(&out_tx, &format!("invalid message format: {e}")).await,
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                sender_task.abort();
                return;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("session WebSocket error before start: {e}");
                sender_task.abort();
                return;
            }
        }
    };

    let Some((orchestrator, bridge, mut events_rx)) =
        bind_session(&state, start, &out_tx).await
    else {
        // Give the sender task a chance to flush the error.
        drop(out_tx);
        let _ = sender_task.await;
        return;
    };

    loop {
        select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(message)) => {
                        if !process_incoming(message, &orchestrator, &bridge, &out_tx).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("session WebSocket error: {e}");
                        break;
                    }
                    None => {
                        info!("session WebSocket closed by client");
                        break;
                    }
                }
            }
            event = events_rx.recv() => {
                match event {
                    Some(event) => {
                        let closing = matches!(event, SessionEvent::Closing { .. });
                        let _ = out_tx.send(outgoing_from_event(event)).await;
                        if closing {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    orchestrator.teardown().await;
    sender_task.abort();
    info!("session WebSocket terminated");
}

/// Build the protocol client, tool bridge and orchestrator for a session.
async fn bind_session(
    state: &Arc<AppState>,
    start: SessionStartConfig,
    out_tx: &mpsc::Sender<OutgoingSessionMessage>,
) -> Option<(
    Arc<SessionOrchestrator>,
    Arc<WsToolBridge>,
    mpsc::Receiver<SessionEvent>,
)> {
    let config = &state.config;
    let base_url = config.realtime_base_url.clone();
    let variant =
        ProviderVariant::from_url(base_url.as_deref().unwrap_or(DEFAULT_REALTIME_URL));

    let api_key = match variant {
        ProviderVariant::Direct => config.openai_api_key.clone(),
        ProviderVariant::Azure => config.azure_api_key.clone(),
    };
    let Some(api_key) = api_key else {
        send_error(
            out_tx,
            &format!("API key not configured for the {variant} variant"),
        )
        .await;
        return None;
    };

    let client_config = ClientConfig {
        api_key,
        base_url,
        model: start.model.unwrap_or_else(|| config.default_model.clone()),
        voice: start.voice.or_else(|| config.default_voice.clone()),
        instructions: start.instructions,
        temperature: start.temperature,
        transcription_model: start
            .transcription_model
            .or_else(|| Some("whisper-1".to_string())),
        turn_detection: Some(TurnDetectionConfig::default()),
        tools: start.tools.map(|tools| {
            tools
                .into_iter()
                .map(|t| ToolDefinition {
                    tool_type: t.tool_type,
                    function: FunctionDefinition {
                        name: t.function.name,
                        description: t.function.description,
                        parameters: t.function.parameters,
                    },
                })
                .collect()
        }),
        reconnection: Some(if config.auto_reconnect {
            ReconnectionConfig::default()
        } else {
            ReconnectionConfig::disabled()
        }),
        debug: config.debug_frames,
        ..Default::default()
    };

    let client = match RealtimeClient::new(client_config, Arc::new(WebSocketTransport::new())) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            send_error(out_tx, &format!("failed to create session: {e}")).await;
            return None;
        }
    };

    let bridge = Arc::new(WsToolBridge::new(out_tx.clone()));
    bridge.bind_client(client.clone());

    let (events_tx, events_rx) = mpsc::channel::<SessionEvent>(CHANNEL_BUFFER_SIZE);
    let session_id = uuid::Uuid::new_v4().to_string();
    let descriptor = SessionDescriptor {
        session_id: session_id.clone(),
        owner_id: start.owner_id,
        agent_id: start.agent_id,
        greeting_prompt: start
            .greeting_prompt
            .unwrap_or_else(|| config.greeting_prompt.clone()),
        active_idle_prompt: start
            .active_idle_prompt
            .unwrap_or_else(|| config.active_idle_prompt.clone()),
        silent_idle_prompt: start
            .silent_idle_prompt
            .unwrap_or_else(|| config.silent_idle_prompt.clone()),
        tuning: config.session_tuning(),
    };

    let orchestrator = SessionOrchestrator::new(
        descriptor,
        client,
        bridge.clone(),
        state.memory.clone(),
        events_tx,
    );

    if let Err(e) = orchestrator.start().await {
        send_error(out_tx, &format!("failed to connect session: {e}")).await;
        orchestrator.teardown().await;
        return None;
    }

    info!(session_id, "session bound");
    Some((orchestrator, bridge, events_rx))
}

/// Process one incoming downstream message. Returns false to end the session.
async fn process_incoming(
    message: Message,
    orchestrator: &Arc<SessionOrchestrator>,
    bridge: &Arc<WsToolBridge>,
    out_tx: &mpsc::Sender<OutgoingSessionMessage>,
) -> bool {
    match message {
        Message::Text(text) => {
            let incoming: IncomingSessionMessage = match serde_json::from_str(&text) {
                Ok(message) => message,
                Err(e) => {
                    send_error(out_tx, &format!("invalid message format: {e}")).await;
                    return true;
                }
            };
            if let Err(e) = incoming.validate() {
                send_error(out_tx, &e.to_string()).await;
                return true;
            }

            match incoming {
                IncomingSessionMessage::Start(_) => {
                    send_error(out_tx, "session already started").await;
                    true
                }
                IncomingSessionMessage::SendMessage { text } => {
                    orchestrator.send_message(&text).await;
                    true
                }
                IncomingSessionMessage::AppendAudio { audio } => {
                    orchestrator.append_audio(&audio).await;
                    true
                }
                IncomingSessionMessage::CommitAudio => {
                    orchestrator.commit_audio().await;
                    true
                }
                IncomingSessionMessage::PlaybackComplete => {
                    orchestrator.playback_complete().await;
                    true
                }
                IncomingSessionMessage::CancelResponse => {
                    orchestrator.cancel_response().await;
                    true
                }
                IncomingSessionMessage::FunctionResult { call_id, output } => {
                    if !bridge.resolve(&call_id, output) {
                        warn!(call_id, "function result for unknown call");
                    }
                    true
                }
                IncomingSessionMessage::ConversationCompleted => {
                    orchestrator.conversation_completed().await;
                    false
                }
            }
        }
        Message::Binary(data) => {
            debug!("received binary audio: {} bytes", data.len());
            orchestrator.append_audio_bytes(&data).await;
            true
        }
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            info!("session close received");
            false
        }
    }
}

fn outgoing_from_event(event: SessionEvent) -> OutgoingSessionMessage {
    match event {
        SessionEvent::Ready { session_id } => OutgoingSessionMessage::Ready { session_id },
        SessionEvent::ConversationUpdated { item, delta } => {
            OutgoingSessionMessage::ConversationUpdated { item, delta }
        }
        SessionEvent::ConversationInterrupted => OutgoingSessionMessage::ConversationInterrupted,
        SessionEvent::Error { message } => OutgoingSessionMessage::Error { message },
        SessionEvent::Closing { reason } => OutgoingSessionMessage::Closing { reason },
    }
}

async fn send_error(out_tx: &mpsc::Sender<OutgoingSessionMessage>, message: &str) {
    let _ = out_tx
        .send(OutgoingSessionMessage::Error {
            message: message.to_string(),
        })
        .await;
}

// =============================================================================
// Tool bridge
// =============================================================================

/// Tool dispatcher backed by the downstream WebSocket: the connected client
/// executes the call and reports back with a `function_result` message.
pub struct WsToolBridge {
    out_tx: mpsc::Sender<OutgoingSessionMessage>,
    pending: parking_lot::Mutex<HashMap<String, oneshot::Sender<String>>>,
    client: parking_lot::Mutex<Option<Arc<RealtimeClient>>>,
}

impl WsToolBridge {
    /// Create a bridge writing into the session's outgoing channel.
    pub fn new(out_tx: mpsc::Sender<OutgoingSessionMessage>) -> Self {
        Self {
            out_tx,
            pending: parking_lot::Mutex::new(HashMap::new()),
            client: parking_lot::Mutex::new(None),
        }
    }

    /// Attach the protocol client whose ledger backs `history()`.
    pub fn bind_client(&self, client: Arc<RealtimeClient>) {
        *self.client.lock() = Some(client);
    }

    /// Resolve a pending call with the downstream result. Returns false when
    /// no call with this id is waiting (already timed out or never issued).
    pub fn resolve(&self, call_id: &str, output: String) -> bool {
        match self.pending.lock().remove(call_id) {
            Some(tx) => tx.send(output).is_ok(),
            None => false,
        }
    }
}

#[async_trait::async_trait]
impl ToolDispatcher for WsToolBridge {
    async fn init_call(&self, call_id: &str, name: &str, _args_fragment: &str) {
        debug!(call_id, name, "tool call streaming");
    }

    async fn execute_call(
        &self,
        call_id: &str,
        name: &str,
        arguments: &str,
        _owner_id: &str,
        _agent_id: &str,
    ) -> Result<String, ToolError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(call_id.to_string(), tx);

        let request = OutgoingSessionMessage::FunctionCall {
            call_id: call_id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        };
        if self.out_tx.send(request).await.is_err() {
            self.pending.lock().remove(call_id);
            return Err(ToolError::ExecutorUnavailable(
                "downstream connection closed".to_string(),
            ));
        }

        rx.await.map_err(|_| {
            ToolError::ExecutorUnavailable("downstream client did not report a result".to_string())
        })
    }

    async fn history(&self) -> Vec<TranscriptEntry> {
        let client = self.client.lock().clone();
        match client {
            Some(client) => transcript_from_items(&client.ordered_items()),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bridge_resolves_pending_call() {
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let bridge = Arc::new(WsToolBridge::new(out_tx));

        let exec = {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                bridge
                    .execute_call("call_1", "lookup", "{}", "owner", "agent")
                    .await
            })
        };

        // The call request reaches the downstream channel.
        let request = out_rx.recv().await.unwrap();
        match request {
            OutgoingSessionMessage::FunctionCall { call_id, name, .. } => {
                assert_eq!(call_id, "call_1");
                assert_eq!(name, "lookup");
            }
            _ => panic!("expected function_call"),
        }

        assert!(bridge.resolve("call_1", "{\"ok\":true}".to_string()));
        let output = exec.await.unwrap().unwrap();
        assert!(output.contains("ok"));
    }

    #[tokio::test]
    async fn test_bridge_resolve_unknown_call() {
        let (out_tx, _out_rx) = mpsc::channel(8);
        let bridge = WsToolBridge::new(out_tx);
        assert!(!bridge.resolve("ghost", "{}".to_string()));
    }

    #[tokio::test]
    async fn test_bridge_execute_fails_when_downstream_gone() {
        let (out_tx, out_rx) = mpsc::channel(1);
        drop(out_rx);
        let bridge = WsToolBridge::new(out_tx);
        let result = bridge
            .execute_call("call_1", "lookup", "{}", "owner", "agent")
            .await;
        assert!(matches!(result, Err(ToolError::ExecutorUnavailable(_))));
        assert!(bridge.pending.lock().is_empty());
    }

    #[tokio::test]
    async fn test_bridge_history_without_client() {
        let (out_tx, _out_rx) = mpsc::channel(1);
        let bridge = WsToolBridge::new(out_tx);
        assert!(bridge.history().await.is_empty());
    }
}
