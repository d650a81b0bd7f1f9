//! Per-session orchestrator.
//!
//! The orchestrator binds one realtime protocol client to one downstream
//! session. It owns every piece of per-session runtime state and every
//! timer, enforces the concurrency policy (serialized tool execution, echo
//! suppression, adaptive idle behavior) and bridges between protocol
//! events, the downstream transport and the external tool/memory
//! collaborators.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use base64::prelude::*;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::collab::{MemoryScope, MemoryStore, ToolDispatcher, tools::render_transcript};
use crate::core::realtime::{
    ConversationItem, RealtimeClient, RealtimeError, RealtimeResult, ResponseConfig, ServerEvent,
};

use super::idle::IdleBackoff;
use super::state::SessionRuntimeState;

// =============================================================================
// Configuration
// =============================================================================

/// Tunable per-session timing parameters.
#[derive(Debug, Clone)]
pub struct SessionTuning {
    /// Delay for the first idle cycle (ms)
    pub idle_base_delay_ms: u64,
    /// Cap on the idle delay (ms)
    pub idle_max_delay_ms: u64,
    /// Accumulated idle time after which reprompts switch from active
    /// (may re-engage the user) to silent background prompts (ms)
    pub idle_silent_after_ms: u64,
    /// Echo suppression window after a completed user utterance (ms)
    pub echo_block_ms: u64,
    /// Upper bound on a single tool execution (ms)
    pub tool_timeout_ms: u64,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            idle_base_delay_ms: 8_000,
            idle_max_delay_ms: 120_000,
            idle_silent_after_ms: 90_000,
            echo_block_ms: 2_500,
            tool_timeout_ms: 30_000,
        }
    }
}

/// Identity and prompt text for one session. Prompt assembly happens
/// outside the gateway; the orchestrator only injects the finished text.
#[derive(Debug, Clone)]
pub struct SessionDescriptor {
    /// Gateway-side session id
    pub session_id: String,
    /// Owner of the conversation (tenant / end user)
    pub owner_id: String,
    /// Agent persona bound to this session
    pub agent_id: String,
    /// One-shot "answer the call" prompt sent on first connect
    pub greeting_prompt: String,
    /// Idle reprompt that may re-engage the user
    pub active_idle_prompt: String,
    /// Idle reprompt for background thinking only
    pub silent_idle_prompt: String,
    /// Timing parameters
    pub tuning: SessionTuning,
}

// =============================================================================
// Downstream events
// =============================================================================

/// Partial update attached to a conversation item event.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ItemDelta {
    /// Base64-encoded audio chunk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    /// Transcript fragment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    /// Text fragment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Function arguments fragment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Events emitted toward the downstream session transport.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Session is connected and negotiated
    Ready {
        /// Gateway session id
        session_id: String,
    },
    /// A conversation item was created or changed
    ConversationUpdated {
        /// Current item snapshot, when one is known
        item: Option<ConversationItem>,
        /// Incremental change that triggered the event
        delta: Option<ItemDelta>,
    },
    /// The user interrupted the assistant mid-response
    ConversationInterrupted,
    /// Human-readable error
    Error {
        /// Message for the downstream client
        message: String,
    },
    /// The session is closing
    Closing {
        /// Close reason
        reason: String,
    },
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Binds one protocol client to one downstream session and applies the
/// per-session concurrency policy.
pub struct SessionOrchestrator {
    descriptor: SessionDescriptor,
    client: Arc<RealtimeClient>,
    tools: Arc<dyn ToolDispatcher>,
    memory: Arc<dyn MemoryStore>,
    events: mpsc::Sender<SessionEvent>,
    runtime: Mutex<SessionRuntimeState>,
    idle_handle: Mutex<Option<JoinHandle<()>>>,
    torn_down: AtomicBool,
    /// Handle to self for timers and spawned completions
    weak: std::sync::Weak<Self>,
}

impl SessionOrchestrator {
    /// Create an orchestrator. Call [`start`](Self::start) to connect.
    pub fn new(
        descriptor: SessionDescriptor,
        client: Arc<RealtimeClient>,
        tools: Arc<dyn ToolDispatcher>,
        memory: Arc<dyn MemoryStore>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            descriptor,
            client,
            tools,
            memory,
            events,
            runtime: Mutex::new(SessionRuntimeState::default()),
            idle_handle: Mutex::new(None),
            torn_down: AtomicBool::new(false),
            weak: weak.clone(),
        })
    }

    /// The bound protocol client.
    pub fn client(&self) -> &Arc<RealtimeClient> {
        &self.client
    }

    /// Snapshot of the runtime state, for observability.
    pub async fn runtime_snapshot(&self) -> SessionRuntimeState {
        self.runtime.lock().await.clone()
    }

    fn idle_backoff(&self) -> IdleBackoff {
        IdleBackoff {
            base_delay_ms: self.descriptor.tuning.idle_base_delay_ms,
            max_delay_ms: self.descriptor.tuning.idle_max_delay_ms,
        }
    }

    /// Connect the protocol client, announce readiness and greet the
    /// caller. The idle timer is first armed when the greeting response
    /// completes.
    pub async fn start(&self) -> RealtimeResult<()> {
        // Fold remembered caller context into the instructions before the
        // session is negotiated.
        match self
            .memory
            .read(&self.descriptor.owner_id, &self.descriptor.agent_id, "profile")
            .await
        {
            Ok(profile) if !profile.is_empty() => {
                self.client
                    .append_instructions(&format!("Known caller context:\n{profile}"));
            }
            Ok(_) => {}
            Err(e) => warn!(session_id = %self.descriptor.session_id, "memory read failed: {e}"),
        }

        let weak = self.weak.clone();
        self.client.on_server_event(Arc::new(move |event| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(orchestrator) = weak.upgrade() {
                    orchestrator.handle_server_event(event).await;
                }
            })
        }));

        let weak = self.weak.clone();
        self.client.on_error(Arc::new(move |error| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(orchestrator) = weak.upgrade() {
                    orchestrator.handle_client_error(error).await;
                }
            })
        }));

        self.client.connect().await?;

        self.emit(SessionEvent::Ready {
            session_id: self.descriptor.session_id.clone(),
        })
        .await;

        info!(session_id = %self.descriptor.session_id, "session started, greeting caller");
        self.client
            .create_response(Some(ResponseConfig::prompted_without_tools(
                &self.descriptor.greeting_prompt,
            )))
            .await
    }

    // -------------------------------------------------------------------------
    // Downstream actions
    // -------------------------------------------------------------------------

    /// Inject an explicit user text message and request a response.
    pub async fn send_message(&self, text: &str) {
        self.note_user_activity().await;
        let result = async {
            self.client
                .create_conversation_item(ConversationItem::user_message(text), None)
                .await?;
            self.client.create_response(None).await
        }
        .await;
        self.run_or_notify(result, "send message").await;
    }

    /// Forward a user audio chunk upstream, unless echo suppression blocks
    /// it: audio arriving while the assistant is responding or playing, and
    /// within the block window after the last completed user utterance, is
    /// assumed to be the assistant's own synthesized output leaking back in.
    pub async fn append_audio(&self, audio_b64: &str) {
        match BASE64_STANDARD.decode(audio_b64) {
            Ok(bytes) => self.append_audio_bytes(&bytes).await,
            Err(e) => {
                self.emit(SessionEvent::Error {
                    message: format!("invalid audio payload: {e}"),
                })
                .await;
            }
        }
    }

    /// Raw-byte variant of [`append_audio`](Self::append_audio), used for
    /// binary downstream frames.
    pub async fn append_audio_bytes(&self, bytes: &[u8]) {
        let blocked = {
            let runtime = self.runtime.lock().await;
            runtime.is_busy()
                && runtime.last_user_message_time.is_some_and(|t| {
                    t.elapsed() < Duration::from_millis(self.descriptor.tuning.echo_block_ms)
                })
        };
        if blocked {
            debug!(session_id = %self.descriptor.session_id, "suppressed echo audio chunk");
            return;
        }

        let result = self.client.append_input_audio(bytes).await;
        self.run_or_notify(result, "append audio").await;
    }

    /// Commit the input audio buffer as a user turn.
    pub async fn commit_audio(&self) {
        let result = self.client.commit_input_audio().await;
        self.run_or_notify(result, "commit audio").await;
    }

    /// Cancel the in-flight response.
    pub async fn cancel_response(&self) {
        {
            let mut runtime = self.runtime.lock().await;
            runtime.audio_playing = false;
        }
        let result = self.client.cancel_response().await;
        self.run_or_notify(result, "cancel response").await;
    }

    /// Downstream playback of synthesized audio has finished.
    pub async fn playback_complete(&self) {
        {
            let mut runtime = self.runtime.lock().await;
            runtime.audio_playing = false;
        }
        self.maybe_arm_idle().await;
    }

    /// The downstream client declared the conversation finished.
    pub async fn conversation_completed(&self) {
        info!(session_id = %self.descriptor.session_id, "conversation completed");
        self.write_memory().await;
        self.emit(SessionEvent::Closing {
            reason: "conversation completed".to_string(),
        })
        .await;
        self.teardown().await;
    }

    /// Tear the session down: cancel timers, clear the function-call guard
    /// and disconnect the protocol client without reconnection.
    pub async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.idle_handle.lock().await.take() {
            handle.abort();
        }
        {
            let mut runtime = self.runtime.lock().await;
            runtime.pending_function_call_id = None;
            runtime.idle_armed = false;
        }
        self.client.disconnect().await;
        info!(session_id = %self.descriptor.session_id, "session torn down");
    }

    // -------------------------------------------------------------------------
    // Protocol event handling
    // -------------------------------------------------------------------------

    async fn handle_server_event(&self, event: ServerEvent) {
        if self.torn_down.load(Ordering::SeqCst) {
            return;
        }

        match event {
            ServerEvent::ResponseCreated { .. } => {
                {
                    let mut runtime = self.runtime.lock().await;
                    runtime.ai_responding = true;
                }
                self.cancel_idle_timer().await;
            }

            ServerEvent::ResponseDone { .. } => {
                {
                    let mut runtime = self.runtime.lock().await;
                    runtime.ai_responding = false;
                }
                self.maybe_arm_idle().await;
            }

            ServerEvent::AudioDelta { item_id, delta, .. } => {
                {
                    let mut runtime = self.runtime.lock().await;
                    runtime.audio_playing = true;
                }
                self.emit(SessionEvent::ConversationUpdated {
                    item: self.client.get_item(&item_id),
                    delta: Some(ItemDelta {
                        audio: Some(delta),
                        ..Default::default()
                    }),
                })
                .await;
            }

            ServerEvent::AudioTranscriptDelta { item_id, delta, .. } => {
                self.emit(SessionEvent::ConversationUpdated {
                    item: self.client.get_item(&item_id),
                    delta: Some(ItemDelta {
                        transcript: Some(delta),
                        ..Default::default()
                    }),
                })
                .await;
            }

            ServerEvent::TextDelta { item_id, delta, .. } => {
                self.emit(SessionEvent::ConversationUpdated {
                    item: self.client.get_item(&item_id),
                    delta: Some(ItemDelta {
                        text: Some(delta),
                        ..Default::default()
                    }),
                })
                .await;
            }

            ServerEvent::FunctionCallArgumentsDelta {
                call_id,
                item_id,
                delta,
                ..
            } => {
                let name = self
                    .client
                    .get_item(&item_id)
                    .and_then(|item| item.name)
                    .unwrap_or_default();
                self.tools.init_call(&call_id, &name, &delta).await;
                self.emit(SessionEvent::ConversationUpdated {
                    item: self.client.get_item(&item_id),
                    delta: Some(ItemDelta {
                        arguments: Some(delta),
                        ..Default::default()
                    }),
                })
                .await;
            }

            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                item_id,
                arguments,
                ..
            } => {
                self.try_dispatch_call(call_id, item_id, arguments).await;
            }

            ServerEvent::TranscriptionCompleted {
                item_id, transcript, ..
            } => {
                self.note_user_activity().await;
                self.emit(SessionEvent::ConversationUpdated {
                    item: self.client.get_item(&item_id),
                    delta: Some(ItemDelta {
                        transcript: Some(transcript.clone()),
                        ..Default::default()
                    }),
                })
                .await;
                self.recall_memory(transcript);
            }

            ServerEvent::InputAudioBufferCommitted { .. } => {
                self.note_user_activity().await;
            }

            ServerEvent::SpeechStarted { .. } => {
                let interrupted = {
                    let mut runtime = self.runtime.lock().await;
                    runtime.user_speaking = true;
                    runtime.is_busy()
                };
                if interrupted {
                    self.emit(SessionEvent::ConversationInterrupted).await;
                    let result = self.client.cancel_response().await;
                    self.run_or_notify(result, "interrupt response").await;
                }
            }

            ServerEvent::SpeechStopped { .. } => {
                let mut runtime = self.runtime.lock().await;
                runtime.user_speaking = false;
            }

            ServerEvent::ConversationItemCreated { item, .. }
            | ServerEvent::OutputItemAdded { item, .. }
            | ServerEvent::OutputItemDone { item, .. } => {
                self.emit(SessionEvent::ConversationUpdated {
                    item: Some(item),
                    delta: None,
                })
                .await;
            }

            ServerEvent::ConversationItemDeleted { item_id } => {
                debug!(session_id = %self.descriptor.session_id, item_id, "item deleted");
            }

            ServerEvent::Error { error } => {
                // Surfaced verbatim; the connection stays open.
                self.emit(SessionEvent::Error {
                    message: format!("{}: {}", error.error_type, error.message),
                })
                .await;
            }

            _ => {}
        }
    }

    async fn handle_client_error(&self, error: RealtimeError) {
        if self.torn_down.load(Ordering::SeqCst) {
            return;
        }
        // Provider errors already reach the session through the event path.
        if matches!(error, RealtimeError::ProviderError(_)) {
            return;
        }
        self.disconnect_and_notify(&error.to_string()).await;
    }

    // -------------------------------------------------------------------------
    // Function-call serialization
    // -------------------------------------------------------------------------

    /// Examine the single-slot guard and dispatch the call if it is free.
    /// Examinations are totally ordered by the runtime mutex; an
    /// overlapping call is dropped, never queued.
    async fn try_dispatch_call(&self, call_id: String, item_id: String, arguments: String) {
        let name = self
            .client
            .get_item(&item_id)
            .and_then(|item| item.name)
            .unwrap_or_default();

        {
            let mut runtime = self.runtime.lock().await;
            if let Some(pending) = runtime.pending_function_call_id.as_deref() {
                warn!(
                    session_id = %self.descriptor.session_id,
                    call_id,
                    pending,
                    "duplicate function call dropped"
                );
                return;
            }
            runtime.pending_function_call_id = Some(call_id.clone());
        }

        let Some(orchestrator) = self.weak.upgrade() else {
            return;
        };
        let timeout = Duration::from_millis(self.descriptor.tuning.tool_timeout_ms);
        tokio::spawn(async move {
            let owner_id = orchestrator.descriptor.owner_id.clone();
            let agent_id = orchestrator.descriptor.agent_id.clone();
            let outcome = tokio::time::timeout(
                timeout,
                orchestrator
                    .tools
                    .execute_call(&call_id, &name, &arguments, &owner_id, &agent_id),
            )
            .await;

            let output = match outcome {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    warn!(call_id, "tool execution failed: {e}");
                    serde_json::json!({ "error": e.to_string() }).to_string()
                }
                Err(_) => {
                    warn!(call_id, "tool execution timed out");
                    serde_json::json!({ "error": "tool execution timed out" }).to_string()
                }
            };

            orchestrator.complete_call(&call_id, &output).await;
        });
    }

    /// Release the guard for the matching call id and submit the result.
    async fn complete_call(&self, call_id: &str, output: &str) {
        {
            let mut runtime = self.runtime.lock().await;
            if runtime.pending_function_call_id.as_deref() != Some(call_id) {
                warn!(
                    session_id = %self.descriptor.session_id,
                    call_id,
                    "completion for a call that is not pending, ignoring"
                );
                return;
            }
            runtime.pending_function_call_id = None;
        }

        if self.torn_down.load(Ordering::SeqCst) {
            return;
        }

        let result = async {
            self.client
                .create_conversation_item(ConversationItem::function_output(call_id, output), None)
                .await?;
            self.client.create_response(None).await
        }
        .await;
        self.run_or_notify(result, "submit tool result").await;
    }

    // -------------------------------------------------------------------------
    // Idle scheduling
    // -------------------------------------------------------------------------

    async fn note_user_activity(&self) {
        {
            let mut runtime = self.runtime.lock().await;
            runtime.note_user_activity();
        }
        self.maybe_arm_idle().await;
    }

    async fn cancel_idle_timer(&self) {
        if let Some(handle) = self.idle_handle.lock().await.take() {
            handle.abort();
        }
        let mut runtime = self.runtime.lock().await;
        runtime.idle_armed = false;
    }

    /// (Re)arm the idle timer, unless a response is in flight or audio is
    /// still playing. The delay is recomputed from the cycle count on every
    /// arm.
    ///
    /// Returns an explicitly boxed `dyn Future` rather than being an
    /// `async fn`: the spawned idle task calls back into `on_idle_fire`,
    /// which awaits this method, forming an opaque-future cycle whose `Send`
    /// auto-trait the `tokio::spawn` bound cannot resolve. Erasing the return
    /// type to `Pin<Box<dyn Future + Send>>` breaks the cycle without changing
    /// behavior.
    fn maybe_arm_idle(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if self.torn_down.load(Ordering::SeqCst) {
                return;
            }

            let delay = {
                let mut runtime = self.runtime.lock().await;
                if runtime.is_busy() {
                    return;
                }
                let delay = self.idle_backoff().delay_for(runtime.idle_cycle_count);
                runtime.idle_armed = true;
                runtime.last_armed_delay = Some(delay);
                delay
            };

            debug!(
                session_id = %self.descriptor.session_id,
                delay_ms = delay.as_millis() as u64,
                "idle timer armed"
            );

            let weak = self.weak.clone();
            let mut handle = self.idle_handle.lock().await;
            if let Some(previous) = handle.take() {
                previous.abort();
            }
            *handle = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(orchestrator) = weak.upgrade() {
                    orchestrator.on_idle_fire(delay).await;
                }
            }));
        })
    }

    /// One idle cycle elapsed without user activity: inject the reprompt,
    /// advance the backoff state and re-arm.
    async fn on_idle_fire(&self, fired_delay: Duration) {
        if self.torn_down.load(Ordering::SeqCst) {
            return;
        }

        let silent = {
            let mut runtime = self.runtime.lock().await;
            runtime.idle_armed = false;
            if runtime.is_busy() {
                return;
            }
            runtime.accumulated_idle_ms += fired_delay.as_millis() as u64;
            runtime.idle_cycle_count += 1;
            runtime.accumulated_idle_ms >= self.descriptor.tuning.idle_silent_after_ms
        };

        debug!(
            session_id = %self.descriptor.session_id,
            silent,
            "idle cycle fired"
        );

        let response = if silent {
            // Background thinking only: no audio, no user engagement.
            ResponseConfig::prompted_text_only(&self.descriptor.silent_idle_prompt)
        } else {
            ResponseConfig {
                instructions: Some(self.descriptor.active_idle_prompt.clone()),
                ..Default::default()
            }
        };

        let result = self.client.create_response(Some(response)).await;
        self.run_or_notify(result, "idle reprompt").await;
        self.maybe_arm_idle().await;
    }

    // -------------------------------------------------------------------------
    // Memory bridging
    // -------------------------------------------------------------------------

    /// Search memory for context relevant to a completed user utterance and
    /// surface matches as a system item. Fire-and-forget.
    fn recall_memory(&self, transcript: String) {
        let Some(orchestrator) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let result = orchestrator
                .memory
                .search(
                    &orchestrator.descriptor.owner_id,
                    &orchestrator.descriptor.agent_id,
                    &transcript,
                    MemoryScope::Agent,
                )
                .await;
            match result {
                Ok(context) if !context.is_empty() => {
                    let item =
                        ConversationItem::system_message(&format!("Relevant memory:\n{context}"));
                    if let Err(e) = orchestrator.client.create_conversation_item(item, None).await {
                        debug!("memory context injection skipped: {e}");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("memory search failed: {e}"),
            }
        });
    }

    /// Persist the normalized transcript. Fire-and-forget.
    async fn write_memory(&self) {
        let entries = self.tools.history().await;
        if entries.is_empty() {
            return;
        }
        let transcript = render_transcript(&entries);
        let memory = self.memory.clone();
        let owner_id = self.descriptor.owner_id.clone();
        let agent_id = self.descriptor.agent_id.clone();
        tokio::spawn(async move {
            if let Err(e) = memory.write(&owner_id, &agent_id, &transcript).await {
                warn!("memory write failed: {e}");
            }
        });
    }

    // -------------------------------------------------------------------------
    // Error handling
    // -------------------------------------------------------------------------

    async fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event).await;
    }

    /// Convert command failures into downstream notifications. A
    /// precondition failure means the upstream connection is gone for good,
    /// so the session is closed gracefully instead of crashing.
    async fn run_or_notify(&self, result: RealtimeResult<()>, context: &str) {
        match result {
            Ok(()) => {}
            Err(RealtimeError::NotConnected) => {
                self.disconnect_and_notify("upstream connection lost").await;
            }
            Err(e) => {
                self.emit(SessionEvent::Error {
                    message: format!("{context}: {e}"),
                })
                .await;
            }
        }
    }

    async fn disconnect_and_notify(&self, reason: &str) {
        if self.torn_down.load(Ordering::SeqCst) {
            return;
        }
        self.emit(SessionEvent::Error {
            message: reason.to_string(),
        })
        .await;
        self.write_memory().await;
        self.emit(SessionEvent::Closing {
            reason: reason.to_string(),
        })
        .await;
        self.teardown().await;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::memory::InMemoryMemoryStore;
    use crate::collab::tools::{ToolError, TranscriptEntry};
    use crate::core::realtime::{
        ClientConfig, ConnectRequest, RealtimeTransport, ReconnectionConfig, TransportFrame,
        TransportSink, TransportStream,
    };
    use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
    use futures_util::{SinkExt, StreamExt};
    use std::sync::Mutex as StdMutex;

    /// Transport whose halves are plain channels, so tests can inject
    /// server frames and observe everything the client sends.
    struct PipeTransport {
        inbound: StdMutex<Option<UnboundedReceiver<TransportFrame>>>,
        outbound: UnboundedSender<TransportFrame>,
    }

    #[async_trait::async_trait]
    impl RealtimeTransport for PipeTransport {
        async fn open(
            &self,
            _request: &ConnectRequest,
        ) -> crate::core::realtime::RealtimeResult<(TransportSink, TransportStream)> {
            let receiver = self
                .inbound
                .lock()
                .unwrap()
                .take()
                .expect("transport opened twice");
            let sink = self
                .outbound
                .clone()
                .sink_map_err(|e| RealtimeError::WebSocketError(e.to_string()));
            let stream = receiver.map(Ok);
            Ok((Box::pin(sink), Box::pin(stream)))
        }
    }

    struct SlowTools {
        executed: StdMutex<Vec<String>>,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl ToolDispatcher for SlowTools {
        async fn init_call(&self, _call_id: &str, _name: &str, _args_fragment: &str) {}

        async fn execute_call(
            &self,
            call_id: &str,
            _name: &str,
            _arguments: &str,
            _owner_id: &str,
            _agent_id: &str,
        ) -> Result<String, ToolError> {
            self.executed.lock().unwrap().push(call_id.to_string());
            tokio::time::sleep(self.delay).await;
            Ok("{\"ok\":true}".to_string())
        }

        async fn history(&self) -> Vec<TranscriptEntry> {
            vec![TranscriptEntry::new("user", "hello")]
        }
    }

    struct Harness {
        orchestrator: Arc<SessionOrchestrator>,
        server_tx: UnboundedSender<TransportFrame>,
        sent_rx: UnboundedReceiver<TransportFrame>,
        events_rx: mpsc::Receiver<SessionEvent>,
        tools: Arc<SlowTools>,
    }

    async fn harness() -> Harness {
        harness_with(Duration::from_millis(10_000), SessionTuning {
            idle_base_delay_ms: 1_000,
            idle_max_delay_ms: 16_000,
            idle_silent_after_ms: 10_000,
            echo_block_ms: 2_500,
            tool_timeout_ms: 30_000,
        })
        .await
    }

    async fn harness_with(tool_delay: Duration, tuning: SessionTuning) -> Harness {
        let (server_tx, inbound_rx) = unbounded::<TransportFrame>();
        let (outbound_tx, sent_rx) = unbounded::<TransportFrame>();
        let transport = Arc::new(PipeTransport {
            inbound: StdMutex::new(Some(inbound_rx)),
            outbound: outbound_tx,
        });

        let client = Arc::new(
            RealtimeClient::new(
                ClientConfig {
                    api_key: "test_key".to_string(),
                    model: "gpt-4o-realtime-preview".to_string(),
                    voice: Some("alloy".to_string()),
                    reconnection: Some(ReconnectionConfig::disabled()),
                    ..Default::default()
                },
                transport,
            )
            .unwrap(),
        );

        let tools = Arc::new(SlowTools {
            executed: StdMutex::new(Vec::new()),
            delay: tool_delay,
        });
        let memory = Arc::new(InMemoryMemoryStore::new());
        let (events_tx, events_rx) = mpsc::channel(64);

        let orchestrator = SessionOrchestrator::new(
            SessionDescriptor {
                session_id: "sess_test".to_string(),
                owner_id: "owner".to_string(),
                agent_id: "agent".to_string(),
                greeting_prompt: "Answer the call naturally.".to_string(),
                active_idle_prompt: "Gently check in with the caller.".to_string(),
                silent_idle_prompt: "Reflect silently on the conversation.".to_string(),
                tuning,
            },
            client,
            tools.clone(),
            memory,
            events_tx,
        );

        orchestrator.start().await.unwrap();
        // Let the connection task pick up the initial frames.
        tokio::time::sleep(Duration::from_millis(1)).await;

        Harness {
            orchestrator,
            server_tx,
            sent_rx,
            events_rx,
            tools,
        }
    }

    fn inject(harness: &Harness, json: &str) {
        harness
            .server_tx
            .unbounded_send(TransportFrame::Text(json.to_string()))
            .unwrap();
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn drain_sent_types(harness: &mut Harness) -> Vec<String> {
        let mut types = Vec::new();
        while let Ok(Some(frame)) = harness.sent_rx.try_next() {
            if let TransportFrame::Text(text) = frame {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                types.push(value["type"].as_str().unwrap_or_default().to_string());
            }
        }
        types
    }

    fn response_created(id: &str) -> String {
        format!(r#"{{"type":"response.created","response":{{"id":"{id}"}}}}"#)
    }

    fn response_done(id: &str) -> String {
        format!(r#"{{"type":"response.done","response":{{"id":"{id}"}}}}"#)
    }

    fn audio_delta(item_id: &str) -> String {
        format!(
            r#"{{"type":"response.audio.delta","response_id":"r1","item_id":"{item_id}","output_index":0,"content_index":0,"delta":"AAAA"}}"#
        )
    }

    fn call_arguments_done(call_id: &str) -> String {
        format!(
            r#"{{"type":"response.function_call_arguments.done","response_id":"r1","item_id":"item_fn","output_index":0,"call_id":"{call_id}","arguments":"{{}}"}}"#
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_greeting_sent_on_start() {
        let mut harness = harness().await;
        let types = drain_sent_types(&mut harness);
        assert_eq!(types[0], "session.update");
        assert!(types.contains(&"response.create".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_lifecycle_and_idle_arming() {
        let mut harness = harness().await;

        // response.created -> responding, no timer
        inject(&harness, &response_created("r1"));
        settle().await;
        let state = harness.orchestrator.runtime_snapshot().await;
        assert!(state.ai_responding);
        assert!(!state.idle_armed);

        // audio starts playing
        inject(&harness, &audio_delta("item_1"));
        settle().await;
        let state = harness.orchestrator.runtime_snapshot().await;
        assert!(state.audio_playing);

        // response completes while audio is still playing: NOT armed yet
        inject(&harness, &response_done("r1"));
        settle().await;
        let state = harness.orchestrator.runtime_snapshot().await;
        assert!(!state.ai_responding);
        assert!(state.audio_playing);
        assert!(!state.idle_armed, "timer must wait for playback completion");

        // playback completes: armed with cycle 0 and a jittered base delay
        harness.orchestrator.playback_complete().await;
        let state = harness.orchestrator.runtime_snapshot().await;
        assert!(state.idle_armed);
        assert_eq!(state.idle_cycle_count, 0);
        let delay_ms = state.last_armed_delay.unwrap().as_millis() as u64;
        assert!(
            (800..=1200).contains(&delay_ms),
            "delay {delay_ms} outside jittered base window"
        );
        let _ = drain_sent_types(&mut harness);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_fire_increments_cycle_and_user_activity_resets() {
        let mut harness = harness().await;
        inject(&harness, &response_created("r1"));
        settle().await;
        inject(&harness, &response_done("r1"));
        settle().await;
        assert!(harness.orchestrator.runtime_snapshot().await.idle_armed);
        let _ = drain_sent_types(&mut harness);

        // Let the idle timer fire (max jittered delay is 1.2s).
        tokio::time::sleep(Duration::from_millis(1_300)).await;
        let state = harness.orchestrator.runtime_snapshot().await;
        assert_eq!(state.idle_cycle_count, 1);
        let types = drain_sent_types(&mut harness);
        assert!(types.contains(&"response.create".to_string()));

        // Committed user audio resets the backoff and re-arms immediately.
        inject(
            &harness,
            r#"{"type":"input_audio_buffer.committed","previous_item_id":null,"item_id":"item_u"}"#,
        );
        settle().await;
        let state = harness.orchestrator.runtime_snapshot().await;
        assert_eq!(state.idle_cycle_count, 0);
        assert_eq!(state.accumulated_idle_ms, 0);
        assert!(state.idle_armed);
        let delay_ms = state.last_armed_delay.unwrap().as_millis() as u64;
        assert!((800..=1200).contains(&delay_ms));
    }

    #[tokio::test(start_paused = true)]
    async fn test_function_call_guard_drops_overlapping_call() {
        let mut harness = harness().await;
        let _ = drain_sent_types(&mut harness);

        inject(&harness, &call_arguments_done("call_1"));
        settle().await;
        inject(&harness, &call_arguments_done("call_2"));
        settle().await;

        // Exactly one call reached the dispatcher; the overlap was dropped.
        assert_eq!(
            harness.tools.executed.lock().unwrap().as_slice(),
            &["call_1".to_string()]
        );
        let state = harness.orchestrator.runtime_snapshot().await;
        assert_eq!(state.pending_function_call_id.as_deref(), Some("call_1"));

        // Completion releases the guard and submits the result.
        tokio::time::sleep(Duration::from_millis(10_100)).await;
        let state = harness.orchestrator.runtime_snapshot().await;
        assert!(state.pending_function_call_id.is_none());
        let types = drain_sent_types(&mut harness);
        assert!(types.contains(&"conversation.item.create".to_string()));
        assert!(types.contains(&"response.create".to_string()));

        // The slot is free again for the next call.
        inject(&harness, &call_arguments_done("call_3"));
        settle().await;
        assert_eq!(harness.tools.executed.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_timeout_releases_guard() {
        let mut harness = harness_with(
            Duration::from_millis(60_000),
            SessionTuning {
                tool_timeout_ms: 5_000,
                ..Default::default()
            },
        )
        .await;
        let _ = drain_sent_types(&mut harness);

        inject(&harness, &call_arguments_done("call_slow"));
        settle().await;
        assert!(
            harness
                .orchestrator
                .runtime_snapshot()
                .await
                .pending_function_call_id
                .is_some()
        );

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        let state = harness.orchestrator.runtime_snapshot().await;
        assert!(
            state.pending_function_call_id.is_none(),
            "guard must self-release on timeout"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_suppression_window() {
        let mut harness = harness().await;

        // Mark user activity, then make the session busy.
        harness.orchestrator.send_message("hello").await;
        inject(&harness, &response_created("r1"));
        inject(&harness, &audio_delta("item_1"));
        settle().await;
        let _ = drain_sent_types(&mut harness);

        // Within the block window while audio plays: dropped.
        harness.orchestrator.append_audio("AAAA").await;
        let types = drain_sent_types(&mut harness);
        assert!(
            !types.contains(&"input_audio_buffer.append".to_string()),
            "echo audio must not be forwarded"
        );

        // After the window elapses the same call is forwarded.
        tokio::time::sleep(Duration::from_millis(2_600)).await;
        harness.orchestrator.append_audio("AAAA").await;
        settle().await; // let the connection task pump the frame outbound
        let types = drain_sent_types(&mut harness);
        assert!(types.contains(&"input_audio_buffer.append".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_speech_start_during_response_interrupts() {
        let mut harness = harness().await;
        inject(&harness, &response_created("r1"));
        inject(&harness, &audio_delta("item_1"));
        settle().await;
        let _ = drain_sent_types(&mut harness);

        inject(
            &harness,
            r#"{"type":"input_audio_buffer.speech_started","audio_start_ms":100,"item_id":"item_2"}"#,
        );
        settle().await;

        let mut interrupted = false;
        while let Ok(event) = harness.events_rx.try_recv() {
            if matches!(event, SessionEvent::ConversationInterrupted) {
                interrupted = true;
            }
        }
        assert!(interrupted);
        let types = drain_sent_types(&mut harness);
        assert!(types.contains(&"response.cancel".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_clears_timers_and_guard() {
        let mut harness = harness().await;
        inject(&harness, &call_arguments_done("call_1"));
        settle().await;
        inject(&harness, &response_done("r0"));
        settle().await;

        harness.orchestrator.teardown().await;
        let state = harness.orchestrator.runtime_snapshot().await;
        assert!(state.pending_function_call_id.is_none());
        assert!(!state.idle_armed);
        assert!(!harness.orchestrator.client().is_ready());
        let _ = drain_sent_types(&mut harness);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_error_surfaces_without_closing() {
        let mut harness = harness().await;
        inject(
            &harness,
            r#"{"type":"error","error":{"type":"invalid_request_error","message":"bad frame"}}"#,
        );
        settle().await;

        let mut saw_error = false;
        while let Ok(event) = harness.events_rx.try_recv() {
            if let SessionEvent::Error { message } = event {
                assert!(message.contains("bad frame"));
                saw_error = true;
            }
        }
        assert!(saw_error);
        assert!(harness.orchestrator.client().is_ready());
    }
}
