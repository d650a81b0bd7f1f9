//! Realtime protocol WebSocket message types.
//!
//! This module defines the client and server event types for the upstream
//! realtime protocol. All events are JSON-encoded text frames; every
//! outbound frame additionally carries a generated unique `event_id`.
//!
//! # Protocol Overview
//!
//! Client events (sent to server):
//! - session.update - Update session configuration
//! - input_audio_buffer.append - Append audio to buffer
//! - input_audio_buffer.commit - Commit audio buffer
//! - input_audio_buffer.clear - Clear audio buffer
//! - conversation.item.create - Add item to conversation
//! - conversation.item.truncate - Truncate a played item
//! - conversation.item.delete - Delete conversation item
//! - response.create - Generate a response
//! - response.cancel - Cancel current response
//!
//! Server events (received from server):
//! - session.created / session.updated - Session negotiation confirmed
//! - input_audio_buffer.speech_started / speech_stopped - VAD events
//! - input_audio_buffer.committed / cleared - Buffer lifecycle
//! - conversation.item.created / deleted / truncated - Conversation ledger
//! - conversation.item.input_audio_transcription.completed / failed
//! - response.created / done, response.output_item.added / done
//! - response.audio.delta / done, response.audio_transcript.delta / done
//! - response.text.delta / done
//! - response.function_call_arguments.delta / done
//! - rate_limits.updated, error

use base64::prelude::*;
use serde::{Deserialize, Serialize};

// =============================================================================
// Session Configuration
// =============================================================================

/// Wire-level session configuration.
///
/// This is the negotiation state exchanged with the provider; the last
/// provider-confirmed copy (identity fields stripped) becomes the baseline
/// replayed on reconnect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Response modalities (text, audio)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    /// System instructions for the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Voice for audio output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Input audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    /// Output audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,

    /// Input audio transcription configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    /// Turn detection configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,

    /// Tool definitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,

    /// Tool choice strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    /// Temperature for response generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum response output tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_response_output_tokens: Option<MaxTokens>,
}

impl SessionConfig {
    /// Shallow-merge an overlay into this config: fields the overlay sets
    /// replace the current value, unset fields are left alone.
    pub fn merge(&mut self, overlay: SessionConfig) {
        macro_rules! take {
            ($field:ident) => {
                if overlay.$field.is_some() {
                    self.$field = overlay.$field;
                }
            };
        }
        take!(modalities);
        take!(instructions);
        take!(voice);
        take!(input_audio_format);
        take!(output_audio_format);
        take!(input_audio_transcription);
        take!(turn_detection);
        take!(tools);
        take!(tool_choice);
        take!(temperature);
        take!(max_response_output_tokens);
    }
}

/// Maximum tokens configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaxTokens {
    /// Specific number of tokens
    Number(i32),
    /// Infinite tokens ("inf")
    Infinite(String),
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    /// Transcription model (e.g., "whisper-1")
    pub model: String,
}

/// Turn detection configuration on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold
        #[serde(skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        /// Audio prefix padding in ms
        #[serde(skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        /// Silence duration in ms
        #[serde(skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
        /// Whether to create response on turn end
        #[serde(skip_serializing_if = "Option::is_none")]
        create_response: Option<bool>,
        /// Whether to interrupt on speech
        #[serde(skip_serializing_if = "Option::is_none")]
        interrupt_response: Option<bool>,
    },
    /// Semantic VAD
    #[serde(rename = "semantic_vad")]
    SemanticVad {
        /// Eagerness level
        #[serde(skip_serializing_if = "Option::is_none")]
        eagerness: Option<String>,
        /// Whether to create response on turn end
        #[serde(skip_serializing_if = "Option::is_none")]
        create_response: Option<bool>,
        /// Whether to interrupt on speech
        #[serde(skip_serializing_if = "Option::is_none")]
        interrupt_response: Option<bool>,
    },
    /// No turn detection
    #[serde(rename = "none")]
    None {},
}

/// Tool definition on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    /// Tool type (always "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function name
    pub name: String,
    /// Function description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Function parameters JSON schema
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item: one turn-level unit of the transcript.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Item type (message, function_call, function_call_output)
    #[serde(rename = "type")]
    pub item_type: String,
    /// Item status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Item role (user, assistant, system)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content parts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
    /// Call ID for function call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Function name for function call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Function arguments for function call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    /// Function output for function call result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ConversationItem {
    /// Build a user text message item.
    pub fn user_message(text: &str) -> Self {
        Self {
            item_type: "message".to_string(),
            role: Some("user".to_string()),
            content: Some(vec![ContentPart {
                content_type: "input_text".to_string(),
                text: Some(text.to_string()),
                audio: None,
                transcript: None,
            }]),
            ..Default::default()
        }
    }

    /// Build a system text message item.
    pub fn system_message(text: &str) -> Self {
        Self {
            item_type: "message".to_string(),
            role: Some("system".to_string()),
            content: Some(vec![ContentPart {
                content_type: "input_text".to_string(),
                text: Some(text.to_string()),
                audio: None,
                transcript: None,
            }]),
            ..Default::default()
        }
    }

    /// Build a function call output item for a completed call.
    pub fn function_output(call_id: &str, output: &str) -> Self {
        Self {
            item_type: "function_call_output".to_string(),
            call_id: Some(call_id.to_string()),
            output: Some(output.to_string()),
            ..Default::default()
        }
    }
}

/// Content part within a conversation item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    /// Content type (input_text, input_audio, text, audio)
    #[serde(rename = "type")]
    pub content_type: String,
    /// Text content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Audio content (base64 encoded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    /// Transcript of audio content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

impl ContentPart {
    /// Whether this part can carry a transcript.
    pub fn is_transcript_capable(&self) -> bool {
        matches!(self.content_type.as_str(), "audio" | "input_audio")
    }
}

// =============================================================================
// Response Configuration
// =============================================================================

/// Response configuration for creating responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// Response modalities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
    /// Per-response instruction override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Voice for audio
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    /// Output audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,
    /// Tools
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,
    /// Tool choice
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    /// Temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Max output tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_response_output_tokens: Option<MaxTokens>,
}

impl ResponseConfig {
    /// A response driven by a one-off prompt, with tool use disabled.
    pub fn prompted_without_tools(instructions: &str) -> Self {
        Self {
            instructions: Some(instructions.to_string()),
            tool_choice: Some("none".to_string()),
            ..Default::default()
        }
    }

    /// A text-only response driven by a one-off prompt. Used for silent
    /// background prompts that must not produce audio output.
    pub fn prompted_text_only(instructions: &str) -> Self {
        Self {
            modalities: Some(vec!["text".to_string()]),
            instructions: Some(instructions.to_string()),
            ..Default::default()
        }
    }
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events sent to the realtime provider.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionConfig,
    },

    /// Append audio to input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded audio data
        audio: String,
    },

    /// Commit the input audio buffer
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    /// Clear the input audio buffer
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,

    /// Create a conversation item
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Item to create
        item: ConversationItem,
        /// Previous item ID to insert after
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_item_id: Option<String>,
    },

    /// Truncate a conversation item
    #[serde(rename = "conversation.item.truncate")]
    ConversationItemTruncate {
        /// Item ID
        item_id: String,
        /// Content index
        content_index: u32,
        /// Audio end in ms
        audio_end_ms: u32,
    },

    /// Delete a conversation item
    #[serde(rename = "conversation.item.delete")]
    ConversationItemDelete {
        /// Item ID
        item_id: String,
    },

    /// Create a response
    #[serde(rename = "response.create")]
    ResponseCreate {
        /// Response configuration
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseConfig>,
    },

    /// Cancel the current response
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    /// Create an audio append event from raw bytes.
    pub fn audio_append(data: &[u8]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(data),
        }
    }
}

/// Envelope for outbound frames: every frame sent upstream carries a
/// generated unique event id alongside the type-tagged payload.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundFrame {
    /// Generated unique event ID
    pub event_id: String,
    /// The event payload (type discriminator is flattened in)
    #[serde(flatten)]
    pub event: ClientEvent,
}

impl OutboundFrame {
    /// Wrap an event with a freshly generated event id.
    pub fn new(event: ClientEvent) -> Self {
        Self {
            event_id: format!("evt_{}", uuid::Uuid::new_v4().simple()),
            event,
        }
    }
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Server events received from the realtime provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Error occurred
    #[serde(rename = "error")]
    Error {
        /// Error details
        error: ApiError,
    },

    /// Session created
    #[serde(rename = "session.created")]
    SessionCreated {
        /// Session information
        session: Session,
    },

    /// Session updated
    #[serde(rename = "session.updated")]
    SessionUpdated {
        /// Session information
        session: Session,
    },

    /// Speech started (VAD detected speech)
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        /// Audio start timestamp in ms
        audio_start_ms: u64,
        /// Item ID
        item_id: String,
    },

    /// Speech stopped (VAD detected silence)
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        /// Audio end timestamp in ms
        audio_end_ms: u64,
        /// Item ID
        item_id: String,
    },

    /// Audio buffer committed
    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted {
        /// Previous item ID
        previous_item_id: Option<String>,
        /// New item ID
        item_id: String,
    },

    /// Audio buffer cleared
    #[serde(rename = "input_audio_buffer.cleared")]
    InputAudioBufferCleared,

    /// Conversation item created
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated {
        /// Previous item ID
        previous_item_id: Option<String>,
        /// Created item
        item: ConversationItem,
    },

    /// Input audio transcription completed
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        /// Item ID
        item_id: String,
        /// Content index
        content_index: u32,
        /// Transcript text
        transcript: String,
    },

    /// Input audio transcription failed
    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    TranscriptionFailed {
        /// Item ID
        item_id: String,
        /// Content index
        content_index: u32,
        /// Error details
        error: ApiError,
    },

    /// Conversation item truncated
    #[serde(rename = "conversation.item.truncated")]
    ConversationItemTruncated {
        /// Item ID
        item_id: String,
        /// Content index
        content_index: u32,
        /// Audio end in ms
        audio_end_ms: u32,
    },

    /// Conversation item deleted
    #[serde(rename = "conversation.item.deleted")]
    ConversationItemDeleted {
        /// Item ID
        item_id: String,
    },

    /// Response created
    #[serde(rename = "response.created")]
    ResponseCreated {
        /// Response information
        response: Response,
    },

    /// Response done
    #[serde(rename = "response.done")]
    ResponseDone {
        /// Response information
        response: Response,
    },

    /// Output item added to response
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        /// Response ID
        response_id: String,
        /// Output index
        output_index: u32,
        /// Item
        item: ConversationItem,
    },

    /// Output item done
    #[serde(rename = "response.output_item.done")]
    OutputItemDone {
        /// Response ID
        response_id: String,
        /// Output index
        output_index: u32,
        /// Item
        item: ConversationItem,
    },

    /// Text delta
    #[serde(rename = "response.text.delta")]
    TextDelta {
        /// Response ID
        response_id: String,
        /// Item ID
        item_id: String,
        /// Output index
        output_index: u32,
        /// Content index
        content_index: u32,
        /// Text delta
        delta: String,
    },

    /// Text done
    #[serde(rename = "response.text.done")]
    TextDone {
        /// Response ID
        response_id: String,
        /// Item ID
        item_id: String,
        /// Output index
        output_index: u32,
        /// Content index
        content_index: u32,
        /// Full text
        text: String,
    },

    /// Audio transcript delta
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        /// Response ID
        response_id: String,
        /// Item ID
        item_id: String,
        /// Output index
        output_index: u32,
        /// Content index
        content_index: u32,
        /// Transcript delta
        delta: String,
    },

    /// Audio transcript done
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        /// Response ID
        response_id: String,
        /// Item ID
        item_id: String,
        /// Output index
        output_index: u32,
        /// Content index
        content_index: u32,
        /// Full transcript
        transcript: String,
    },

    /// Audio delta (audio data chunk)
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Response ID
        response_id: String,
        /// Item ID
        item_id: String,
        /// Output index
        output_index: u32,
        /// Content index
        content_index: u32,
        /// Base64-encoded audio delta
        delta: String,
    },

    /// Audio done
    #[serde(rename = "response.audio.done")]
    AudioDone {
        /// Response ID
        response_id: String,
        /// Item ID
        item_id: String,
        /// Output index
        output_index: u32,
        /// Content index
        content_index: u32,
    },

    /// Function call arguments delta
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        /// Response ID
        response_id: String,
        /// Item ID
        item_id: String,
        /// Output index
        output_index: u32,
        /// Call ID
        call_id: String,
        /// Arguments delta
        delta: String,
    },

    /// Function call arguments done
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        /// Response ID
        response_id: String,
        /// Item ID
        item_id: String,
        /// Output index
        output_index: u32,
        /// Call ID
        call_id: String,
        /// Full arguments
        arguments: String,
    },

    /// Rate limits updated
    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated {
        /// Rate limit information
        rate_limits: Vec<RateLimit>,
    },
}

impl ServerEvent {
    /// Decode base64 audio from an AudioDelta event.
    pub fn decode_audio_delta(delta: &str) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(delta)
    }
}

// =============================================================================
// Supporting Types
// =============================================================================

/// API error information.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type")]
    pub error_type: String,
    /// Error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Error message
    pub message: String,
    /// Parameter that caused the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    /// Event ID that caused the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// Session information as confirmed by the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    /// Session ID
    pub id: String,
    /// Object type
    #[serde(default)]
    pub object: String,
    /// Model used
    #[serde(default)]
    pub model: String,
    /// Expires at timestamp
    #[serde(default)]
    pub expires_at: u64,
    /// Response modalities
    #[serde(default)]
    pub modalities: Option<Vec<String>>,
    /// System instructions
    #[serde(default)]
    pub instructions: Option<String>,
    /// Voice
    #[serde(default)]
    pub voice: Option<String>,
    /// Input audio format
    #[serde(default)]
    pub input_audio_format: Option<String>,
    /// Output audio format
    #[serde(default)]
    pub output_audio_format: Option<String>,
    /// Input audio transcription config
    #[serde(default)]
    pub input_audio_transcription: Option<InputAudioTranscription>,
    /// Turn detection config
    #[serde(default)]
    pub turn_detection: Option<TurnDetection>,
    /// Tools
    #[serde(default)]
    pub tools: Option<Vec<ToolDef>>,
    /// Tool choice
    #[serde(default)]
    pub tool_choice: Option<String>,
    /// Temperature
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Max response output tokens
    #[serde(default)]
    pub max_response_output_tokens: Option<MaxTokens>,
}

impl Session {
    /// Strip identity, timestamp and model fields and keep only the
    /// negotiable configuration. The result is cached as the reconnect
    /// baseline.
    pub fn into_baseline(self) -> SessionConfig {
        SessionConfig {
            modalities: self.modalities,
            instructions: self.instructions,
            voice: self.voice,
            input_audio_format: self.input_audio_format,
            output_audio_format: self.output_audio_format,
            input_audio_transcription: self.input_audio_transcription,
            turn_detection: self.turn_detection,
            tools: self.tools,
            tool_choice: self.tool_choice,
            temperature: self.temperature,
            max_response_output_tokens: self.max_response_output_tokens,
        }
    }
}

/// Response information.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    /// Response ID
    pub id: String,
    /// Object type
    #[serde(default)]
    pub object: String,
    /// Response status
    #[serde(default)]
    pub status: String,
    /// Status details
    #[serde(default)]
    pub status_details: Option<serde_json::Value>,
    /// Output items
    #[serde(default)]
    pub output: Vec<ConversationItem>,
    /// Usage information
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// Usage information.
#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    /// Total tokens
    #[serde(default)]
    pub total_tokens: u32,
    /// Input tokens
    #[serde(default)]
    pub input_tokens: u32,
    /// Output tokens
    #[serde(default)]
    pub output_tokens: u32,
}

/// Rate limit information.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimit {
    /// Rate limit name
    pub name: String,
    /// Limit value
    pub limit: u32,
    /// Remaining value
    pub remaining: u32,
    /// Reset timestamp
    pub reset_seconds: f64,
}

// =============================================================================
// Tests
// =============================================================================
