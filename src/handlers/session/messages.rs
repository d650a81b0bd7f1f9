//! Downstream session WebSocket message types.
//!
//! One downstream client drives one session. The protocol is deliberately
//! small: a `start` message binds the socket to a new session, after which
//! text/audio actions flow up and conversation events flow down.

use serde::{Deserialize, Serialize};

use crate::core::realtime::ConversationItem;
use crate::session::ItemDelta;

/// Maximum allowed size for instructions (100 KB)
pub const MAX_INSTRUCTIONS_SIZE: usize = 100 * 1024;

/// Maximum allowed size for text messages (50 KB)
pub const MAX_TEXT_SIZE: usize = 50 * 1024;

/// Maximum allowed size for a function result (100 KB)
pub const MAX_FUNCTION_RESULT_SIZE: usize = 100 * 1024;

// =============================================================================
// Incoming Messages (Client -> Gateway)
// =============================================================================

/// Incoming WebSocket messages from the downstream client.
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
#[allow(clippy::large_enum_variant)]
pub enum IncomingSessionMessage {
    /// Bind this socket to a new session
    #[serde(rename = "start")]
    Start(SessionStartConfig),

    /// Send an explicit user text message
    #[serde(rename = "send_message")]
    SendMessage {
        /// Message text
        text: String,
    },

    /// Append a base64-encoded user audio chunk
    #[serde(rename = "append_audio")]
    AppendAudio {
        /// Base64-encoded audio
        audio: String,
    },

    /// Commit the audio buffer (manual turn detection)
    #[serde(rename = "commit_audio")]
    CommitAudio,

    /// Downstream playback of assistant audio finished
    #[serde(rename = "playback_complete")]
    PlaybackComplete,

    /// Cancel the in-flight response
    #[serde(rename = "cancel_response")]
    CancelResponse,

    /// Report a tool execution result
    #[serde(rename = "function_result")]
    FunctionResult {
        /// Function call ID
        call_id: String,
        /// Result payload as a JSON string
        output: String,
    },

    /// The conversation is finished; close the session gracefully
    #[serde(rename = "conversation_completed")]
    ConversationCompleted,
}

/// Configuration carried by the `start` message.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SessionStartConfig {
    /// Conversation owner (tenant / end user)
    pub owner_id: String,

    /// Agent persona for this session
    pub agent_id: String,

    /// Voice for TTS output; must belong to the active provider variant
    #[serde(default)]
    pub voice: Option<String>,

    /// Model override
    #[serde(default)]
    pub model: Option<String>,

    /// System instructions for the assistant
    #[serde(default)]
    pub instructions: Option<String>,

    /// Temperature for response generation (0.0 to 2.0)
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Tool definitions the downstream client can execute
    #[serde(default)]
    pub tools: Option<Vec<ToolConfig>>,

    /// Transcription model for input audio (e.g. "whisper-1")
    #[serde(default)]
    pub transcription_model: Option<String>,

    /// Greeting prompt override
    #[serde(default)]
    pub greeting_prompt: Option<String>,

    /// Active idle reprompt override
    #[serde(default)]
    pub active_idle_prompt: Option<String>,

    /// Silent idle reprompt override
    #[serde(default)]
    pub silent_idle_prompt: Option<String>,
}

/// Tool configuration for function calling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Tool type (e.g., "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function definition
    pub function: FunctionConfig,
}

/// Function definition for tool calling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionConfig {
    /// Function name
    pub name: String,
    /// Function description
    #[serde(default)]
    pub description: Option<String>,
    /// JSON schema for parameters
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
}

// =============================================================================
// Outgoing Messages (Gateway -> Client)
// =============================================================================

/// Outgoing WebSocket messages to the downstream client.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum OutgoingSessionMessage {
    /// Session is connected and negotiated
    #[serde(rename = "ready")]
    Ready {
        /// Gateway session ID
        session_id: String,
    },

    /// A conversation item was created or changed
    #[serde(rename = "conversation_updated")]
    ConversationUpdated {
        /// Current item snapshot, when known
        #[serde(skip_serializing_if = "Option::is_none")]
        item: Option<ConversationItem>,
        /// Incremental change
        #[serde(skip_serializing_if = "Option::is_none")]
        delta: Option<ItemDelta>,
    },

    /// The user interrupted the assistant mid-response
    #[serde(rename = "conversation_interrupted")]
    ConversationInterrupted,

    /// Tool execution request for the downstream client
    #[serde(rename = "function_call")]
    FunctionCall {
        /// Call ID
        call_id: String,
        /// Function name
        name: String,
        /// JSON arguments
        arguments: String,
    },

    /// Error message
    #[serde(rename = "error")]
    Error {
        /// Error message
        message: String,
    },

    /// Connection closing
    #[serde(rename = "closing")]
    Closing {
        /// Reason for closing
        reason: String,
    },
}

// =============================================================================
// Validation
// =============================================================================

/// Error type for message validation failures.
#[derive(Debug, Clone)]
pub enum SessionValidationError {
    /// Instructions exceed maximum allowed size
    InstructionsTooLarge { size: usize, max: usize },
    /// Text content exceeds maximum allowed size
    TextTooLarge { size: usize, max: usize },
    /// Function result exceeds maximum allowed size
    FunctionResultTooLarge { size: usize, max: usize },
    /// Owner or agent id is missing
    MissingIdentity,
}

impl std::fmt::Display for SessionValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InstructionsTooLarge { size, max } => {
                write!(f, "Instructions too large: {size} bytes (max: {max} bytes)")
            }
            Self::TextTooLarge { size, max } => {
                write!(f, "Text too large: {size} bytes (max: {max} bytes)")
            }
            Self::FunctionResultTooLarge { size, max } => {
                write!(
                    f,
                    "Function result too large: {size} bytes (max: {max} bytes)"
                )
            }
            Self::MissingIdentity => write!(f, "owner_id and agent_id are required"),
        }
    }
}

impl std::error::Error for SessionValidationError {}

impl IncomingSessionMessage {
    /// Validate field sizes to prevent resource exhaustion.
    pub fn validate(&self) -> Result<(), SessionValidationError> {
        match self {
            IncomingSessionMessage::Start(config) => {
                if config.owner_id.is_empty() || config.agent_id.is_empty() {
                    return Err(SessionValidationError::MissingIdentity);
                }
                if let Some(instructions) = &config.instructions {
                    let size = instructions.len();
                    if size > MAX_INSTRUCTIONS_SIZE {
                        return Err(SessionValidationError::InstructionsTooLarge {
                            size,
                            max: MAX_INSTRUCTIONS_SIZE,
                        });
                    }
                }
            }
            IncomingSessionMessage::SendMessage { text } => {
                let size = text.len();
                if size > MAX_TEXT_SIZE {
                    return Err(SessionValidationError::TextTooLarge {
                        size,
                        max: MAX_TEXT_SIZE,
                    });
                }
            }
            IncomingSessionMessage::FunctionResult { output, .. } => {
                let size = output.len();
                if size > MAX_FUNCTION_RESULT_SIZE {
                    return Err(SessionValidationError::FunctionResultTooLarge {
                        size,
                        max: MAX_FUNCTION_RESULT_SIZE,
                    });
                }
            }
            IncomingSessionMessage::AppendAudio { .. }
            | IncomingSessionMessage::CommitAudio
            | IncomingSessionMessage::PlaybackComplete
            | IncomingSessionMessage::CancelResponse
            | IncomingSessionMessage::ConversationCompleted => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_message_deserialization() {
        let json = r#"{
            "type": "start",
            "owner_id": "owner_1",
            "agent_id": "agent_1",
            "voice": "alloy",
            "instructions": "You are a helpful assistant."
        }"#;

        let msg: IncomingSessionMessage = serde_json::from_str(json).expect("Should deserialize");
        match msg {
            IncomingSessionMessage::Start(config) => {
                assert_eq!(config.owner_id, "owner_1");
                assert_eq!(config.voice.as_deref(), Some("alloy"));
            }
            _ => panic!("Expected Start variant"),
        }
    }

    #[test]
    fn test_send_message_deserialization() {
        let json = r#"{"type": "send_message", "text": "Hello, world!"}"#;
        let msg: IncomingSessionMessage = serde_json::from_str(json).expect("Should deserialize");
        match msg {
            IncomingSessionMessage::SendMessage { text } => assert_eq!(text, "Hello, world!"),
            _ => panic!("Expected SendMessage variant"),
        }
    }

    #[test]
    fn test_function_result_deserialization() {
        let json =
            r#"{"type": "function_result", "call_id": "call_123", "output": "{\"ok\":true}"}"#;
        let msg: IncomingSessionMessage = serde_json::from_str(json).expect("Should deserialize");
        match msg {
            IncomingSessionMessage::FunctionResult { call_id, output } => {
                assert_eq!(call_id, "call_123");
                assert!(output.contains("ok"));
            }
            _ => panic!("Expected FunctionResult variant"),
        }
    }

    #[test]
    fn test_ready_serialization() {
        let msg = OutgoingSessionMessage::Ready {
            session_id: "sess_123".to_string(),
        };
        let json = serde_json::to_string(&msg).expect("Should serialize");
        assert!(json.contains(r#""type":"ready""#));
        assert!(json.contains(r#""session_id":"sess_123""#));
    }

    #[test]
    fn test_function_call_serialization() {
        let msg = OutgoingSessionMessage::FunctionCall {
            call_id: "call_1".to_string(),
            name: "lookup".to_string(),
            arguments: "{}".to_string(),
        };
        let json = serde_json::to_string(&msg).expect("Should serialize");
        assert!(json.contains(r#""type":"function_call""#));
        assert!(json.contains(r#""name":"lookup""#));
    }

    #[test]
    fn test_validation_missing_identity() {
        let msg = IncomingSessionMessage::Start(SessionStartConfig::default());
        assert!(matches!(
            msg.validate(),
            Err(SessionValidationError::MissingIdentity)
        ));
    }

    #[test]
    fn test_validation_instructions_limit() {
        let config = SessionStartConfig {
            owner_id: "o".to_string(),
            agent_id: "a".to_string(),
            instructions: Some("a".repeat(MAX_INSTRUCTIONS_SIZE + 1)),
            ..Default::default()
        };
        let msg = IncomingSessionMessage::Start(config);
        assert!(matches!(
            msg.validate(),
            Err(SessionValidationError::InstructionsTooLarge { .. })
        ));
    }

    #[test]
    fn test_validation_text_limit() {
        let msg = IncomingSessionMessage::SendMessage {
            text: "a".repeat(MAX_TEXT_SIZE + 1),
        };
        assert!(matches!(
            msg.validate(),
            Err(SessionValidationError::TextTooLarge { .. })
        ));
    }

    #[test]
    fn test_validation_accepts_small_messages() {
        let msg = IncomingSessionMessage::SendMessage {
            text: "hi".to_string(),
        };
        assert!(msg.validate().is_ok());

        let msg = IncomingSessionMessage::CommitAudio;
        assert!(msg.validate().is_ok());
    }
}
