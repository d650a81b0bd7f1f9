//! Realtime speech-to-speech protocol module.
//!
//! This module implements the upstream side of the gateway: a protocol
//! client that owns one provider connection, the transcription store fed by
//! it, and the transport abstraction the client is written against.
//!
//! # Architecture
//!
//! - `base` - error taxonomy, connection state, reconnection policy,
//!   callback types
//! - `config` - provider variants, voice sets, audio formats
//! - `messages` - wire-level client/server event types
//! - `store` - ordered conversation-item ledger
//! - `transport` - injected transport (WebSocket in production)
//! - `client` - the protocol client itself
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian at 24kHz by default; G.711 variants at
//! 8kHz are negotiable.

mod base;
pub mod client;
pub mod config;
pub mod messages;
pub mod store;
pub mod transport;

pub use base::{
    ClientConfig, ConnectionState, FunctionDefinition, RealtimeError, RealtimeErrorCallback,
    RealtimeResult, ReconnectionConfig, ServerEventCallback, ToolDefinition, TurnDetectionConfig,
};
pub use client::RealtimeClient;
pub use config::{
    DEFAULT_REALTIME_URL, ProviderVariant, REALTIME_SAMPLE_RATE, RealtimeAudioFormat,
    RealtimeVoice,
};
pub use messages::{
    ApiError, ClientEvent, ContentPart, ConversationItem, InputAudioTranscription, MaxTokens,
    OutboundFrame, Response, ResponseConfig, ServerEvent, Session, SessionConfig, ToolDef,
    TurnDetection,
};
pub use store::{ConversationStore, ItemPatch, StoredItem};
pub use transport::{
    ConnectRequest, RealtimeTransport, TransportFrame, TransportSink, TransportStream,
    WebSocketTransport,
};

pub(crate) use base::rand_jitter;
