pub mod realtime;

// Re-export commonly used types for convenience
pub use realtime::{
    ClientConfig, ConnectionState, ConversationItem, ConversationStore, ProviderVariant,
    RealtimeClient, RealtimeError, RealtimeResult, RealtimeTransport, RealtimeVoice,
    ReconnectionConfig, ResponseConfig, ServerEvent, SessionConfig, WebSocketTransport,
};
