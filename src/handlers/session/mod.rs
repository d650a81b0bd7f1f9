//! Downstream session WebSocket handler and message types.

pub mod handler;
pub mod messages;

pub use handler::{WsToolBridge, session_handler};
pub use messages::{
    IncomingSessionMessage, OutgoingSessionMessage, SessionStartConfig, SessionValidationError,
};
