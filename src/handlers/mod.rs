//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `session` - Downstream session WebSocket (realtime voice conversations)

pub mod api;
pub mod session;

// Re-export commonly used handlers for convenient access
pub use session::session_handler;
