//! Session WebSocket route configuration.

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::session::session_handler;
use crate::state::AppState;

/// Create the session WebSocket router.
///
/// # Endpoint
///
/// `GET /session` - WebSocket upgrade for a realtime voice conversation
///
/// # Protocol
///
/// After the upgrade, the client sends:
/// 1. A `start` message carrying owner/agent identity and session options
/// 2. `send_message` / `append_audio` / binary audio frames, plus
///    `function_result` replies for `function_call` requests
///
/// The gateway responds with `ready`, `conversation_updated`,
/// `conversation_interrupted`, `function_call`, `error` and `closing`.
pub fn create_session_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/session", get(session_handler))
        .layer(TraceLayer::new_for_http())
}
