//! Route configuration.

pub mod session;

pub use session::create_session_router;
