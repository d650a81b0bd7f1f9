//! Per-session orchestration.
//!
//! One orchestrator instance per downstream session: it owns the session's
//! runtime state and timers, enforces the concurrency policy and bridges
//! between the protocol client, the downstream transport and the external
//! collaborators.

pub mod idle;
pub mod orchestrator;
pub mod state;

pub use idle::IdleBackoff;
pub use orchestrator::{
    ItemDelta, SessionDescriptor, SessionEvent, SessionOrchestrator, SessionTuning,
};
pub use state::SessionRuntimeState;
