//! Per-session runtime state.

use std::time::Duration;

use tokio::time::Instant;

/// Mutable runtime state owned by one session orchestrator.
///
/// Created at session start, destroyed at teardown. Nothing in here is
/// shared across sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionRuntimeState {
    /// A model response is currently in flight
    pub ai_responding: bool,
    /// Synthesized audio is currently being played downstream
    pub audio_playing: bool,
    /// VAD currently detects user speech
    pub user_speaking: bool,
    /// When the user last produced input (committed audio, final
    /// transcript or explicit message)
    pub last_user_message_time: Option<Instant>,
    /// Completed idle cycles since the last user activity
    pub idle_cycle_count: u32,
    /// Idle time accumulated across those cycles, in milliseconds
    pub accumulated_idle_ms: u64,
    /// The single-slot function-call guard: id of the call currently
    /// executing, if any
    pub pending_function_call_id: Option<String>,
    /// Whether an idle timer is currently armed
    pub idle_armed: bool,
    /// Delay of the most recently armed idle timer
    pub last_armed_delay: Option<Duration>,
}

impl SessionRuntimeState {
    /// Reset idle bookkeeping on user activity.
    pub fn note_user_activity(&mut self) {
        self.last_user_message_time = Some(Instant::now());
        self.idle_cycle_count = 0;
        self.accumulated_idle_ms = 0;
    }

    /// Whether the session is currently producing output toward the user.
    pub fn is_busy(&self) -> bool {
        self.ai_responding || self.audio_playing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let state = SessionRuntimeState::default();
        assert!(!state.is_busy());
        assert_eq!(state.idle_cycle_count, 0);
        assert!(state.pending_function_call_id.is_none());
        assert!(state.last_user_message_time.is_none());
    }

    #[test]
    fn test_note_user_activity_resets_idle() {
        let mut state = SessionRuntimeState {
            idle_cycle_count: 4,
            accumulated_idle_ms: 90_000,
            ..Default::default()
        };
        state.note_user_activity();
        assert_eq!(state.idle_cycle_count, 0);
        assert_eq!(state.accumulated_idle_ms, 0);
        assert!(state.last_user_message_time.is_some());
    }

    #[test]
    fn test_busy_flags() {
        let mut state = SessionRuntimeState::default();
        state.ai_responding = true;
        assert!(state.is_busy());
        state.ai_responding = false;
        state.audio_playing = true;
        assert!(state.is_busy());
    }
}
