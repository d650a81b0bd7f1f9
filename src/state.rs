//! Shared application state.

use std::sync::Arc;

use crate::collab::{InMemoryMemoryStore, MemoryStore};
use crate::config::ServerConfig;

/// State shared by all request handlers.
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Long-term memory collaborator shared across sessions
    pub memory: Arc<dyn MemoryStore>,
}

impl AppState {
    /// Create application state with the process-local memory store.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            memory: Arc::new(InMemoryMemoryStore::new()),
        })
    }

    /// Create application state with a custom memory collaborator.
    pub fn with_memory(config: ServerConfig, memory: Arc<dyn MemoryStore>) -> Arc<Self> {
        Arc::new(Self { config, memory })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_carries_memory() {
        let state = AppState::new(ServerConfig::default());
        state.memory.write("o", "a", "user: hi").await.unwrap();
        let text = state.memory.read("o", "a", "transcript").await.unwrap();
        assert_eq!(text, "user: hi");
    }
}
