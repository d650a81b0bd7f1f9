//! Long-term memory collaborator interface.
//!
//! Memory is keyed by owner and agent. The orchestrator reads a section at
//! session start, writes the transcript at teardown (fire-and-forget), and
//! searches on completed user utterances to surface relevant context.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

/// Errors reported by a memory store.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Requested section does not exist
    #[error("Section not found: {0}")]
    NotFound(String),

    /// Backend failure
    #[error("Memory backend error: {0}")]
    Backend(String),
}

/// Search scope for memory queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryScope {
    /// Only this agent's sections for the owner
    Agent,
    /// Every agent's sections for the owner
    Owner,
}

/// Long-term memory collaborator.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Read one memory section. Returns an empty string when the section
    /// does not exist yet.
    async fn read(&self, owner_id: &str, agent_id: &str, section: &str)
    -> Result<String, MemoryError>;

    /// Persist a conversation transcript. Callers may fire-and-forget.
    async fn write(
        &self,
        owner_id: &str,
        agent_id: &str,
        transcript: &str,
    ) -> Result<(), MemoryError>;

    /// Search stored memory for content relevant to the query and return a
    /// rendered context block, empty when nothing matched.
    async fn search(
        &self,
        owner_id: &str,
        agent_id: &str,
        query: &str,
        scope: MemoryScope,
    ) -> Result<String, MemoryError>;
}

// =============================================================================
// In-memory implementation
// =============================================================================

type SectionKey = (String, String, String);

/// Process-local memory store backing the gateway binary. Real deployments
/// substitute a persistent implementation behind the same trait.
#[derive(Debug, Default)]
pub struct InMemoryMemoryStore {
    sections: RwLock<HashMap<SectionKey, String>>,
}

impl InMemoryMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn key(owner_id: &str, agent_id: &str, section: &str) -> SectionKey {
        (
            owner_id.to_string(),
            agent_id.to_string(),
            section.to_string(),
        )
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn read(
        &self,
        owner_id: &str,
        agent_id: &str,
        section: &str,
    ) -> Result<String, MemoryError> {
        Ok(self
            .sections
            .read()
            .get(&Self::key(owner_id, agent_id, section))
            .cloned()
            .unwrap_or_default())
    }

    async fn write(
        &self,
        owner_id: &str,
        agent_id: &str,
        transcript: &str,
    ) -> Result<(), MemoryError> {
        let key = Self::key(owner_id, agent_id, "transcript");
        let mut sections = self.sections.write();
        let entry = sections.entry(key).or_default();
        if !entry.is_empty() {
            entry.push('\n');
        }
        entry.push_str(transcript);
        Ok(())
    }

    async fn search(
        &self,
        owner_id: &str,
        agent_id: &str,
        query: &str,
        scope: MemoryScope,
    ) -> Result<String, MemoryError> {
        if query.trim().is_empty() {
            return Ok(String::new());
        }
        let needle = query.to_lowercase();
        let sections = self.sections.read();
        let mut hits: Vec<String> = Vec::new();
        for ((owner, agent, _section), text) in sections.iter() {
            if owner != owner_id {
                continue;
            }
            if scope == MemoryScope::Agent && agent != agent_id {
                continue;
            }
            for line in text.lines() {
                if line.to_lowercase().contains(&needle) {
                    hits.push(line.to_string());
                }
            }
        }
        Ok(hits.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_missing_section_is_empty() {
        let store = InMemoryMemoryStore::new();
        let text = store.read("owner", "agent", "profile").await.unwrap();
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn test_write_appends_transcripts() {
        let store = InMemoryMemoryStore::new();
        store.write("owner", "agent", "user: hi").await.unwrap();
        store.write("owner", "agent", "user: bye").await.unwrap();
        let text = store.read("owner", "agent", "transcript").await.unwrap();
        assert_eq!(text, "user: hi\nuser: bye");
    }

    #[tokio::test]
    async fn test_search_scopes() {
        let store = InMemoryMemoryStore::new();
        store
            .write("owner", "agent-a", "user: my cat is named Pixel")
            .await
            .unwrap();
        store
            .write("owner", "agent-b", "user: cats are great")
            .await
            .unwrap();

        let agent_hits = store
            .search("owner", "agent-a", "cat", MemoryScope::Agent)
            .await
            .unwrap();
        assert!(agent_hits.contains("Pixel"));
        assert!(!agent_hits.contains("cats are great"));

        let owner_hits = store
            .search("owner", "agent-a", "cat", MemoryScope::Owner)
            .await
            .unwrap();
        assert!(owner_hits.contains("Pixel"));
        assert!(owner_hits.contains("cats are great"));
    }

    #[tokio::test]
    async fn test_search_empty_query() {
        let store = InMemoryMemoryStore::new();
        store.write("owner", "agent", "something").await.unwrap();
        let hits = store
            .search("owner", "agent", "  ", MemoryScope::Agent)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
