//! Tool dispatch collaborator interface.
//!
//! Function calls requested by the model are handed to a `ToolDispatcher`.
//! The orchestrator serializes executions per session; the dispatcher only
//! has to run one call at a time and report completion.

use async_trait::async_trait;
use thiserror::Error;

/// Errors reported by a tool dispatcher.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool with the requested name
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// The arguments could not be parsed
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran and failed
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// The downstream executor went away before reporting completion
    #[error("Executor unavailable: {0}")]
    ExecutorUnavailable(String),
}

/// One entry of the normalized conversation transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    /// Speaker role (user, assistant, tool)
    pub role: String,
    /// Utterance or tool summary text
    pub text: String,
}

impl TranscriptEntry {
    /// Create an entry.
    pub fn new(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            text: text.into(),
        }
    }
}

/// Normalize a conversation ledger into transcript entries.
pub fn transcript_from_items(
    items: &[crate::core::realtime::ConversationItem],
) -> Vec<TranscriptEntry> {
    let mut entries = Vec::new();
    for item in items {
        let role = item.role.clone().unwrap_or_else(|| "tool".to_string());
        let text = match item.item_type.as_str() {
            "function_call" => {
                let name = item.name.as_deref().unwrap_or("unknown");
                let args = item.arguments.as_deref().unwrap_or("{}");
                format!("[call {name}({args})]")
            }
            "function_call_output" => {
                format!("[result {}]", item.output.as_deref().unwrap_or(""))
            }
            _ => item
                .content
                .as_deref()
                .unwrap_or_default()
                .iter()
                .filter_map(|part| part.text.as_deref().or(part.transcript.as_deref()))
                .collect::<Vec<_>>()
                .join(" "),
        };
        if !text.is_empty() {
            entries.push(TranscriptEntry::new(role, text));
        }
    }
    entries
}

/// Render transcript entries as one newline-separated block, the format
/// handed to the memory collaborator.
pub fn render_transcript(entries: &[TranscriptEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("{}: {}", e.role, e.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Tool dispatch collaborator.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Notify the dispatcher that a call is being streamed. Called once per
    /// arguments fragment; implementations may use it for progressive
    /// parsing or ignore it entirely.
    async fn init_call(&self, call_id: &str, name: &str, args_fragment: &str);

    /// Execute a completed call and return its output payload. The
    /// orchestrator guarantees at most one in-flight call per session.
    async fn execute_call(
        &self,
        call_id: &str,
        name: &str,
        arguments: &str,
        owner_id: &str,
        agent_id: &str,
    ) -> Result<String, ToolError>;

    /// Normalized transcript of the conversation as observed by the
    /// dispatcher, used for the end-of-session memory write.
    async fn history(&self) -> Vec<TranscriptEntry>;
}
