//! In-memory ordered ledger of conversation items.
//!
//! The store is the single source of truth for conversation content on a
//! protocol client. Items are created, updated and deleted only in response
//! to provider events, never speculatively by local commands, and the
//! ordered contents are replayed verbatim to rebuild upstream context after
//! a reconnect.
//!
//! All operations are no-op-safe on unknown ids: the upstream event order
//! is not strictly guaranteed across reconnects, so a stale reference must
//! never fail.

use super::messages::ConversationItem;

/// One ledger entry: the item plus the previous-item reference it was
/// inserted with, kept for replay.
#[derive(Debug, Clone)]
pub struct StoredItem {
    /// The conversation item as received from the provider
    pub item: ConversationItem,
    /// The previous-item-id recorded at insertion time
    pub previous_item_id: Option<String>,
}

/// Partial update applied to an existing item.
#[derive(Debug, Clone, Default)]
pub struct ItemPatch {
    /// New status
    pub status: Option<String>,
    /// Replacement content parts
    pub content: Option<Vec<super::messages::ContentPart>>,
    /// Function arguments
    pub arguments: Option<String>,
    /// Function output
    pub output: Option<String>,
}

impl ItemPatch {
    /// Derive a patch from a provider-completed item.
    pub fn from_item(item: &ConversationItem) -> Self {
        Self {
            status: item.status.clone(),
            content: item.content.clone(),
            arguments: item.arguments.clone(),
            output: item.output.clone(),
        }
    }
}

/// Ordered conversation-item ledger.
#[derive(Debug, Default)]
pub struct ConversationStore {
    items: Vec<StoredItem>,
}

impl ConversationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|e| e.item.id.as_deref() == Some(id))
    }

    /// Insert an item immediately after the referenced item, or at the tail
    /// when the reference is absent or does not resolve. Items without an id
    /// and duplicate ids are ignored.
    pub fn add_item(&mut self, item: ConversationItem, previous_item_id: Option<String>) {
        let Some(id) = item.id.as_deref() else {
            return;
        };
        if self.position(id).is_some() {
            return;
        }
        let entry = StoredItem {
            item,
            previous_item_id: previous_item_id.clone(),
        };
        match previous_item_id.as_deref().and_then(|p| self.position(p)) {
            Some(pos) => self.items.insert(pos + 1, entry),
            None => self.items.push(entry),
        }
    }

    /// Merge a partial update into an existing item. Unknown ids are ignored.
    pub fn update_item(&mut self, id: &str, patch: ItemPatch) {
        let Some(pos) = self.position(id) else {
            return;
        };
        let item = &mut self.items[pos].item;
        if patch.status.is_some() {
            item.status = patch.status;
        }
        if patch.content.is_some() {
            item.content = patch.content;
        }
        if patch.arguments.is_some() {
            item.arguments = patch.arguments;
        }
        if patch.output.is_some() {
            item.output = patch.output;
        }
    }

    /// Attach transcript text to the item's first transcript-capable content
    /// part. Unknown ids and items without such a part are ignored.
    pub fn add_transcript_to_item(&mut self, id: &str, transcript: &str) {
        let Some(pos) = self.position(id) else {
            return;
        };
        if let Some(parts) = self.items[pos].item.content.as_mut()
            && let Some(part) = parts.iter_mut().find(|p| p.is_transcript_capable())
        {
            part.transcript = Some(transcript.to_string());
        }
    }

    /// Delete an item, preserving the relative order of the rest. Unknown
    /// ids are ignored.
    pub fn remove_item(&mut self, id: &str) {
        if let Some(pos) = self.position(id) {
            self.items.remove(pos);
        }
    }

    /// Look up an item by id.
    pub fn get_item(&self, id: &str) -> Option<&ConversationItem> {
        self.position(id).map(|pos| &self.items[pos].item)
    }

    /// All items in ledger order.
    pub fn ordered_items(&self) -> Vec<ConversationItem> {
        self.items.iter().map(|e| e.item.clone()).collect()
    }

    /// Ledger entries in order, including the recorded previous-item
    /// references. Used verbatim to rebuild upstream context on reconnect.
    pub fn entries(&self) -> Vec<StoredItem> {
        self.items.clone()
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::messages::ContentPart;

    fn item(id: &str) -> ConversationItem {
        ConversationItem {
            id: Some(id.to_string()),
            item_type: "message".to_string(),
            ..Default::default()
        }
    }

    fn audio_item(id: &str) -> ConversationItem {
        ConversationItem {
            id: Some(id.to_string()),
            item_type: "message".to_string(),
            role: Some("user".to_string()),
            content: Some(vec![ContentPart {
                content_type: "input_audio".to_string(),
                text: None,
                audio: None,
                transcript: None,
            }]),
            ..Default::default()
        }
    }

    fn ids(store: &ConversationStore) -> Vec<String> {
        store
            .ordered_items()
            .iter()
            .map(|i| i.id.clone().unwrap())
            .collect()
    }

    #[test]
    fn test_append_preserves_insertion_order() {
        let mut store = ConversationStore::new();
        store.add_item(item("a"), None);
        store.add_item(item("b"), None);
        store.add_item(item("c"), None);
        assert_eq!(ids(&store), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_previous_item_id_reorders() {
        let mut store = ConversationStore::new();
        store.add_item(item("a"), None);
        store.add_item(item("c"), None);
        store.add_item(item("b"), Some("a".to_string()));
        assert_eq!(ids(&store), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_unresolved_previous_item_id_appends_at_tail() {
        let mut store = ConversationStore::new();
        store.add_item(item("a"), None);
        store.add_item(item("b"), Some("missing".to_string()));
        assert_eq!(ids(&store), vec!["a", "b"]);
        // The unresolved reference is still recorded for replay.
        assert_eq!(
            store.entries()[1].previous_item_id.as_deref(),
            Some("missing")
        );
    }

    #[test]
    fn test_duplicate_id_is_noop() {
        let mut store = ConversationStore::new();
        store.add_item(item("a"), None);
        store.add_item(item("a"), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_item_without_id_is_noop() {
        let mut store = ConversationStore::new();
        store.add_item(
            ConversationItem {
                id: None,
                item_type: "message".to_string(),
                ..Default::default()
            },
            None,
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_merges_fields() {
        let mut store = ConversationStore::new();
        store.add_item(item("a"), None);
        store.update_item(
            "a",
            ItemPatch {
                status: Some("completed".to_string()),
                output: Some("42".to_string()),
                ..Default::default()
            },
        );
        let updated = store.get_item("a").unwrap();
        assert_eq!(updated.status.as_deref(), Some("completed"));
        assert_eq!(updated.output.as_deref(), Some("42"));
    }

    #[test]
    fn test_update_unknown_id_is_noop() {
        let mut store = ConversationStore::new();
        store.update_item("ghost", ItemPatch::default());
        assert!(store.is_empty());
    }

    #[test]
    fn test_add_transcript_targets_first_audio_part() {
        let mut store = ConversationStore::new();
        store.add_item(audio_item("a"), None);
        store.add_transcript_to_item("a", "hello there");
        let parts = store.get_item("a").unwrap().content.as_ref().unwrap();
        assert_eq!(parts[0].transcript.as_deref(), Some("hello there"));
    }

    #[test]
    fn test_add_transcript_unknown_id_is_noop() {
        let mut store = ConversationStore::new();
        store.add_transcript_to_item("ghost", "hello");
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_preserves_relative_order() {
        let mut store = ConversationStore::new();
        store.add_item(item("a"), None);
        store.add_item(item("b"), None);
        store.add_item(item("c"), None);
        store.remove_item("b");
        assert_eq!(ids(&store), vec!["a", "c"]);
        store.remove_item("ghost");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_no_duplicate_ids_under_mixed_operations() {
        let mut store = ConversationStore::new();
        store.add_item(item("a"), None);
        store.add_item(item("b"), Some("a".to_string()));
        store.remove_item("a");
        store.add_item(item("a"), Some("b".to_string()));
        store.add_item(item("b"), None); // duplicate, ignored
        let all = ids(&store);
        let mut unique = all.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(all.len(), unique.len());
        assert_eq!(all, vec!["b", "a"]);
    }
}
