//! Conversation history (spec.md §3.1 "Conversation history"): exposed to
//! the core as a finite, restartable read-only sequence, appended to only
//! by the conversation service itself.

use async_trait::async_trait;
use crewline_core::types::HistoryMessage;
use dashmap::DashMap;

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// The most recent `window` turns, oldest first.
    async fn recent(&self, conversation_id: &str, window: usize) -> Vec<HistoryMessage>;

    /// Append one turn.
    async fn append(&self, conversation_id: &str, message: HistoryMessage);
}

/// Process-local history, used for tests and single-node deployments with
/// no durable transcript store wired in. Mirrors `InMemoryConversationStore`
/// and `InMemoryContextStore`'s DashMap-per-key shape.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    turns: DashMap<String, Vec<HistoryMessage>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn recent(&self, conversation_id: &str, window: usize) -> Vec<HistoryMessage> {
        match self.turns.get(conversation_id) {
            Some(turns) => {
                let len = turns.len();
                let start = len.saturating_sub(window);
                turns[start..].to_vec()
            }
            None => Vec::new(),
        }
    }

    async fn append(&self, conversation_id: &str, message: HistoryMessage) {
        self.turns.entry(conversation_id.to_string()).or_default().push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewline_core::types::Role;

    fn msg(role: Role, content: &str) -> HistoryMessage {
        HistoryMessage {
            role,
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn recent_truncates_to_the_window_keeping_the_tail() {
        let store = InMemoryHistoryStore::new();
        for i in 0..5 {
            store.append("c1", msg(Role::User, &format!("turn {i}"))).await;
        }
        let recent = store.recent("c1", 2).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "turn 3");
        assert_eq!(recent[1].content, "turn 4");
    }

    #[tokio::test]
    async fn unknown_conversation_has_empty_history() {
        let store = InMemoryHistoryStore::new();
        assert!(store.recent("ghost", 10).await.is_empty());
    }
}
