//! `ConversationStore`: the abstract persistence collaborator spec.md §1
//! treats as external. Defines the one read/one write operation a
//! conversation needs; everything else (collected-fields merges, the
//! transition bookkeeping) is layered on top in `cache.rs`.

use async_trait::async_trait;
use crewline_core::error::Result;
use crewline_core::types::Conversation;
use dashmap::DashMap;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn load(&self, conversation_id: &str) -> Result<Option<Conversation>>;

    /// Upsert the full record. Implementations persist whichever fields
    /// they track — `currentCrewMember`, `metadata.collectedFields`,
    /// `metadata.lastCrewWithTransitionPrompt` — atomically.
    async fn save(&self, conversation: &Conversation) -> Result<()>;
}

/// Process-local store for tests and single-node deployments with no
/// durable backend wired in.
#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: DashMap<String, Conversation>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        Ok(self.conversations.get(conversation_id).map(|c| c.clone()))
    }

    async fn save(&self, conversation: &Conversation) -> Result<()> {
        self.conversations.insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_conversation() {
        let store = InMemoryConversationStore::new();
        assert!(store.load("c1").await.unwrap().is_none());

        let conv = Conversation {
            id: "c1".into(),
            agent_name: "agent-a".into(),
            user_id: Some("u1".into()),
            current_crew_member: Some("greeter".into()),
            metadata: Default::default(),
        };
        store.save(&conv).await.unwrap();

        let loaded = store.load("c1").await.unwrap().unwrap();
        assert_eq!(loaded.current_crew_member, Some("greeter".into()));
    }
}
