//! The collected-fields cache (spec.md §4.3): a process-local map from
//! conversation id to collected-fields object, write-through to a
//! `ConversationStore`.

use std::sync::Arc;

use crewline_core::types::{CollectedFields, Conversation, ConversationMetadata, FieldSpec};
use dashmap::DashMap;
use tracing::warn;

use crate::store::ConversationStore;

/// Process-local cache, backed by write-through persistence. Persistence
/// failures degrade to an in-memory-only update with a logged warning —
/// they never block the dispatch (spec.md §4.3 invariants).
pub struct CollectedFieldsCache {
    store: Arc<dyn ConversationStore>,
    cache: DashMap<String, CollectedFields>,
}

impl CollectedFieldsCache {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
        }
    }

    /// Load on miss from the conversation's persisted metadata; return a
    /// defensive copy.
    pub async fn get_collected_fields(&self, conversation_id: &str) -> CollectedFields {
        if let Some(existing) = self.cache.get(conversation_id) {
            return existing.clone();
        }

        let fields = match self.store.load(conversation_id).await {
            Ok(Some(conv)) => conv.metadata.collected_fields.unwrap_or_default(),
            Ok(None) => CollectedFields::new(),
            Err(e) => {
                warn!(conversation_id, err = %e, "failed to load conversation for collected-fields cache");
                CollectedFields::new()
            }
        };

        self.cache.insert(conversation_id.to_string(), fields.clone());
        fields
    }

    /// Shallow-merge `new_fields` over the current set, persist the merged
    /// object, return a defensive copy. Empty input is a no-op.
    pub async fn update_collected_fields(
        &self,
        conversation_id: &str,
        new_fields: CollectedFields,
    ) -> CollectedFields {
        if new_fields.is_empty() {
            return self.get_collected_fields(conversation_id).await;
        }

        let mut merged = self.get_collected_fields(conversation_id).await;
        merged.extend(new_fields);
        self.cache.insert(conversation_id.to_string(), merged.clone());

        self.persist(conversation_id, merged.clone()).await;

        merged
    }

    async fn persist(&self, conversation_id: &str, fields: CollectedFields) {
        let existing = match self.store.load(conversation_id).await {
            Ok(conv) => conv,
            Err(e) => {
                warn!(conversation_id, err = %e, "failed to load conversation before persisting collected fields");
                None
            }
        };

        let conversation = existing.unwrap_or_else(|| Conversation {
            id: conversation_id.to_string(),
            agent_name: String::new(),
            user_id: None,
            current_crew_member: None,
            metadata: ConversationMetadata::default(),
        });

        let mut conversation = conversation;
        conversation.metadata.collected_fields = Some(fields);

        if let Err(e) = self.store.save(&conversation).await {
            warn!(conversation_id, err = %e, "failed to persist collected fields, continuing in-memory only");
        }
    }

    /// The subset of `fields_to_collect` absent from the cache.
    pub async fn get_missing_fields(
        &self,
        conversation_id: &str,
        fields_to_collect: &[FieldSpec],
    ) -> Vec<FieldSpec> {
        let collected = self.get_collected_fields(conversation_id).await;
        fields_to_collect
            .iter()
            .filter(|f| !collected.contains_key(&f.name))
            .cloned()
            .collect()
    }
}
