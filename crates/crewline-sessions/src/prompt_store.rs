//! Crew prompt store (spec.md §6 "Crew prompt store"): one active version
//! per crew, with an optional transition system prompt per version.
//! Modeled on the teacher's per-user cache-with-TTL
//! (`MemoryManager::get_cached`), generalized to per-crew active-version
//! lookups with no expiry (a stale read is acceptable — spec.md §5 "Shared
//! resource policy").

use async_trait::async_trait;
use dashmap::DashMap;

/// The prompt-store's view of one crew's active version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPrompt {
    pub guidance: String,
    pub transition_system_prompt: Option<String>,
}

#[async_trait]
pub trait CrewPromptStore: Send + Sync {
    async fn active_prompt(&self, crew_name: &str) -> Option<StoredPrompt>;
}

/// In-memory store; callers populate it (e.g. from a CMS or admin UI) via
/// `set_active_prompt`.
#[derive(Default)]
pub struct InMemoryCrewPromptStore {
    versions: DashMap<String, StoredPrompt>,
}

impl InMemoryCrewPromptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active_prompt(&self, crew_name: impl Into<String>, prompt: StoredPrompt) {
        self.versions.insert(crew_name.into(), prompt);
    }
}

#[async_trait]
impl CrewPromptStore for InMemoryCrewPromptStore {
    async fn active_prompt(&self, crew_name: &str) -> Option<StoredPrompt> {
        self.versions.get(crew_name).map(|v| v.clone())
    }
}
