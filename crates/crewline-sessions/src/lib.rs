//! Conversation persistence, the collected-fields cache, and the crew
//! prompt store (spec.md §4.3, §6).

pub mod cache;
pub mod history;
pub mod prompt_store;
pub mod sqlite;
pub mod store;

pub use cache::CollectedFieldsCache;
pub use history::{HistoryStore, InMemoryHistoryStore};
pub use prompt_store::{CrewPromptStore, InMemoryCrewPromptStore, StoredPrompt};
pub use sqlite::SqliteConversationStore;
pub use store::{ConversationStore, InMemoryConversationStore};
