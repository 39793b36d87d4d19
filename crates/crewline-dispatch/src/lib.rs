//! The dispatcher (spec.md §4.4): resolves the active crew, races the
//! field-extraction micro-agent against the primary streaming response,
//! and coordinates crew transitions — the central component of the whole
//! system.

pub mod crew_stream;
pub mod dispatcher;
pub mod events;
pub mod gate;
pub mod kb;
pub mod providers;
pub mod request;
pub mod resolve;
pub mod tools;
pub mod transitions;

pub use dispatcher::{DispatchHandle, Dispatcher};
pub use kb::{KnowledgeBaseResolver, NoKnowledgeBase, KNOWLEDGE_BASE_CONTEXT_NOTE};
pub use providers::ProviderSet;
pub use request::DispatchRequest;
pub use tools::{NoTools, StaticToolRegistry, ToolRegistry};
