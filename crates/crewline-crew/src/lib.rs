pub mod context_store;
pub mod member;
pub mod registry;
pub mod tools;

pub use context_store::{ContextStore, InMemoryContextStore};
pub use member::{BuildContextParams, ConfiguredCrewMember, CrewContext, CrewMember, CrewSnapshot, TransitionCheckParams, TransitionDecision};
pub use registry::{candidate_dirs, CrewDbSource, CrewFileSource, CrewRegistry, NoSource};
pub use tools::{strip_call_prefix, NoopToolEventSink, Tool, ToolEventSink, ToolResult};
