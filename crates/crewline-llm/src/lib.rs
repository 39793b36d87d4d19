pub mod anthropic;
pub mod anthropic_stream;
pub mod family;
pub mod openai;
pub mod provider;
pub mod router;
pub mod stream;

pub use family::{infer_provider_family, ProviderFamily};
pub use provider::{
    ChatRequest, ChatResponse, LlmProvider, Message, ProviderError, Role, ToolCall, ToolDefinition,
};
pub use router::{ProviderRouter, ProviderSlot};
pub use stream::StreamEvent;
