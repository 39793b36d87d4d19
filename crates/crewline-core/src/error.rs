use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrewlineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Crew member not found: {name}")]
    CrewNotFound { name: String },

    #[error("Agent not found: {name}")]
    AgentNotFound { name: String },

    #[error("Crew registry error: {0}")]
    Registry(String),

    #[error("Conversation not found: {id}")]
    ConversationNotFound { id: String },

    #[error("Field extraction error: {0}")]
    Extraction(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("Tool '{name}' failed: {reason}")]
    ToolFailed { name: String, reason: String },

    #[error("Tool call loop exceeded {max} iterations")]
    ToolLoopExhausted { max: u32 },

    #[error("Transition target '{name}' does not exist")]
    InvalidTransitionTarget { name: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CrewlineError {
    /// Stable string code, used for structured logging fields (no HTTP
    /// surface exists here — see spec.md §1 out-of-scope).
    pub fn code(&self) -> &'static str {
        match self {
            CrewlineError::Config(_) => "CONFIG_ERROR",
            CrewlineError::CrewNotFound { .. } => "CREW_NOT_FOUND",
            CrewlineError::AgentNotFound { .. } => "AGENT_NOT_FOUND",
            CrewlineError::Registry(_) => "REGISTRY_ERROR",
            CrewlineError::ConversationNotFound { .. } => "CONVERSATION_NOT_FOUND",
            CrewlineError::Extraction(_) => "EXTRACTION_ERROR",
            CrewlineError::LlmProvider(_) => "LLM_PROVIDER_ERROR",
            CrewlineError::ToolFailed { .. } => "TOOL_FAILED",
            CrewlineError::ToolLoopExhausted { .. } => "TOOL_LOOP_EXHAUSTED",
            CrewlineError::InvalidTransitionTarget { .. } => "INVALID_TRANSITION_TARGET",
            CrewlineError::Store(_) => "STORE_ERROR",
            CrewlineError::Serialization(_) => "SERIALIZATION_ERROR",
            CrewlineError::Io(_) => "IO_ERROR",
            CrewlineError::Timeout { .. } => "TIMEOUT",
            CrewlineError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CrewlineError>;
