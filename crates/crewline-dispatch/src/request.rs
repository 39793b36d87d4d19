//! The dispatcher's input payload (spec.md §6 "Input payload").

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct DispatchRequest {
    pub message: String,
    pub conversation_id: String,
    pub agent_name: String,
    pub override_crew_member: Option<String>,
    pub use_knowledge_base: bool,
    pub debug: bool,
    pub prompt_overrides: HashMap<String, String>,
    pub model_overrides: HashMap<String, String>,
    pub agent_config: serde_json::Value,
}

impl DispatchRequest {
    pub fn new(
        message: impl Into<String>,
        conversation_id: impl Into<String>,
        agent_name: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            conversation_id: conversation_id.into(),
            agent_name: agent_name.into(),
            override_crew_member: None,
            use_knowledge_base: false,
            debug: false,
            prompt_overrides: HashMap::new(),
            model_overrides: HashMap::new(),
            agent_config: serde_json::Value::Null,
        }
    }
}
