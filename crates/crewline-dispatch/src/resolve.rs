//! Crew, prompt, and model resolution (spec.md §4.4.1, §4.4.3).

use std::collections::HashMap;
use std::sync::Arc;

use crewline_core::error::{CrewlineError, Result};
use crewline_core::types::{Conversation, CrewMemberConfig};
use crewline_crew::{CrewMember, CrewRegistry};
use crewline_sessions::StoredPrompt;

/// Resolve the crew member a dispatch should use (spec.md §4.4.1),
/// first-match-wins:
/// 1. An override name supplied on the request, if that crew exists.
/// 2. The conversation's stored current crew.
/// 3. The agent's default crew.
pub async fn resolve_current_crew(
    registry: &CrewRegistry,
    agent_name: &str,
    override_crew_member: Option<&str>,
    conversation: Option<&Conversation>,
) -> Result<Arc<dyn CrewMember>> {
    if let Some(name) = override_crew_member {
        if let Ok(crew) = registry.get_crew_member(agent_name, name).await {
            return Ok(crew);
        }
    }

    if let Some(name) = conversation.and_then(|c| c.resolved_current_crew()) {
        if let Ok(crew) = registry.get_crew_member(agent_name, name).await {
            return Ok(crew);
        }
    }

    registry
        .get_default_crew(agent_name)
        .await
        .map_err(|_| CrewlineError::AgentNotFound {
            name: agent_name.to_string(),
        })
}

/// Effective prompt precedence: session override, active stored version,
/// code-defined `guidance`.
pub fn resolve_prompt(
    config: &CrewMemberConfig,
    prompt_overrides: &HashMap<String, String>,
    stored: Option<&StoredPrompt>,
) -> String {
    if let Some(p) = prompt_overrides.get(&config.name) {
        return p.clone();
    }
    if let Some(s) = stored {
        return s.guidance.clone();
    }
    config.guidance.clone()
}

/// Effective model precedence: session override, code-defined `model`.
pub fn resolve_model(config: &CrewMemberConfig, model_overrides: &HashMap<String, String>) -> String {
    model_overrides
        .get(&config.name)
        .cloned()
        .unwrap_or_else(|| config.model.clone())
}

/// The transition system prompt, preferring the stored version's field
/// over the crew's own (spec.md §4.4.3).
pub fn resolve_transition_system_prompt(config: &CrewMemberConfig, stored: Option<&StoredPrompt>) -> Option<String> {
    stored
        .and_then(|s| s.transition_system_prompt.clone())
        .or_else(|| config.transition_system_prompt.clone())
}
