//! Post-response transition resolution (spec.md §4.5). Runs once the crew's
//! response has fully streamed; never surfaces as a `DispatchEvent` — the
//! caller persists the result and the effect is visible only on the next
//! turn's crew resolution.

use crewline_core::types::{CollectedFields, TransitionRecord};
use crewline_crew::member::TransitionCheckParams;
use crewline_crew::{CrewMember, CrewRegistry};
use tracing::warn;

/// Resolve a transition per spec.md §4.5 and the §9 Open Questions decision:
/// the field-driven `postMessageTransfer` hook fires first (also consulted
/// for `oneShot` crews, which need not collect any fields), and
/// `checkTransition` is consulted only when it returns `false`. A resolved
/// target that doesn't exist in the registry is logged and the transition
/// dropped — dispatch continues as if none fired, it never falls through to
/// `checkTransition` once `postMessageTransfer` itself returned `true`.
pub async fn resolve_post_response_transition(
    crew: &dyn CrewMember,
    agent_name: &str,
    collected: &CollectedFields,
    check_params: &TransitionCheckParams,
    registry: &CrewRegistry,
) -> Option<TransitionRecord> {
    let config = crew.config();

    if (config.collects_fields() || config.one_shot) && config.transition_to.is_some() {
        if crew.post_message_transfer(collected).await {
            let target = config.transition_to.clone().expect("checked above");
            return finalize(registry, agent_name, &config.name, target, "fields collected".to_string()).await;
        }
    }

    if let Some(decision) = crew.check_transition(check_params).await {
        return finalize(registry, agent_name, &config.name, decision.target_crew, decision.reason).await;
    }

    None
}

async fn finalize(
    registry: &CrewRegistry,
    agent_name: &str,
    from: &str,
    to: String,
    reason: String,
) -> Option<TransitionRecord> {
    if registry.get_crew_member(agent_name, &to).await.is_err() {
        warn!(agent = agent_name, from, to, "transition target crew not found, dropping transition");
        return None;
    }

    Some(TransitionRecord {
        from: from.to_string(),
        to,
        reason,
        timestamp: chrono::Utc::now(),
    })
}
