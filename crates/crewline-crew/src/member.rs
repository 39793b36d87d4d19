use async_trait::async_trait;
use crewline_core::types::{CollectedFields, CrewMemberConfig};
use crewline_llm::ToolDefinition;
use serde_json::{Map, Value};

use crate::context_store::ContextStore;

/// The opaque map a crew's `buildContext` composes, serialised into the
/// system prompt's "Current Context" block (spec.md §4.2).
pub type CrewContext = Map<String, Value>;

/// Result of the legacy post-response transition hook (spec.md §4.2,
/// `checkTransition`).
#[derive(Debug, Clone)]
pub struct TransitionDecision {
    pub target_crew: String,
    pub reason: String,
}

/// Parameters passed to `checkTransition` (spec.md §4.2): the user message
/// just processed and the assistant's (already-streamed) response text.
#[derive(Debug, Clone)]
pub struct TransitionCheckParams {
    pub message: String,
    pub response: String,
}

/// Parameters the dispatcher injects before invoking `buildContext`
/// (spec.md §4.2: "The dispatcher injects the owning user id and
/// conversation id before invoking buildContext").
#[derive(Debug, Clone)]
pub struct BuildContextParams {
    pub user_id: Option<String>,
    pub conversation_id: String,
}

/// The crew-member contract (spec.md §4.2). Default implementations are the
/// identity/no-op behaviours the spec names; concrete crews override only
/// the hooks relevant to their configuration.
#[async_trait]
pub trait CrewMember: Send + Sync {
    /// The crew's static configuration (name, guidance, model, tools, …).
    fn config(&self) -> &CrewMemberConfig;

    /// Compose the "Current Context" block. Default auto-injects `persona`
    /// under `characterGuidance` when set, otherwise returns an empty map.
    async fn build_context(
        &self,
        params: &BuildContextParams,
        store: &dyn ContextStore,
    ) -> CrewContext {
        let _ = (params, store);
        let mut ctx = Map::new();
        if let Some(persona) = &self.config().persona {
            ctx.insert("characterGuidance".to_string(), Value::String(persona.clone()));
        }
        ctx
    }

    /// Last chance to rewrite the user's input before it reaches the LLM.
    /// Identity by default.
    async fn pre_process(&self, message: String, _context: &CrewContext) -> String {
        message
    }

    /// Symmetric hook on the assistant side. Identity by default; the
    /// streaming path may bypass it entirely (spec.md §4.2).
    async fn post_process(&self, response: String, _context: &CrewContext) -> String {
        response
    }

    /// Subset of `fieldsToCollect` still worth asking the extractor about.
    /// Default returns the full declared list.
    fn fields_for_extraction(
        &self,
        _collected: &CollectedFields,
    ) -> Vec<crewline_core::types::FieldSpec> {
        self.config().fields_to_collect.clone()
    }

    /// Evaluated after extraction but before releasing the buffered
    /// response (spec.md §4.4.2.C "the gate"). `false` by default — crews
    /// that never collect fields never transfer.
    async fn pre_message_transfer(&self, _collected: &CollectedFields) -> bool {
        false
    }

    /// Evaluated after the response has fully streamed; transitions the
    /// *next* user message when true. `false` by default.
    async fn post_message_transfer(&self, _collected: &CollectedFields) -> bool {
        false
    }

    /// Legacy post-response transition path, consulted only when
    /// `post_message_transfer` returns `false` (spec.md §9 Open Questions).
    /// `None` by default.
    async fn check_transition(&self, _params: &TransitionCheckParams) -> Option<TransitionDecision> {
        None
    }

    /// Adapt the declared `tools` into the schema shape the LLM provider
    /// expects — a uniform envelope with `name = "call_" + toolName`
    /// (spec.md §4.2, §6).
    fn tool_schemas(&self) -> Vec<ToolDefinition> {
        self.config()
            .tools
            .iter()
            .map(|t| ToolDefinition {
                name: format!("call_{}", t.name),
                description: t.description.clone(),
                input_schema: t.parameters_schema.clone(),
            })
            .collect()
    }

    /// Descriptive snapshot for client consumption (the `crew_info` event
    /// payload, spec.md §3.1).
    fn to_snapshot(&self) -> CrewSnapshot {
        let cfg = self.config();
        CrewSnapshot {
            name: cfg.name.clone(),
            display_name: cfg.display_name.clone(),
            description: cfg.description.clone(),
            is_default: cfg.is_default,
        }
    }
}

/// Local mirror of `crewline_protocol::CrewSnapshot` — `crewline-crew` does
/// not depend on the wire-format crate; `crewline-dispatch` converts this
/// into the protocol type when emitting `crew_info`.
#[derive(Debug, Clone)]
pub struct CrewSnapshot {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub is_default: bool,
}

/// A crew built purely from a `CrewMemberConfig`, with every hook left at
/// its default — the minimal `CrewMember` impl file-sourced and
/// database-sourced crews both resolve to once the registry loads them.
pub struct ConfiguredCrewMember {
    config: CrewMemberConfig,
}

impl ConfiguredCrewMember {
    pub fn new(config: CrewMemberConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CrewMember for ConfiguredCrewMember {
    fn config(&self) -> &CrewMemberConfig {
        &self.config
    }

    async fn pre_message_transfer(&self, collected: &CollectedFields) -> bool {
        // Default field-driven crews transfer once every declared field is
        // present and a transition target exists (spec.md §4.4.2.B/.C).
        self.config.transition_to.is_some()
            && self
                .config
                .fields_to_collect
                .iter()
                .all(|f| collected.contains_key(&f.name))
    }

    async fn post_message_transfer(&self, _collected: &CollectedFields) -> bool {
        // oneShot crews deliver exactly one response, then the next user
        // message transitions (spec.md §3.1 "oneShot").
        self.config.one_shot
    }
}
