use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Descriptive snapshot of a crew member, as returned by its `toJSON()`
/// hook (spec.md §4.2), sent to the client inside `crew_info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrewSnapshot {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub is_default: bool,
}

/// The dispatcher's event stream, one variant per spec.md §3.1. This is a
/// tagged union on the wire (`"type"` discriminator) — the lazy-sequence
/// framing described in spec.md §9 is realised as a `tokio::sync::mpsc`
/// channel of these in `crewline-dispatch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    TextChunk {
        payload: String,
    },
    FieldExtracted {
        name: String,
        value: serde_json::Value,
    },
    CrewTransition {
        from: String,
        to: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    CrewInfo {
        crew: CrewSnapshot,
    },
    FunctionCall {
        name: String,
        params: serde_json::Value,
    },
    FunctionResult {
        name: String,
        result: serde_json::Value,
    },
    FunctionError {
        name: String,
        error: String,
    },
    ThinkingStep {
        payload: serde_json::Value,
    },
    ThinkingComplete {
        payload: serde_json::Value,
    },
    FileSearchResults {
        files: Vec<String>,
    },
    DebugPrompt {
        prompt: String,
    },
    DebugContextUpdate {
        context: serde_json::Value,
    },
    Done,
}

impl DispatchEvent {
    /// Stable event-type string, matching the `"type"` field on the wire.
    /// Used in logging rather than re-deriving it from the serialized form.
    pub fn type_name(&self) -> &'static str {
        match self {
            DispatchEvent::TextChunk { .. } => "text_chunk",
            DispatchEvent::FieldExtracted { .. } => "field_extracted",
            DispatchEvent::CrewTransition { .. } => "crew_transition",
            DispatchEvent::CrewInfo { .. } => "crew_info",
            DispatchEvent::FunctionCall { .. } => "function_call",
            DispatchEvent::FunctionResult { .. } => "function_result",
            DispatchEvent::FunctionError { .. } => "function_error",
            DispatchEvent::ThinkingStep { .. } => "thinking_step",
            DispatchEvent::ThinkingComplete { .. } => "thinking_complete",
            DispatchEvent::FileSearchResults { .. } => "file_search_results",
            DispatchEvent::DebugPrompt { .. } => "debug_prompt",
            DispatchEvent::DebugContextUpdate { .. } => "debug_context_update",
            DispatchEvent::Done => "done",
        }
    }

    /// `debug_prompt` / `debug_context_update` are only ever produced when
    /// the inbound request set `debug: true` (spec.md §3.1); callers filter
    /// with this before wiring an event into the public stream.
    pub fn is_debug_only(&self) -> bool {
        matches!(
            self,
            DispatchEvent::DebugPrompt { .. } | DispatchEvent::DebugContextUpdate { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let ev = DispatchEvent::TextChunk {
            payload: "Hi ".into(),
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "text_chunk");
        assert_eq!(v["payload"], "Hi ");
    }

    #[test]
    fn done_has_no_extra_fields() {
        let v = serde_json::to_value(&DispatchEvent::Done).unwrap();
        assert_eq!(v, serde_json::json!({ "type": "done" }));
    }
}
