//! Tool trait (spec.md §4.7).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }
}

/// Side-channel a tool handler uses to emit diagnostic events while it runs
/// (spec.md §4.7 step 2: "they may themselves produce diagnostic events via
/// the thinking side-channel"). The dispatcher supplies the concrete sink
/// that forwards into the dispatch event stream; handlers that don't need
/// it can ignore the parameter entirely.
pub trait ToolEventSink: Send + Sync {
    fn thinking_step(&self, payload: serde_json::Value);
    fn thinking_complete(&self, payload: serde_json::Value);
}

/// Discards everything. Used where no side-channel is wired in, e.g. tests.
pub struct NoopToolEventSink;

impl ToolEventSink for NoopToolEventSink {
    fn thinking_step(&self, _payload: serde_json::Value) {}
    fn thinking_complete(&self, _payload: serde_json::Value) {}
}

/// A tool handler registered on a crew. Handlers are plain async functions
/// with a closure- or registry-supplied set of collaborators (spec.md §9);
/// they must not retain references to the event stream beyond their own
/// invocation.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Bare tool name, matching `CrewMemberConfig::tools[*].name` — the
    /// `call_` prefix used on the wire (spec.md §6) is stripped before
    /// lookup (spec.md §4.7.2: "matching by name; accept either the bare
    /// name or the `call_` prefix").
    fn name(&self) -> &str;
    async fn execute(&self, input: serde_json::Value, events: &dyn ToolEventSink) -> ToolResult;
}

/// Strip the `call_` prefix a crew's `tool_schemas()` adds, so lookups by
/// bare name and by wire name both resolve.
pub fn strip_call_prefix(name: &str) -> &str {
    name.strip_prefix("call_").unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_call_prefix() {
        assert_eq!(strip_call_prefix("call_lookup_balance"), "lookup_balance");
        assert_eq!(strip_call_prefix("lookup_balance"), "lookup_balance");
    }
}
