//! Tool-call loop inside a streaming LLM response (spec.md §4.7). Each
//! provider's streaming adapter yields `StreamEvent`s through a channel
//! (grounded on the teacher's `AgentRuntime::chat_stream` /
//! `provider.send_stream(&req, tx)` idiom); this module turns that into
//! the ordered `CrewEvent` sequence the dispatcher's gate buffers.

use std::sync::Arc;

use crewline_crew::tools::strip_call_prefix;
use crewline_crew::{Tool, ToolEventSink, ToolResult};
use crewline_llm::{ChatRequest, LlmProvider, ProviderError, StreamEvent};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One unit the gate buffers or flushes, in production order (spec.md §5
/// "no chunk whose logical response will be discarded is ever yielded").
#[derive(Debug, Clone)]
pub enum CrewEvent {
    Text(String),
    FunctionCall { name: String, params: Value },
    FunctionResult { name: String, result: Value },
    FunctionError { name: String, error: String },
    ThinkingStep(Value),
    ThinkingComplete(Value),
}

/// Forwards a tool handler's thinking side-channel straight into the crew
/// event stream, so it rides the same buffer-or-flush discipline as text
/// and function events (spec.md §4.7 step 2).
struct CrewStreamEventSink {
    tx: mpsc::UnboundedSender<CrewEvent>,
}

impl ToolEventSink for CrewStreamEventSink {
    fn thinking_step(&self, payload: Value) {
        let _ = self.tx.send(CrewEvent::ThinkingStep(payload));
    }
    fn thinking_complete(&self, payload: Value) {
        let _ = self.tx.send(CrewEvent::ThinkingComplete(payload));
    }
}

async fn execute_tool(
    tools: &[Arc<dyn Tool>],
    name: &str,
    input: Value,
    events: &dyn ToolEventSink,
) -> ToolResult {
    let bare = strip_call_prefix(name);
    match tools.iter().find(|t| t.name() == bare || t.name() == name) {
        Some(tool) => tool.execute(input, events).await,
        None => ToolResult::error(format!("unknown tool: {name}")),
    }
}

/// Drive the primary crew response to completion, feeding every `CrewEvent`
/// to `tx` in order. Bounded at `max_iterations` follow-up turns (spec.md
/// §4.7.4). Tool handler failures never abort the loop — they surface as
/// `CrewEvent::FunctionError` and get fed back to the model (spec.md §4.7
/// closing paragraph).
pub async fn run_crew_stream(
    provider: Arc<dyn LlmProvider>,
    request: ChatRequest,
    tools: &[Arc<dyn Tool>],
    max_iterations: u32,
    tx: &mpsc::UnboundedSender<CrewEvent>,
) -> Result<(), ProviderError> {
    let sink = CrewStreamEventSink { tx: tx.clone() };

    let mut raw_messages: Vec<Value> = if let Some(ref raw) = request.raw_messages {
        raw.clone()
    } else {
        request
            .messages
            .iter()
            .map(|m| serde_json::json!({ "role": m.role, "content": m.content }))
            .collect()
    };

    for iteration in 0..max_iterations.max(1) {
        debug!(iteration, "crew stream iteration");

        let mut turn_request = request.clone();
        turn_request.raw_messages = Some(raw_messages.clone());

        let (inner_tx, mut inner_rx) = mpsc::channel::<StreamEvent>(32);
        let call_provider = provider.clone();
        let handle = tokio::spawn(async move { call_provider.send_stream(&turn_request, inner_tx).await });

        let mut pending_text = String::new();
        let mut content_blocks: Vec<Value> = Vec::new();
        let mut tool_result_blocks: Vec<Value> = Vec::new();
        let mut tool_calls_this_turn = 0usize;

        while let Some(event) = inner_rx.recv().await {
            match event {
                StreamEvent::TextDelta { text } => {
                    pending_text.push_str(&text);
                    if tx.send(CrewEvent::Text(text)).is_err() {
                        return Ok(());
                    }
                }
                StreamEvent::ToolUse { id, name, input } => {
                    tool_calls_this_turn += 1;
                    if !pending_text.is_empty() {
                        content_blocks.push(serde_json::json!({ "type": "text", "text": pending_text }));
                        pending_text.clear();
                    }
                    content_blocks.push(serde_json::json!({
                        "type": "tool_use",
                        "id": id,
                        "name": name,
                        "input": input,
                    }));

                    if tx
                        .send(CrewEvent::FunctionCall {
                            name: name.clone(),
                            params: input.clone(),
                        })
                        .is_err()
                    {
                        return Ok(());
                    }

                    let result = execute_tool(tools, &name, input, &sink).await;

                    if result.is_error {
                        let _ = tx.send(CrewEvent::FunctionError {
                            name: name.clone(),
                            error: result.content.clone(),
                        });
                    } else {
                        let _ = tx.send(CrewEvent::FunctionResult {
                            name: name.clone(),
                            result: Value::String(result.content.clone()),
                        });
                    }

                    tool_result_blocks.push(serde_json::json!({
                        "type": "tool_result",
                        "tool_use_id": id,
                        "content": result.content,
                        "is_error": result.is_error,
                    }));
                }
                StreamEvent::Done { .. } => break,
                StreamEvent::Error { message } => {
                    return Err(ProviderError::Unavailable(message));
                }
            }
        }

        if let Err(e) = handle.await {
            warn!(err = %e, "crew stream task panicked");
        }

        if tool_calls_this_turn == 0 {
            return Ok(());
        }

        if !pending_text.is_empty() {
            content_blocks.push(serde_json::json!({ "type": "text", "text": pending_text }));
        }
        raw_messages.push(serde_json::json!({ "role": "assistant", "content": content_blocks }));
        raw_messages.push(serde_json::json!({ "role": "user", "content": tool_result_blocks }));
    }

    warn!(max_iterations, "crew stream hit maximum tool-call iterations");
    Ok(())
}
