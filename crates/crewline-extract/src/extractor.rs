//! The extraction call itself: build the request, invoke the model once,
//! parse its JSON output defensively (spec.md §4.6).

use std::collections::HashMap;
use std::time::Duration;

use crewline_core::types::{CollectedFields, ExtractionMode, FieldSpec, FieldType, FieldValue, HistoryMessage};
use crewline_llm::{ChatRequest, LlmProvider, ProviderError};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::prompt::{build_messages, build_system_prompt};
use crate::result::{ExtractionOutcome, OrderedFields};

/// Everything the extractor needs for one call. Borrowed, not owned — the
/// caller (the dispatcher) keeps ownership of the conversation state.
pub struct ExtractionRequest<'a> {
    pub history: &'a [HistoryMessage],
    pub missing_fields: &'a [FieldSpec],
    /// Every field the crew declares, missing or not — `corrections` target
    /// fields that are by definition already collected, so validating them
    /// needs the full declared set rather than just `missing_fields`.
    pub declared_fields: &'a [FieldSpec],
    pub collected_fields: &'a CollectedFields,
    pub mode: ExtractionMode,
}

/// Raw shape of the model's JSON output, deserialised loosely (values may
/// legally be strings or booleans) before per-field validation.
#[derive(Debug, Deserialize)]
struct RawExtraction {
    #[serde(default, rename = "extractedFields")]
    extracted_fields: serde_json::Map<String, Value>,
    #[serde(default)]
    corrections: serde_json::Map<String, Value>,
    #[serde(default, rename = "remainingFields")]
    remaining_fields: Vec<String>,
}

/// Validate one raw value against its field's typing constraint, dropping
/// it silently on a mismatch rather than injecting malformed data into the
/// cache (spec.md §4.6 "Typed-field semantics").
fn validate_value(spec: &FieldSpec, raw: &Value) -> Option<FieldValue> {
    match spec.field_type {
        Some(FieldType::Boolean) => match raw {
            Value::Bool(b) => Some(FieldValue::Bool(*b)),
            Value::String(s) if s == "true" => Some(FieldValue::Bool(true)),
            Value::String(s) if s == "false" => Some(FieldValue::Bool(false)),
            _ => None,
        },
        Some(FieldType::Enum) => match raw {
            Value::String(s) => {
                let allowed = spec.allowed_values.as_deref().unwrap_or(&[]);
                allowed.iter().any(|a| a == s).then(|| FieldValue::Text(s.clone()))
            }
            _ => None,
        },
        Some(FieldType::Text) | None => match raw {
            Value::String(s) => Some(FieldValue::Text(s.clone())),
            Value::Bool(b) => Some(FieldValue::Bool(*b)),
            _ => None,
        },
    }
}

/// Strip a leading/trailing markdown code fence the model sometimes wraps
/// JSON output in, despite being told to return a bare object.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim())
        .and_then(|s| s.strip_suffix("```"))
        .map(|s| s.trim())
        .unwrap_or(trimmed)
}

fn parse_and_validate(
    raw_content: &str,
    missing_fields: &[FieldSpec],
    declared_fields: &[FieldSpec],
) -> Option<ExtractionOutcome> {
    let cleaned = strip_code_fence(raw_content);
    let raw: RawExtraction = serde_json::from_str(cleaned).ok()?;

    let validate_against = |by_name: &HashMap<&str, &FieldSpec>, map: serde_json::Map<String, Value>| -> OrderedFields {
        let mut out = OrderedFields::new();
        for (name, value) in map {
            let Some(spec) = by_name.get(name.as_str()) else {
                continue;
            };
            match validate_value(spec, &value) {
                Some(v) => out.push((name, v)),
                None => warn!(field = %name, "extractor output violated field constraint, dropping"),
            }
        }
        out
    };

    let missing_by_name: HashMap<&str, &FieldSpec> = missing_fields.iter().map(|f| (f.name.as_str(), f)).collect();
    let declared_by_name: HashMap<&str, &FieldSpec> = declared_fields.iter().map(|f| (f.name.as_str(), f)).collect();

    Some(ExtractionOutcome {
        extracted_fields: validate_against(&missing_by_name, raw.extracted_fields),
        corrections: validate_against(&declared_by_name, raw.corrections),
        remaining_fields: raw.remaining_fields,
    })
}

/// Run the extractor once: build the request, call the provider under a
/// timeout, parse the result defensively. Never returns an error — any
/// failure degrades to `ExtractionOutcome::failed` (spec.md §4.6 "Failure
/// semantics").
pub async fn extract_fields(
    provider: &dyn LlmProvider,
    model: &str,
    max_tokens: u32,
    timeout: Duration,
    req: &ExtractionRequest<'_>,
) -> ExtractionOutcome {
    let all_missing: Vec<String> = req.missing_fields.iter().map(|f| f.name.clone()).collect();

    if req.missing_fields.is_empty() {
        return ExtractionOutcome::default();
    }

    let system = build_system_prompt(req.missing_fields, req.mode, req.collected_fields);
    let messages = build_messages(req.history, req.mode);

    let chat_request = ChatRequest {
        model: model.to_string(),
        system,
        messages,
        max_tokens,
        tools: Vec::new(),
        raw_messages: None,
        knowledge_base: None,
    };

    let call = provider.send(&chat_request);
    let response = match tokio::time::timeout(timeout, call).await {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => {
            warn!(err = %err, "extractor provider call failed");
            return ExtractionOutcome::failed(all_missing);
        }
        Err(_) => {
            warn!(?timeout, "extractor call timed out");
            return ExtractionOutcome::failed(all_missing);
        }
    };

    match parse_and_validate(&response.content, req.missing_fields, req.declared_fields) {
        Some(outcome) => outcome,
        None => {
            warn!("extractor returned unparsable output");
            ExtractionOutcome::failed(all_missing)
        }
    }
}

/// Thin stateful wrapper around [`extract_fields`] for callers that want to
/// hold a provider and default tuning knobs rather than thread them through
/// every call.
pub struct FieldExtractor<'p> {
    provider: &'p dyn LlmProvider,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl<'p> FieldExtractor<'p> {
    pub fn new(provider: &'p dyn LlmProvider) -> Self {
        Self {
            provider,
            max_tokens: 512,
            timeout: Duration::from_millis(crewline_core::config::DEFAULT_EXTRACTOR_TIMEOUT_MS),
        }
    }

    pub async fn extract(&self, model: &str, req: &ExtractionRequest<'_>) -> ExtractionOutcome {
        extract_fields(self.provider, model, self.max_tokens, self.timeout, req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewline_core::types::Role;
    use crewline_llm::{ChatResponse, Message};
    use async_trait::async_trait;

    struct ScriptedProvider {
        content: String,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                content: self.content.clone(),
                model: "test-model".into(),
                tokens_in: 0,
                tokens_out: 0,
                stop_reason: "stop".into(),
                tool_calls: Vec::new(),
            })
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl LlmProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }
        async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Err(ProviderError::Unavailable("down".into()))
        }
    }

    fn name_field() -> FieldSpec {
        FieldSpec {
            name: "name".into(),
            description: "the user's name".into(),
            field_type: None,
            allowed_values: None,
        }
    }

    #[tokio::test]
    async fn extracts_a_clean_json_response() {
        let provider = ScriptedProvider {
            content: r#"{"extractedFields": {"name": "Dana"}, "corrections": {}, "remainingFields": []}"#.into(),
        };
        let fields = vec![name_field()];
        let history = vec![HistoryMessage {
            role: Role::User,
            content: "I'm Dana".into(),
        }];
        let collected = CollectedFields::new();
        let req = ExtractionRequest {
            history: &history,
            missing_fields: &fields,
            declared_fields: &fields,
            collected_fields: &collected,
            mode: ExtractionMode::Conversational,
        };
        let outcome = extract_fields(&provider, "test-model", 256, Duration::from_secs(1), &req).await;
        assert_eq!(outcome.extracted_fields, vec![("name".to_string(), FieldValue::Text("Dana".into()))]);
        assert!(outcome.remaining_fields.is_empty());
    }

    #[tokio::test]
    async fn strips_markdown_fence_before_parsing() {
        let provider = ScriptedProvider {
            content: "```json\n{\"extractedFields\": {}, \"corrections\": {}, \"remainingFields\": [\"name\"]}\n```".into(),
        };
        let fields = vec![name_field()];
        let history = Vec::new();
        let collected = CollectedFields::new();
        let req = ExtractionRequest {
            history: &history,
            missing_fields: &fields,
            declared_fields: &fields,
            collected_fields: &collected,
            mode: ExtractionMode::Form,
        };
        let outcome = extract_fields(&provider, "test-model", 256, Duration::from_secs(1), &req).await;
        assert_eq!(outcome.remaining_fields, vec!["name".to_string()]);
    }

    #[tokio::test]
    async fn provider_failure_degrades_to_all_missing() {
        let fields = vec![name_field()];
        let history = Vec::new();
        let collected = CollectedFields::new();
        let req = ExtractionRequest {
            history: &history,
            missing_fields: &fields,
            declared_fields: &fields,
            collected_fields: &collected,
            mode: ExtractionMode::Conversational,
        };
        let outcome = extract_fields(&FailingProvider, "test-model", 256, Duration::from_secs(1), &req).await;
        assert!(outcome.extracted_fields.is_empty());
        assert_eq!(outcome.remaining_fields, vec!["name".to_string()]);
    }

    #[tokio::test]
    async fn invalid_json_degrades_to_all_missing() {
        let provider = ScriptedProvider {
            content: "not json at all".into(),
        };
        let fields = vec![name_field()];
        let history = Vec::new();
        let collected = CollectedFields::new();
        let req = ExtractionRequest {
            history: &history,
            missing_fields: &fields,
            declared_fields: &fields,
            collected_fields: &collected,
            mode: ExtractionMode::Conversational,
        };
        let outcome = extract_fields(&provider, "test-model", 256, Duration::from_secs(1), &req).await;
        assert_eq!(outcome.remaining_fields, vec!["name".to_string()]);
    }

    #[tokio::test]
    async fn boolean_field_rejects_non_boolean_value() {
        let provider = ScriptedProvider {
            content: r#"{"extractedFields": {"subscribed": "yes"}, "corrections": {}, "remainingFields": ["subscribed"]}"#.into(),
        };
        let fields = vec![FieldSpec {
            name: "subscribed".into(),
            description: "wants updates".into(),
            field_type: Some(FieldType::Boolean),
            allowed_values: None,
        }];
        let history = Vec::new();
        let collected = CollectedFields::new();
        let req = ExtractionRequest {
            history: &history,
            missing_fields: &fields,
            declared_fields: &fields,
            collected_fields: &collected,
            mode: ExtractionMode::Conversational,
        };
        let outcome = extract_fields(&provider, "test-model", 256, Duration::from_secs(1), &req).await;
        assert!(outcome.extracted_fields.is_empty());
    }

    #[test]
    fn extraction_outcome_merges_extracted_and_corrections() {
        let outcome = ExtractionOutcome {
            extracted_fields: vec![("a".to_string(), FieldValue::Text("1".into()))],
            corrections: vec![("a".to_string(), FieldValue::Text("2".into()))],
            remaining_fields: Vec::new(),
        };
        assert_eq!(outcome.merged().get("a"), Some(&FieldValue::Text("2".into())));
    }

    #[test]
    fn fields_to_announce_preserves_extractor_order() {
        let outcome = ExtractionOutcome {
            extracted_fields: vec![("has_other_accounts".to_string(), FieldValue::Text("No".into()))],
            corrections: vec![("country".to_string(), FieldValue::Text("Canada".into()))],
            remaining_fields: Vec::new(),
        };
        let announced = outcome.fields_to_announce();
        assert_eq!(announced[0].0, "has_other_accounts");
        assert_eq!(announced[1].0, "country");
    }
}
