//! Prompt construction for the two extraction modes (spec.md §4.6).

use crewline_core::types::{
    CollectedFields, ExtractionMode, FieldSpec, FieldType, HistoryMessage, Role as CoreRole,
};
use crewline_llm::{Message, Role as LlmRole};

/// Render the typed constraint for one field the way the prompt must state
/// it (spec.md §4.6 "Typed-field semantics"): boolean fields only ever
/// legally resolve to `true`/`false`, enum fields must match an allowed
/// value verbatim, untyped fields carry the raw phrase.
fn field_constraint(field: &FieldSpec) -> String {
    match field.field_type {
        Some(FieldType::Boolean) => format!(
            "- `{}` ({}): boolean. The only legal values are `true` or `false`.",
            field.name, field.description
        ),
        Some(FieldType::Enum) => {
            let allowed = field
                .allowed_values
                .as_deref()
                .unwrap_or(&[])
                .join(", ");
            format!(
                "- `{}` ({}): enum. The value must be exactly one of: {allowed}. Do not paraphrase.",
                field.name, field.description
            )
        }
        Some(FieldType::Text) | None => format!(
            "- `{}` ({}): free text. Return the user's own phrase.",
            field.name, field.description
        ),
    }
}

/// Build the system prompt instructing the model to emit the extractor's
/// JSON output contract, mode-specific guidance included.
pub fn build_system_prompt(
    missing_fields: &[FieldSpec],
    mode: ExtractionMode,
    collected: &CollectedFields,
) -> String {
    let fields_block = missing_fields
        .iter()
        .map(field_constraint)
        .collect::<Vec<_>>()
        .join("\n");

    let collected_block = if collected.is_empty() {
        String::new()
    } else {
        let lines = collected
            .iter()
            .map(|(name, value)| format!("- `{name}`: {}", value.as_wire_string()))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "\n\nAlready collected, for reference only (do not re-extract these):\n{lines}"
        )
    };

    let mode_guidance = match mode {
        ExtractionMode::Conversational => {
            "You are reading a natural conversation. Treat the assistant's prior turns as \
             context for interpreting the user's reply. An affirmative answer to a yes/no \
             question counts as acknowledgement of a boolean or confirmation field. If \
             nothing was clearly said about a field, leave it out rather than guessing. \
             Never populate `corrections`; conversational mode does not recognise them."
        }
        ExtractionMode::Form => {
            "You are reading a single question/answer exchange: only the assistant's most \
             recent message and the user's latest reply matter. Negative answers such as \
             \"no\", \"none\", or \"N/A\" are legitimate extracted values, not missing data. \
             Only populate `corrections` when the user gives an explicit repair cue (\"actually\", \
             \"I meant\", \"let me fix that\") or re-affirms a field that was previously set to a \
             negative value; otherwise put new values in `extractedFields`."
        }
    };

    format!(
        "You extract structured field values from a conversation. {mode_guidance}\n\n\
         Fields still missing:\n{fields_block}\n\n\
         Respond with a single JSON object and nothing else, shaped exactly as:\n\
         {{\"extractedFields\": {{...}}, \"corrections\": {{...}}, \"remainingFields\": [...]}}\n\
         Only include a field in `extractedFields` or `corrections` when its value is clearly \
         present in the conversation and satisfies its constraint above. List every field that \
         is still missing, by name, in `remainingFields`. Violating a field's constraint means \
         omitting that field entirely rather than guessing.{collected_block}"
    )
}

fn to_llm_role(role: CoreRole) -> LlmRole {
    match role {
        CoreRole::User => LlmRole::User,
        CoreRole::Assistant => LlmRole::Assistant,
        CoreRole::System => LlmRole::User,
    }
}

/// Project the conversation window the extractor should see for a mode
/// (spec.md §4.6 "Modes"): `conversational` gets the full recent window,
/// `form` gets only the immediately preceding assistant message and the
/// latest user message.
pub fn build_messages(history: &[HistoryMessage], mode: ExtractionMode) -> Vec<Message> {
    match mode {
        ExtractionMode::Conversational => history
            .iter()
            .map(|m| Message {
                role: to_llm_role(m.role),
                content: m.content.clone(),
            })
            .collect(),
        ExtractionMode::Form => {
            let last_user = history.iter().rev().find(|m| m.role == CoreRole::User);
            let last_assistant = history
                .iter()
                .rev()
                .find(|m| m.role == CoreRole::Assistant);

            let mut messages = Vec::new();
            if let Some(a) = last_assistant {
                messages.push(Message {
                    role: LlmRole::Assistant,
                    content: a.content.clone(),
                });
            }
            if let Some(u) = last_user {
                messages.push(Message {
                    role: LlmRole::User,
                    content: u.content.clone(),
                });
            }
            messages
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewline_core::types::Role;

    #[test]
    fn boolean_constraint_states_legal_values() {
        let field = FieldSpec {
            name: "subscribed".into(),
            description: "wants the newsletter".into(),
            field_type: Some(FieldType::Boolean),
            allowed_values: None,
        };
        let prompt = build_system_prompt(&[field], ExtractionMode::Conversational, &CollectedFields::new());
        assert!(prompt.contains("`true` or `false`"));
    }

    #[test]
    fn enum_constraint_lists_allowed_values_verbatim() {
        let field = FieldSpec {
            name: "plan".into(),
            description: "subscription tier".into(),
            field_type: Some(FieldType::Enum),
            allowed_values: Some(vec!["basic".into(), "pro".into()]),
        };
        let prompt = build_system_prompt(&[field], ExtractionMode::Form, &CollectedFields::new());
        assert!(prompt.contains("basic, pro"));
    }

    #[test]
    fn collected_fields_are_listed_for_reference() {
        let field = FieldSpec {
            name: "email".into(),
            description: "contact email".into(),
            field_type: None,
            allowed_values: None,
        };
        let mut collected = CollectedFields::new();
        collected.insert("name".into(), crewline_core::types::FieldValue::Text("Dana".into()));
        let prompt = build_system_prompt(&[field], ExtractionMode::Conversational, &collected);
        assert!(prompt.contains("`name`: Dana"));
    }

    #[test]
    fn form_mode_keeps_only_last_exchange() {
        let history = vec![
            HistoryMessage {
                role: Role::Assistant,
                content: "first question".into(),
            },
            HistoryMessage {
                role: Role::User,
                content: "first answer".into(),
            },
            HistoryMessage {
                role: Role::Assistant,
                content: "what's your name?".into(),
            },
            HistoryMessage {
                role: Role::User,
                content: "Dana".into(),
            },
        ];
        let messages = build_messages(&history, ExtractionMode::Form);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "what's your name?");
        assert_eq!(messages[1].content, "Dana");
    }

    #[test]
    fn conversational_mode_keeps_full_window() {
        let history = vec![
            HistoryMessage {
                role: Role::User,
                content: "hi".into(),
            },
            HistoryMessage {
                role: Role::Assistant,
                content: "hello".into(),
            },
        ];
        let messages = build_messages(&history, ExtractionMode::Conversational);
        assert_eq!(messages.len(), 2);
    }
}
