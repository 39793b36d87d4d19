use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named suite of crew members.
///
/// Lifecycle: created by an operator, immutable key-fields thereafter. The
/// `config` envelope is opaque to the dispatcher — it is forwarded to
/// whichever crew-registry backend resolves crew members for this agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    pub url_slug: Option<String>,
    pub active: bool,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Where a crew-member definition came from. File always wins over database
/// on a name collision (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrewSource {
    File,
    Database,
}

/// One of the two supported field-extraction strategies (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    Conversational,
    Form,
}

impl Default for ExtractionMode {
    fn default() -> Self {
        ExtractionMode::Conversational
    }
}

/// Typing constraint on a declared field, used both to steer the extractor
/// prompt and to validate its output before it reaches the cache (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Boolean,
    Enum,
    Text,
}

/// Declaration of a single field the crew wants extracted from the
/// conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub field_type: Option<FieldType>,
    /// Required when `field_type == Some(FieldType::Enum)`; the extractor
    /// must return a value from this list verbatim or produce nothing.
    #[serde(default)]
    pub allowed_values: Option<Vec<String>>,
}

/// A tool declaration attached to a crew member. The handler itself is code,
/// not data — it is registered separately against the crew (see
/// `crewline_crew::tools::Tool`); this struct only carries what gets
/// serialised into the LLM's tool schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// `knowledgeBase` configuration on a crew member (§3.1). Resolution of
/// `sources` into provider-specific identifiers is out of scope here — see
/// spec.md §1 "Out of scope: Knowledge-base resolution...".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseConfig {
    pub enabled: bool,
    pub sources: Vec<String>,
}

/// The unit of prompt-configured behaviour (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrewMemberConfig {
    pub name: String,
    pub display_name: String,
    pub description: String,
    #[serde(default)]
    pub is_default: bool,
    pub guidance: String,
    pub model: String,
    pub max_tokens: u32,
    #[serde(default)]
    pub tools: Vec<ToolDeclaration>,
    #[serde(default)]
    pub knowledge_base: Option<KnowledgeBaseConfig>,
    #[serde(default)]
    pub fields_to_collect: Vec<FieldSpec>,
    #[serde(default)]
    pub extraction_mode: ExtractionMode,
    #[serde(default)]
    pub transition_to: Option<String>,
    #[serde(default)]
    pub transition_system_prompt: Option<String>,
    #[serde(default)]
    pub one_shot: bool,
    #[serde(default)]
    pub persona: Option<String>,
    pub source: CrewSource,
}

impl CrewMemberConfig {
    /// A crew with no declared fields skips the extractor entirely (§4.4.2.A).
    pub fn collects_fields(&self) -> bool {
        !self.fields_to_collect.is_empty()
    }

    /// Tool names must be unique within a crew (§3.1 invariant).
    pub fn has_duplicate_tool_names(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        !self.tools.iter().all(|t| seen.insert(t.name.as_str()))
    }
}

/// A single extracted or collected field value. Spec.md §3.1 restricts
/// collected values to string or boolean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Bool(bool),
}

impl FieldValue {
    /// Render as the raw string the extractor prompt contract expects
    /// (booleans are serialised as the literal `"true"`/`"false"`, matching
    /// the wire examples in spec.md §8 S3/S4).
    pub fn as_wire_string(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Bool(b) => b.to_string(),
        }
    }
}

/// Mapping from field name to extracted value, keyed per-conversation.
pub type CollectedFields = HashMap<String, FieldValue>;

/// Role of a single turn in conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One turn of conversation history, as the dispatcher reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
}

/// Reserved, well-known keys inside `Conversation::metadata` (§3.1, §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collected_fields: Option<CollectedFields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_crew_with_transition_prompt: Option<String>,
    /// Back-compat read-only mirror of `Conversation::current_crew_member`.
    /// Readers must check both; writers write only the top-level field
    /// (spec.md §9 Open Questions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_crew_member: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Persistent conversation thread (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub agent_name: String,
    pub user_id: Option<String>,
    pub current_crew_member: Option<String>,
    #[serde(default)]
    pub metadata: ConversationMetadata,
}

impl Conversation {
    /// Resolve the stored current crew, checking both the top-level field
    /// and the `metadata.currentCrewMember` fallback, top-level first
    /// (§4.4.1 step 2, §9 Open Questions — order preserved for back-compat).
    pub fn resolved_current_crew(&self) -> Option<&str> {
        self.current_crew_member
            .as_deref()
            .or(self.metadata.current_crew_member.as_deref())
    }
}

/// Emitted out-of-band after a dispatch completes when a post-response
/// transition fired (§4.5). Not part of the event stream — the effect is
/// visible to the user only on the next turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: String,
    pub to: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_current_crew_prefers_top_level() {
        let conv = Conversation {
            id: "c1".into(),
            agent_name: "A".into(),
            user_id: None,
            current_crew_member: Some("C1".into()),
            metadata: ConversationMetadata {
                current_crew_member: Some("C2".into()),
                ..Default::default()
            },
        };
        assert_eq!(conv.resolved_current_crew(), Some("C1"));
    }

    #[test]
    fn resolved_current_crew_falls_back_to_metadata() {
        let conv = Conversation {
            id: "c1".into(),
            agent_name: "A".into(),
            user_id: None,
            current_crew_member: None,
            metadata: ConversationMetadata {
                current_crew_member: Some("C2".into()),
                ..Default::default()
            },
        };
        assert_eq!(conv.resolved_current_crew(), Some("C2"));
    }

    #[test]
    fn field_value_wire_string() {
        assert_eq!(FieldValue::Bool(true).as_wire_string(), "true");
        assert_eq!(FieldValue::Text("Dana".into()).as_wire_string(), "Dana");
    }
}
