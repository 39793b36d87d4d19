//! End-to-end dispatcher scenarios, literal transcriptions of spec.md §8's
//! S1-S6 plus a couple of the boundary behaviours named alongside them.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use crewline_core::config::DispatchConfig;
use crewline_core::error::Result as CoreResult;
use crewline_core::types::{
    CollectedFields, Conversation, ConversationMetadata, CrewMemberConfig, CrewSource, ExtractionMode, FieldSpec,
    FieldType, FieldValue, ToolDeclaration,
};
use crewline_crew::registry::{CrewDbSource, CrewFileSource, NoSource};
use crewline_crew::{CrewRegistry, Tool, ToolEventSink, ToolResult};
use crewline_dispatch::{DispatchRequest, Dispatcher, NoKnowledgeBase, NoTools, ProviderSet, StaticToolRegistry};
use crewline_llm::{ChatRequest, ChatResponse, LlmProvider, ProviderError, StreamEvent};
use crewline_protocol::DispatchEvent;
use crewline_sessions::{
    CollectedFieldsCache, ConversationStore, InMemoryConversationStore, InMemoryCrewPromptStore, InMemoryHistoryStore,
};
use tokio::sync::mpsc;

/// A crew-member configuration source the tests seed directly, standing in
/// for whatever database/file backend a real deployment wires in.
struct FixedDbSource {
    configs: Vec<CrewMemberConfig>,
}

#[async_trait]
impl CrewDbSource for FixedDbSource {
    async fn load_for_agent(&self, _agent: &str) -> CoreResult<Vec<CrewMemberConfig>> {
        Ok(self.configs.clone())
    }
}

fn registry(configs: Vec<CrewMemberConfig>) -> Arc<CrewRegistry> {
    Arc::new(CrewRegistry::new(
        Arc::new(FixedDbSource { configs }),
        Arc::new(NoSource) as Arc<dyn CrewFileSource>,
    ))
}

fn field(name: &str) -> FieldSpec {
    FieldSpec {
        name: name.to_string(),
        description: String::new(),
        field_type: None,
        allowed_values: None,
    }
}

fn boolean_field(name: &str) -> FieldSpec {
    FieldSpec {
        name: name.to_string(),
        description: String::new(),
        field_type: Some(FieldType::Boolean),
        allowed_values: None,
    }
}

fn base_crew(name: &str) -> CrewMemberConfig {
    CrewMemberConfig {
        name: name.to_string(),
        display_name: name.to_string(),
        description: String::new(),
        is_default: true,
        guidance: "be helpful".into(),
        model: "gpt-4o".into(),
        max_tokens: 512,
        tools: Vec::new(),
        knowledge_base: None,
        fields_to_collect: Vec::new(),
        extraction_mode: ExtractionMode::Conversational,
        transition_to: None,
        transition_system_prompt: None,
        one_shot: false,
        persona: None,
        source: CrewSource::Database,
    }
}

/// One provider standing in for the single LLM family every scenario uses
/// (all crews below are modeled as `gpt-4o`, which resolves to the OpenAI
/// family). `stream_turns` is drained one entry per `send_stream` call (one
/// call per crew or tool-loop iteration); `extractor_response` backs the
/// single non-streaming `send` call the field extractor makes.
struct ScriptedProvider {
    stream_turns: Mutex<VecDeque<Vec<StreamEvent>>>,
    extractor_response: Mutex<Option<String>>,
}

impl ScriptedProvider {
    fn new() -> Self {
        Self {
            stream_turns: Mutex::new(VecDeque::new()),
            extractor_response: Mutex::new(None),
        }
    }

    fn push_turn(&self, events: Vec<StreamEvent>) {
        self.stream_turns.lock().unwrap().push_back(events);
    }

    fn set_extractor_response(&self, content: impl Into<String>) {
        *self.extractor_response.lock().unwrap() = Some(content.into());
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let content = self.extractor_response.lock().unwrap().clone().unwrap_or_else(|| {
            r#"{"extractedFields": {}, "corrections": {}, "remainingFields": []}"#.to_string()
        });
        Ok(ChatResponse {
            content,
            model: "gpt-4o".into(),
            tokens_in: 0,
            tokens_out: 0,
            stop_reason: "stop".into(),
            tool_calls: Vec::new(),
        })
    }

    async fn send_stream(&self, _req: &ChatRequest, tx: mpsc::Sender<StreamEvent>) -> Result<(), ProviderError> {
        let events = self.stream_turns.lock().unwrap().pop_front().unwrap_or_else(|| {
            vec![StreamEvent::Done {
                model: "gpt-4o".into(),
                tokens_in: 0,
                tokens_out: 0,
                stop_reason: "stop".into(),
            }]
        });
        for ev in events {
            if tx.send(ev).await.is_err() {
                return Ok(());
            }
        }
        Ok(())
    }
}

fn done() -> StreamEvent {
    StreamEvent::Done {
        model: "gpt-4o".into(),
        tokens_in: 0,
        tokens_out: 0,
        stop_reason: "stop".into(),
    }
}

fn text(s: &str) -> StreamEvent {
    StreamEvent::TextDelta { text: s.to_string() }
}

struct Harness {
    dispatcher: Arc<Dispatcher>,
    conversations: Arc<InMemoryConversationStore>,
    provider: Arc<ScriptedProvider>,
}

fn build_harness(configs: Vec<CrewMemberConfig>, tool_registry: Arc<dyn crewline_dispatch::ToolRegistry>) -> Harness {
    let provider = Arc::new(ScriptedProvider::new());
    let conversations = Arc::new(InMemoryConversationStore::new());
    let fields_cache = Arc::new(CollectedFieldsCache::new(conversations.clone() as Arc<dyn ConversationStore>));
    let prompts = Arc::new(InMemoryCrewPromptStore::new());
    let history = Arc::new(InMemoryHistoryStore::new());
    let context = Arc::new(crewline_crew::InMemoryContextStore::new());
    let providers = ProviderSet::new().with_openai(provider.clone() as Arc<dyn LlmProvider>);
    let kb = Arc::new(NoKnowledgeBase);

    let dispatcher = Arc::new(Dispatcher::new(
        registry(configs),
        conversations.clone() as Arc<dyn ConversationStore>,
        fields_cache,
        prompts,
        history,
        context,
        providers,
        tool_registry,
        kb,
        DispatchConfig::default(),
    ));

    Harness {
        dispatcher,
        conversations,
        provider,
    }
}

async fn drain(mut events: mpsc::UnboundedReceiver<DispatchEvent>) -> Vec<DispatchEvent> {
    let mut out = Vec::new();
    while let Some(ev) = events.recv().await {
        let is_done = matches!(ev, DispatchEvent::Done);
        out.push(ev);
        if is_done {
            break;
        }
    }
    out
}

fn text_chunks(events: &[DispatchEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            DispatchEvent::TextChunk { payload } => Some(payload.clone()),
            _ => None,
        })
        .collect()
}

/// S1 — no extraction, straightforward stream.
#[tokio::test]
async fn s1_no_extraction_straightforward_stream() {
    let c1 = base_crew("C1");
    let harness = build_harness(vec![c1], Arc::new(NoTools));
    harness.provider.push_turn(vec![text("Hi "), text("there."), done()]);

    let req = DispatchRequest::new("hello", "a", "A");
    let handle = harness.dispatcher.dispatch(req);
    let events = drain(handle.events).await;

    assert_eq!(
        events.iter().map(DispatchEvent::type_name).collect::<Vec<_>>(),
        vec!["text_chunk", "text_chunk", "done"]
    );
    assert_eq!(text_chunks(&events), vec!["Hi ".to_string(), "there.".to_string()]);

    let transition = handle.transition.await.unwrap();
    assert!(transition.is_none());

    let conv = harness.conversations.load("a").await.unwrap().unwrap();
    assert_eq!(conv.current_crew_member.as_deref(), Some("C1"));
    assert!(conv.metadata.collected_fields.is_none());
}

/// S2 — extractor finds a field, no transfer (the second declared field is
/// never collected, so `preMessageTransfer`'s "every declared field present"
/// rule never fires).
#[tokio::test]
async fn s2_extractor_finds_a_field_no_transfer() {
    let mut c1 = base_crew("C1");
    c1.fields_to_collect = vec![field("user_name"), field("age_years")];
    c1.transition_to = Some("C2".into());
    let mut c2 = base_crew("C2");
    c2.is_default = false;

    let harness = build_harness(vec![c1, c2], Arc::new(NoTools));
    harness
        .provider
        .set_extractor_response(r#"{"extractedFields": {"user_name": "Dana"}, "corrections": {}, "remainingFields": ["age_years"]}"#);
    harness
        .provider
        .push_turn(vec![text("Nice to meet you, "), text("Dana."), done()]);

    let req = DispatchRequest::new("I'm Dana", "b", "A");
    let handle = harness.dispatcher.dispatch(req);
    let events = drain(handle.events).await;

    assert_eq!(
        events.iter().map(DispatchEvent::type_name).collect::<Vec<_>>(),
        vec!["field_extracted", "text_chunk", "text_chunk", "done"]
    );
    match &events[0] {
        DispatchEvent::FieldExtracted { name, value } => {
            assert_eq!(name, "user_name");
            assert_eq!(value, &serde_json::json!("Dana"));
        }
        other => panic!("unexpected first event: {other:?}"),
    }
    assert!(!events.iter().any(|e| matches!(e, DispatchEvent::CrewTransition { .. })));

    let conv = harness.conversations.load("b").await.unwrap().unwrap();
    let collected = conv.metadata.collected_fields.unwrap();
    assert_eq!(collected.get("user_name"), Some(&FieldValue::Text("Dana".into())));
    assert!(!collected.contains_key("age_years"));
}

/// S3 — extractor triggers a transfer; the buffered C1 response is
/// discarded, the target C2's response streams instead.
#[tokio::test]
async fn s3_extractor_triggers_transfer_buffered_discard() {
    let mut c1 = base_crew("C1");
    c1.is_default = true;
    c1.fields_to_collect = vec![boolean_field("consent")];
    c1.transition_to = Some("C2".into());
    let mut c2 = base_crew("C2");
    c2.is_default = false;

    let harness = build_harness(vec![c1, c2], Arc::new(NoTools));
    harness
        .provider
        .set_extractor_response(r#"{"extractedFields": {"consent": "true"}, "corrections": {}, "remainingFields": []}"#);
    // C1's about-to-be-discarded response, then C2's real one.
    harness
        .provider
        .push_turn(vec![text("Great, "), text("let me "), text("continue...")]);
    harness.provider.push_turn(vec![text("Welcome!"), done()]);

    let req = DispatchRequest::new("yes", "c", "A");
    let handle = harness.dispatcher.dispatch(req);
    let events = drain(handle.events).await;

    assert_eq!(
        events.iter().map(DispatchEvent::type_name).collect::<Vec<_>>(),
        vec!["field_extracted", "crew_transition", "crew_info", "text_chunk", "done"]
    );
    assert_eq!(text_chunks(&events), vec!["Welcome!".to_string()]);

    match &events[1] {
        DispatchEvent::CrewTransition { from, to, .. } => {
            assert_eq!(from, "C1");
            assert_eq!(to, "C2");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let conv = harness.conversations.load("c").await.unwrap().unwrap();
    assert_eq!(conv.current_crew_member.as_deref(), Some("C2"));
}

/// S4 — all required fields already present; early transfer without an LLM
/// call for C1 or the extractor.
#[tokio::test]
async fn s4_early_transfer_without_llm_call() {
    let mut c1 = base_crew("C1");
    c1.fields_to_collect = vec![boolean_field("consent")];
    c1.transition_to = Some("C2".into());
    let mut c2 = base_crew("C2");
    c2.is_default = false;

    let harness = build_harness(vec![c1, c2], Arc::new(NoTools));

    let mut collected = CollectedFields::new();
    collected.insert("consent".into(), FieldValue::Bool(true));
    harness
        .conversations
        .save(&Conversation {
            id: "d".into(),
            agent_name: "A".into(),
            user_id: None,
            current_crew_member: Some("C1".into()),
            metadata: ConversationMetadata {
                collected_fields: Some(collected),
                ..Default::default()
            },
        })
        .await
        .unwrap();

    // Only one turn queued: if the dispatcher made an LLM call for C1 by
    // mistake, C2's "Welcome back." would never be reached and the test
    // would see the wrong text (or none at all, once the queue runs dry).
    harness.provider.push_turn(vec![text("Welcome back."), done()]);

    let req = DispatchRequest::new("hi again", "d", "A");
    let handle = harness.dispatcher.dispatch(req);
    let events = drain(handle.events).await;

    assert_eq!(
        events.iter().map(DispatchEvent::type_name).collect::<Vec<_>>(),
        vec!["crew_transition", "crew_info", "text_chunk", "done"]
    );
    assert_eq!(text_chunks(&events), vec!["Welcome back.".to_string()]);
}

/// S5 — form mode with a negative answer and a correction to an already
/// collected field. Exercises the `declared_fields`-vs-`missing_fields`
/// distinction in the extractor's validation: `country` is not missing (it
/// was already collected) but must still accept a correction.
#[tokio::test]
async fn s5_form_mode_negative_and_correction() {
    let mut crew = base_crew("C_form");
    crew.extraction_mode = ExtractionMode::Form;
    crew.fields_to_collect = vec![field("has_other_accounts"), field("country")];

    let harness = build_harness(vec![crew], Arc::new(NoTools));

    let mut collected = CollectedFields::new();
    collected.insert("country".into(), FieldValue::Text("USA".into()));
    harness
        .conversations
        .save(&Conversation {
            id: "e".into(),
            agent_name: "A".into(),
            user_id: None,
            current_crew_member: Some("C_form".into()),
            metadata: ConversationMetadata {
                collected_fields: Some(collected),
                ..Default::default()
            },
        })
        .await
        .unwrap();

    harness.provider.set_extractor_response(
        r#"{"extractedFields": {"has_other_accounts": "No"}, "corrections": {"country": "Canada"}, "remainingFields": []}"#,
    );
    harness.provider.push_turn(vec![text("Got it, thanks."), done()]);

    let req = DispatchRequest::new("no, actually I'm in Canada.", "e", "A");
    let handle = harness.dispatcher.dispatch(req);
    let events = drain(handle.events).await;

    let field_events: Vec<(&str, &serde_json::Value)> = events
        .iter()
        .filter_map(|e| match e {
            DispatchEvent::FieldExtracted { name, value } => Some((name.as_str(), value)),
            _ => None,
        })
        .collect();
    assert_eq!(field_events[0].0, "has_other_accounts");
    assert_eq!(field_events[1].0, "country");
    assert_eq!(field_events[1].1, &serde_json::json!("Canada"));

    let conv = harness.conversations.load("e").await.unwrap().unwrap();
    let collected = conv.metadata.collected_fields.unwrap();
    assert_eq!(collected.get("has_other_accounts"), Some(&FieldValue::Text("No".into())));
    assert_eq!(collected.get("country"), Some(&FieldValue::Text("Canada".into())));
}

/// A tool the model calls mid-stream.
struct LookupBalance;

#[async_trait]
impl Tool for LookupBalance {
    fn name(&self) -> &str {
        "lookup_balance"
    }

    async fn execute(&self, _input: serde_json::Value, _events: &dyn ToolEventSink) -> ToolResult {
        ToolResult::success(serde_json::json!({"balance": 42}).to_string())
    }
}

/// S6 — tool call during a stream: text, then a tool call, then more text
/// once the handler's result comes back.
#[tokio::test]
async fn s6_tool_call_during_stream() {
    let mut crew = base_crew("C_tool");
    crew.tools = vec![ToolDeclaration {
        name: "lookup_balance".into(),
        description: "look up an account balance".into(),
        parameters_schema: serde_json::json!({"type": "object"}),
    }];

    let mut tools = StaticToolRegistry::new();
    tools.register("A", "C_tool", Arc::new(LookupBalance) as Arc<dyn Tool>);

    let harness = build_harness(vec![crew], Arc::new(tools));

    harness.provider.push_turn(vec![
        text("One moment. "),
        StreamEvent::ToolUse {
            id: "call_1".into(),
            name: "lookup_balance".into(),
            input: serde_json::json!({"account_id": "X"}),
        },
    ]);
    harness.provider.push_turn(vec![text("Your balance is 42."), done()]);

    let req = DispatchRequest::new("what's my balance?", "f", "A");
    let handle = harness.dispatcher.dispatch(req);
    let events = drain(handle.events).await;

    assert_eq!(
        events.iter().map(DispatchEvent::type_name).collect::<Vec<_>>(),
        vec!["text_chunk", "function_call", "function_result", "text_chunk", "done"]
    );

    match &events[1] {
        DispatchEvent::FunctionCall { name, params } => {
            assert_eq!(name, "lookup_balance");
            assert_eq!(params, &serde_json::json!({"account_id": "X"}));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match &events[2] {
        DispatchEvent::FunctionResult { name, .. } => assert_eq!(name, "lookup_balance"),
        other => panic!("unexpected event: {other:?}"),
    }
}

/// Boundary behaviour: a crew stream that emits zero chunks before the
/// extractor finds something still announces `field_extracted`.
#[tokio::test]
async fn boundary_zero_chunk_crew_stream_still_announces_fields() {
    let mut crew = base_crew("C1");
    crew.fields_to_collect = vec![field("name")];
    // no transition_to: nothing to transfer into even once collected.

    let harness = build_harness(vec![crew], Arc::new(NoTools));
    harness
        .provider
        .set_extractor_response(r#"{"extractedFields": {"name": "Dana"}, "corrections": {}, "remainingFields": []}"#);
    harness.provider.push_turn(vec![done()]);

    let req = DispatchRequest::new("I'm Dana", "g", "A");
    let handle = harness.dispatcher.dispatch(req);
    let events = drain(handle.events).await;

    assert_eq!(
        events.iter().map(DispatchEvent::type_name).collect::<Vec<_>>(),
        vec!["field_extracted", "done"]
    );
}

/// Boundary behaviour: the transition target named by `transitionTo` isn't
/// in the registry. The gate still tries to transfer (consent is present),
/// the lookup for "ghost" fails, and the dispatch ends with no transition
/// and no crew response — only the field announcement survives.
#[tokio::test]
async fn boundary_missing_transition_target_falls_back_to_original_response() {
    let mut crew = base_crew("C1");
    crew.fields_to_collect = vec![boolean_field("consent")];
    crew.transition_to = Some("ghost".into());

    let harness = build_harness(vec![crew], Arc::new(NoTools));
    harness
        .provider
        .set_extractor_response(r#"{"extractedFields": {"consent": "true"}, "corrections": {}, "remainingFields": []}"#);
    harness.provider.push_turn(vec![text("Sticking with me."), done()]);

    let req = DispatchRequest::new("yes", "h", "A");
    let handle = harness.dispatcher.dispatch(req);
    let events = drain(handle.events).await;
    assert_eq!(
        events.iter().map(DispatchEvent::type_name).collect::<Vec<_>>(),
        vec!["field_extracted", "text_chunk", "done"]
    );
    assert_eq!(text_chunks(&events), vec!["Sticking with me.".to_string()]);

    let transition = handle.transition.await.unwrap();
    assert!(transition.is_none());
}
