//! The `Dispatcher`: wires every collaborating service together and drives
//! one dispatch call end to end (spec.md §4.4).

use std::sync::Arc;

use crewline_core::config::DispatchConfig;
use crewline_core::error::{CrewlineError, Result};
use crewline_core::types::{
    Conversation, ConversationMetadata, FieldSpec, HistoryMessage, Role as CoreRole, TransitionRecord,
};
use crewline_crew::member::{BuildContextParams, TransitionCheckParams};
use crewline_crew::{ContextStore, CrewMember, CrewRegistry};
use crewline_llm::{ChatRequest, LlmProvider, Message as LlmMessage, ProviderError, Role as LlmRole};
use crewline_protocol::{CrewSnapshot, DispatchEvent};
use crewline_sessions::{CollectedFieldsCache, ConversationStore, CrewPromptStore, HistoryStore};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::warn;

use crate::crew_stream::{run_crew_stream, CrewEvent};
use crate::events::{crew_event_to_dispatch, crew_snapshot_to_wire};
use crate::gate::{run_gate, GateOutcome};
use crate::kb::KnowledgeBaseResolver;
use crate::providers::ProviderSet;
use crate::request::DispatchRequest;
use crate::resolve::{resolve_current_crew, resolve_model, resolve_prompt, resolve_transition_system_prompt};
use crate::tools::ToolRegistry;
use crate::transitions::resolve_post_response_transition;

/// Everything a call to [`Dispatcher::dispatch`] hands back: the event
/// stream (spec.md §3.1 "Dispatch event") and, separately, the
/// post-response transition record surfaced out-of-band (spec.md §4.5 —
/// "it is not yielded as an event").
pub struct DispatchHandle {
    pub events: mpsc::UnboundedReceiver<DispatchEvent>,
    pub transition: oneshot::Receiver<Option<TransitionRecord>>,
}

/// Wires the collaborating services together for one agent deployment.
/// Holds the per-conversation serialisation locks named in spec.md §5
/// ("serialising concurrent dispatches for the same conversation is the
/// caller's responsibility").
pub struct Dispatcher {
    registry: Arc<CrewRegistry>,
    conversations: Arc<dyn ConversationStore>,
    fields_cache: Arc<CollectedFieldsCache>,
    prompts: Arc<dyn CrewPromptStore>,
    history: Arc<dyn HistoryStore>,
    context: Arc<dyn ContextStore>,
    providers: ProviderSet,
    tool_registry: Arc<dyn ToolRegistry>,
    kb: Arc<dyn KnowledgeBaseResolver>,
    config: DispatchConfig,
    locks: dashmap::DashMap<String, Arc<Mutex<()>>>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<CrewRegistry>,
        conversations: Arc<dyn ConversationStore>,
        fields_cache: Arc<CollectedFieldsCache>,
        prompts: Arc<dyn CrewPromptStore>,
        history: Arc<dyn HistoryStore>,
        context: Arc<dyn ContextStore>,
        providers: ProviderSet,
        tool_registry: Arc<dyn ToolRegistry>,
        kb: Arc<dyn KnowledgeBaseResolver>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            registry,
            conversations,
            fields_cache,
            prompts,
            history,
            context,
            providers,
            tool_registry,
            kb,
            config,
            locks: dashmap::DashMap::new(),
        }
    }

    /// Entry point (spec.md §6). Spawns the dispatch as a background task
    /// and returns immediately with the event stream and the out-of-band
    /// transition slot.
    pub fn dispatch(self: &Arc<Self>, req: DispatchRequest) -> DispatchHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let (transition_tx, transition_rx) = oneshot::channel();
        let dispatcher = self.clone();

        tokio::spawn(async move {
            let result = dispatcher.run(&req, &tx).await;
            let transition = match result {
                Ok(t) => t,
                Err(e) => {
                    warn!(conversation_id = %req.conversation_id, err = %e, "dispatch failed");
                    None
                }
            };
            let _ = transition_tx.send(transition);
            let _ = tx.send(DispatchEvent::Done);
        });

        DispatchHandle {
            events: rx,
            transition: transition_rx,
        }
    }

    async fn conversation_lock(&self, conversation_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    async fn run(
        &self,
        req: &DispatchRequest,
        tx: &mpsc::UnboundedSender<DispatchEvent>,
    ) -> Result<Option<TransitionRecord>> {
        let _guard = self.conversation_lock(&req.conversation_id).await;

        let conversation = self.conversations.load(&req.conversation_id).await?;
        let crew = resolve_current_crew(
            &self.registry,
            &req.agent_name,
            req.override_crew_member.as_deref(),
            conversation.as_ref(),
        )
        .await?;

        self.persist_current_crew_if_changed(req, conversation.as_ref(), crew.config().name.as_str())
            .await?;

        self.history
            .append(&req.conversation_id, HistoryMessage { role: CoreRole::User, content: req.message.clone() })
            .await;

        let collected = self.fields_cache.get_collected_fields(&req.conversation_id).await;
        let candidate_fields = crew.fields_for_extraction(&collected);
        let missing: Vec<FieldSpec> = candidate_fields
            .into_iter()
            .filter(|f| !collected.contains_key(&f.name))
            .collect();

        let (served_crew, response_text, provider_result) = if !crew.config().collects_fields() {
            // Mode A (spec.md §4.4.2.A): nothing to extract.
            self.run_mode_a(req, &crew, tx).await?
        } else if !missing.is_empty() {
            // Mode C (spec.md §4.4.2.C): buffered parallel execution.
            self.run_mode_c(req, &crew, &collected, &missing, tx).await?
        } else if crew.pre_message_transfer(&collected).await {
            // Mode B (spec.md §4.4.2.B): everything already present.
            self.run_mode_b(req, &crew, tx).await?
        } else {
            self.run_mode_a(req, &crew, tx).await?
        };

        if let Err(e) = provider_result {
            warn!(conversation_id = %req.conversation_id, err = %e, "crew stream ended with a provider error");
        }

        self.history
            .append(&req.conversation_id, HistoryMessage { role: CoreRole::Assistant, content: response_text.clone() })
            .await;

        self.mark_transition_prompt_delivered(req, &served_crew).await?;

        let check_params = TransitionCheckParams {
            message: req.message.clone(),
            response: response_text,
        };
        let transition = resolve_post_response_transition(
            served_crew.as_ref(),
            &req.agent_name,
            &self.fields_cache.get_collected_fields(&req.conversation_id).await,
            &check_params,
            &self.registry,
        )
        .await;

        if let Some(ref record) = transition {
            self.set_current_crew(&req.conversation_id, &record.to).await?;
        }

        Ok(transition)
    }

    /// Mode A (spec.md §4.4.2.A): stream the crew directly, no coordination.
    async fn run_mode_a(
        &self,
        req: &DispatchRequest,
        crew: &Arc<dyn CrewMember>,
        tx: &mpsc::UnboundedSender<DispatchEvent>,
    ) -> Result<(Arc<dyn CrewMember>, String, std::result::Result<(), ProviderError>)> {
        let (provider, chat_request, tools, kb_files) = self.prepare_turn(req, crew, tx).await?;
        if !kb_files.is_empty() {
            let _ = tx.send(DispatchEvent::FileSearchResults { files: kb_files });
        }

        let (inner_tx, mut inner_rx) = mpsc::unbounded_channel::<CrewEvent>();
        let max_iter = self.config.tool_loop_max_iterations;
        let stream_provider = provider.clone();
        let handle = tokio::spawn(async move { run_crew_stream(stream_provider, chat_request, &tools, max_iter, &inner_tx).await });

        let mut response_text = String::new();
        while let Some(event) = inner_rx.recv().await {
            if let CrewEvent::Text(ref t) = event {
                response_text.push_str(t);
            }
            let _ = tx.send(crew_event_to_dispatch(event));
        }

        let result = handle.await.unwrap_or_else(|e| {
            warn!(err = %e, "crew stream task panicked");
            Ok(())
        });

        Ok((crew.clone(), response_text, result))
    }

    /// Mode B (spec.md §4.4.2.B): every declared field is already present
    /// and the crew wants to hand off before a single token is generated.
    async fn run_mode_b(
        &self,
        req: &DispatchRequest,
        crew: &Arc<dyn CrewMember>,
        tx: &mpsc::UnboundedSender<DispatchEvent>,
    ) -> Result<(Arc<dyn CrewMember>, String, std::result::Result<(), ProviderError>)> {
        let target = match self.resolve_transition_target(req, crew).await {
            Some(target) => target,
            // Transition target missing: drop it and respond as this crew
            // (spec.md:282, spec.md:309).
            None => return self.run_mode_a(req, crew, tx).await,
        };
        let target_name = target.config().name.clone();

        let _ = tx.send(DispatchEvent::CrewTransition {
            from: crew.config().name.clone(),
            to: target_name.clone(),
            reason: "fields collected before first response".to_string(),
            timestamp: chrono::Utc::now(),
        });
        self.set_current_crew(&req.conversation_id, &target_name).await?;
        let _ = tx.send(DispatchEvent::CrewInfo { crew: target.to_snapshot_wire() });

        self.run_mode_a(req, &target, tx).await
    }

    /// Resolve a crew's declared `transitionTo` target, warning and dropping
    /// the transition instead of failing the whole dispatch when it is
    /// absent or unresolvable (mirrors `transitions::finalize`).
    async fn resolve_transition_target(
        &self,
        req: &DispatchRequest,
        crew: &Arc<dyn CrewMember>,
    ) -> Option<Arc<dyn CrewMember>> {
        let target_name = crew.config().transition_to.clone()?;
        match self.registry.get_crew_member(&req.agent_name, &target_name).await {
            Ok(target) => Some(target),
            Err(_) => {
                warn!(
                    agent = %req.agent_name,
                    from = %crew.config().name,
                    to = %target_name,
                    "transition target crew not found, dropping transition"
                );
                None
            }
        }
    }

    /// Mode C (spec.md §4.4.2.C): the buffered parallel gate.
    async fn run_mode_c(
        &self,
        req: &DispatchRequest,
        crew: &Arc<dyn CrewMember>,
        collected: &crewline_core::types::CollectedFields,
        missing: &[FieldSpec],
        tx: &mpsc::UnboundedSender<DispatchEvent>,
    ) -> Result<(Arc<dyn CrewMember>, String, std::result::Result<(), ProviderError>)> {
        let (provider, chat_request, tools, kb_files) = self.prepare_turn(req, crew, tx).await?;

        let extraction_mode = crew.config().extraction_mode;
        let history = self.history.recent(&req.conversation_id, self.config.history_window).await;
        let extractor_model = resolve_model(crew.config(), &req.model_overrides);
        let extractor_provider = self
            .providers
            .resolve(&extractor_model)
            .ok_or_else(|| CrewlineError::LlmProvider(format!("no provider configured for model '{extractor_model}'")))?;
        let extractor_timeout =
            std::time::Duration::from_millis(self.config.extractor_timeout_ms);

        let outcome = run_gate(
            crew.clone(),
            provider,
            chat_request,
            tools,
            self.config.tool_loop_max_iterations,
            extractor_provider,
            extractor_model,
            512,
            extractor_timeout,
            history,
            missing.to_vec(),
            crew.config().fields_to_collect.clone(),
            collected.clone(),
            extraction_mode,
        )
        .await;

        match outcome {
            GateOutcome::Transfer { field_events, buffered_events, remaining, crew_task } => {
                for (name, value) in &field_events {
                    let _ = tx.send(DispatchEvent::FieldExtracted { name: name.clone(), value: field_value_to_wire(value) });
                }
                if !field_events.is_empty() {
                    let merged: crewline_core::types::CollectedFields = field_events.into_iter().collect();
                    self.fields_cache.update_collected_fields(&req.conversation_id, merged).await;
                }
                if !kb_files.is_empty() {
                    let _ = tx.send(DispatchEvent::FileSearchResults { files: kb_files.clone() });
                }

                let target = match self.resolve_transition_target(req, crew).await {
                    Some(target) => target,
                    // Transition target missing: the crew's own buffered
                    // response is still delivered (spec.md:282, spec.md:309).
                    None => {
                        let (response_text, result) = self.drain_crew_stream(buffered_events, remaining, crew_task, tx).await;
                        return Ok((crew.clone(), response_text, result));
                    }
                };
                crew_task.abort();
                let target_name = target.config().name.clone();

                let _ = tx.send(DispatchEvent::CrewTransition {
                    from: crew.config().name.clone(),
                    to: target_name.clone(),
                    reason: "fields collected mid-response".to_string(),
                    timestamp: chrono::Utc::now(),
                });
                self.set_current_crew(&req.conversation_id, &target_name).await?;
                let _ = tx.send(DispatchEvent::CrewInfo { crew: target.to_snapshot_wire() });

                self.run_mode_a(req, &target, tx).await
            }
            GateOutcome::Continue { field_events, buffered_events, remaining, crew_task } => {
                for (name, value) in &field_events {
                    let _ = tx.send(DispatchEvent::FieldExtracted { name: name.clone(), value: field_value_to_wire(value) });
                }
                if !field_events.is_empty() {
                    let merged: crewline_core::types::CollectedFields = field_events.into_iter().collect();
                    self.fields_cache.update_collected_fields(&req.conversation_id, merged).await;
                }
                if !kb_files.is_empty() {
                    let _ = tx.send(DispatchEvent::FileSearchResults { files: kb_files.clone() });
                }

                let (response_text, result) = self.drain_crew_stream(buffered_events, remaining, crew_task, tx).await;
                Ok((crew.clone(), response_text, result))
            }
        }
    }

    /// Flush buffered crew events, then drain the rest of the stream
    /// directly, accumulating response text as it goes.
    async fn drain_crew_stream(
        &self,
        buffered_events: Vec<CrewEvent>,
        mut remaining: mpsc::UnboundedReceiver<CrewEvent>,
        crew_task: tokio::task::JoinHandle<std::result::Result<(), ProviderError>>,
        tx: &mpsc::UnboundedSender<DispatchEvent>,
    ) -> (String, std::result::Result<(), ProviderError>) {
        let mut response_text = String::new();
        for event in buffered_events {
            if let CrewEvent::Text(ref t) = event {
                response_text.push_str(t);
            }
            let _ = tx.send(crew_event_to_dispatch(event));
        }
        while let Some(event) = remaining.recv().await {
            if let CrewEvent::Text(ref t) = event {
                response_text.push_str(t);
            }
            let _ = tx.send(crew_event_to_dispatch(event));
        }

        let result = crew_task.await.unwrap_or_else(|e| {
            warn!(err = %e, "crew stream task panicked");
            Ok(())
        });
        (response_text, result)
    }

    /// Resolve prompt, model, provider, context, and tool schemas for one
    /// crew turn (spec.md §4.4.3, §4.4.4). Also resolves knowledge-base
    /// sources and, when `req.debug`, emits the debug events (spec.md §3.1
    /// "debug_prompt/debug_context_update — only when debug=true"); the
    /// caller still decides when to surface `file_search_results` relative
    /// to its own `field_extracted` events.
    async fn prepare_turn(
        &self,
        req: &DispatchRequest,
        crew: &Arc<dyn CrewMember>,
        tx: &mpsc::UnboundedSender<DispatchEvent>,
    ) -> Result<(Arc<dyn LlmProvider>, ChatRequest, Vec<Arc<dyn crewline_crew::Tool>>, Vec<String>)> {
        let config = crew.config();
        let stored_prompt = self.prompts.active_prompt(&config.name).await;
        let guidance = resolve_prompt(config, &req.prompt_overrides, stored_prompt.as_ref());
        let model = resolve_model(config, &req.model_overrides);
        let provider = self
            .providers
            .resolve(&model)
            .ok_or_else(|| CrewlineError::LlmProvider(format!("no provider configured for model '{model}'")))?;

        let conversation = self.conversations.load(&req.conversation_id).await?;
        let build_params = BuildContextParams {
            user_id: conversation.as_ref().and_then(|c| c.user_id.clone()),
            conversation_id: req.conversation_id.clone(),
        };
        let context = crew.build_context(&build_params, self.context.as_ref()).await;

        if req.debug {
            let _ = tx.send(DispatchEvent::DebugContextUpdate {
                context: serde_json::Value::Object(context.clone()),
            });
        }

        let transition_prompt = if self.transition_prompt_due(conversation.as_ref(), config) {
            resolve_transition_system_prompt(config, stored_prompt.as_ref())
        } else {
            None
        };

        let mut kb_note = None;
        let mut knowledge_base = None;
        let mut kb_files = Vec::new();
        if req.use_knowledge_base {
            if let Some(kb_config) = &config.knowledge_base {
                if kb_config.enabled {
                    let resolved = self.kb.resolve(&kb_config.sources).await;
                    if !resolved.is_empty() {
                        kb_note = Some(crate::kb::KNOWLEDGE_BASE_CONTEXT_NOTE.to_string());
                        kb_files = resolved.clone();
                        knowledge_base = Some(resolved);
                    }
                }
            }
        }

        let system = compose_system_prompt(&guidance, &context, transition_prompt.as_deref(), kb_note.as_deref());

        if req.debug {
            let _ = tx.send(DispatchEvent::DebugPrompt { prompt: system.clone() });
        }

        let message = crew.pre_process(req.message.clone(), &context).await;

        let history = self.history.recent(&req.conversation_id, self.config.history_window).await;
        let mut messages: Vec<LlmMessage> = history
            .iter()
            .take(history.len().saturating_sub(1))
            .map(to_llm_message)
            .collect();
        messages.push(LlmMessage { role: LlmRole::User, content: message });

        let tools = self.tool_registry.tools_for(&req.agent_name, &config.name);

        let chat_request = ChatRequest {
            model,
            system,
            messages,
            max_tokens: config.max_tokens,
            tools: crew.tool_schemas(),
            raw_messages: None,
            knowledge_base,
        };

        Ok((provider, chat_request, tools, kb_files))
    }

    fn transition_prompt_due(&self, conversation: Option<&Conversation>, config: &crewline_core::types::CrewMemberConfig) -> bool {
        let last = conversation.and_then(|c| c.metadata.last_crew_with_transition_prompt.as_deref());
        last != Some(config.name.as_str())
    }

    async fn mark_transition_prompt_delivered(&self, req: &DispatchRequest, crew: &Arc<dyn CrewMember>) -> Result<()> {
        let mut conversation = self.load_or_new_conversation(req).await?;
        conversation.metadata.last_crew_with_transition_prompt = Some(crew.config().name.clone());
        self.conversations.save(&conversation).await
    }

    /// §9 Open Questions: writers write only the top-level
    /// `currentCrewMember`; the `metadata` mirror is read-only back-compat.
    async fn persist_current_crew_if_changed(
        &self,
        req: &DispatchRequest,
        conversation: Option<&Conversation>,
        crew_name: &str,
    ) -> Result<()> {
        if conversation.and_then(|c| c.resolved_current_crew()) == Some(crew_name) {
            return Ok(());
        }
        self.set_current_crew(&req.conversation_id, crew_name).await
    }

    async fn set_current_crew(&self, conversation_id: &str, crew_name: &str) -> Result<()> {
        let mut conversation = self.load_or_new_by_id(conversation_id).await?;
        conversation.current_crew_member = Some(crew_name.to_string());
        self.conversations.save(&conversation).await
    }

    async fn load_or_new_conversation(&self, req: &DispatchRequest) -> Result<Conversation> {
        self.load_or_new(&req.conversation_id, &req.agent_name).await
    }

    async fn load_or_new_by_id(&self, conversation_id: &str) -> Result<Conversation> {
        self.load_or_new(conversation_id, "").await
    }

    async fn load_or_new(&self, conversation_id: &str, agent_name: &str) -> Result<Conversation> {
        match self.conversations.load(conversation_id).await? {
            Some(c) => Ok(c),
            None => Ok(Conversation {
                id: conversation_id.to_string(),
                agent_name: agent_name.to_string(),
                user_id: None,
                current_crew_member: None,
                metadata: ConversationMetadata::default(),
            }),
        }
    }
}

fn compose_system_prompt(
    guidance: &str,
    context: &crewline_crew::CrewContext,
    transition_prompt: Option<&str>,
    kb_note: Option<&str>,
) -> String {
    let mut sections = vec![guidance.to_string()];
    if !context.is_empty() {
        let rendered = serde_json::to_string(context).unwrap_or_default();
        sections.push(format!("Current Context:\n{rendered}"));
    }
    if let Some(t) = transition_prompt {
        sections.push(t.to_string());
    }
    if let Some(note) = kb_note {
        sections.push(note.to_string());
    }
    sections.join("\n\n")
}

fn to_llm_message(msg: &HistoryMessage) -> LlmMessage {
    let role = match msg.role {
        CoreRole::User => LlmRole::User,
        CoreRole::Assistant => LlmRole::Assistant,
        CoreRole::System => LlmRole::System,
    };
    LlmMessage { role, content: msg.content.clone() }
}

fn field_value_to_wire(value: &crewline_core::types::FieldValue) -> serde_json::Value {
    match value {
        crewline_core::types::FieldValue::Text(s) => serde_json::Value::String(s.clone()),
        crewline_core::types::FieldValue::Bool(b) => serde_json::Value::Bool(*b),
    }
}

trait ToSnapshotWire {
    fn to_snapshot_wire(&self) -> CrewSnapshot;
}

impl ToSnapshotWire for Arc<dyn CrewMember> {
    fn to_snapshot_wire(&self) -> CrewSnapshot {
        crew_snapshot_to_wire(self.to_snapshot())
    }
}
