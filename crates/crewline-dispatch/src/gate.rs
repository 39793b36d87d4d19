//! Mode C: buffered parallel execution (spec.md §4.4.2.C) — the extractor
//! and the crew stream run as two independent tasks; `field_extracted`
//! events and the rest of the crew's response are released together, never
//! interleaved with chunks whose turn might still be discarded by a
//! transfer.

use std::sync::Arc;
use std::time::Duration;

use crewline_core::types::{CollectedFields, ExtractionMode, FieldSpec, HistoryMessage};
use crewline_crew::{CrewMember, Tool};
use crewline_extract::{extract_fields, ExtractionOutcome, ExtractionRequest, OrderedFields};
use crewline_llm::{ChatRequest, LlmProvider, ProviderError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::crew_stream::{run_crew_stream, CrewEvent};

/// What the gate decided, and everything the caller needs to finish the
/// dispatch from here.
pub enum GateOutcome {
    /// `preMessageTransfer` returned `true`: the caller should transition to
    /// the next crew and discard the buffered response outright — but the
    /// buffer travels along so the caller can fall back to serving it
    /// instead, if the transition target turns out not to exist (spec.md:309,
    /// spec.md:282). `field_events` still announce real collected input
    /// (spec.md §4.4.2.C step 5 — "they still reflect real user input").
    Transfer {
        field_events: OrderedFields,
        buffered_events: Vec<CrewEvent>,
        remaining: mpsc::UnboundedReceiver<CrewEvent>,
        crew_task: JoinHandle<Result<(), ProviderError>>,
    },
    /// No transfer: `field_events` come first, then `buffered_events` (the
    /// chunks the gate withheld while the extractor was still running),
    /// then the caller keeps draining `remaining` directly as new chunks
    /// arrive — no further buffering needed once the gate has cleared.
    Continue {
        field_events: OrderedFields,
        buffered_events: Vec<CrewEvent>,
        remaining: mpsc::UnboundedReceiver<CrewEvent>,
        crew_task: JoinHandle<Result<(), ProviderError>>,
    },
}

/// Race the extractor against the crew stream and evaluate the gate exactly
/// once (spec.md §4.4.2.C steps 1-4). The crew stream runs as its own task
/// from the moment this function is called; the caller inherits its handle
/// either way and decides whether to abort it (transition target resolved)
/// or drain it (transition target missing, or no transfer at all).
#[allow(clippy::too_many_arguments)]
pub async fn run_gate(
    crew: Arc<dyn CrewMember>,
    crew_provider: Arc<dyn LlmProvider>,
    crew_request: ChatRequest,
    tools: Vec<Arc<dyn Tool>>,
    max_iterations: u32,
    extractor_provider: Arc<dyn LlmProvider>,
    extractor_model: String,
    extractor_max_tokens: u32,
    extractor_timeout: Duration,
    history: Vec<HistoryMessage>,
    missing_fields: Vec<FieldSpec>,
    declared_fields: Vec<FieldSpec>,
    collected_fields: CollectedFields,
    extraction_mode: ExtractionMode,
) -> GateOutcome {
    let all_missing: Vec<String> = missing_fields.iter().map(|f| f.name.clone()).collect();

    let collected_before = collected_fields.clone();

    let (crew_tx, mut crew_rx) = mpsc::unbounded_channel::<CrewEvent>();
    let crew_task: JoinHandle<Result<(), ProviderError>> = tokio::spawn(async move {
        run_crew_stream(crew_provider, crew_request, &tools, max_iterations, &crew_tx).await
    });

    let mut extractor_task: JoinHandle<ExtractionOutcome> = tokio::spawn(async move {
        let req = ExtractionRequest {
            history: &history,
            missing_fields: &missing_fields,
            declared_fields: &declared_fields,
            collected_fields: &collected_fields,
            mode: extraction_mode,
        };
        extract_fields(
            extractor_provider.as_ref(),
            &extractor_model,
            extractor_max_tokens,
            extractor_timeout,
            &req,
        )
        .await
    });

    let mut buffer: Vec<CrewEvent> = Vec::new();
    let mut crew_closed = false;

    let extraction_outcome = loop {
        tokio::select! {
            res = &mut extractor_task => {
                break res.unwrap_or_else(|e| {
                    warn!(err = %e, "extractor task panicked");
                    ExtractionOutcome::failed(all_missing.clone())
                });
            }
            ev = crew_rx.recv(), if !crew_closed => {
                match ev {
                    Some(event) => buffer.push(event),
                    None => crew_closed = true,
                }
            }
        }
    };

    let mut all_collected = collected_before;
    for (name, value) in extraction_outcome.merged() {
        all_collected.insert(name, value);
    }

    let transfer = crew.pre_message_transfer(&all_collected).await;

    if transfer {
        return GateOutcome::Transfer {
            field_events: extraction_outcome.fields_to_announce(),
            buffered_events: buffer,
            remaining: crew_rx,
            crew_task,
        };
    }

    GateOutcome::Continue {
        field_events: extraction_outcome.fields_to_announce(),
        buffered_events: buffer,
        remaining: crew_rx,
        crew_task,
    }
}
