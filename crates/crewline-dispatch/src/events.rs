//! Conversions from internal event shapes to the wire-level
//! `DispatchEvent` (spec.md §3.1, §6).

use crewline_protocol::{CrewSnapshot as WireCrewSnapshot, DispatchEvent};

use crate::crew_stream::CrewEvent;

pub fn crew_event_to_dispatch(event: CrewEvent) -> DispatchEvent {
    match event {
        CrewEvent::Text(payload) => DispatchEvent::TextChunk { payload },
        CrewEvent::FunctionCall { name, params } => DispatchEvent::FunctionCall { name, params },
        CrewEvent::FunctionResult { name, result } => DispatchEvent::FunctionResult { name, result },
        CrewEvent::FunctionError { name, error } => DispatchEvent::FunctionError { name, error },
        CrewEvent::ThinkingStep(payload) => DispatchEvent::ThinkingStep { payload },
        CrewEvent::ThinkingComplete(payload) => DispatchEvent::ThinkingComplete { payload },
    }
}

pub fn crew_snapshot_to_wire(snapshot: crewline_crew::CrewSnapshot) -> WireCrewSnapshot {
    WireCrewSnapshot {
        name: snapshot.name,
        display_name: snapshot.display_name,
        description: snapshot.description,
        is_default: snapshot.is_default,
    }
}
