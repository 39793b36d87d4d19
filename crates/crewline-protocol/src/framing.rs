use crate::events::DispatchEvent;

/// Comment line sent once at connection time to flush intermediary proxy
/// buffers (spec.md §6), mirroring `skynet_protocol`'s frame-envelope
/// convention of a stable leading marker.
pub const SSE_PREAMBLE: &str = ":ok\n\n";

/// Render one dispatch event as a `text/event-stream` frame: a single JSON
/// object followed by a blank line (spec.md §6). Serialization failure is
/// not expected for any `DispatchEvent` variant — all fields are owned,
/// serde-derived data — so this panics rather than threading a `Result`
/// through every caller, matching `ResFrame::ok`'s `unwrap_or(Value::Null)`
/// fallback posture in the teacher but surfacing the bug loudly instead of
/// silently emitting `null`.
pub fn format_event(event: &DispatchEvent) -> String {
    let json = serde_json::to_string(event).expect("DispatchEvent is always serializable");
    format!("data: {json}\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_done_event() {
        let frame = format_event(&DispatchEvent::Done);
        assert_eq!(frame, "data: {\"type\":\"done\"}\n\n");
    }

    #[test]
    fn preamble_is_a_comment_line() {
        assert!(SSE_PREAMBLE.starts_with(':'));
        assert!(SSE_PREAMBLE.ends_with("\n\n"));
    }
}
