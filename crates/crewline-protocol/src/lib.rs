pub mod events;
pub mod framing;

pub use events::{CrewSnapshot, DispatchEvent};
pub use framing::{format_event, SSE_PREAMBLE};
