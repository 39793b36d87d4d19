//! Field-extraction micro-agent (spec.md §4.6): a stateless, single-call
//! LLM service that projects a crew's declared fields out of recent
//! conversation turns.

pub mod prompt;
pub mod result;
pub mod extractor;

pub use result::{ExtractionOutcome, OrderedFields};
pub use extractor::{extract_fields, ExtractionRequest, FieldExtractor};
