use crewline_core::types::{CollectedFields, FieldValue};

/// Ordered field/value pairs, in the order the model's JSON output named
/// them (spec.md §4.4.2.C: "order: insertion order of the extractor's
/// output").
pub type OrderedFields = Vec<(String, FieldValue)>;

/// The extractor's structured output (spec.md §4.6 "Output").
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionOutcome {
    /// Previously missing fields now present.
    pub extracted_fields: OrderedFields,
    /// Only populated in `form` mode, only on an explicit correction.
    pub corrections: OrderedFields,
    /// Declared fields still missing after this call, in the order they
    /// were asked about.
    pub remaining_fields: Vec<String>,
}

impl ExtractionOutcome {
    /// The failure-degradation contract (spec.md §4.6 "Failure semantics"):
    /// any extractor failure collapses to "nothing extracted, everything
    /// still missing", so the dispatcher never stalls and never fires a
    /// false transition.
    pub fn failed(all_missing: impl IntoIterator<Item = String>) -> Self {
        Self {
            extracted_fields: Vec::new(),
            corrections: Vec::new(),
            remaining_fields: all_missing.into_iter().collect(),
        }
    }

    /// `extractedFields ∪ corrections`, the single merge the dispatcher
    /// applies to the collected-fields cache (spec.md §4.6 "Merging policy").
    /// Order is irrelevant here — the cache is a plain map.
    pub fn merged(&self) -> CollectedFields {
        let mut out = CollectedFields::new();
        for (name, value) in self.extracted_fields.iter().chain(self.corrections.iter()) {
            out.insert(name.clone(), value.clone());
        }
        out
    }

    /// Fields a caller should surface as `field_extracted` events: newly
    /// extracted values and silent corrections alike, since the client
    /// needs to know when a previously displayed value changed. Preserves
    /// the extractor's own ordering, `extractedFields` first.
    pub fn fields_to_announce(&self) -> OrderedFields {
        self.extracted_fields
            .iter()
            .chain(self.corrections.iter())
            .cloned()
            .collect()
    }
}
