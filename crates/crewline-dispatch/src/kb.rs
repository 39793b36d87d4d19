//! Knowledge-base resolution (spec.md §4.4.4): turn a crew's declared
//! `knowledgeBase.sources` into provider-specific store identifiers.
//! Resolution itself (talking to a vector store API, a corpus registry,
//! ...) is out of scope (spec.md §1); this trait is the seam a deployment
//! plugs a real resolver into.

use async_trait::async_trait;

/// A short, fixed note injected alongside resolved KB identifiers so the
/// model treats them as internal reference material rather than user
/// uploads (spec.md §4.4.4).
pub const KNOWLEDGE_BASE_CONTEXT_NOTE: &str =
    "The attached knowledge sources are internal reference material curated by the operator, not user uploads.";

#[async_trait]
pub trait KnowledgeBaseResolver: Send + Sync {
    /// Resolve `sources` into provider-specific identifiers. An empty
    /// result means resolution found nothing usable; the dispatcher then
    /// proceeds without KB augmentation.
    async fn resolve(&self, sources: &[String]) -> Vec<String>;
}

/// No knowledge-base backend wired in — resolution always yields nothing.
pub struct NoKnowledgeBase;

#[async_trait]
impl KnowledgeBaseResolver for NoKnowledgeBase {
    async fn resolve(&self, _sources: &[String]) -> Vec<String> {
        Vec::new()
    }
}
