//! Resolves the effective model name to a provider instance by family
//! (spec.md §4.4.3: "The provider ... is inferred from the model name
//! prefix").

use std::sync::Arc;

use crewline_llm::{infer_provider_family, LlmProvider, ProviderFamily};

/// One concrete `LlmProvider` per supported family. A deployment wires in
/// whichever families it has credentials for; an unconfigured family is
/// simply never exercised because no crew declares a model with that
/// prefix.
pub struct ProviderSet {
    pub openai: Option<Arc<dyn LlmProvider>>,
    pub anthropic: Option<Arc<dyn LlmProvider>>,
    pub google: Option<Arc<dyn LlmProvider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self {
            openai: None,
            anthropic: None,
            google: None,
        }
    }

    pub fn with_openai(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.openai = Some(provider);
        self
    }

    pub fn with_anthropic(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.anthropic = Some(provider);
        self
    }

    pub fn with_google(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.google = Some(provider);
        self
    }

    /// Resolve the provider for `model` by inferring its family from the
    /// name prefix.
    pub fn resolve(&self, model: &str) -> Option<Arc<dyn LlmProvider>> {
        match infer_provider_family(model) {
            ProviderFamily::OpenAi => self.openai.clone(),
            ProviderFamily::Anthropic => self.anthropic.clone(),
            ProviderFamily::Google => self.google.clone(),
        }
    }
}

impl Default for ProviderSet {
    fn default() -> Self {
        Self::new()
    }
}
