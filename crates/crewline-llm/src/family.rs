/// The three provider families the dispatcher knows about (spec.md §4.4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFamily {
    OpenAi,
    Anthropic,
    Google,
}

/// Infer a model's provider family from its name prefix, as the dispatcher
/// does to pick the LLM invocation shape (spec.md §4.4.3) and to decide how
/// to resolve knowledge-base sources (spec.md §4.4.4).
pub fn infer_provider_family(model: &str) -> ProviderFamily {
    let lower = model.to_ascii_lowercase();
    if lower.starts_with("claude") {
        ProviderFamily::Anthropic
    } else if lower.starts_with("gemini") {
        ProviderFamily::Google
    } else {
        ProviderFamily::OpenAi
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_anthropic_from_claude_prefix() {
        assert_eq!(
            infer_provider_family("claude-sonnet-4-6"),
            ProviderFamily::Anthropic
        );
    }

    #[test]
    fn infers_google_from_gemini_prefix() {
        assert_eq!(
            infer_provider_family("gemini-2.0-flash"),
            ProviderFamily::Google
        );
    }

    #[test]
    fn defaults_to_openai() {
        assert_eq!(infer_provider_family("gpt-4o"), ProviderFamily::OpenAi);
        assert_eq!(infer_provider_family("o3-mini"), ProviderFamily::OpenAi);
    }
}
