//! Provider registry.
//!
//! Instantiates all configured LLM providers at startup through a static
//! constructor table keyed by provider kind. Auth keys are resolved eagerly
//! from the environment; a missing or empty key marks the provider
//! unavailable (with the reason recorded) instead of aborting startup.

use std::collections::HashMap;
use std::sync::Arc;

use tarsy_domain::config::{clean_api_key, LlmProviderSettings, LlmSettings, ProviderKind};
use tarsy_domain::{Error, Result};

use crate::traits::LlmProvider;

/// Constructor for one provider family: settings plus the cleaned API key.
pub type ProviderCtor =
    fn(&LlmProviderSettings, &str) -> Result<Arc<dyn LlmProvider>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    /// `provider name -> masked reason` for providers that did not come up.
    unavailable: HashMap<String, String>,
    default_provider: Option<String>,
}

/// Mask substrings that look like API keys in an error message so raw
/// secrets never reach logs or readiness endpoints.
fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_string();
    for word in msg.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            let masked = format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..]);
            result = result.replace(trimmed, &masked);
        }
    }
    result
}

impl ProviderRegistry {
    /// Build the registry from settings and the constructor table.
    ///
    /// Providers that fail to come up are recorded and skipped rather than
    /// aborting startup; a later lookup surfaces the structured
    /// "client not available" error.
    pub fn from_settings(
        settings: &LlmSettings,
        ctors: &HashMap<ProviderKind, ProviderCtor>,
    ) -> Self {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        let mut unavailable: HashMap<String, String> = HashMap::new();

        for pc in &settings.providers {
            let raw_key = std::env::var(&pc.api_key_env).unwrap_or_default();
            let api_key = clean_api_key(&raw_key);
            if api_key.is_empty() {
                tracing::info!(
                    provider = %pc.name,
                    env = %pc.api_key_env,
                    "provider disabled: no API key configured"
                );
                unavailable.insert(pc.name.clone(), "no API key configured".into());
                continue;
            }

            let Some(ctor) = ctors.get(&pc.kind) else {
                tracing::warn!(
                    provider = %pc.name,
                    kind = pc.kind.as_str(),
                    "provider disabled: no client implementation registered"
                );
                unavailable.insert(
                    pc.name.clone(),
                    format!("no client implementation for kind '{}'", pc.kind.as_str()),
                );
                continue;
            };

            match ctor(pc, &api_key) {
                Ok(provider) => {
                    tracing::info!(
                        provider = %pc.name,
                        kind = pc.kind.as_str(),
                        model = %pc.model,
                        "provider initialized"
                    );
                    providers.insert(pc.name.clone(), provider);
                }
                Err(e) => {
                    let masked = mask_secrets(&e.to_string());
                    tracing::warn!(
                        provider = %pc.name,
                        error = %masked,
                        "provider failed to initialize, skipping"
                    );
                    unavailable.insert(pc.name.clone(), masked);
                }
            }
        }

        Self {
            providers,
            unavailable,
            default_provider: settings.default_provider.clone(),
        }
    }

    /// Registry with pre-built providers (tests, embedded use).
    pub fn with_providers(
        providers: Vec<Arc<dyn LlmProvider>>,
        default_provider: Option<String>,
    ) -> Self {
        Self {
            providers: providers
                .into_iter()
                .map(|p| (p.provider_id().to_string(), p))
                .collect(),
            unavailable: HashMap::new(),
            default_provider,
        }
    }

    /// Look up a provider by name. Unknown or unavailable names yield the
    /// structured "client not available" error raised at session start.
    pub fn get(&self, name: &str) -> Result<Arc<dyn LlmProvider>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ProviderUnavailable(name.to_string()))
    }

    /// Resolve an optional override: `None` means the configured default.
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn LlmProvider>> {
        match name.or(self.default_provider.as_deref()) {
            Some(name) => self.get(name),
            None => Err(Error::ProviderUnavailable("default".into())),
        }
    }

    pub fn available_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Providers that failed to initialize, with masked reasons; surfaced on
    /// health endpoints.
    pub fn unavailable(&self) -> &HashMap<String, String> {
        &self.unavailable
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{ChatRequest, ChatResponse};

    struct StaticProvider {
        id: String,
        model: String,
    }

    #[async_trait::async_trait]
    impl LlmProvider for StaticProvider {
        fn provider_id(&self) -> &str {
            &self.id
        }

        fn model_name(&self) -> &str {
            &self.model
        }

        fn max_tool_result_tokens(&self) -> u32 {
            250_000
        }

        async fn chat(&self, _request: ChatRequest) -> tarsy_domain::Result<ChatResponse> {
            Ok(ChatResponse::text("ok", &self.model))
        }
    }

    fn static_ctor(
        settings: &LlmProviderSettings,
        _api_key: &str,
    ) -> tarsy_domain::Result<Arc<dyn LlmProvider>> {
        Ok(Arc::new(StaticProvider {
            id: settings.name.clone(),
            model: settings.model.clone(),
        }))
    }

    fn provider_settings(name: &str, env: &str) -> LlmProviderSettings {
        LlmProviderSettings {
            name: name.into(),
            kind: ProviderKind::Openai,
            model: "gpt-4o".into(),
            api_key_env: env.into(),
            max_tool_result_tokens: None,
        }
    }

    #[test]
    fn empty_api_key_disables_provider() {
        std::env::remove_var("TARSY_TEST_MISSING_KEY");
        let settings = LlmSettings {
            default_provider: None,
            providers: vec![provider_settings("openai-default", "TARSY_TEST_MISSING_KEY")],
        };
        let ctors = HashMap::from([(ProviderKind::Openai, static_ctor as ProviderCtor)]);
        let registry = ProviderRegistry::from_settings(&settings, &ctors);

        assert!(registry.is_empty());
        let err = match registry.get("openai-default") {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert_eq!(err.to_string(), "openai-default client not available");
        assert_eq!(
            registry.unavailable()["openai-default"],
            "no API key configured"
        );
    }

    #[test]
    fn whitespace_only_key_counts_as_empty() {
        std::env::set_var("TARSY_TEST_BLANK_KEY", "   \t ");
        let settings = LlmSettings {
            default_provider: None,
            providers: vec![provider_settings("openai-default", "TARSY_TEST_BLANK_KEY")],
        };
        let ctors = HashMap::from([(ProviderKind::Openai, static_ctor as ProviderCtor)]);
        let registry = ProviderRegistry::from_settings(&settings, &ctors);
        assert!(registry.is_empty());
    }

    #[test]
    fn configured_provider_is_available() {
        std::env::set_var("TARSY_TEST_GOOD_KEY", " sk-test-key-123 ");
        let settings = LlmSettings {
            default_provider: Some("openai-default".into()),
            providers: vec![provider_settings("openai-default", "TARSY_TEST_GOOD_KEY")],
        };
        let ctors = HashMap::from([(ProviderKind::Openai, static_ctor as ProviderCtor)]);
        let registry = ProviderRegistry::from_settings(&settings, &ctors);

        assert!(registry.get("openai-default").is_ok());
        // None resolves through the configured default.
        assert!(registry.resolve(None).is_ok());
        assert_eq!(registry.available_names(), vec!["openai-default"]);
    }

    #[test]
    fn resolve_without_default_errors() {
        let registry = ProviderRegistry::with_providers(vec![], None);
        assert!(registry.resolve(None).is_err());
    }

    #[test]
    fn mask_secrets_hides_long_tokens() {
        let masked = mask_secrets("auth failed for key sk-abcdefghijklmnopqrstuvwx");
        assert!(!masked.contains("sk-abcdefghijklmnopqrstuvwx"));
        assert!(masked.contains("..."));
        // Short words are left alone.
        assert!(masked.contains("auth failed for key"));
    }
}
