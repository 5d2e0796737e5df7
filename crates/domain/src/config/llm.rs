use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmSettings {
    /// Provider used when an agent or stage does not name one.
    #[serde(default)]
    pub default_provider: Option<String>,
    #[serde(default)]
    pub providers: Vec<LlmProviderSettings>,
}

impl LlmSettings {
    pub fn provider(&self, name: &str) -> Option<&LlmProviderSettings> {
        self.providers.iter().find(|p| p.name == name)
    }
}

/// One configured LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderSettings {
    /// Registry name referenced by agents and stages.
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    pub model: String,
    /// Environment variable holding the API key. An empty (or
    /// whitespace-only) key disables the provider rather than failing
    /// startup.
    pub api_key_env: String,
    /// Tool results above this token count are summarized before being fed
    /// back to the model. Defaults per provider kind.
    #[serde(default)]
    pub max_tool_result_tokens: Option<u32>,
}

impl LlmProviderSettings {
    pub fn effective_max_tool_result_tokens(&self) -> u32 {
        self.max_tool_result_tokens
            .unwrap_or_else(|| self.kind.default_max_tool_result_tokens())
    }
}

/// Built-in provider families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Openai,
    Anthropic,
    Google,
    Vertexai,
    Xai,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Openai => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::Vertexai => "vertexai",
            Self::Xai => "xai",
        }
    }

    pub fn default_max_tool_result_tokens(self) -> u32 {
        match self {
            Self::Openai => 250_000,
            Self::Google => 950_000,
            Self::Anthropic | Self::Vertexai => 150_000,
            Self::Xai => 200_000,
        }
    }
}

/// Normalize an API key as read from the environment: leading/trailing
/// whitespace is stripped (so a whitespace-only value becomes empty and
/// disables the provider); internal whitespace is preserved.
pub fn clean_api_key(raw: &str) -> String {
    raw.trim().to_string()
}
