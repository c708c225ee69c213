use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider system
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration for the upstream provider fleet (spec §6's provider
/// base-url table, modeled as data rather than one field per provider).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "d_30000u")]
    pub default_timeout_ms: u64,
    #[serde(default = "d_2")]
    pub max_retries: u32,
    /// Startup policy: does the gateway require at least one provider to
    /// initialize successfully?
    #[serde(default)]
    pub startup_policy: LlmStartupPolicy,
    /// Registered LLM providers (data-driven: adding a provider = adding config).
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            max_retries: 2,
            startup_policy: LlmStartupPolicy::AllowNone,
            providers: Vec::new(),
        }
    }
}

/// Controls how the orchestrator handles provider initialization at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LlmStartupPolicy {
    /// Boots even if no providers initialize; calls against an
    /// unconfigured provider fail at dispatch time instead.
    #[default]
    AllowNone,
    /// Abort startup if no providers successfully initialize.
    RequireOne,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub default_model: Option<String>,
}

/// The known provider variants (spec §4.2 / §6). All four are thin
/// OpenAI-compatible HTTP/SSE clients differing only in base URL, auth
/// header shape, and (for `ProjectDavid`) being the internal control-plane
/// client rather than a public model host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Openai,
    Together,
    Hyperbolic,
    /// The internal Project-David control-plane client
    /// (`ASSISTANTS_BASE_URL` / `ADMIN_API_KEY`).
    ProjectDavid,
}

impl ProviderKind {
    /// The namespace prefix stripped from a model identifier before the
    /// upstream call (spec §6's "Model identifier convention"), e.g.
    /// `together-ai/Qwen/Qwen3-Coder-...` -> `Qwen/Qwen3-Coder-...`.
    pub fn model_prefix(self) -> &'static str {
        match self {
            ProviderKind::Openai => "openai/",
            ProviderKind::Together => "together-ai/",
            ProviderKind::Hyperbolic => "hyperbolic/",
            ProviderKind::ProjectDavid => "project-david/",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    /// Header name (e.g. "Authorization", "x-api-key").
    #[serde(default)]
    pub header: Option<String>,
    /// Header value prefix (e.g. "Bearer ").
    #[serde(default)]
    pub prefix: Option<String>,
    /// Env var containing the key.
    #[serde(default)]
    pub env: Option<String>,
    /// Direct key (for config-only setups; prefer `env`).
    #[serde(default)]
    pub key: Option<String>,
    /// Multiple env var names for round-robin key rotation. When
    /// non-empty, takes precedence over `env`/`key`.
    #[serde(default)]
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    #[default]
    ApiKey,
    None,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_30000u() -> u64 {
    30_000
}
fn d_2() -> u32 {
    2
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_config_default_has_no_providers() {
        let config = LlmConfig::default();
        assert!(config.providers.is_empty());
        assert_eq!(config.startup_policy, LlmStartupPolicy::AllowNone);
    }

    #[test]
    fn provider_kind_serde_roundtrip() {
        for kind in [
            ProviderKind::Openai,
            ProviderKind::Together,
            ProviderKind::Hyperbolic,
            ProviderKind::ProjectDavid,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            let back: ProviderKind = serde_json::from_str(&json).unwrap();
            assert_eq!(back, kind);
        }
    }

    #[test]
    fn model_prefix_matches_spec_namespacing() {
        assert_eq!(ProviderKind::Together.model_prefix(), "together-ai/");
        assert_eq!(ProviderKind::Hyperbolic.model_prefix(), "hyperbolic/");
    }

    #[test]
    fn provider_config_deserializes() {
        let json = r#"{
            "id": "hyperbolic",
            "kind": "hyperbolic",
            "base_url": "https://api.hyperbolic.xyz/v1",
            "auth": { "mode": "api_key", "env": "HYPERBOLIC_API_KEY" }
        }"#;
        let cfg: ProviderConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.kind, ProviderKind::Hyperbolic);
        assert_eq!(cfg.auth.env.as_deref(), Some("HYPERBOLIC_API_KEY"));
    }
}
