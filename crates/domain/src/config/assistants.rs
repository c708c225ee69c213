use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Control-plane connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where assistant/thread/run/action records live. The orchestrator
/// core never owns this store directly — it talks to it through the
/// persistence boundary, but the connection itself is configured here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantsConfig {
    #[serde(default)]
    pub base_url: String,
    /// Bearer token for privileged control-plane calls (run cancellation,
    /// action retrieval). Never logged.
    #[serde(default)]
    pub admin_api_key: Option<String>,
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for AssistantsConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            admin_api_key: None,
            timeout_ms: d_timeout_ms(),
        }
    }
}

fn d_timeout_ms() -> u64 {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_no_admin_key() {
        assert!(AssistantsConfig::default().admin_api_key.is_none());
    }

    #[test]
    fn deserializes_base_url_and_key() {
        let cfg: AssistantsConfig = serde_json::from_str(
            r#"{"base_url": "https://assistants.internal", "admin_api_key": "sk-admin"}"#,
        )
        .unwrap();
        assert_eq!(cfg.base_url, "https://assistants.internal");
        assert_eq!(cfg.admin_api_key.as_deref(), Some("sk-admin"));
    }
}
