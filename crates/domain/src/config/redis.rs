use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message cache (Redis)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Connection settings for the `thread:{id}:history` / `stream:{run_id}`
/// cache layer. Absent `url`, the message cache degrades to always-cold
/// loading from persistence — never a hard failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "d_history_ttl_seconds")]
    pub history_ttl_seconds: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            history_ttl_seconds: d_history_ttl_seconds(),
        }
    }
}

fn d_history_ttl_seconds() -> u64 {
    3600
}
