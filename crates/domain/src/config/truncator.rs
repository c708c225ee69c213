use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Truncator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Token-budget settings for `ic-context::truncate`.
///
/// Budget `B = max_context_tokens * threshold`. If the configured
/// tokenizer fails to load, a bundled public BPE vocabulary is used
/// instead — `model` being unreachable never blocks a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruncatorConfig {
    #[serde(default = "d_model")]
    pub model: String,
    #[serde(default = "d_threshold")]
    pub threshold: f64,
    /// The operator-configured context budget in tokens. Kept
    /// independent of any provider-advertised context window (open
    /// question §9.4) — always the source of truth for `B`.
    #[serde(default = "d_max_context")]
    pub max_context_tokens: u32,
    /// Whether tool-execution error payloads include a `traceback` field.
    /// Off by default — tracebacks can leak sandbox internals to the model.
    #[serde(default)]
    pub surface_traceback: bool,
}

impl Default for TruncatorConfig {
    fn default() -> Self {
        Self {
            model: d_model(),
            threshold: d_threshold(),
            max_context_tokens: d_max_context(),
            surface_traceback: false,
        }
    }
}

fn d_model() -> String {
    "gpt2".into()
}
fn d_threshold() -> f64 {
    0.8
}
fn d_max_context() -> u32 {
    32_000
}
