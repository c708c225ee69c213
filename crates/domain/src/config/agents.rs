use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Delegation targets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration for an assistant that `delegate_research_task` may spawn
/// a child run against.
///
/// Each entry has its own tool policy, model overrides, and fan-out
/// limits so a deep delegation tree cannot escape the limits of its
/// parent assistant.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentConfig {
    /// Tool allow/deny policy for runs spawned against this agent.
    #[serde(default)]
    pub tool_policy: ToolPolicy,
    /// Role->model overrides (e.g. `{ executor = "hyperbolic/llama-3-70b" }`).
    /// Overrides the global `[llm.roles]` for delegated runs.
    #[serde(default)]
    pub models: HashMap<String, String>,
    /// Fan-out / recursion limits for this agent's delegation subtree.
    #[serde(default)]
    pub limits: AgentLimits,
}

/// Hard ceilings on delegation fan-out to prevent runaway trees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLimits {
    /// Maximum nesting depth (parent run -> child run -> grandchild run).
    /// A top-level run is depth=1; a run it delegates to is depth=2.
    #[serde(default = "d_3")]
    pub max_depth: u32,
    /// Maximum number of `delegate_research_task` calls within a single
    /// parent turn.
    #[serde(default = "d_5")]
    pub max_children_per_turn: u32,
    /// Wall-clock timeout per child run (milliseconds). 0 = no limit.
    #[serde(default = "d_30000")]
    pub max_duration_ms: u64,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_children_per_turn: 5,
            max_duration_ms: 30_000,
        }
    }
}

/// Tool allow/deny policy — prefix-based matching.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolPolicy {
    /// Tool name prefixes this agent may use. `["*"]` or empty = unrestricted.
    #[serde(default)]
    pub allow: Vec<String>,
    /// Tool name prefixes this agent is denied (evaluated before allow).
    #[serde(default)]
    pub deny: Vec<String>,
}

impl ToolPolicy {
    /// Check whether the given tool name is permitted by this policy.
    ///
    /// Matching is **case-insensitive**. Deny always wins over allow.
    pub fn allows(&self, tool_name: &str) -> bool {
        let name = tool_name.to_ascii_lowercase();

        for d in &self.deny {
            let d_lower = d.to_ascii_lowercase();
            if d_lower == "*" || name == d_lower || name.starts_with(&format!("{d_lower}.")) {
                return false;
            }
        }
        if self.allow.is_empty() || self.allow.iter().any(|a| a == "*") {
            return true;
        }
        for a in &self.allow {
            let a_lower = a.to_ascii_lowercase();
            if name == a_lower || name.starts_with(&format!("{a_lower}.")) {
                return true;
            }
        }
        false
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_3() -> u32 {
    3
}
fn d_5() -> u32 {
    5
}
fn d_30000() -> u64 {
    30_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_policy_empty_allows_all() {
        let policy = ToolPolicy::default();
        assert!(policy.allows("code_interpreter"));
        assert!(policy.allows("delegate_research_task"));
    }

    #[test]
    fn tool_policy_allow_restricts() {
        let policy = ToolPolicy {
            allow: vec!["web".into(), "file_search".into()],
            deny: vec![],
        };
        assert!(policy.allows("web.search"));
        assert!(policy.allows("file_search"));
        assert!(!policy.allows("code_interpreter"));
    }

    #[test]
    fn tool_policy_deny_takes_precedence() {
        let policy = ToolPolicy {
            allow: vec!["*".into()],
            deny: vec!["code_interpreter".into()],
        };
        assert!(!policy.allows("code_interpreter"));
        assert!(policy.allows("file_search"));
    }

    #[test]
    fn tool_policy_deny_prefix_blocks_subtree() {
        let policy = ToolPolicy {
            allow: vec![],
            deny: vec!["scratchpad".into()],
        };
        assert!(policy.allows("code_interpreter"));
        assert!(!policy.allows("scratchpad.update"));
    }

    #[test]
    fn tool_policy_deny_star_blocks_all() {
        let policy = ToolPolicy {
            allow: vec!["code_interpreter".into()],
            deny: vec!["*".into()],
        };
        assert!(!policy.allows("code_interpreter"));
    }

    #[test]
    fn tool_policy_case_insensitive() {
        let policy = ToolPolicy {
            allow: vec!["Web".into()],
            deny: vec![],
        };
        assert!(policy.allows("web.search"));
        assert!(policy.allows("WEB.SEARCH"));
        assert!(!policy.allows("code_interpreter"));
    }

    #[test]
    fn agent_limits_defaults() {
        let limits = AgentLimits::default();
        assert_eq!(limits.max_depth, 3);
        assert_eq!(limits.max_children_per_turn, 5);
        assert_eq!(limits.max_duration_ms, 30_000);
    }
}
