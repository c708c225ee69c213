mod agents;
mod assistants;
mod llm;
mod observability;
mod redis;
mod truncator;

pub use agents::*;
pub use assistants::*;
pub use llm::*;
pub use observability::*;
pub use redis::*;
pub use truncator::*;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub assistants: AssistantsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub truncator: TruncatorConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    /// Delegation targets (key = assistant id a `delegate_research_task`
    /// call may spawn a child run against).
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        // Missing REDIS_URL degrades the message cache to always-cold-load
        // rather than failing — a warning, not an error.
        if self.redis.url.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "redis.url".into(),
                message: "no redis.url configured — message cache will always cold-load".into(),
            });
        } else if !self.redis.url.starts_with("redis://") && !self.redis.url.starts_with("rediss://") {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "redis.url".into(),
                message: format!(
                    "redis.url must start with redis:// or rediss:// (got \"{}\")",
                    self.redis.url
                ),
            });
        }

        // Control-plane base_url must not be empty.
        if self.assistants.base_url.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "assistants.base_url".into(),
                message: "base_url must not be empty".into(),
            });
        } else if !self.assistants.base_url.starts_with("http://")
            && !self.assistants.base_url.starts_with("https://")
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "assistants.base_url".into(),
                message: format!(
                    "base_url must start with http:// or https:// (got \"{}\")",
                    self.assistants.base_url
                ),
            });
        }

        // A missing admin key only matters if anything needs privileged
        // control-plane calls; absence alone is not an error.
        if matches!(self.assistants.admin_api_key.as_deref(), Some("")) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "assistants.admin_api_key".into(),
                message: "admin_api_key is set but empty".into(),
            });
        }

        // Truncator model: empty is an error only when the threshold also
        // makes recovery via the public fallback impossible (threshold
        // out of the valid (0, 1] range means no budget is ever safe).
        let threshold_unusable = !(self.truncator.threshold > 0.0 && self.truncator.threshold <= 1.0);
        if self.truncator.model.is_empty() && threshold_unusable {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "truncator.model".into(),
                message: "no tokenizer model configured and threshold is out of range; the public fallback cannot recover".into(),
            });
        } else if self.truncator.model.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "truncator.model".into(),
                message: "no tokenizer model configured — falling back to the bundled public BPE vocabulary".into(),
            });
        }
        if threshold_unusable {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "truncator.threshold".into(),
                message: format!(
                    "threshold must be in (0.0, 1.0] (got {})",
                    self.truncator.threshold
                ),
            });
        }

        // Warn when no LLM providers are configured.
        if self.llm.providers.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "llm.providers".into(),
                message: "no LLM providers configured".into(),
            });
        }

        // Track seen provider IDs for duplicate detection.
        let mut seen_ids: HashSet<&str> = HashSet::new();

        // Validate each provider.
        for (i, provider) in self.llm.providers.iter().enumerate() {
            if provider.id.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].id"),
                    message: "provider id must not be empty".into(),
                });
            }
            if provider.base_url.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].base_url"),
                    message: "provider base_url must not be empty".into(),
                });
            }

            // Provider base_url must be a valid URL.
            if !provider.base_url.is_empty()
                && !provider.base_url.starts_with("http://")
                && !provider.base_url.starts_with("https://")
            {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].base_url"),
                    message: format!(
                        "base_url must start with http:// or https:// (got \"{}\")",
                        provider.base_url
                    ),
                });
            }

            // Duplicate provider ID detection.
            if !provider.id.is_empty() && !seen_ids.insert(&provider.id) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: format!("llm.providers[{i}].id"),
                    message: format!(
                        "duplicate provider id \"{}\" — later provider will shadow earlier one",
                        provider.id
                    ),
                });
            }

            // Auth completeness: modes that require credentials must have
            // at least one of env, key, or non-empty keys.
            let needs_credentials = matches!(provider.auth.mode, AuthMode::ApiKey);
            if needs_credentials {
                let has_env = provider.auth.env.as_ref().is_some_and(|v| !v.is_empty());
                let has_key = provider.auth.key.as_ref().is_some_and(|v| !v.is_empty());
                let has_keys = !provider.auth.keys.is_empty();
                if !has_env && !has_key && !has_keys {
                    errors.push(ConfigError {
                        severity: ConfigSeverity::Error,
                        field: format!("llm.providers[{i}].auth"),
                        message: format!(
                            "provider \"{}\" uses {:?} auth mode but has no auth.env, auth.key, or auth.keys configured",
                            provider.id, provider.auth.mode
                        ),
                    });
                }
            }
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: build a minimal valid Config.
    fn valid_config() -> Config {
        Config {
            redis: RedisConfig {
                url: "redis://localhost:6379".into(),
                ..RedisConfig::default()
            },
            assistants: AssistantsConfig {
                base_url: "http://localhost:5000".into(),
                ..AssistantsConfig::default()
            },
            llm: LlmConfig {
                providers: vec![ProviderConfig {
                    id: "hyperbolic".into(),
                    kind: ProviderKind::Hyperbolic,
                    base_url: "https://api.hyperbolic.xyz/v1".into(),
                    auth: AuthConfig {
                        mode: AuthMode::ApiKey,
                        env: Some("HYPERBOLIC_API_KEY".into()),
                        ..AuthConfig::default()
                    },
                    default_model: None,
                }],
                ..LlmConfig::default()
            },
            ..Config::default()
        }
    }

    /// Helper: find the first issue matching a field prefix.
    fn find_issue<'a>(issues: &'a [ConfigError], field_prefix: &str) -> Option<&'a ConfigError> {
        issues.iter().find(|e| e.field.starts_with(field_prefix))
    }

    #[test]
    fn valid_config_passes() {
        let issues = valid_config().validate();
        let errors: Vec<_> = issues.iter().filter(|e| e.severity == ConfigSeverity::Error).collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    // ── Redis checks ────────────────────────────────────────────────

    #[test]
    fn missing_redis_url_is_warning_not_error() {
        let mut cfg = valid_config();
        cfg.redis.url = String::new();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "redis.url").expect("expected redis.url issue");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn redis_url_wrong_scheme_is_error() {
        let mut cfg = valid_config();
        cfg.redis.url = "http://localhost:6379".into();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "redis.url").expect("expected redis.url error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    // ── Control-plane checks ─────────────────────────────────────────

    #[test]
    fn assistants_base_url_empty_is_error() {
        let mut cfg = valid_config();
        cfg.assistants.base_url = String::new();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "assistants.base_url")
            .expect("expected assistants.base_url error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn assistants_base_url_invalid_scheme_is_error() {
        let mut cfg = valid_config();
        cfg.assistants.base_url = "ftp://localhost:5000".into();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "assistants.base_url")
            .expect("expected assistants.base_url error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
        assert!(issue.message.contains("http://"));
    }

    #[test]
    fn assistants_base_url_https_is_valid() {
        let mut cfg = valid_config();
        cfg.assistants.base_url = "https://assistants.example.com".into();
        let issues = cfg.validate();
        assert!(find_issue(&issues, "assistants.base_url").is_none());
    }

    #[test]
    fn empty_admin_key_string_is_warning() {
        let mut cfg = valid_config();
        cfg.assistants.admin_api_key = Some(String::new());
        let issues = cfg.validate();
        let issue = find_issue(&issues, "assistants.admin_api_key")
            .expect("expected admin_api_key warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn absent_admin_key_is_not_flagged() {
        let mut cfg = valid_config();
        cfg.assistants.admin_api_key = None;
        let issues = cfg.validate();
        assert!(find_issue(&issues, "assistants.admin_api_key").is_none());
    }

    // ── Truncator checks ─────────────────────────────────────────────

    #[test]
    fn empty_truncator_model_with_valid_threshold_is_warning() {
        let mut cfg = valid_config();
        cfg.truncator.model = String::new();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "truncator.model")
            .expect("expected truncator.model warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn empty_truncator_model_with_bad_threshold_is_error() {
        let mut cfg = valid_config();
        cfg.truncator.model = String::new();
        cfg.truncator.threshold = 0.0;
        let issues = cfg.validate();
        let issue = find_issue(&issues, "truncator.model")
            .expect("expected truncator.model error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn threshold_out_of_range_is_error() {
        let mut cfg = valid_config();
        cfg.truncator.threshold = 1.5;
        let issues = cfg.validate();
        let issue = find_issue(&issues, "truncator.threshold")
            .expect("expected truncator.threshold error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn default_threshold_is_valid() {
        let cfg = valid_config();
        let issues = cfg.validate();
        assert!(find_issue(&issues, "truncator.threshold").is_none());
    }

    // ── Provider checks (unchanged shape, reused from llm.rs) ────────

    #[test]
    fn provider_base_url_invalid_scheme_is_error() {
        let mut cfg = valid_config();
        cfg.llm.providers[0].base_url = "ws://localhost:1234".into();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "llm.providers[0].base_url")
            .expect("expected provider base_url error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn provider_api_key_mode_no_credentials_is_error() {
        let mut cfg = valid_config();
        cfg.llm.providers[0].auth = AuthConfig {
            mode: AuthMode::ApiKey,
            env: None,
            key: None,
            keys: vec![],
            ..AuthConfig::default()
        };
        let issues = cfg.validate();
        let issue = find_issue(&issues, "llm.providers[0].auth").expect("expected auth error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
        assert!(issue.message.contains("no auth.env"));
    }

    #[test]
    fn provider_none_auth_mode_no_credentials_is_ok() {
        let mut cfg = valid_config();
        cfg.llm.providers[0].auth = AuthConfig {
            mode: AuthMode::None,
            env: None,
            key: None,
            keys: vec![],
            ..AuthConfig::default()
        };
        let issues = cfg.validate();
        assert!(find_issue(&issues, "llm.providers[0].auth").is_none());
    }

    #[test]
    fn duplicate_provider_ids_is_warning() {
        let mut cfg = valid_config();
        let second = ProviderConfig {
            id: "hyperbolic".into(),
            kind: ProviderKind::Hyperbolic,
            base_url: "https://api.hyperbolic.xyz/v1".into(),
            auth: AuthConfig {
                mode: AuthMode::ApiKey,
                env: Some("HYPERBOLIC_API_KEY_2".into()),
                ..AuthConfig::default()
            },
            default_model: None,
        };
        cfg.llm.providers.push(second);
        let issues = cfg.validate();
        let dup_issues: Vec<_> = issues
            .iter()
            .filter(|e| e.message.contains("duplicate provider id"))
            .collect();
        assert_eq!(dup_issues.len(), 1);
        assert_eq!(dup_issues[0].severity, ConfigSeverity::Warning);
    }

    #[test]
    fn no_providers_is_warning() {
        let mut cfg = valid_config();
        cfg.llm.providers.clear();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "llm.providers").expect("expected no-providers warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    // ── Display formatting ──────────────────────────────────────────

    #[test]
    fn config_error_display_format() {
        let err = ConfigError {
            severity: ConfigSeverity::Error,
            field: "assistants.base_url".into(),
            message: "base_url must not be empty".into(),
        };
        assert_eq!(
            format!("{err}"),
            "[ERROR] assistants.base_url: base_url must not be empty"
        );

        let warn = ConfigError {
            severity: ConfigSeverity::Warning,
            field: "llm.providers".into(),
            message: "no LLM providers configured".into(),
        };
        assert_eq!(
            format!("{warn}"),
            "[WARN] llm.providers: no LLM providers configured"
        );
    }
}
