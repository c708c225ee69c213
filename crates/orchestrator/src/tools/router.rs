//! Tool Router (C5) — classifies a model's tool call as platform-handled
//! or consumer-handled, and recovers tool calls emitted as inline
//! `<fc>{...}</fc>` text for providers with no native function-calling
//! channel.
//!
//! Native tool-call mode needs none of this: [`ic_domain::stream::CanonicalEvent::ToolCall`]
//! already carries a structured `{name, arguments}` pair, produced by
//! [`ic_providers::normalizer`]'s own `<fc>` tag handling. This module's
//! regex path exists for providers/call sites that hand the router raw
//! assistant text instead of going through the normalizer.

use ic_domain::error::{Error, Result};
use ic_domain::tool::{is_platform_tool, Tool, ToolCall};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Mirrors the original `FC_REGEX`: a non-greedy, dot-matches-newline
/// capture of the JSON payload between `<fc>` and `</fc>`.
fn fc_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<fc>\s*(\{.*?\})\s*</fc>").expect("FC_REGEX is a fixed valid pattern"))
}

/// A tool call, routed to whichever handler owns it.
#[derive(Debug, Clone)]
pub enum RoutedCall {
    Platform(ToolCall),
    Consumer(ToolCall),
}

impl RoutedCall {
    pub fn call(&self) -> &ToolCall {
        match self {
            RoutedCall::Platform(c) | RoutedCall::Consumer(c) => c,
        }
    }
}

/// Stateless router over the tool list declared for the current turn.
pub struct ToolRouter {
    tools: Vec<Tool>,
}

impl ToolRouter {
    pub fn new(tools: Vec<Tool>) -> Self {
        Self { tools }
    }

    /// Recover `{name, arguments}` tool calls embedded as `<fc>{...}</fc>`
    /// spans in free-form assistant text. Each match must decode as a JSON
    /// object with string `name` and object `arguments` fields; malformed
    /// spans are skipped rather than failing the whole scan, mirroring the
    /// normalizer's "degrade to best-effort content" posture for malformed
    /// tag payloads.
    pub fn parse_text_mode(&self, text: &str) -> Vec<ToolCall> {
        let mut calls = Vec::new();
        for capture in fc_regex().captures_iter(text) {
            let Some(json_str) = capture.get(1) else {
                continue;
            };
            let Ok(value) = serde_json::from_str::<Value>(json_str.as_str()) else {
                continue;
            };
            let Some(name) = value.get("name").and_then(|v| v.as_str()) else {
                continue;
            };
            let arguments = value.get("arguments").cloned().unwrap_or(Value::Object(Default::default()));
            calls.push(ToolCall {
                call_id: generate_call_id(),
                tool_name: name.to_string(),
                arguments,
            });
        }
        calls
    }

    /// Classify a tool call as platform- or consumer-handled. Platform
    /// status is decided purely by name membership in
    /// [`ic_domain::tool::PLATFORM_TOOL_NAMES`] — declaring a consumer tool
    /// under a platform name is not possible, by construction of the
    /// closed set.
    pub fn classify(&self, call: ToolCall) -> RoutedCall {
        if is_platform_tool(&call.tool_name) {
            RoutedCall::Platform(call)
        } else {
            RoutedCall::Consumer(call)
        }
    }

    /// Validate `arguments` against the declared tool's JSON Schema
    /// `required` list. This is intentionally shallow — full JSON Schema
    /// validation is out of scope; missing required top-level properties is
    /// the failure mode the distilled spec calls out as needing a
    /// pedagogical error instead of a hard stream failure.
    pub fn validate_arguments(&self, tool_name: &str, arguments: &Value) -> Result<()> {
        let Some(tool) = self.tools.iter().find(|t| t.name == tool_name) else {
            return Err(Error::Validation(format!("unknown tool: {tool_name}")));
        };
        let Some(required) = tool.function.parameters.get("required").and_then(|v| v.as_array()) else {
            return Ok(());
        };
        let mut missing = Vec::new();
        for field in required {
            let Some(field_name) = field.as_str() else {
                continue;
            };
            if arguments.get(field_name).is_none() {
                missing.push(field_name.to_string());
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(format!(
                "{tool_name}: missing required argument(s): {}",
                missing.join(", ")
            )))
        }
    }
}

/// `call_` + 8 hex chars, matching the distilled spec's `tool_call_id`
/// generation rule.
pub fn generate_call_id() -> String {
    let bytes = uuid::Uuid::new_v4();
    format!("call_{}", hex::encode(&bytes.as_bytes()[..4]))
}
