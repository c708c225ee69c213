//! Conversation Context Builder.
//!
//! Produces the final prompt array for a provider call: assembles the
//! system message (timestamp, assistant instructions, operational
//! protocols, merged tool list), folds it into the loaded history, and
//! normalizes roles. Token-budget truncation is a separate, optional pass
//! (see [`crate::truncate`]).

use chrono::Utc;
use ic_domain::tool::{platform_tool_schema, ContentPart, Message, MessageContent, Role, ToolDefinition};
use serde::Deserialize;
use serde_json::Value;

use crate::injection;
use crate::protocols::{self, ProtocolKey};

/// Assistant configuration as loaded from the assistant cache: developer
/// instructions plus the raw, caller-declared tool list. Tool entries are
/// kept as JSON because a declared tool may be a bare platform-builtin
/// reference (`{"type": "code_interpreter"}`) rather than a full function
/// schema -- [`merge_tool_list`] resolves both shapes uniformly.
#[derive(Debug, Clone)]
pub struct AssistantProfile {
    pub instructions: String,
    pub tools: Vec<Value>,
}

/// Flags controlling one context-window build, named after the distilled
/// inputs `{trunk, structured_tool_call, decision_telemetry}`.
#[derive(Debug, Clone, Copy)]
pub struct ContextOptions {
    /// Run the assembled history through [`crate::truncate::Truncator`]
    /// before it is sent to the provider.
    pub trunk: bool,
    /// Emit the tool list as native structured schemas instead of inline
    /// prompt JSON (for providers with native function calling).
    pub structured_tool_call: bool,
    /// Prepend the mandatory `record_tool_decision` tool and its protocol
    /// block.
    pub decision_telemetry: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            trunk: true,
            structured_tool_call: false,
            decision_telemetry: true,
        }
    }
}

/// One conversation message in its raw, not-yet-trusted wire shape, as it
/// comes back from the message cache or a cold load. External data, so
/// every field is optional/lenient -- [`normalize_roles`] is what turns
/// this into the strict [`Message`] domain type.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default)]
    pub tool_calls: Option<Value>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Result of building a system message: the message itself, plus the
/// tool schemas extracted from it when `structured_tool_call` was set.
pub struct SystemMessage {
    pub message: Message,
    pub tool_schemas: Option<Vec<ToolDefinition>>,
}

/// Build the system message: timestamp, assistant instructions,
/// operational protocols, and the merged tool list.
///
/// When `options.structured_tool_call` is set, the tool list is extracted
/// into `tool_schemas` and the system message omits the inline JSON block
/// -- equivalent in effect to the distilled algorithm's parse-the-rendered-
/// JSON-back-out step, computed directly instead of round-tripping
/// through text.
pub fn build_system_message(profile: &AssistantProfile, options: ContextOptions) -> SystemMessage {
    let final_tools = merge_tool_list(&profile.tools, options.decision_telemetry);
    let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();

    let mut protocol_keys = vec![
        ProtocolKey::ToolUsage,
        ProtocolKey::FunctionCallFormatting,
        ProtocolKey::FunctionCallWrapping,
    ];
    if options.decision_telemetry {
        protocol_keys.insert(0, ProtocolKey::ToolDecision);
    }
    let protocols = protocols::assemble_instructions(&protocol_keys);

    let mut sections = vec![
        injection::format_timestamp(&timestamp),
        injection::format_instructions(&profile.instructions),
        injection::format_protocols(&protocols),
    ];

    let tool_schemas = if options.structured_tool_call {
        Some(final_tools.iter().filter_map(value_to_tool_definition).collect())
    } else {
        let tools_json = serde_json::to_string(&final_tools).unwrap_or_else(|_| "[]".into());
        sections.push(injection::format_tools(&tools_json));
        None
    };

    let content = sections.join("\n\n");

    SystemMessage {
        message: Message::system(content),
        tool_schemas,
    }
}

fn value_to_tool_definition(v: &Value) -> Option<ToolDefinition> {
    let func = v.get("function")?;
    Some(ToolDefinition {
        name: func.get("name")?.as_str()?.to_string(),
        description: func
            .get("description")
            .and_then(|d| d.as_str())
            .unwrap_or_default()
            .to_string(),
        parameters: func.get("parameters").cloned().unwrap_or(Value::Null),
    })
}

/// Merge the caller-declared tool list with platform built-ins.
///
/// For each declared tool: if it names a platform built-in by bare `type`
/// (no `function` body), substitute the canonical schema; otherwise keep
/// it as a user tool. `record_tool_decision` is always prepended first
/// when `decision_telemetry` is set. The combined platform-tool set is
/// deduplicated by function name (first occurrence wins); user tools are
/// appended last, undeduplicated.
pub fn merge_tool_list(declared: &[Value], decision_telemetry: bool) -> Vec<Value> {
    let mut platform_tools: Vec<Value> = Vec::new();
    if decision_telemetry {
        if let Some(v) = platform_tool_value("record_tool_decision") {
            platform_tools.push(v);
        }
    }

    let mut user_tools: Vec<Value> = Vec::new();

    for tool in declared {
        let Some(obj) = tool.as_object() else { continue };
        let tool_type = obj.get("type").and_then(|t| t.as_str());

        match tool_type {
            Some(kind) if ic_domain::tool::is_platform_tool(kind) && kind != "function" && !obj.contains_key("function") => {
                if let Some(v) = platform_tool_value(kind) {
                    platform_tools.push(v);
                }
            }
            _ => user_tools.push(tool.clone()),
        }
    }

    let mut seen = std::collections::HashSet::new();
    let mut deduped_platform = Vec::new();
    for tool in platform_tools {
        let name = tool
            .get("function")
            .and_then(|f| f.get("name"))
            .and_then(|n| n.as_str())
            .map(|s| s.to_string());
        match name {
            Some(n) if seen.insert(n) => deduped_platform.push(tool),
            Some(_) => {}
            None => deduped_platform.push(tool),
        }
    }

    deduped_platform.extend(user_tools);
    deduped_platform
}

fn platform_tool_value(name: &str) -> Option<Value> {
    let tool = platform_tool_schema(name)?;
    Some(serde_json::json!({
        "type": "function",
        "function": tool.function,
    }))
}

/// Normalize a raw history into strict [`Message`]s.
///
/// Unknown roles fall back to `user`. An assistant message carrying a
/// native `tool_calls` array, or whose text content is a JSON array
/// literal starting with `[{` and mentioning `"function"`, is promoted
/// into `ContentPart::ToolUse` parts with its text content cleared. `tool`
/// messages keep their `tool_call_id` as the result's `tool_use_id` and,
/// when supplied, their `name` as the originating tool's name.
pub fn normalize_roles(raw: Vec<RawMessage>) -> Vec<Message> {
    raw.into_iter().map(normalize_one).collect()
}

fn normalize_one(m: RawMessage) -> Message {
    let role = m
        .role
        .as_deref()
        .map(str::to_ascii_lowercase)
        .and_then(|r| parse_role(&r))
        .unwrap_or(Role::User);

    let text = m
        .content
        .as_ref()
        .map(|c| match c {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default();

    let tool_calls = m
        .tool_calls
        .as_ref()
        .filter(|v| !matches!(v, Value::Null))
        .and_then(|v| v.as_array().cloned())
        .or_else(|| promote_inline_tool_calls(role, &text));

    if role == Role::Tool {
        let tool_use_id = m.tool_call_id.unwrap_or_default();
        return match m.name {
            Some(name) => Message::tool_result_named(tool_use_id, name, text),
            None => Message::tool_result(tool_use_id, text),
        };
    }

    match tool_calls {
        Some(calls) if role == Role::Assistant => {
            let mut parts = Vec::new();
            if !text.is_empty() {
                parts.push(ContentPart::Text { text: text.clone() });
            }
            for call in &calls {
                if let Some(part) = tool_call_value_to_part(call) {
                    parts.push(part);
                }
            }
            Message {
                role,
                content: MessageContent::Parts(parts),
            }
        }
        _ => Message {
            role,
            content: MessageContent::Text(text),
        },
    }
}

fn parse_role(r: &str) -> Option<Role> {
    match r {
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        "system" => Some(Role::System),
        "tool" => Some(Role::Tool),
        "platform" => Some(Role::Platform),
        _ => None,
    }
}

fn promote_inline_tool_calls(role: Role, text: &str) -> Option<Vec<Value>> {
    if role != Role::Assistant {
        return None;
    }
    let trimmed = text.trim();
    if !trimmed.starts_with("[{") || !trimmed.contains("function") {
        return None;
    }
    let parsed: Value = serde_json::from_str(trimmed).ok()?;
    let arr = parsed.as_array()?;
    if arr.first().is_some_and(|v| v.get("function").is_some()) {
        Some(arr.clone())
    } else {
        None
    }
}

fn tool_call_value_to_part(call: &Value) -> Option<ContentPart> {
    let id = call.get("id").and_then(|v| v.as_str()).unwrap_or_default();
    let func = call.get("function")?;
    let name = func.get("name")?.as_str()?.to_string();
    let arguments = match func.get("arguments") {
        Some(Value::String(s)) => serde_json::from_str(s).unwrap_or(Value::String(s.clone())),
        Some(other) => other.clone(),
        None => Value::Null,
    };
    Some(ContentPart::ToolUse {
        id: id.to_string(),
        name,
        input: arguments,
    })
}

/// Drop any prior `system` messages from `history` and prepend `system_msg`.
pub fn prepend_system_message(system_msg: Message, history: Vec<Message>) -> Vec<Message> {
    let mut out = Vec::with_capacity(history.len() + 1);
    out.push(system_msg);
    out.extend(history.into_iter().filter(|m| m.role != Role::System));
    out
}
