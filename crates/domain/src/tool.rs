use serde::{Deserialize, Serialize};

/// Internal tool call format (provider-agnostic).
/// Every normalizer/adapter converts provider-specific tool calls to/from this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Callable declaration surfaced to the model.
///
/// Platform built-ins (`code_interpreter`, `computer`, `file_search`, …)
/// carry fixed well-known ids; consumer tools are declared by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolKind {
    Function,
    PlatformBuiltin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ToolKind,
    pub function: ToolDefinition,
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// A message in the conversation (provider-agnostic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

/// Closed set of message roles. `Platform` carries operational protocol
/// content injected by the context builder, distinct from `System`
/// (assistant instructions) and `Tool` (tool call results).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    Platform,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
        /// The originating tool's name, when the caller supplied one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    #[serde(rename = "image")]
    Image {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }
    pub fn platform(text: impl Into<String>) -> Self {
        Self {
            role: Role::Platform,
            content: MessageContent::Text(text.into()),
        }
    }
    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Parts(vec![ContentPart::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
                is_error: false,
                name: None,
            }]),
        }
    }

    /// An assistant turn that produced tool calls and no other content.
    ///
    /// Per the data model invariant, a message saved with a non-empty
    /// `tool_calls` list has `content = ""` — callers must persist any
    /// accompanying assistant text as a separate message, not fold it in
    /// here.
    pub fn assistant_tool_calls(calls: &[ToolCall]) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Parts(
                calls
                    .iter()
                    .map(|c| ContentPart::ToolUse {
                        id: c.call_id.clone(),
                        name: c.tool_name.clone(),
                        input: c.arguments.clone(),
                    })
                    .collect(),
            ),
        }
    }

    pub fn tool_result_named(
        tool_use_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Parts(vec![ContentPart::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
                is_error: false,
                name: Some(name.into()),
            }]),
        }
    }
}

/// Closed set of platform built-in tool names (distilled §4.5's
/// classification list). Anything outside this set is a consumer tool.
pub const PLATFORM_TOOL_NAMES: &[&str] = &[
    "code_interpreter",
    "web_search",
    "vector_store_search",
    "computer",
    "perform_web_search",
    "read_web_page",
    "search_web_page",
    "scroll_web_page",
    "file_search",
    "read_scratchpad",
    "update_scratchpad",
    "append_scratchpad",
    "record_tool_decision",
    "delegate_research_task",
];

pub fn is_platform_tool(name: &str) -> bool {
    PLATFORM_TOOL_NAMES.contains(&name)
}

/// The canonical schema for a platform built-in, keyed by its `type`/name.
///
/// Used by the context builder to substitute a fixed definition for any
/// tool a caller declared by bare `type` (no `function` body), and by the
/// tool router to recognize a call as platform-handled regardless of what
/// schema the caller supplied.
pub fn platform_tool_schema(name: &str) -> Option<Tool> {
    let (description, parameters): (&str, serde_json::Value) = match name {
        "code_interpreter" => (
            "Execute Python code in a sandboxed interpreter and return stdout/stderr.",
            serde_json::json!({
                "type": "object",
                "properties": { "code": { "type": "string" } },
                "required": ["code"]
            }),
        ),
        "web_search" | "perform_web_search" => (
            "Search the web and return a list of matching results.",
            serde_json::json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            }),
        ),
        "vector_store_search" | "file_search" => (
            "Search attached files/vector stores for relevant passages.",
            serde_json::json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            }),
        ),
        "computer" => (
            "Operate a virtual computer (mouse, keyboard, screenshots).",
            serde_json::json!({
                "type": "object",
                "properties": { "action": { "type": "string" } },
                "required": ["action"]
            }),
        ),
        "read_web_page" => (
            "Fetch and return the text content of a web page.",
            serde_json::json!({
                "type": "object",
                "properties": { "url": { "type": "string" } },
                "required": ["url"]
            }),
        ),
        "search_web_page" => (
            "Search within the most recently read web page for a term.",
            serde_json::json!({
                "type": "object",
                "properties": { "term": { "type": "string" } },
                "required": ["term"]
            }),
        ),
        "scroll_web_page" => (
            "Scroll the most recently read web page forward or backward.",
            serde_json::json!({
                "type": "object",
                "properties": { "direction": { "type": "string" } },
                "required": ["direction"]
            }),
        ),
        "read_scratchpad" => (
            "Read the run's scratchpad contents.",
            serde_json::json!({ "type": "object", "properties": {} }),
        ),
        "update_scratchpad" => (
            "Replace the run's scratchpad contents.",
            serde_json::json!({
                "type": "object",
                "properties": { "content": { "type": "string" } },
                "required": ["content"]
            }),
        ),
        "append_scratchpad" => (
            "Append to the run's scratchpad contents.",
            serde_json::json!({
                "type": "object",
                "properties": { "content": { "type": "string" } },
                "required": ["content"]
            }),
        ),
        "record_tool_decision" => (
            "Record the model's reasoning for choosing (or not choosing) a tool call. Telemetry only; never produces a tool output.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "decision": { "type": "string" },
                    "rationale": { "type": "string" }
                },
                "required": ["decision"]
            }),
        ),
        "delegate_research_task" => (
            "Delegate a sub-task to a child assistant run and wait for its result.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "assistant_id": { "type": "string" },
                    "task": { "type": "string" }
                },
                "required": ["assistant_id", "task"]
            }),
        ),
        _ => return None,
    };

    Some(Tool {
        id: name.to_string(),
        name: name.to_string(),
        kind: ToolKind::PlatformBuiltin,
        function: ToolDefinition {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        },
    })
}

impl MessageContent {
    /// Extract the plain-text content (first text part, or the full text).
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(t) => Some(t.as_str()),
            MessageContent::Parts(parts) => parts.iter().find_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            }),
        }
    }

    /// Extract and join all text content, returning an owned String.
    ///
    /// For `Text` variant, returns the string directly.
    /// For `Parts` variant, joins all `Text` parts with `"\n"`.
    /// Non-text parts (ToolUse, ToolResult, Image) are skipped.
    pub fn extract_all_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// `true` when this content is empty text — the shape a message with
    /// a non-empty `tool_calls` list must have per the data model invariant.
    pub fn is_empty_text(&self) -> bool {
        matches!(self, MessageContent::Text(t) if t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_all_text_from_text_variant() {
        let content = MessageContent::Text("hello world".into());
        assert_eq!(content.extract_all_text(), "hello world");
    }

    #[test]
    fn extract_all_text_from_parts_joins_with_newline() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text {
                text: "line one".into(),
            },
            ContentPart::ToolUse {
                id: "c1".into(),
                name: "exec".into(),
                input: serde_json::json!({}),
            },
            ContentPart::Text {
                text: "line two".into(),
            },
        ]);
        assert_eq!(content.extract_all_text(), "line one\nline two");
    }

    #[test]
    fn extract_all_text_empty_parts() {
        let content = MessageContent::Parts(vec![]);
        assert_eq!(content.extract_all_text(), "");
    }

    #[test]
    fn platform_role_serializes_lowercase() {
        let msg = Message::platform("protocol block");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "platform");
    }

    #[test]
    fn is_platform_tool_recognizes_closed_set() {
        assert!(is_platform_tool("code_interpreter"));
        assert!(is_platform_tool("delegate_research_task"));
        assert!(!is_platform_tool("get_weather"));
    }

    #[test]
    fn platform_tool_schema_known_name() {
        let tool = platform_tool_schema("record_tool_decision").unwrap();
        assert_eq!(tool.kind, ToolKind::PlatformBuiltin);
        assert_eq!(tool.function.name, "record_tool_decision");
    }

    #[test]
    fn platform_tool_schema_unknown_name_is_none() {
        assert!(platform_tool_schema("not_a_real_tool").is_none());
    }

    #[test]
    fn assistant_tool_calls_message_has_no_text_part() {
        let msg = Message::assistant_tool_calls(&[ToolCall {
            call_id: "call_1".into(),
            tool_name: "get_weather".into(),
            arguments: serde_json::json!({"city": "nyc"}),
        }]);
        match &msg.content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 1);
                assert!(!parts.iter().any(|p| matches!(p, ContentPart::Text { .. })));
            }
            other => panic!("expected Parts, got {other:?}"),
        }
        assert_eq!(msg.content.extract_all_text(), "");
    }

    #[test]
    fn role_roundtrips_through_json() {
        for role in [
            Role::System,
            Role::User,
            Role::Assistant,
            Role::Tool,
            Role::Platform,
        ] {
            let json = serde_json::to_string(&role).unwrap();
            let back: Role = serde_json::from_str(&json).unwrap();
            assert_eq!(back, role);
        }
    }
}
