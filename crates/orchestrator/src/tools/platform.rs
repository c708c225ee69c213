//! Platform Tool Handlers (C6).
//!
//! Each handler follows the common protocol: create a `pending` [`Action`],
//! do the work, submit the result as a tool output, then mark the action
//! `completed`/`failed`. Handlers never return a hard error to the caller —
//! soft failures are formatted into a pedagogical message and submitted as
//! an `is_error = true` tool output instead, matching
//! `crates/gateway/src/runtime/tools.rs`'s `(content, is_error)` contract.

use crate::persistence::Persistence;
use crate::tools::router::generate_call_id;
use ic_domain::run::{Action, ActionStatus};
use ic_domain::tool::ToolCall;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;
use std::time::Duration;

/// Characters retained by a command's combined stdout/stderr buffer. Ported
/// from the teacher's `OutputBuffer` (`crates/tools/src/manager.rs`):
/// oldest output is dropped from the front once the cap is exceeded, always
/// at a char boundary.
const MAX_OUTPUT_CHARS: usize = 8_000;
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const WEB_PAGE_CHUNK_CHARS: usize = 4_000;

struct OutputBuffer {
    combined: String,
}

impl OutputBuffer {
    fn new() -> Self {
        Self {
            combined: String::new(),
        }
    }

    fn push(&mut self, text: &str) {
        self.combined.push_str(text);
        if self.combined.len() > MAX_OUTPUT_CHARS {
            let drain_count = self.combined.len() - MAX_OUTPUT_CHARS;
            let mut boundary = drain_count;
            while boundary < self.combined.len() && !self.combined.is_char_boundary(boundary) {
                boundary += 1;
            }
            self.combined.drain(..boundary);
        }
    }
}

/// Structured error payload submitted as a tool output on soft failure.
/// Grounded on `_format_error_payload`'s `{error_type, message,
/// status_code?, url?, response_text?, traceback?}` shape.
fn pedagogical_error(error_type: &str, message: &str, extra: Option<Value>) -> String {
    let mut payload = json!({
        "error_type": error_type,
        "message": message,
    });
    if let Some(extra) = extra {
        if let (Value::Object(base), Value::Object(more)) = (&mut payload, extra) {
            base.extend(more);
        }
    }
    payload.to_string()
}

fn missing_argument_error(tool_name: &str, field: &str) -> (String, bool) {
    (
        pedagogical_error(
            "validation_error",
            &format!("{tool_name} requires a `{field}` argument; retry with it set."),
            None,
        ),
        true,
    )
}

/// Dispatch one platform tool call. `decision`, when `Some`, is the payload
/// captured by a sibling `record_tool_decision` call in the same batch —
/// Open Question 2's resolution attaches it to the Action this call
/// creates rather than persisting `record_tool_decision` as its own row.
pub async fn dispatch(
    persistence: &dyn Persistence,
    run_id: &str,
    thread_id: &str,
    call: &ToolCall,
    decision: Option<Value>,
) -> (String, bool) {
    if call.tool_name == "record_tool_decision" {
        // Telemetry only: never creates an Action, never submits a tool output.
        return (String::new(), false);
    }

    let mut action = Action::new(
        generate_call_id(),
        run_id,
        &call.tool_name,
        &call.call_id,
        call.arguments.clone(),
    );
    action.decision = decision;
    let action = match persistence.create_action(action).await {
        Ok(a) => a,
        Err(e) => return (pedagogical_error("internal_error", &e.to_string(), None), true),
    };

    let (content, is_error) = match call.tool_name.as_str() {
        "code_interpreter" => handle_code_interpreter(&call.arguments).await,
        "computer" | "shell" => handle_shell(&call.arguments).await,
        "perform_web_search" | "web_search" => handle_web_search(persistence, &call.arguments).await,
        "read_web_page" => handle_read_web_page(persistence, &call.arguments).await,
        "search_web_page" => handle_search_web_page(persistence, &call.arguments).await,
        "scroll_web_page" => handle_scroll_web_page(persistence, &call.arguments).await,
        "file_search" | "vector_store_search" => handle_file_search(persistence, &call.arguments).await,
        "read_scratchpad" => handle_scratchpad_read(persistence, thread_id).await,
        "update_scratchpad" => handle_scratchpad_update(persistence, thread_id, &call.arguments).await,
        "append_scratchpad" => handle_scratchpad_append(persistence, thread_id, &call.arguments).await,
        "delegate_research_task" => {
            // Dispatched by crate::delegate, not handled here directly —
            // the turn loop routes this tool name to the sub-orchestrator
            // before it ever reaches this match arm in a full build.
            (
                pedagogical_error(
                    "internal_error",
                    "delegate_research_task must be routed through the delegation sub-orchestrator",
                    None,
                ),
                true,
            )
        }
        other => (
            pedagogical_error("internal_error", &format!("no platform handler for {other}"), None),
            true,
        ),
    };

    let status = if is_error { ActionStatus::Failed } else { ActionStatus::Completed };
    let _ = persistence
        .update_action(&action.id, status, Some(content.clone()))
        .await;
    let _ = persistence
        .submit_tool_output(thread_id, &call.call_id, Some(&call.tool_name), &content, is_error)
        .await;

    (content, is_error)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// code_interpreter / computer / shell
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_code_interpreter(arguments: &Value) -> (String, bool) {
    let Some(code) = arguments.get("code").and_then(|v| v.as_str()) else {
        return missing_argument_error("code_interpreter", "code");
    };
    run_command("python3", &["-c", code]).await
}

async fn handle_shell(arguments: &Value) -> (String, bool) {
    let command = arguments
        .get("action")
        .or_else(|| arguments.get("command"))
        .and_then(|v| v.as_str());
    let Some(command) = command else {
        return missing_argument_error("computer", "action");
    };
    run_command("sh", &["-c", command]).await
}

async fn run_command(program: &str, args: &[&str]) -> (String, bool) {
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args);
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            return (
                pedagogical_error("execution_error", &format!("failed to start {program}: {e}"), None),
                true,
            )
        }
    };

    match tokio::time::timeout(COMMAND_TIMEOUT, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let mut buf = OutputBuffer::new();
            buf.push(&String::from_utf8_lossy(&output.stdout));
            buf.push(&String::from_utf8_lossy(&output.stderr));
            let is_error = !output.status.success();
            (buf.combined, is_error)
        }
        Ok(Err(e)) => (
            pedagogical_error("execution_error", &format!("{program} execution failed: {e}"), None),
            true,
        ),
        Err(_) => (
            pedagogical_error(
                "timeout_error",
                &format!("{program} did not complete within {}s", COMMAND_TIMEOUT.as_secs()),
                None,
            ),
            true,
        ),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// web search / read / scroll
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn anchor_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<a[^>]+href="([^"]+)"[^>]*>([^<]+)</a>"#)
            .expect("anchor regex is a fixed valid pattern")
    })
}

async fn handle_web_search(persistence: &dyn Persistence, arguments: &Value) -> (String, bool) {
    let Some(query) = arguments.get("query").and_then(|v| v.as_str()) else {
        return missing_argument_error("perform_web_search", "query");
    };
    let raw = match persistence.web_search(query).await {
        Ok(body) => body,
        Err(e) => return (pedagogical_error("upstream_error", &e.to_string(), None), true),
    };

    let links: Vec<String> = anchor_regex()
        .captures_iter(&raw)
        .take(5)
        .enumerate()
        .map(|(i, cap)| {
            let title = cap[2].trim();
            let url = cap[1].trim();
            format!("{}. **{title}** -> {url}", i + 1)
        })
        .collect();

    if links.is_empty() {
        (
            pedagogical_error(
                "empty_result",
                "No results found. Try a broader or differently-worded query.",
                None,
            ),
            true,
        )
    } else {
        (links.join("\n"), false)
    }
}

async fn handle_read_web_page(persistence: &dyn Persistence, arguments: &Value) -> (String, bool) {
    let Some(url) = arguments.get("url").and_then(|v| v.as_str()) else {
        return missing_argument_error("read_web_page", "url");
    };
    let body = match persistence.web_read(url).await {
        Ok(b) => b,
        Err(e) => return (fetch_error(&e.to_string(), url), true),
    };
    (paginate(&body, 0), false)
}

async fn handle_scroll_web_page(persistence: &dyn Persistence, arguments: &Value) -> (String, bool) {
    let Some(url) = arguments.get("url").and_then(|v| v.as_str()) else {
        return missing_argument_error("scroll_web_page", "url");
    };
    let page = arguments.get("page").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
    let body = match persistence.web_scroll(url, page as u32).await {
        Ok(b) => b,
        Err(e) => return (fetch_error(&e.to_string(), url), true),
    };
    (paginate(&body, page), false)
}

/// Appends the navigation footer described in distilled §4.6: a
/// `--- NAVIGATION (Page {i}/{n}) ---` hint, or `--- END OF DOCUMENT ---`
/// when `page` is the last chunk.
fn paginate(body: &str, page: usize) -> String {
    let total_pages = body.len().div_ceil(WEB_PAGE_CHUNK_CHARS).max(1);
    let start = (page * WEB_PAGE_CHUNK_CHARS).min(body.len());
    let end = (start + WEB_PAGE_CHUNK_CHARS).min(body.len());
    let mut boundary_end = end;
    while boundary_end < body.len() && !body.is_char_boundary(boundary_end) {
        boundary_end += 1;
    }
    let chunk = &body[start..boundary_end];

    if page + 1 >= total_pages {
        format!("{chunk}\n--- END OF DOCUMENT ---")
    } else {
        format!(
            "{chunk}\n--- NAVIGATION (Page {}/{}) --- call scroll_web_page with page={} for more.",
            page + 1,
            total_pages,
            page + 1
        )
    }
}

async fn handle_search_web_page(persistence: &dyn Persistence, arguments: &Value) -> (String, bool) {
    let Some(url) = arguments.get("url").and_then(|v| v.as_str()) else {
        return missing_argument_error("search_web_page", "url");
    };
    let Some(term) = arguments.get("term").and_then(|v| v.as_str()) else {
        return missing_argument_error("search_web_page", "term");
    };
    let body = match persistence.web_read(url).await {
        Ok(b) => b,
        Err(e) => return (fetch_error(&e.to_string(), url), true),
    };

    let term_lower = term.to_ascii_lowercase();
    let hits: Vec<String> = body
        .lines()
        .enumerate()
        .filter(|(_, line)| line.to_ascii_lowercase().contains(&term_lower))
        .take(10)
        .map(|(i, line)| format!("line {}: {}", i + 1, line.trim()))
        .collect();

    if hits.is_empty() {
        (
            pedagogical_error(
                "empty_result",
                &format!("No matches for \"{term}\". Try a synonym or a shorter fragment."),
                None,
            ),
            true,
        )
    } else {
        (hits.join("\n"), false)
    }
}

fn fetch_error(message: &str, url: &str) -> String {
    pedagogical_error(
        "upstream_error",
        message,
        Some(json!({ "url": url, "hint": "choose a different URL" })),
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// file_search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_file_search(persistence: &dyn Persistence, arguments: &Value) -> (String, bool) {
    let Some(query) = arguments.get("query").and_then(|v| v.as_str()) else {
        return missing_argument_error("file_search", "query");
    };
    let assistant_id = arguments.get("assistant_id").and_then(|v| v.as_str()).unwrap_or("default");

    let store_id = match persistence.get_or_create_file_search_store(assistant_id).await {
        Ok(id) => id,
        Err(e) => return (pedagogical_error("internal_error", &e.to_string(), None), true),
    };
    match persistence.unattended_file_search(&store_id, query).await {
        Ok(results) => (json!({ "results": results }).to_string(), false),
        Err(e) => (pedagogical_error("internal_error", &e.to_string(), None), true),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// scratchpad
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shape of the `scratchpad_status` event the caller (the turn loop) emits
/// alongside the tool output, per distilled §4.6.
pub fn scratchpad_status_event(operation: &str, state: &str, entry: Option<&str>, assistant_id: &str) -> Value {
    json!({
        "operation": operation,
        "state": state,
        "entry": entry,
        "assistant_id": assistant_id,
    })
}

async fn handle_scratchpad_read(persistence: &dyn Persistence, thread_id: &str) -> (String, bool) {
    match persistence.scratchpad_read(thread_id).await {
        Ok(content) => (content, false),
        Err(e) => (pedagogical_error("internal_error", &e.to_string(), None), true),
    }
}

async fn handle_scratchpad_update(persistence: &dyn Persistence, thread_id: &str, arguments: &Value) -> (String, bool) {
    let Some(content) = arguments.get("content").and_then(|v| v.as_str()) else {
        return missing_argument_error("update_scratchpad", "content");
    };
    match persistence.scratchpad_update(thread_id, content).await {
        Ok(()) => ("scratchpad updated".into(), false),
        Err(e) => (pedagogical_error("internal_error", &e.to_string(), None), true),
    }
}

async fn handle_scratchpad_append(persistence: &dyn Persistence, thread_id: &str, arguments: &Value) -> (String, bool) {
    let Some(content) = arguments.get("content").and_then(|v| v.as_str()) else {
        return missing_argument_error("append_scratchpad", "content");
    };
    match persistence.scratchpad_append(thread_id, content).await {
        Ok(()) => ("scratchpad appended".into(), false),
        Err(e) => (pedagogical_error("internal_error", &e.to_string(), None), true),
    }
}
