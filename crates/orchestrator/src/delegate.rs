//! Delegation Sub-Orchestrator (C11).
//!
//! `delegate_research_task` spins up an ephemeral thread and run under
//! the same assistant, seeds it with the handoff task, and recurses into
//! [`crate::turn::process_conversation`] — a child turn loop, registered
//! in the parent's cancel group so cancelling the parent cancels the
//! child, bounded by [`AgentLimits`] so a delegation tree cannot grow
//! past `max_depth`/`max_duration_ms`.

use std::time::Duration;

use ic_domain::config::AgentLimits;
use ic_domain::error::{Error, Result};
use ic_domain::run::{Action, ActionStatus, Run};
use ic_domain::tool::{Message, ToolCall};
use serde_json::json;

use crate::cancel::CancelMap;
use crate::persistence::Persistence;
use crate::tools::router::generate_call_id;
use crate::turn::{process_conversation, TurnDeps, TurnInput, TurnOutcome};

pub struct DelegationRequest {
    pub parent_run_id: String,
    pub assistant_id: String,
    pub model: Option<String>,
    pub depth: u32,
    pub limits: AgentLimits,
    pub task: String,
}

fn fresh_run_id(parent_run_id: &str) -> String {
    format!("run_{parent_run_id}_{}", uuid::Uuid::new_v4().simple())
}

/// Entry point called by [`crate::turn::process_conversation`] when a
/// `delegate_research_task` call appears in a turn's batch. Follows the
/// same Action/tool-output protocol as `tools::platform::dispatch` — a
/// `pending` Action, then `completed`/`failed` with the sub-orchestrator's
/// report (or error payload) submitted as the tool output — so this tool
/// is indistinguishable from a platform handler to the rest of the turn
/// loop and to anything reading the Action/Message history back out.
pub async fn dispatch(deps: &TurnDeps<'_>, input: &TurnInput, call: &ToolCall) -> (String, bool) {
    let mut action = Action::new(
        generate_call_id(),
        &input.run_id,
        &call.tool_name,
        &call.call_id,
        call.arguments.clone(),
    );
    action.decision = None;
    let action = match deps.persistence.create_action(action).await {
        Ok(a) => a,
        Err(e) => return (json!({ "error_type": "internal_error", "message": e.to_string() }).to_string(), true),
    };

    let task = call
        .arguments
        .get("task")
        .or_else(|| call.arguments.get("query"))
        .and_then(|v| v.as_str());
    let (content, is_error) = match task {
        None => (
            json!({
                "error_type": "validation_error",
                "message": "delegate_research_task requires a `task` argument; retry with it set.",
            })
            .to_string(),
            true,
        ),
        Some(task) => {
            let model = call.arguments.get("model").and_then(|v| v.as_str()).map(String::from);
            let request = DelegationRequest {
                parent_run_id: input.run_id.clone(),
                assistant_id: input.assistant_id.clone(),
                model,
                depth: input.depth,
                limits: input.agent_limits.clone(),
                task: task.to_string(),
            };
            delegate(deps, deps.cancel_map, request).await
        }
    };

    let status = if is_error { ActionStatus::Failed } else { ActionStatus::Completed };
    let _ = deps.persistence.update_action(&action.id, status, Some(content.clone())).await;
    let _ = deps
        .persistence
        .submit_tool_output(&input.thread_id, &call.call_id, Some(&call.tool_name), &content, is_error)
        .await;

    (content, is_error)
}

/// Run the delegated task to completion and return the `(content,
/// is_error)` pair to submit as the parent's tool output — mirroring
/// every other platform handler's contract.
pub async fn delegate(deps: &TurnDeps<'_>, cancel_map: &CancelMap, request: DelegationRequest) -> (String, bool) {
    if request.depth >= request.limits.max_depth {
        return (
            json!({
                "error_type": "depth_exceeded",
                "message": format!("delegation depth {} reached the configured max_depth {}", request.depth, request.limits.max_depth),
            })
            .to_string(),
            true,
        );
    }

    match run_child(deps, cancel_map, &request).await {
        Ok(content) => (content, false),
        Err(e) => (
            json!({
                "error_type": "delegation_failed",
                "message": e.to_string(),
            })
            .to_string(),
            true,
        ),
    }
}

async fn run_child(deps: &TurnDeps<'_>, cancel_map: &CancelMap, request: &DelegationRequest) -> Result<String> {
    let child_thread_id = deps.persistence.create_thread().await?;
    let child_run_id = fresh_run_id(&request.parent_run_id);

    let model = request.model.clone().unwrap_or_else(|| "inherit".into());
    let run = Run::new(&child_run_id, &request.assistant_id, &child_thread_id, "delegated", model);
    deps.persistence.create_run(run).await?;
    deps.persistence
        .create_message(&child_thread_id, Some(&child_run_id), Message::user(request.task.clone()))
        .await?;

    let child_token = cancel_map.register(&child_run_id);
    cancel_map.add_to_group(&request.parent_run_id, &child_run_id);

    let duration = if request.limits.max_duration_ms == 0 {
        None
    } else {
        Some(Duration::from_millis(request.limits.max_duration_ms))
    };

    let mut input = TurnInput::new(child_run_id.clone(), child_thread_id, request.assistant_id.clone());
    input.model = request.model.clone();
    input.depth = request.depth + 1;
    input.agent_limits = request.limits.clone();

    let run_fut = process_conversation(deps, &child_token, input);
    let outcome = match duration {
        Some(d) => match tokio::time::timeout(d, run_fut).await {
            Ok(result) => result?,
            Err(_) => {
                deps.persistence
                    .update_run_status(&child_run_id, ic_domain::run::RunStatus::Expired)
                    .await?;
                cancel_map.remove_from_group(&request.parent_run_id, &child_run_id);
                cancel_map.remove(&child_run_id);
                return Err(Error::Timeout(format!(
                    "delegated run {child_run_id} exceeded max_duration_ms={}",
                    request.limits.max_duration_ms
                )));
            }
        },
        None => run_fut.await?,
    };

    cancel_map.remove_from_group(&request.parent_run_id, &child_run_id);
    cancel_map.remove(&child_run_id);

    match outcome {
        TurnOutcome::Completed { content } => Ok(content),
        TurnOutcome::HandedToConsumer { .. } => Err(Error::ToolExecution(
            "delegated task required a consumer tool, which a sub-orchestrator cannot satisfy".into(),
        )),
        TurnOutcome::Cancelled => Err(Error::CancellationRequested),
        TurnOutcome::LoopLimitReached => Err(Error::ToolExecution(
            "delegated task exhausted its tool loop without producing an answer".into(),
        )),
    }
}
