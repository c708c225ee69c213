//! Consumer Tool Dispatcher (C7).
//!
//! Consumer-declared tools (anything not in
//! [`ic_domain::tool::PLATFORM_TOOL_NAMES`]) have no handler inside the
//! core — the core hands the caller a manifest and polls
//! [`Persistence::get_pending_actions`] until the caller submits a result
//! via [`Persistence::submit_tool_output`], the run is cancelled, or
//! `max_wait` elapses.

use crate::persistence::Persistence;
use ic_domain::error::{Error, Result};
use ic_domain::run::{Action, ActionStatus, RunStatus};
use ic_domain::tool::ToolCall;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(60);

/// The `{type: tool_call_manifest, run_id, action_id, tool, args}` frame
/// handed to the consumer once a pending Action has been recorded.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallManifest {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub run_id: String,
    pub action_id: String,
    pub tool: String,
    pub args: Value,
}

pub struct ConsumerDispatcher {
    poll_interval: Duration,
    max_wait: Duration,
}

impl Default for ConsumerDispatcher {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

impl ConsumerDispatcher {
    pub fn new(poll_interval: Duration, max_wait: Duration) -> Self {
        Self { poll_interval, max_wait }
    }

    /// Create one pending `Action` per call, transition the run to
    /// `pending_action`, and return the manifests the caller streams out
    /// to the consumer as `tool_call_manifest` frames.
    pub async fn open(
        &self,
        persistence: &dyn Persistence,
        run_id: &str,
        calls: &[ToolCall],
    ) -> Result<Vec<ToolCallManifest>> {
        let mut manifests = Vec::with_capacity(calls.len());
        for call in calls {
            let action = Action::new(
                format!("act_{}", call.call_id),
                run_id,
                &call.tool_name,
                &call.call_id,
                call.arguments.clone(),
            );
            let action = persistence.create_action(action).await?;
            manifests.push(ToolCallManifest {
                kind: "tool_call_manifest",
                run_id: run_id.to_string(),
                action_id: action.id,
                tool: call.tool_name.clone(),
                args: call.arguments.clone(),
            });
        }
        persistence.update_run_status(run_id, RunStatus::PendingAction).await?;
        Ok(manifests)
    }

    /// Block until every Action opened for this run reaches a terminal
    /// status, the run itself is cancelled, or `max_wait` elapses.
    ///
    /// On success, emits the `status(tool_output_received)` transition by
    /// returning `Ok(())` — the caller is expected to move the run back
    /// to `in_progress` and resume the turn loop.
    pub async fn wait_for_completion(&self, persistence: &dyn Persistence, run_id: &str) -> Result<()> {
        let start = tokio::time::Instant::now();
        loop {
            let run = persistence.retrieve_run(run_id).await?;
            if run.status == RunStatus::Cancelled || run.status == RunStatus::Cancelling {
                return Err(Error::CancellationRequested);
            }

            let pending = persistence.get_pending_actions(run_id).await?;
            if pending.is_empty() {
                return Ok(());
            }

            if start.elapsed() > self.max_wait {
                self.expire_pending(persistence, &pending).await;
                return Err(Error::ConsumerTimeout(self.max_wait));
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn expire_pending(&self, persistence: &dyn Persistence, pending: &[Action]) {
        for action in pending {
            let _ = persistence
                .update_action(&action.id, ActionStatus::Expired, None)
                .await;
        }
    }
}
