use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The execution record of one assistant invocation.
///
/// Lifecycle: `queued -> in_progress -> (pending_action <-> in_progress)*
/// -> completed | failed | cancelled | expired`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub assistant_id: String,
    pub thread_id: String,
    pub user_id: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub tool_choice: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    /// Soft-delete marker; mirrored by `RunStatus::Deleted` for runs that
    /// were already terminal when deleted.
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(
        id: impl Into<String>,
        assistant_id: impl Into<String>,
        thread_id: impl Into<String>,
        user_id: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            assistant_id: assistant_id.into(),
            thread_id: thread_id.into(),
            user_id: user_id.into(),
            status: RunStatus::Queued,
            created_at: Utc::now(),
            model: model.into(),
            temperature: None,
            top_p: None,
            tool_choice: None,
            tools: Vec::new(),
            deleted_at: None,
        }
    }
}

/// Closed set of run statuses.
///
/// Only `Completed`, `Failed`, `Cancelled`, `Expired`, `Deleted` are
/// terminal — `Cancelling` is the in-flight signal a
/// `CancellationMonitor` observes before the run actually reaches
/// `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    PendingAction,
    Completed,
    Failed,
    Cancelling,
    Cancelled,
    Pending,
    Processing,
    Expired,
    Retrying,
    Deleted,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed
                | RunStatus::Failed
                | RunStatus::Cancelled
                | RunStatus::Expired
                | RunStatus::Deleted
        )
    }
}

/// One tool invocation within a run. Owned by its `Run` (`run_id`),
/// cascade-deleted with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub run_id: String,
    pub tool_id: String,
    /// Ties this action to the originating model tool call output.
    pub tool_call_id: String,
    pub function_args: Value,
    pub status: ActionStatus,
    #[serde(default)]
    pub result: Option<String>,
    pub triggered_at: DateTime<Utc>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    /// Tool-choice telemetry captured by `record_tool_decision`. This is
    /// the sole home for that payload — it is never persisted as a
    /// separate tool message.
    #[serde(default)]
    pub decision: Option<Value>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Action {
    pub fn new(
        id: impl Into<String>,
        run_id: impl Into<String>,
        tool_id: impl Into<String>,
        tool_call_id: impl Into<String>,
        function_args: Value,
    ) -> Self {
        Self {
            id: id.into(),
            run_id: run_id.into(),
            tool_id: tool_id.into(),
            tool_call_id: tool_call_id.into(),
            function_args,
            status: ActionStatus::Pending,
            result: None,
            triggered_at: Utc::now(),
            processed_at: None,
            decision: None,
            deleted_at: None,
        }
    }
}

/// Closed set of action statuses. Terminal ∈ `{Completed, Failed,
/// Expired, Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Expired,
    Cancelled,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ActionStatus::Completed
                | ActionStatus::Failed
                | ActionStatus::Expired
                | ActionStatus::Cancelled
        )
    }
}
