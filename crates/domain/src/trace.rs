use serde::Serialize;

/// Structured trace events emitted across all `ic-*` crates.
///
/// Mirrors the teacher's `TraceEvent::emit` idiom: serialize to JSON and
/// attach it as a single `tracing::info!` field rather than scattering
/// ad hoc fields across call sites.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    RunStarted {
        run_id: String,
        thread_id: String,
        assistant_id: String,
        model: String,
    },
    RunStatusChanged {
        run_id: String,
        from: String,
        to: String,
    },
    ProviderRequest {
        provider: String,
        model: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    ProviderError {
        provider: String,
        message: String,
    },
    ToolCallDetected {
        run_id: String,
        tool_name: String,
        detection_mode: String,
    },
    ActionDispatched {
        action_id: String,
        run_id: String,
        tool_id: String,
    },
    ActionCompleted {
        action_id: String,
        run_id: String,
        status: String,
        duration_ms: u64,
    },
    CacheHit {
        thread_id: String,
        message_count: usize,
    },
    CacheMiss {
        thread_id: String,
    },
    StreamFanoutFailed {
        run_id: String,
        reason: String,
    },
    CancellationObserved {
        run_id: String,
    },
    DelegationStarted {
        parent_run_id: String,
        child_run_id: String,
    },
    DelegationCompleted {
        parent_run_id: String,
        child_run_id: String,
        turns: usize,
    },
    TruncationApplied {
        thread_id: String,
        messages_dropped: usize,
        tokens_before: usize,
        tokens_after: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "ic_event");
    }
}
