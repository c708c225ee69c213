use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used throughout the orchestrator for provider
/// chunks and canonical event sequences alike.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// The unit exchanged internally once a provider chunk has been normalized.
///
/// Within one run the event sequence obeys:
/// `status(started) (content|reasoning|tool_name|call_arguments|tool_call|
/// decision|hot_code|error)* status(complete)`. Tag spans (`<think>`,
/// `<fc>`) and provider channel markers must never leak into `content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CanonicalEvent {
    /// Lifecycle marker. Always brackets a run's event sequence.
    #[serde(rename = "status")]
    Status { status: RunPhase, run_id: String },

    /// Assistant-visible text fragment.
    #[serde(rename = "content")]
    Content { text: String },

    /// Hidden chain-of-thought fragment.
    #[serde(rename = "reasoning")]
    Reasoning { text: String },

    /// Declared tool name, about to be invoked.
    #[serde(rename = "tool_name")]
    ToolName { name: String },

    /// Streamed JSON argument bytes for the tool call in progress.
    #[serde(rename = "call_arguments")]
    CallArguments { fragment: String },

    /// A complete tool call — terminal for that call.
    #[serde(rename = "tool_call")]
    ToolCall {
        name: String,
        arguments: serde_json::Value,
    },

    /// Telemetry JSON fragment carrying tool-choice rationale.
    #[serde(rename = "decision")]
    Decision { fragment: String },

    /// Code being composed for the code interpreter, streamed incrementally.
    #[serde(rename = "hot_code")]
    HotCode { fragment: String },

    /// Unrecoverable stream error. Always terminates the sequence.
    #[serde(rename = "error")]
    Error { message: String },
}

/// Coarse lifecycle marker carried by `CanonicalEvent::Status`.
///
/// Distinct from `ic_domain::run::RunStatus`: this is the two-edge marker
/// bracketing a single stream invocation, not the full run lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Started,
    Complete,
    /// A consumer-tool batch reached a terminal state and the run is
    /// about to resume or hand control back externally. Brackets the
    /// consumer-handoff path the way `Started`/`Complete` bracket a
    /// stream invocation.
    ToolOutputReceived,
}

impl CanonicalEvent {
    /// `true` for the event types that carry assistant- or tool-visible
    /// text and must therefore never contain raw tag/channel markers.
    pub fn is_text_bearing(&self) -> bool {
        matches!(
            self,
            CanonicalEvent::Content { .. } | CanonicalEvent::Reasoning { .. }
        )
    }
}

/// Token usage for a completion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}
