use serde::{Deserialize, Serialize};

/// Machine-readable summary of one context-window build, returned
/// alongside the assembled messages so callers can log/inspect what the
/// Truncator did without re-deriving it from the message list.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContextReport {
    pub system_tokens: u32,
    pub history_tokens_before: u32,
    pub history_tokens_after: u32,
    pub messages_dropped: usize,
    pub messages_merged: usize,
    pub truncated: bool,
}
