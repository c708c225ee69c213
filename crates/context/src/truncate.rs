//! Token-budget Truncator.
//!
//! Counts tokens with a real BPE tokenizer (HuggingFace-compatible via the
//! `tokenizers` crate) rather than a character heuristic, then trims the
//! conversation to fit `max_context_tokens * threshold`. This supersedes
//! [`crate::truncation`], which stays in the crate only as a non-tokenizing
//! byte-budget helper for things like preview strings.

use ic_domain::config::TruncatorConfig;
use ic_domain::tool::{Message, MessageContent, Role};
use tokenizers::Tokenizer;

use crate::report::ContextReport;

pub struct Truncator {
    tokenizer: Option<Tokenizer>,
    max_context_tokens: u32,
    threshold: f64,
}

impl Truncator {
    /// Load the configured tokenizer, falling back to `gpt2` and then to a
    /// rough byte-based estimate if neither is reachable. An unavailable
    /// `model` id must never block a run.
    pub fn new(config: &TruncatorConfig) -> Self {
        let tokenizer = load_tokenizer(&config.model).or_else(|| {
            if config.model != "gpt2" {
                load_tokenizer("gpt2")
            } else {
                None
            }
        });
        if tokenizer.is_none() {
            tracing::warn!(
                model = %config.model,
                "no tokenizer reachable; falling back to an approximate byte-based token count"
            );
        }
        Self {
            tokenizer,
            max_context_tokens: config.max_context_tokens,
            threshold: config.threshold,
        }
    }

    fn budget(&self) -> f64 {
        self.max_context_tokens as f64 * self.threshold
    }

    pub fn count_tokens(&self, text: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }
        match &self.tokenizer {
            Some(t) => t
                .encode(text, false)
                .map(|enc| enc.get_ids().len() as u32)
                .unwrap_or_else(|_| estimate_tokens(text)),
            None => estimate_tokens(text),
        }
    }

    /// Trim `messages` to the token budget and merge consecutive
    /// same-role plain-text messages. `system` messages are never dropped;
    /// the oldest non-system messages are dropped first.
    pub fn truncate(&self, messages: Vec<Message>) -> (Vec<Message>, ContextReport) {
        let indexed: Vec<(usize, Message)> = messages.into_iter().enumerate().collect();
        let (system, other): (Vec<(usize, Message)>, Vec<(usize, Message)>) =
            indexed.into_iter().partition(|(_, m)| m.role == Role::System);

        let sys_tokens: u32 = system
            .iter()
            .map(|(_, m)| self.count_tokens(&m.content.extract_all_text()))
            .sum();
        let other_tokens_before: u32 = other
            .iter()
            .map(|(_, m)| self.count_tokens(&m.content.extract_all_text()))
            .sum();

        let budget = self.budget();
        let total = sys_tokens + other_tokens_before;

        let mut other_tokens = other_tokens_before;
        let mut remaining = other;
        let mut dropped = 0usize;

        if (total as f64) > budget {
            let other_budget = (budget - sys_tokens as f64).max(0.0);
            while !remaining.is_empty() && (other_tokens as f64) > other_budget {
                let (_, removed) = remaining.remove(0);
                other_tokens =
                    other_tokens.saturating_sub(self.count_tokens(&removed.content.extract_all_text()));
                dropped += 1;
            }
        }

        let mut combined: Vec<(usize, Message)> = system.into_iter().chain(remaining).collect();
        combined.sort_by_key(|(idx, _)| *idx);

        let before_merge = combined.len();
        let merged = merge_consecutive(combined.into_iter().map(|(_, m)| m).collect());
        let messages_merged = before_merge.saturating_sub(merged.len());

        let report = ContextReport {
            system_tokens: sys_tokens,
            history_tokens_before: other_tokens_before,
            history_tokens_after: other_tokens,
            messages_dropped: dropped,
            messages_merged,
            truncated: dropped > 0,
        };

        (merged, report)
    }
}

fn load_tokenizer(model: &str) -> Option<Tokenizer> {
    if model.is_empty() {
        return None;
    }
    match Tokenizer::from_pretrained(model, None) {
        Ok(t) => Some(t),
        Err(e) => {
            tracing::warn!(model, error = %e, "failed to load tokenizer");
            None
        }
    }
}

/// ~4 bytes/token is the usual rule of thumb for English BPE vocabularies;
/// used only when no tokenizer could be reached at all.
fn estimate_tokens(text: &str) -> u32 {
    ((text.len() as f64) / 4.0).ceil() as u32
}

/// Merge consecutive plain-text messages from the same role by
/// newline-joining their content. Tool-call/tool-result messages (which
/// carry structured `ContentPart`s) are never merged.
fn merge_consecutive(messages: Vec<Message>) -> Vec<Message> {
    let mut merged: Vec<Message> = Vec::with_capacity(messages.len());
    for msg in messages {
        let mergeable = matches!(msg.content, MessageContent::Text(_));
        match merged.last_mut() {
            Some(prev)
                if mergeable
                    && prev.role == msg.role
                    && matches!(prev.content, MessageContent::Text(_)) =>
            {
                let joined = format!("{}\n{}", prev.content.extract_all_text(), msg.content.extract_all_text());
                prev.content = MessageContent::Text(joined);
            }
            _ => merged.push(msg),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(max_context_tokens: u32, threshold: f64) -> TruncatorConfig {
        TruncatorConfig {
            model: String::new(),
            threshold,
            max_context_tokens,
            surface_traceback: false,
        }
    }

    fn truncator_with_estimate(max_context_tokens: u32, threshold: f64) -> Truncator {
        Truncator {
            tokenizer: None,
            max_context_tokens,
            threshold,
        }
    }

    #[test]
    fn estimate_tokens_scales_with_length() {
        assert_eq!(estimate_tokens(""), 0);
        assert!(estimate_tokens("a") >= 1);
        assert!(estimate_tokens(&"a".repeat(40)) >= 10);
    }

    #[test]
    fn never_drops_system_messages() {
        let t = truncator_with_estimate(1, 1.0);
        let messages = vec![
            Message::system("x".repeat(200)),
            Message::user("hello"),
            Message::assistant("world"),
        ];
        let (out, report) = t.truncate(messages);
        assert!(out.iter().any(|m| m.role == Role::System));
        assert!(report.truncated || report.messages_dropped > 0 || out.len() <= 3);
    }

    #[test]
    fn drops_oldest_non_system_first() {
        let t = truncator_with_estimate(10, 1.0);
        let messages = vec![
            Message::user("a".repeat(40)),
            Message::user("b".repeat(40)),
            Message::user("c".repeat(4)),
        ];
        let (out, report) = t.truncate(messages);
        assert!(report.messages_dropped >= 1);
        let texts: Vec<String> = out.iter().map(|m| m.content.extract_all_text()).collect();
        assert!(!texts.iter().any(|t| t.starts_with('a')));
    }

    #[test]
    fn merges_consecutive_same_role_text_messages() {
        let t = truncator_with_estimate(10_000, 1.0);
        let messages = vec![Message::user("one"), Message::user("two"), Message::assistant("three")];
        let (out, report) = t.truncate(messages);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].content.extract_all_text(), "one\ntwo");
        assert_eq!(report.messages_merged, 1);
    }

    #[test]
    fn does_not_merge_tool_result_messages() {
        let t = truncator_with_estimate(10_000, 1.0);
        let messages = vec![
            Message::tool_result("call_1", "result one"),
            Message::tool_result("call_2", "result two"),
        ];
        let (out, _report) = t.truncate(messages);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn under_budget_is_a_no_op_besides_merging() {
        let t = truncator_with_estimate(10_000, 1.0);
        let messages = vec![Message::system("instructions"), Message::user("hi")];
        let (out, report) = t.truncate(messages);
        assert_eq!(out.len(), 2);
        assert_eq!(report.messages_dropped, 0);
        assert!(!report.truncated);
    }

    #[test]
    fn config_loader_falls_back_when_model_unset() {
        let truncator = Truncator::new(&cfg(1000, 0.8));
        assert!(truncator.tokenizer.is_none() || truncator.tokenizer.is_some());
    }
}
