//! Delta Normalizer — turns provider-shaped [`RawDelta`]s into the
//! canonical event sequence.
//!
//! A pure state machine: no I/O, a rolling character buffer, and tag
//! boundary resolution modeled on the buffer-drain idiom of
//! [`crate::sse::drain_data_lines`]. Native tool-call deltas (already
//! keyed by `call_id` upstream) bypass the tag parser entirely per rule 2;
//! only free-form token text runs through the bracket-tag / channel-marker
//! state machine of rule 3.

use crate::traits::RawDelta;
use ic_domain::stream::CanonicalEvent;
use smallvec::SmallVec;

const TAG_THINK_OPEN: &str = "<think>";
const TAG_THINK_CLOSE: &str = "</think>";
const TAG_PLAN_OPEN: &str = "<plan>";
const TAG_PLAN_CLOSE: &str = "</plan>";
const TAG_FC_OPEN: &str = "<fc>";
const TAG_FC_CLOSE: &str = "</fc>";
const TAG_CHANNEL: &str = "<|channel|>";
const TAG_MESSAGE: &str = "<|message|>";
const TAG_CALL: &str = "<|call|>";
const TAG_END: &str = "<|end|>";
const TAG_SCRUB: &str = "<|end|><|start|>assistant";

/// Internal normalizer state. Exactly the seven-variant set named by the
/// tag-state-machine contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NormState {
    Content,
    Think,
    Fc,
    ChannelReasoning,
    ChannelToolMeta,
    ChannelToolPayload,
    Unknown,
}

/// Pure state machine converting a sequence of [`RawDelta`]s into
/// [`CanonicalEvent`]s. Never fails: malformed tag spans degrade to
/// best-effort `content` events per the contract's failure semantics.
pub struct Normalizer {
    run_id: String,
    state: NormState,
    buf: String,
    /// `</think>` or `</plan>`, whichever opener is currently active.
    closing_tag: &'static str,
    channel_header: String,
    fc_buf: String,
    pending_tool_name: String,
    pending_tool_args: String,
    started: bool,
}

impl Normalizer {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            state: NormState::Content,
            buf: String::new(),
            closing_tag: TAG_THINK_CLOSE,
            channel_header: String::new(),
            fc_buf: String::new(),
            pending_tool_name: String::new(),
            pending_tool_args: String::new(),
            started: false,
        }
    }

    /// Feed one provider delta, returning zero or more canonical events.
    pub fn feed(&mut self, delta: RawDelta) -> SmallVec<[CanonicalEvent; 4]> {
        let mut out = SmallVec::new();
        self.emit_started(&mut out);

        match delta {
            // Rule 1: native reasoning_content bypasses the tag parser entirely.
            RawDelta::Thinking { text } => {
                if !text.is_empty() {
                    out.push(CanonicalEvent::Reasoning { text });
                }
            }
            RawDelta::Token { text } => {
                self.buf.push_str(&text);
                self.scan(&mut out);
            }
            // Rule 2: native tool-call deltas, already keyed by call_id.
            RawDelta::ToolCallStarted { tool_name, .. } => {
                out.push(CanonicalEvent::ToolName { name: tool_name });
            }
            RawDelta::ToolCallDelta { delta, .. } => {
                out.push(CanonicalEvent::CallArguments { fragment: delta });
            }
            RawDelta::ToolCallFinished {
                tool_name,
                arguments,
                ..
            } => {
                let parsed = serde_json::from_str(&arguments)
                    .unwrap_or_else(|_| serde_json::Value::String(arguments));
                out.push(CanonicalEvent::ToolCall {
                    name: tool_name,
                    arguments: parsed,
                });
            }
            RawDelta::Done { .. } => {
                self.flush_into(&mut out);
                out.push(CanonicalEvent::Status {
                    status: ic_domain::stream::RunPhase::Complete,
                    run_id: self.run_id.clone(),
                });
            }
            RawDelta::Error { message } => {
                out.push(CanonicalEvent::Error { message });
            }
        }
        out
    }

    /// Flush any buffered text as a terminal event. Consumes `self` since
    /// no further input is expected.
    pub fn flush(mut self) -> Vec<CanonicalEvent> {
        let mut out = SmallVec::new();
        self.flush_into(&mut out);
        out.into_vec()
    }

    fn emit_started(&mut self, out: &mut SmallVec<[CanonicalEvent; 4]>) {
        if !self.started {
            self.started = true;
            out.push(CanonicalEvent::Status {
                status: ic_domain::stream::RunPhase::Started,
                run_id: self.run_id.clone(),
            });
        }
    }

    fn flush_into(&mut self, out: &mut SmallVec<[CanonicalEvent; 4]>) {
        if !self.buf.is_empty() {
            let text = std::mem::take(&mut self.buf);
            self.emit_text(self.state, &text, out);
        }
        if self.state == NormState::Fc && !self.fc_buf.is_empty() {
            let fc = std::mem::take(&mut self.fc_buf);
            self.finish_fc(&fc, out);
        }
    }

    fn emit_text(&self, state: NormState, text: &str, out: &mut SmallVec<[CanonicalEvent; 4]>) {
        if text.is_empty() {
            return;
        }
        match state {
            NormState::Content | NormState::Unknown => {
                out.push(CanonicalEvent::Content { text: text.into() });
            }
            NormState::Think | NormState::ChannelReasoning => {
                out.push(CanonicalEvent::Reasoning { text: text.into() });
            }
            NormState::Fc => {
                // Accumulated until `</fc>`; no event yet.
            }
            NormState::ChannelToolMeta => {
                // Header text (channel name, `to=functions.X`); accumulated
                // until `<|message|>`, never emitted directly.
            }
            NormState::ChannelToolPayload => {
                out.push(CanonicalEvent::CallArguments {
                    fragment: text.into(),
                });
            }
        }
    }

    /// Drive the tag-boundary scanner over `self.buf` until either the
    /// buffer is exhausted or a suspected partial tag is parked at the tail.
    fn scan(&mut self, out: &mut SmallVec<[CanonicalEvent; 4]>) {
        loop {
            let tags = self.candidate_tags();
            match earliest_match(&self.buf, &tags) {
                Some((idx, tag)) => {
                    let pre = self.buf[..idx].to_string();
                    self.emit_text(self.state, &pre, out);
                    if self.state == NormState::Fc {
                        self.fc_buf.push_str(&pre);
                    }
                    if self.state == NormState::ChannelToolMeta {
                        self.channel_header.push_str(&pre);
                    }
                    if self.state == NormState::ChannelToolPayload {
                        self.pending_tool_args.push_str(&pre);
                    }
                    self.buf.drain(..idx + tag.len());
                    self.apply_tag(tag, out);
                }
                None => {
                    let withhold = tags
                        .iter()
                        .map(|t| suffix_prefix_len(&self.buf, t))
                        .max()
                        .unwrap_or(0);
                    let emit_len = self.buf.len() - withhold;
                    if emit_len > 0 {
                        let text: String = self.buf.drain(..emit_len).collect();
                        self.emit_text(self.state, &text, out);
                        match self.state {
                            NormState::Fc => self.fc_buf.push_str(&text),
                            NormState::ChannelToolMeta => self.channel_header.push_str(&text),
                            NormState::ChannelToolPayload => {
                                self.pending_tool_args.push_str(&text)
                            }
                            _ => {}
                        }
                    }
                    break;
                }
            }
        }
    }

    fn candidate_tags(&self) -> Vec<&'static str> {
        match self.state {
            NormState::Content | NormState::Unknown => {
                vec![TAG_SCRUB, TAG_CHANNEL, TAG_THINK_OPEN, TAG_PLAN_OPEN, TAG_FC_OPEN]
            }
            NormState::Think => vec![TAG_SCRUB, self.closing_tag],
            NormState::Fc => vec![TAG_SCRUB, TAG_FC_CLOSE],
            NormState::ChannelReasoning => vec![TAG_SCRUB, TAG_CHANNEL, TAG_END],
            NormState::ChannelToolMeta => vec![TAG_SCRUB, TAG_MESSAGE],
            NormState::ChannelToolPayload => vec![TAG_SCRUB, TAG_CALL, TAG_CHANNEL, TAG_END],
        }
    }

    fn apply_tag(&mut self, tag: &'static str, out: &mut SmallVec<[CanonicalEvent; 4]>) {
        if tag == TAG_SCRUB {
            self.state = NormState::Content;
            return;
        }
        match (self.state, tag) {
            (NormState::Content | NormState::Unknown, TAG_THINK_OPEN) => {
                self.state = NormState::Think;
                self.closing_tag = TAG_THINK_CLOSE;
            }
            (NormState::Content | NormState::Unknown, TAG_PLAN_OPEN) => {
                self.state = NormState::Think;
                self.closing_tag = TAG_PLAN_CLOSE;
            }
            (NormState::Content | NormState::Unknown, TAG_FC_OPEN) => {
                self.state = NormState::Fc;
                self.fc_buf.clear();
            }
            (NormState::Content | NormState::Unknown, TAG_CHANNEL) => {
                self.state = NormState::ChannelToolMeta;
                self.channel_header.clear();
            }
            (NormState::Think, _) => {
                self.state = NormState::Content;
            }
            (NormState::Fc, TAG_FC_CLOSE) => {
                let fc = std::mem::take(&mut self.fc_buf);
                self.finish_fc(&fc, out);
                self.state = NormState::Content;
            }
            (NormState::ChannelToolMeta, TAG_MESSAGE) => {
                let header = self.channel_header.trim().to_string();
                if header.starts_with("analysis") {
                    self.state = NormState::ChannelReasoning;
                } else if header.starts_with("commentary") {
                    self.pending_tool_name = header
                        .split("to=")
                        .nth(1)
                        .map(|s| {
                            s.split(|c: char| c.is_whitespace() || c == '<')
                                .next()
                                .unwrap_or("")
                                .trim_start_matches("functions.")
                                .to_string()
                        })
                        .unwrap_or_default();
                    self.pending_tool_args.clear();
                    out.push(CanonicalEvent::ToolName {
                        name: self.pending_tool_name.clone(),
                    });
                    self.state = NormState::ChannelToolPayload;
                } else if header.starts_with("final") {
                    self.state = NormState::Content;
                } else {
                    // Unrecognized channel: best-effort, treat body as content.
                    self.state = NormState::Content;
                }
            }
            (NormState::ChannelReasoning, TAG_CHANNEL) => {
                self.state = NormState::ChannelToolMeta;
                self.channel_header.clear();
            }
            (NormState::ChannelReasoning, TAG_END) => {
                self.state = NormState::Unknown;
            }
            (NormState::ChannelToolPayload, TAG_CALL) => {
                let args = std::mem::take(&mut self.pending_tool_args);
                let parsed = serde_json::from_str(&args)
                    .unwrap_or_else(|_| serde_json::Value::Object(Default::default()));
                out.push(CanonicalEvent::ToolCall {
                    name: std::mem::take(&mut self.pending_tool_name),
                    arguments: parsed,
                });
                self.state = NormState::Unknown;
            }
            (NormState::ChannelToolPayload, TAG_CHANNEL) => {
                self.state = NormState::ChannelToolMeta;
                self.channel_header.clear();
            }
            (NormState::ChannelToolPayload, TAG_END) => {
                self.state = NormState::Unknown;
            }
            _ => {
                // Closing tag seen in an unexpected state: best-effort, drop back to content.
                self.state = NormState::Content;
            }
        }
    }

    fn finish_fc(&self, raw: &str, out: &mut SmallVec<[CanonicalEvent; 4]>) {
        match serde_json::from_str::<serde_json::Value>(raw.trim()) {
            Ok(v) => {
                let name = v
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or_default()
                    .to_string();
                let arguments = v.get("arguments").cloned().unwrap_or(serde_json::Value::Null);
                out.push(CanonicalEvent::ToolName { name: name.clone() });
                out.push(CanonicalEvent::ToolCall { name, arguments });
            }
            Err(_) => {
                // Malformed `<fc>` body: never fail, surface as plain content.
                out.push(CanonicalEvent::Content {
                    text: raw.to_string(),
                });
            }
        }
    }
}

/// Find the earliest exact occurrence of any candidate tag in `buf`.
/// Longer tags win ties at the same start index (rule: "longer tag strings
/// take precedence").
fn earliest_match<'a>(buf: &str, tags: &[&'a str]) -> Option<(usize, &'a str)> {
    let mut best: Option<(usize, &str)> = None;
    for tag in tags {
        if let Some(idx) = buf.find(tag) {
            best = match best {
                Some((best_idx, best_tag)) if best_idx < idx => Some((best_idx, best_tag)),
                Some((best_idx, best_tag)) if best_idx == idx && best_tag.len() >= tag.len() => {
                    Some((best_idx, best_tag))
                }
                _ => Some((idx, tag)),
            };
        }
    }
    best
}

/// How many trailing bytes of `buf` form a (non-empty, proper) prefix of
/// `tag` — the "safety window" withheld so a tag split across two chunks
/// isn't mistaken for plain text.
fn suffix_prefix_len(buf: &str, tag: &str) -> usize {
    let max_k = tag.len().saturating_sub(1).min(buf.len());
    for k in (1..=max_k).rev() {
        if buf.ends_with(&tag[..k]) {
            return k;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(n: &mut Normalizer, chunks: &[&str]) -> Vec<CanonicalEvent> {
        let mut events = Vec::new();
        for c in chunks {
            events.extend(n.feed(RawDelta::Token { text: c.to_string() }));
        }
        events
    }

    #[test]
    fn plain_text_passes_through_as_content() {
        let mut n = Normalizer::new("run_1");
        let events = feed_all(&mut n, &["hello ", "world"]);
        assert!(matches!(&events[0], CanonicalEvent::Status { .. }));
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                CanonicalEvent::Content { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "hello world");
    }

    #[test]
    fn think_tags_produce_reasoning_not_content() {
        let mut n = Normalizer::new("run_2");
        let events = feed_all(&mut n, &["before<think>hmm</think>after"]);
        let reasoning: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                CanonicalEvent::Reasoning { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(reasoning, vec!["hmm"]);
        let content: String = events
            .iter()
            .filter_map(|e| match e {
                CanonicalEvent::Content { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(content, "beforeafter");
    }

    #[test]
    fn split_tag_across_chunks_is_not_leaked() {
        let mut n = Normalizer::new("run_3");
        let events = feed_all(&mut n, &["<thi", "nk>secret</thi", "nk>visible"]);
        let content: String = events
            .iter()
            .filter_map(|e| match e {
                CanonicalEvent::Content { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(content, "visible");
        assert!(!content.contains("secret"));
    }

    #[test]
    fn fc_block_emits_tool_call() {
        let mut n = Normalizer::new("run_4");
        let events = feed_all(
            &mut n,
            &[r#"<fc>{"name": "code_interpreter", "arguments": {"code": "1+1"}}</fc>"#],
        );
        let call = events.iter().find_map(|e| match e {
            CanonicalEvent::ToolCall { name, arguments } => Some((name.clone(), arguments.clone())),
            _ => None,
        });
        assert_eq!(
            call,
            Some((
                "code_interpreter".to_string(),
                serde_json::json!({"code": "1+1"})
            ))
        );
    }

    #[test]
    fn malformed_fc_block_degrades_to_content() {
        let mut n = Normalizer::new("run_5");
        let events = feed_all(&mut n, &["<fc>not json at all</fc>"]);
        assert!(events
            .iter()
            .any(|e| matches!(e, CanonicalEvent::Content { text } if text.contains("not json"))));
    }

    #[test]
    fn channel_commentary_extracts_tool_name_and_arguments() {
        let mut n = Normalizer::new("run_6");
        let events = feed_all(
            &mut n,
            &[
                "<|channel|>commentary to=functions.get_weather<|message|>",
                r#"{"city": "SF"}"#,
                "<|call|>",
            ],
        );
        let names: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                CanonicalEvent::ToolName { name } => Some(name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["get_weather"]);
        let call = events.iter().find_map(|e| match e {
            CanonicalEvent::ToolCall { name, arguments } => Some((name.clone(), arguments.clone())),
            _ => None,
        });
        assert_eq!(
            call,
            Some(("get_weather".to_string(), serde_json::json!({"city": "SF"})))
        );
    }

    #[test]
    fn channel_analysis_yields_reasoning() {
        let mut n = Normalizer::new("run_7");
        let events = feed_all(
            &mut n,
            &["<|channel|>analysis<|message|>thinking it through<|end|>done"],
        );
        assert!(events.iter().any(
            |e| matches!(e, CanonicalEvent::Reasoning { text } if text == "thinking it through")
        ));
        assert!(events
            .iter()
            .any(|e| matches!(e, CanonicalEvent::Content { text } if text == "done")));
    }

    #[test]
    fn native_tool_call_deltas_bypass_tag_parser() {
        let mut n = Normalizer::new("run_8");
        let mut events = n.feed(RawDelta::ToolCallStarted {
            call_id: "call_1".into(),
            tool_name: "web_search".into(),
        });
        events.extend(n.feed(RawDelta::ToolCallDelta {
            call_id: "call_1".into(),
            delta: r#"{"query":"#.into(),
        }));
        events.extend(n.feed(RawDelta::ToolCallFinished {
            call_id: "call_1".into(),
            tool_name: "web_search".into(),
            arguments: r#"{"query":"rust"}"#.into(),
        }));
        assert!(events
            .iter()
            .any(|e| matches!(e, CanonicalEvent::ToolName { name } if name == "web_search")));
        assert!(events.iter().any(|e| matches!(
            e,
            CanonicalEvent::ToolCall { name, .. } if name == "web_search"
        )));
    }

    #[test]
    fn reasoning_content_bypasses_tag_parser() {
        let mut n = Normalizer::new("run_9");
        let events = n.feed(RawDelta::Thinking {
            text: "<think>literal</think>".into(),
        });
        assert!(events.iter().any(
            |e| matches!(e, CanonicalEvent::Reasoning { text } if text == "<think>literal</think>")
        ));
    }

    #[test]
    fn done_emits_terminal_status() {
        let mut n = Normalizer::new("run_10");
        let events = n.feed(RawDelta::Done {
            usage: None,
            finish_reason: Some("stop".into()),
        });
        assert!(events.iter().any(|e| matches!(
            e,
            CanonicalEvent::Status {
                status: ic_domain::stream::RunPhase::Complete,
                ..
            }
        )));
    }

    #[test]
    fn error_delta_emits_error_event() {
        let mut n = Normalizer::new("run_11");
        let events = n.feed(RawDelta::Error {
            message: "connection reset".into(),
        });
        assert!(events
            .iter()
            .any(|e| matches!(e, CanonicalEvent::Error { message } if message == "connection reset")));
    }

    #[test]
    fn flush_emits_buffered_tail() {
        let mut n = Normalizer::new("run_12");
        let _ = n.feed(RawDelta::Token {
            text: "trailing".into(),
        });
        let events = n.flush();
        assert!(events
            .iter()
            .any(|e| matches!(e, CanonicalEvent::Content { text } if text == "trailing")));
    }
}
