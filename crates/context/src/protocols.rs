//! Static registry of operational-protocol text blocks injected into the
//! system message. Mirrors the teacher's workspace-file injection in
//! shape (named, ordered blocks assembled on demand) but the content here
//! is the model's tool-calling contract rather than workspace state.

/// A named protocol block. Order of variants has no meaning; callers pick
/// an explicit key list and get blocks back in that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolKey {
    ToolUsage,
    ToolDecision,
    FunctionCallFormatting,
    FunctionCallWrapping,
    DeveloperInstructions,
}

impl ProtocolKey {
    fn text(self) -> &'static str {
        match self {
            ProtocolKey::ToolUsage => {
                "STRICT TOOL USAGE PROTOCOL\n\
                 All tool calls must use the exact structure:\n\
                 {\"name\": \"<tool_name>\", \"arguments\": {\"<param>\": \"<value>\"}}"
            }
            ProtocolKey::ToolDecision => {
                "TOOL DECISION PROTOCOL\n\
                 Before calling a tool, emit a record_tool_decision call wrapped in \
                 <decision>...</decision> tags in the same response. Wait for it to be \
                 acknowledged, then emit the real tool call wrapped in <fc>...</fc>. Never \
                 combine the decision record and the real call in one wrapper, and never \
                 treat the decision record itself as an executable tool output."
            }
            ProtocolKey::FunctionCallFormatting => {
                "FORMATTING FUNCTION CALLS\n\
                 Do not wrap function calls in markdown code fences. Emit them as plain text \
                 or they will fail to parse."
            }
            ProtocolKey::FunctionCallWrapping => {
                "FUNCTION CALL WRAPPING\n\
                 Every tool call must be wrapped in <fc> and </fc> tags, e.g.\n\
                 <fc>\n{\"name\": \"web_search\", \"arguments\": {\"query\": \"...\"}}\n</fc>\n\
                 so the host can detect and stream it."
            }
            ProtocolKey::DeveloperInstructions => {
                "DEVELOPER INSTRUCTIONS TAKE PRECEDENCE\n\
                 Assistant instructions above define the persona and task. These protocols \
                 define the wire contract and always apply regardless of persona."
            }
        }
    }
}

/// Join the given protocol blocks, in order, separated by blank lines.
pub fn assemble_instructions(keys: &[ProtocolKey]) -> String {
    keys.iter().map(|k| k.text()).collect::<Vec<_>>().join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_in_requested_order() {
        let out = assemble_instructions(&[ProtocolKey::ToolDecision, ProtocolKey::ToolUsage]);
        let decision_pos = out.find("TOOL DECISION PROTOCOL").unwrap();
        let usage_pos = out.find("STRICT TOOL USAGE PROTOCOL").unwrap();
        assert!(decision_pos < usage_pos);
    }

    #[test]
    fn empty_keys_yields_empty_string() {
        assert_eq!(assemble_instructions(&[]), "");
    }

    #[test]
    fn wrapping_block_mentions_fc_tags() {
        let out = assemble_instructions(&[ProtocolKey::FunctionCallWrapping]);
        assert!(out.contains("<fc>"));
        assert!(out.contains("</fc>"));
    }
}
