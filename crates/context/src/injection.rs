//! Section formatting for the assembled system message. Each helper
//! renders one `###`-headed block; `builder::build_system_message` joins
//! them in the fixed order the distilled spec requires.

/// Format the assistant-instructions section.
pub fn format_instructions(instructions: &str) -> String {
    format!("### ASSISTANT INSTRUCTIONS\n{instructions}")
}

/// Format the operational-protocols section.
pub fn format_protocols(protocols: &str) -> String {
    format!("### OPERATIONAL PROTOCOLS\n{protocols}")
}

/// Format the inline tool-list section as a `tools:` JSON block.
pub fn format_tools(tools_json: &str) -> String {
    format!("### AVAILABLE TOOLS\ntools:\n{tools_json}")
}

/// Format the leading timestamp line.
pub fn format_timestamp(timestamp: &str) -> String {
    format!("Today's date and time: {timestamp}")
}
