pub mod builder;
pub mod injection;
pub mod protocols;
pub mod report;
pub mod truncate;
pub mod truncation;

pub use builder::{
    build_system_message, merge_tool_list, normalize_roles, prepend_system_message,
    AssistantProfile, ContextOptions, RawMessage, SystemMessage,
};
pub use report::ContextReport;
pub use truncate::Truncator;
