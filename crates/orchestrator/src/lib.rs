//! Inference orchestration core: the provider-agnostic conversation loop
//! shared across every assistant surface.
//!
//! Modules mirror the distilled component boundaries: [`persistence`] is
//! the narrow external store boundary; [`tools`] classifies and dispatches
//! tool calls (platform built-ins inline, consumer tools via manifest);
//! [`turn`] drives one conversation to completion or a consumer handoff;
//! [`cancel`] tracks and propagates cancellation; [`delegate`] recurses
//! into a child turn for `delegate_research_task`.

pub mod cancel;
pub mod delegate;
pub mod persistence;
pub mod tools;
pub mod turn;

pub use cancel::{CancelMap, CancelToken, CancellationMonitor};
pub use delegate::{delegate as delegate_research_task, DelegationRequest};
pub use persistence::Persistence;
pub use tools::{RoutedCall, ToolRouter};
pub use turn::{process_conversation, process_conversation_with_monitor, TurnDeps, TurnInput, TurnOutcome};
