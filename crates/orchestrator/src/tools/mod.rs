pub mod consumer;
pub mod platform;
pub mod router;

pub use router::{RoutedCall, ToolRouter};
