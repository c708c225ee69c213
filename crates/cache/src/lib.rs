pub mod fanout;
pub mod history;

pub use fanout::StreamFanOut;
pub use history::{ColdLoader, MessageCache};
