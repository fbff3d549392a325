pub mod provider;
pub mod source;
pub mod tool;

pub use provider::{ChatMessage, ChatRequest, ModelAction, Provider, ToolCall};
pub use source::ToolSource;
pub use tool::{Tool, ToolSpec};
