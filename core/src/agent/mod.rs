pub mod context;
pub mod conversation;
pub mod loop_;

pub use context::ContextBuilder;
pub use conversation::{Conversation, ToolInvocationRecord};
pub use loop_::{AgentLoop, AgentRun, LoopState};
