pub mod agent;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod providers;
pub mod server;
pub mod tools;
pub mod traits;

pub use agent::{AgentLoop, AgentRun, ContextBuilder, Conversation, LoopState, ToolInvocationRecord};
pub use auth::{Credential, acquire_credential};
pub use client::*;
pub use config::*;
pub use error::{AgentError, ToolError};
pub use providers::*;
pub use server::{EndpointConfig, ToolRegistry};
pub use tools::*;
pub use traits::*;
