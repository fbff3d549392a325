use std::time::Duration;

/// Errors raised while registering, discovering or invoking tools.
///
/// The per-call kinds (`UnknownTool`, `InvalidArguments`, `ToolExecution`,
/// `Timeout`) are recoverable: the agent loop turns them into tool-result
/// messages. The connectivity kinds abort a run.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),

    #[error("invalid schema for tool '{tool}': {reason}")]
    InvalidSchema { tool: String, reason: String },

    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("invalid arguments for tool '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("tool '{tool}' timed out after {}s", .after.as_secs())]
    Timeout { tool: String, after: Duration },

    #[error("failed to connect to tool source '{server}': {message}")]
    Connection { server: String, message: String },

    #[error("transport failure talking to tool source '{server}': {message}")]
    Transport { server: String, message: String },

    #[error("tool source '{server}' could not be aggregated: {message}")]
    Aggregation { server: String, message: String },
}

impl ToolError {
    /// Wire name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateTool(_) => "duplicate_tool",
            Self::InvalidSchema { .. } => "invalid_schema",
            Self::UnknownTool(_) => "unknown_tool",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::ToolExecution { .. } => "tool_execution",
            Self::Timeout { .. } => "timeout",
            Self::Connection { .. } => "connection",
            Self::Transport { .. } => "transport",
            Self::Aggregation { .. } => "aggregation",
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnknownTool(_)
                | Self::InvalidArguments { .. }
                | Self::ToolExecution { .. }
                | Self::Timeout { .. }
        )
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
            }
        })
    }
}

/// Errors that end a reasoning loop run.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("model backend error: {0}")]
    Model(#[from] anyhow::Error),

    #[error("model backend did not respond within {}s", .0.as_secs())]
    ModelTimeout(Duration),

    #[error("no final answer after {0} model turns")]
    MaxTurnsExceeded(usize),
}

impl AgentError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tool(e) => e.kind(),
            Self::Model(_) => "model",
            Self::ModelTimeout(_) => "model_timeout",
            Self::MaxTurnsExceeded(_) => "max_turns_exceeded",
        }
    }
}
