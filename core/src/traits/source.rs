use crate::error::ToolError;
use crate::traits::ToolSpec;
use async_trait::async_trait;

/// Anything the reasoning loop can discover and invoke tools through.
#[async_trait]
pub trait ToolSource: Send + Sync {
    async fn get_tools(&self) -> Result<Vec<ToolSpec>, ToolError>;

    async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError>;
}
