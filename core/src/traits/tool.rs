use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Catalog entry for one tool, as listed by a registry and seen by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
    #[serde(
        rename = "outputSchema",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub output_schema: Option<serde_json::Value>,
}

/// A server-side tool handler.
///
/// Handlers receive arguments that already passed the input schema check and
/// must return a JSON value matching `output_schema` when one is declared.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn input_schema(&self) -> serde_json::Value;

    fn output_schema(&self) -> Option<serde_json::Value> {
        None
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
            output_schema: self.output_schema(),
        }
    }
}
