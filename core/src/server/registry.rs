use crate::error::ToolError;
use crate::server::schema;
use crate::traits::{Tool, ToolSource, ToolSpec};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

struct Entry {
    spec: ToolSpec,
    handler: Arc<dyn Tool>,
}

/// The set of tools hosted by one server process.
///
/// Registration takes `&mut self`; once the registry is shared behind an
/// `Arc` it is read-only, so concurrent invocations only ever see their own
/// arguments.
#[derive(Default)]
pub struct ToolRegistry {
    entries: Vec<Entry>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field(
                "tools",
                &self.entries.iter().map(|e| &e.spec.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), ToolError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let spec = tool.spec();

        if self.entries.iter().any(|e| e.spec.name == spec.name) {
            return Err(ToolError::DuplicateTool(spec.name));
        }

        schema::check_object_schema(&spec.input_schema).map_err(|reason| {
            ToolError::InvalidSchema {
                tool: spec.name.clone(),
                reason: format!("input: {reason}"),
            }
        })?;
        if let Some(output) = &spec.output_schema {
            schema::check_object_schema(output).map_err(|reason| ToolError::InvalidSchema {
                tool: spec.name.clone(),
                reason: format!("output: {reason}"),
            })?;
        }

        debug!(tool = %spec.name, "Tool registered");
        self.entries.push(Entry {
            spec,
            handler: tool,
        });
        Ok(())
    }

    pub fn list_tools(&self) -> Vec<ToolSpec> {
        self.entries.iter().map(|e| e.spec.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.spec.name == name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        schema::validate(&entry.spec.input_schema, &arguments).map_err(|reason| {
            ToolError::InvalidArguments {
                tool: name.to_string(),
                reason,
            }
        })?;

        let output = entry
            .handler
            .execute(arguments)
            .await
            .map_err(|e| {
                warn!(tool = %name, error = %e, "Tool handler failed");
                ToolError::ToolExecution {
                    tool: name.to_string(),
                    message: e.to_string(),
                }
            })?;

        if let Some(output_schema) = &entry.spec.output_schema {
            schema::validate(output_schema, &output).map_err(|reason| ToolError::ToolExecution {
                tool: name.to_string(),
                message: format!("result does not match output schema: {reason}"),
            })?;
        }

        Ok(output)
    }
}

#[async_trait]
impl ToolSource for ToolRegistry {
    async fn get_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
        Ok(self.list_tools())
    }

    async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        ToolRegistry::invoke(self, name, arguments).await
    }
}
