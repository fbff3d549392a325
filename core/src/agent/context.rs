use crate::traits::ToolSpec;
use std::fmt::Write;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Use the available tools \
whenever they can answer part of the question, then reply with a concise final answer.";

/// Assembles the system prompt that seeds every run.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    pub system_prompt: String,
    pub tool_specs: Vec<ToolSpec>,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            tool_specs: vec![],
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_tool_specs(mut self, tool_specs: Vec<ToolSpec>) -> Self {
        self.tool_specs = tool_specs;
        self
    }

    pub fn build_system_prompt(&self) -> String {
        let mut parts = vec![self.system_prompt.trim().to_string()];

        if let Some(tools) = self.get_tool_overview() {
            parts.push(tools);
        }

        parts.push(self.get_runtime_context());

        parts.join("\n\n---\n\n")
    }

    fn get_tool_overview(&self) -> Option<String> {
        if self.tool_specs.is_empty() {
            return None;
        }

        let mut overview = String::from("## Available Tools\n\n");
        for tool in &self.tool_specs {
            let _ = writeln!(overview, "- **{}**: {}", tool.name, tool.description);
        }
        overview.push_str(
            "\nTools are called through the function-calling interface. \
             A tool result of the form {\"error\": {...}} means the call failed; \
             correct the arguments or explain the failure.",
        );

        Some(overview)
    }

    fn get_runtime_context(&self) -> String {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M (%A)");
        format!("## Runtime Context\n\n### Current Time\n{}", timestamp)
    }
}
