use crate::error::ToolError;
use crate::traits::ChatMessage;
use serde_json::Value;
use std::time::Duration;

/// Ordered message history of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>, user_message: impl Into<String>) -> Self {
        Self {
            messages: vec![
                ChatMessage::system(system_prompt),
                ChatMessage::user(user_message),
            ],
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Tool-result messages, in the order they were appended.
    pub fn tool_results(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter().filter(|m| m.is_tool_result())
    }
}

/// One tool call made during a run and how it ended.
#[derive(Debug)]
pub struct ToolInvocationRecord {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub outcome: Result<Value, ToolError>,
    pub duration: Duration,
}

impl ToolInvocationRecord {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Content of the tool-result message fed back to the model.
    pub fn message_content(&self) -> String {
        match &self.outcome {
            Ok(Value::String(text)) => text.clone(),
            Ok(value) => value.to_string(),
            Err(error) => error.to_json().to_string(),
        }
    }

    pub fn to_message(&self) -> ChatMessage {
        ChatMessage::tool_result(self.call_id.clone(), self.message_content())
    }
}
