//! JSON-RPC messages exchanged between a tool endpoint and its clients.
//!
//! The framing follows the Model Context Protocol's streamable HTTP
//! transport: every message is a `POST` to a single endpoint, the server
//! hands out a session id on `initialize`, and responses come back either as
//! `application/json` or as `text/event-stream` events.

use crate::error::ToolError;
use crate::traits::ToolSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2025-03-26";
pub const SESSION_HEADER: &str = "mcp-session-id";
pub const EVENT_STREAM: &str = "text/event-stream";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_PING: &str = "ping";
pub const METHOD_LIST_TOOLS: &str = "tools/list";
pub const METHOD_CALL_TOOL: &str = "tools/call";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(Value::from(id)),
            method: method.to_string(),
            params: Some(params),
        }
    }

    pub fn notification(method: &str) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.to_string(),
            params: None,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Encodes a per-call tool error, keeping its kind in `data` so the
    /// client can rebuild the same variant.
    pub fn from_tool_error(error: &ToolError) -> Self {
        let code = match error {
            ToolError::UnknownTool(_) | ToolError::InvalidArguments { .. } => INVALID_PARAMS,
            _ => INTERNAL_ERROR,
        };
        let mut data = serde_json::json!({ "kind": error.kind() });
        match error {
            ToolError::UnknownTool(tool) => data["tool"] = Value::from(tool.as_str()),
            ToolError::InvalidArguments { tool, reason } => {
                data["tool"] = Value::from(tool.as_str());
                data["reason"] = Value::from(reason.as_str());
            }
            _ => {}
        }
        Self {
            code,
            message: error.to_string(),
            data: Some(data),
        }
    }

    /// Inverse of [`JsonRpcError::from_tool_error`]. Errors without a known
    /// kind are reported as transport failures of `server`.
    pub fn into_tool_error(self, server: &str, tool: &str) -> ToolError {
        let data = self.data.unwrap_or(Value::Null);
        let field = |key: &str| data.get(key).and_then(Value::as_str).map(str::to_string);
        match data.get("kind").and_then(Value::as_str) {
            Some("unknown_tool") => {
                ToolError::UnknownTool(field("tool").unwrap_or_else(|| tool.to_string()))
            }
            Some("invalid_arguments") => ToolError::InvalidArguments {
                tool: field("tool").unwrap_or_else(|| tool.to_string()),
                reason: field("reason").unwrap_or(self.message),
            },
            Some("tool_execution") => ToolError::ToolExecution {
                tool: tool.to_string(),
                message: self.message,
            },
            _ => ToolError::Transport {
                server: server.to_string(),
                message: format!("rpc error {}: {}", self.code, self.message),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListToolsParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<ToolSpec>,
    #[serde(rename = "nextCursor", default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text { text: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<Content>,
    #[serde(rename = "structuredContent", default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl CallToolResult {
    pub fn success(value: Value) -> Self {
        Self {
            content: vec![Content::Text {
                text: value.to_string(),
            }],
            structured_content: Some(value),
            is_error: false,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            content: vec![Content::Text {
                text: message.into(),
            }],
            structured_content: None,
            is_error: true,
        }
    }

    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                Content::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The JSON result of a successful call. Falls back to parsing the text
    /// content when the server sent no structured payload.
    pub fn into_value(self) -> Value {
        if let Some(value) = self.structured_content {
            return value;
        }
        let text = self.text();
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    }
}

/// Splits a `text/event-stream` body into the data payloads of its events.
/// Multi-line `data:` fields are joined with `\n`; comments and other fields
/// are ignored.
pub fn parse_event_stream(body: &str) -> Vec<String> {
    let mut events = Vec::new();
    let mut data: Vec<&str> = Vec::new();

    for line in body.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            if !data.is_empty() {
                events.push(data.join("\n"));
                data.clear();
            }
            continue;
        }
        if let Some(value) = line.strip_prefix("data:") {
            data.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }

    if !data.is_empty() {
        events.push(data.join("\n"));
    }

    events
}
