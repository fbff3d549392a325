#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use toolmesh_core::server::{self, EndpointConfig};
use toolmesh_core::{
    ChatMessage, ChatRequest, LookupPartTool, ModelAction, Provider, Tool, ToolCall, ToolRegistry,
};

pub struct TestServer {
    pub url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.handle.await;
    }
}

pub async fn spawn_server(registry: ToolRegistry, config: EndpointConfig) -> TestServer {
    spawn_router(server::router(Arc::new(registry), config)).await
}

/// Serves an arbitrary router, for endpoints that misbehave on purpose.
pub async fn spawn_router(router: Router) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        server::serve(listener, router, async {
            let _ = rx.await;
        })
        .await
        .unwrap();
    });

    TestServer {
        url: format!("http://{addr}{}", server::MCP_PATH),
        shutdown: Some(tx),
        handle,
    }
}

pub fn parts_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(LookupPartTool).unwrap();
    registry
}

pub async fn spawn_parts_server() -> TestServer {
    spawn_server(parts_registry(), EndpointConfig::default()).await
}

/// A URL nothing is listening on.
pub async fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}{}", server::MCP_PATH)
}

pub struct StockLevelTool;

#[async_trait]
impl Tool for StockLevelTool {
    fn name(&self) -> &str {
        "stock_level"
    }

    fn description(&self) -> &str {
        "Units on hand for a SKU."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "sku": { "type": "string" } },
            "required": ["sku"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        Ok(json!({ "sku": args["sku"], "on_hand": 7 }))
    }
}

/// Answers only after `delay`.
pub struct SlowTool {
    pub delay: Duration,
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "rebuild_index"
    }

    fn description(&self) -> &str {
        "Rebuilds the parts search index."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn execute(&self, _args: Value) -> anyhow::Result<Value> {
        tokio::time::sleep(self.delay).await;
        Ok(json!({ "rebuilt": true }))
    }
}

pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "reserve_part"
    }

    fn description(&self) -> &str {
        "Reserves stock for a SKU."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "sku": { "type": "string" } },
            "required": ["sku"]
        })
    }

    async fn execute(&self, _args: Value) -> anyhow::Result<Value> {
        anyhow::bail!("warehouse offline")
    }
}

/// Replays canned model actions and remembers every request it saw.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<ModelAction>>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<ModelAction>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn respond(&self, request: ChatRequest<'_>) -> anyhow::Result<ModelAction> {
        self.seen.lock().unwrap().push(request.messages.to_vec());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("script exhausted"))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn tool_call(id: &str, name: &str, arguments: Value) -> ModelAction {
    ModelAction::ToolCalls {
        text: String::new(),
        calls: vec![ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }],
    }
}
