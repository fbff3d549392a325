use crate::client::ConnectionDescriptor;
use crate::error::ToolError;
use crate::protocol::{
    CallToolResult, EVENT_STREAM, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    ListToolsParams, ListToolsResult, METHOD_CALL_TOOL, METHOD_INITIALIZE, METHOD_INITIALIZED,
    METHOD_LIST_TOOLS, PROTOCOL_VERSION, SESSION_HEADER, parse_event_stream,
};
use crate::traits::{ToolSource, ToolSpec};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_CATALOG_PAGES: usize = 256;

#[derive(Debug, thiserror::Error)]
enum RpcFailure {
    #[error("{0}")]
    Network(String),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("HTTP {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("rpc error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),
}

/// A long-lived session with one remote tool endpoint.
pub struct ToolConnection {
    descriptor: ConnectionDescriptor,
    client: reqwest::Client,
    url: Url,
    session_id: Option<String>,
    next_id: AtomicU64,
    catalog: RwLock<Vec<ToolSpec>>,
}

impl std::fmt::Debug for ToolConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolConnection")
            .field("name", &self.descriptor.name)
            .field("url", &self.url.as_str())
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl ToolConnection {
    /// Opens a session and caches the remote catalog.
    pub async fn connect(descriptor: ConnectionDescriptor) -> Result<Self, ToolError> {
        let connection_error = |message: String| ToolError::Connection {
            server: descriptor.name.clone(),
            message,
        };

        let url = Url::parse(&descriptor.url)
            .map_err(|e| connection_error(format!("invalid url '{}': {e}", descriptor.url)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &descriptor.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| connection_error(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| connection_error(format!("invalid value for header '{name}': {e}")))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(descriptor.timeout())
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| connection_error(e.to_string()))?;

        let mut connection = Self {
            descriptor: descriptor.clone(),
            client,
            url,
            session_id: None,
            next_id: AtomicU64::new(1),
            catalog: RwLock::new(Vec::new()),
        };

        let init_params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "toolmesh",
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        let (result, response_headers) = connection
            .request(METHOD_INITIALIZE, init_params)
            .await
            .map_err(|e| connection_error(e.to_string()))?;

        connection.session_id = response_headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        connection
            .notify(METHOD_INITIALIZED)
            .await
            .map_err(|e| connection_error(e.to_string()))?;

        let catalog = connection
            .fetch_catalog()
            .await
            .map_err(|e| connection_error(e.to_string()))?;

        info!(
            source = %descriptor.name,
            server = result["serverInfo"]["name"].as_str().unwrap_or("unknown"),
            tools = catalog.len(),
            "Connected to tool source"
        );

        connection.store_catalog(catalog);
        Ok(connection)
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// The catalog as of the last handshake or refresh.
    pub fn catalog(&self) -> Vec<ToolSpec> {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-fetches the remote catalog and replaces the cached snapshot.
    pub async fn refresh(&self) -> Result<Vec<ToolSpec>, ToolError> {
        let catalog = self
            .fetch_catalog()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.store_catalog(catalog.clone());
        Ok(catalog)
    }

    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        debug!(source = %self.descriptor.name, tool = %name, "Calling remote tool");
        let params = json!({ "name": name, "arguments": arguments });

        match self.request(METHOD_CALL_TOOL, params).await {
            Ok((value, _)) => {
                let result: CallToolResult = serde_json::from_value(value).map_err(|e| {
                    self.transport_error(RpcFailure::Protocol(format!(
                        "malformed tools/call result: {e}"
                    )))
                })?;
                if result.is_error {
                    Err(ToolError::ToolExecution {
                        tool: name.to_string(),
                        message: result.text(),
                    })
                } else {
                    Ok(result.into_value())
                }
            }
            Err(RpcFailure::Rpc(error)) => Err(error.into_tool_error(&self.descriptor.name, name)),
            Err(RpcFailure::Timeout(after)) => Err(ToolError::Timeout {
                tool: name.to_string(),
                after,
            }),
            Err(other) => Err(self.transport_error(other)),
        }
    }

    /// Ends the remote session. Servers that do not track sessions may
    /// answer 404 or 405, which is not an error.
    pub async fn close(&self) -> Result<(), ToolError> {
        let Some(session_id) = &self.session_id else {
            return Ok(());
        };

        let response = self
            .client
            .delete(self.url.clone())
            .header(SESSION_HEADER, session_id)
            .send()
            .await
            .map_err(|e| self.transport_error(RpcFailure::Network(e.to_string())))?;

        let status = response.status();
        if status.is_success()
            || status == reqwest::StatusCode::NOT_FOUND
            || status == reqwest::StatusCode::METHOD_NOT_ALLOWED
        {
            debug!(source = %self.descriptor.name, "Session closed");
            Ok(())
        } else {
            Err(self.transport_error(RpcFailure::Status {
                status,
                body: String::new(),
            }))
        }
    }

    fn transport_error(&self, failure: RpcFailure) -> ToolError {
        ToolError::Transport {
            server: self.descriptor.name.clone(),
            message: failure.to_string(),
        }
    }

    fn store_catalog(&self, catalog: Vec<ToolSpec>) {
        *self
            .catalog
            .write()
            .unwrap_or_else(PoisonError::into_inner) = catalog;
    }

    async fn fetch_catalog(&self) -> Result<Vec<ToolSpec>, RpcFailure> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen_cursors = HashSet::new();

        for _ in 0..MAX_CATALOG_PAGES {
            let params = serde_json::to_value(ListToolsParams {
                cursor: cursor.take(),
            })
            .map_err(|e| RpcFailure::Protocol(e.to_string()))?;
            let (result, _) = self.request(METHOD_LIST_TOOLS, params).await?;
            let page: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| RpcFailure::Protocol(format!("malformed tools/list result: {e}")))?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !seen_cursors.insert(next.clone()) => {
                    return Err(RpcFailure::Protocol(format!(
                        "tools/list repeated cursor '{next}'"
                    )));
                }
                Some(next) => cursor = Some(next),
                None => return Ok(tools),
            }
        }

        Err(RpcFailure::Protocol(format!(
            "tools/list did not finish within {MAX_CATALOG_PAGES} pages"
        )))
    }

    async fn post(&self, message: &JsonRpcRequest) -> Result<reqwest::Response, RpcFailure> {
        let mut request = self
            .client
            .post(self.url.clone())
            .header(ACCEPT, self.descriptor.transport.accept_header())
            .json(message);
        if let Some(session_id) = &self.session_id {
            request = request.header(SESSION_HEADER, session_id);
        }

        let response = request.send().await.map_err(|e| self.network_failure(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RpcFailure::Status { status, body });
        }

        Ok(response)
    }

    fn network_failure(&self, error: reqwest::Error) -> RpcFailure {
        if error.is_timeout() {
            RpcFailure::Timeout(self.descriptor.timeout())
        } else {
            RpcFailure::Network(error.to_string())
        }
    }

    async fn notify(&self, method: &str) -> Result<(), RpcFailure> {
        self.post(&JsonRpcRequest::notification(method)).await?;
        Ok(())
    }

    async fn request(&self, method: &str, params: Value) -> Result<(Value, HeaderMap), RpcFailure> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self.post(&JsonRpcRequest::new(id, method, params)).await?;
        let headers = response.headers().clone();
        let message = read_response(response, id).await.map_err(|e| match e {
            ReadFailure::Body(error) => self.network_failure(error),
            ReadFailure::Rpc(failure) => failure,
        })?;

        match message.error {
            Some(error) => Err(RpcFailure::Rpc(error)),
            None => Ok((message.result.unwrap_or(Value::Null), headers)),
        }
    }
}

enum ReadFailure {
    Body(reqwest::Error),
    Rpc(RpcFailure),
}

async fn read_response(
    response: reqwest::Response,
    id: u64,
) -> Result<JsonRpcResponse, ReadFailure> {
    let is_event_stream = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with(EVENT_STREAM));

    let body = response.text().await.map_err(ReadFailure::Body)?;
    let protocol = |message: String| ReadFailure::Rpc(RpcFailure::Protocol(message));

    if !is_event_stream {
        let message: JsonRpcResponse = serde_json::from_str(&body)
            .map_err(|e| protocol(format!("invalid JSON-RPC response: {e}")))?;
        if message.id != Value::from(id) {
            return Err(protocol(format!(
                "response id {} does not match request {id}",
                message.id
            )));
        }
        return Ok(message);
    }

    parse_event_stream(&body)
        .iter()
        .filter_map(|payload| serde_json::from_str::<JsonRpcResponse>(payload).ok())
        .find(|message| message.id == Value::from(id))
        .ok_or_else(|| protocol(format!("no response to request {id} in event stream")))
}

#[async_trait]
impl ToolSource for ToolConnection {
    async fn get_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
        self.refresh().await
    }

    async fn invoke(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        ToolConnection::invoke(self, name, arguments).await
    }
}
