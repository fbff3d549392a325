use crate::error::ToolError;
use crate::protocol::{
    CallToolParams, CallToolResult, EVENT_STREAM, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION,
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ListToolsResult, METHOD_CALL_TOOL,
    METHOD_INITIALIZE, METHOD_LIST_TOOLS, METHOD_NOT_FOUND, METHOD_PING, PARSE_ERROR,
    PROTOCOL_VERSION, SESSION_HEADER,
};
use crate::server::ToolRegistry;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, Sse},
    },
    routing::{get, post},
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

pub const MCP_PATH: &str = "/mcp";

const DEFAULT_SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Server name reported to clients on `initialize`.
    pub name: String,
    pub version: String,
    pub api_key_header: String,
    /// When set, every request must carry this value in `api_key_header`.
    pub api_key: Option<String>,
    /// Sessions with no traffic for this long are dropped on the next
    /// `initialize`.
    pub session_idle_timeout: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            name: "revparts".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            api_key_header: "x-api-key".to_string(),
            api_key: None,
            session_idle_timeout: DEFAULT_SESSION_IDLE_TIMEOUT,
        }
    }
}

#[derive(Clone)]
struct EndpointState {
    registry: Arc<ToolRegistry>,
    config: Arc<EndpointConfig>,
    /// Session id to time of last request.
    sessions: Arc<RwLock<HashMap<String, Instant>>>,
}

impl EndpointState {
    #[allow(clippy::result_large_err)]
    fn authorize(&self, headers: &HeaderMap) -> Result<(), Response> {
        let Some(expected) = &self.config.api_key else {
            return Ok(());
        };

        let provided = headers
            .get(self.config.api_key_header.as_str())
            .and_then(|v| v.to_str().ok());

        if provided == Some(expected.as_str()) {
            Ok(())
        } else {
            warn!(header = %self.config.api_key_header, "Rejected request with missing or invalid API key");
            Err((StatusCode::UNAUTHORIZED, "invalid or missing API key").into_response())
        }
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": {
                "name": self.config.name,
                "version": self.config.version,
            }
        })
    }
}

/// Builds the HTTP router exposing `registry` at [`MCP_PATH`].
pub fn router(registry: Arc<ToolRegistry>, config: EndpointConfig) -> Router {
    let state = EndpointState {
        registry,
        config: Arc::new(config),
        sessions: Arc::new(RwLock::new(HashMap::new())),
    };

    Router::new()
        .route(MCP_PATH, post(handle_post).delete(handle_delete))
        .route("/health", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves `router` on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, path = MCP_PATH, "Tool endpoint listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn handle_post(
    State(state): State<EndpointState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(rejection) = state.authorize(&headers) {
        return rejection;
    }

    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            let error = JsonRpcError::new(PARSE_ERROR, format!("invalid JSON-RPC message: {e}"));
            return reply(&headers, JsonRpcResponse::failure(Value::Null, error), None);
        }
    };

    if request.jsonrpc != JSONRPC_VERSION {
        let error = JsonRpcError::new(INVALID_REQUEST, "jsonrpc must be \"2.0\"");
        let id = request.id.unwrap_or(Value::Null);
        return reply(&headers, JsonRpcResponse::failure(id, error), None);
    }

    if request.method == METHOD_INITIALIZE {
        let session_id = uuid::Uuid::new_v4().to_string();
        {
            let mut sessions = state.sessions.write().await;
            let idle = state.config.session_idle_timeout;
            let before = sessions.len();
            sessions.retain(|_, last_seen| last_seen.elapsed() < idle);
            if sessions.len() < before {
                debug!(expired = before - sessions.len(), "Dropped idle sessions");
            }
            sessions.insert(session_id.clone(), Instant::now());
        }
        info!(session = %session_id, "Client session opened");

        let id = request.id.unwrap_or(Value::Null);
        let response = JsonRpcResponse::success(id, state.initialize_result());
        return reply(&headers, response, Some(&session_id));
    }

    let Some(session_id) = session_header(&headers) else {
        return (StatusCode::BAD_REQUEST, "missing mcp-session-id header").into_response();
    };
    match state.sessions.write().await.get_mut(session_id) {
        Some(last_seen) => *last_seen = Instant::now(),
        None => return (StatusCode::NOT_FOUND, "unknown session").into_response(),
    }

    let Some(id) = request.id else {
        debug!(method = %request.method, "Notification received");
        return StatusCode::ACCEPTED.into_response();
    };

    let response = match dispatch(&state.registry, &request.method, request.params).await {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(error) => JsonRpcResponse::failure(id, error),
    };
    reply(&headers, response, None)
}

async fn handle_delete(State(state): State<EndpointState>, headers: HeaderMap) -> Response {
    if let Err(rejection) = state.authorize(&headers) {
        return rejection;
    }

    let Some(session_id) = session_header(&headers) else {
        return (StatusCode::BAD_REQUEST, "missing mcp-session-id header").into_response();
    };

    if state.sessions.write().await.remove(session_id).is_some() {
        info!(session = %session_id, "Client session closed");
        StatusCode::OK.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn dispatch(
    registry: &ToolRegistry,
    method: &str,
    params: Option<Value>,
) -> Result<Value, JsonRpcError> {
    match method {
        METHOD_PING => Ok(json!({})),
        METHOD_LIST_TOOLS => {
            let result = ListToolsResult {
                tools: registry.list_tools(),
                next_cursor: None,
            };
            to_value(&result)
        }
        METHOD_CALL_TOOL => {
            let params: CallToolParams = serde_json::from_value(params.unwrap_or(Value::Null))
                .map_err(|e| {
                    JsonRpcError::new(INVALID_PARAMS, format!("invalid tools/call params: {e}"))
                })?;
            let arguments = match params.arguments {
                Value::Null => json!({}),
                other => other,
            };

            debug!(tool = %params.name, "Invoking tool");
            let result = match registry.invoke(&params.name, arguments).await {
                Ok(value) => CallToolResult::success(value),
                Err(ToolError::ToolExecution { message, .. }) => CallToolResult::failure(message),
                Err(other) => return Err(JsonRpcError::from_tool_error(&other)),
            };
            to_value(&result)
        }
        other => Err(JsonRpcError::new(
            METHOD_NOT_FOUND,
            format!("method '{other}' not found"),
        )),
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value)
        .map_err(|e| JsonRpcError::new(crate::protocol::INTERNAL_ERROR, e.to_string()))
}

fn session_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok())
}

/// Clients that accept only event streams get the response as a single SSE
/// event; everyone else gets plain JSON.
fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains(EVENT_STREAM) && !accept.contains("application/json"))
}

fn reply(headers: &HeaderMap, response: JsonRpcResponse, session: Option<&str>) -> Response {
    let mut http_response = if wants_event_stream(headers) {
        match serde_json::to_string(&response) {
            Ok(payload) => {
                let event = Event::default().event("message").data(payload);
                Sse::new(futures_util::stream::once(async move {
                    Ok::<_, Infallible>(event)
                }))
                .into_response()
            }
            Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        }
    } else {
        Json(response).into_response()
    };

    if let Some(session) = session
        && let Ok(value) = HeaderValue::from_str(session)
    {
        http_response.headers_mut().insert(SESSION_HEADER, value);
    }

    http_response
}
