mod common;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use common::{
    SlowTool, StockLevelTool, dead_url, parts_registry, spawn_parts_server, spawn_router,
    spawn_server,
};
use futures_util::future::join_all;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use toolmesh_core::server::{self, EndpointConfig};
use toolmesh_core::{
    AggregatorPolicy, ConnectionDescriptor, LookupPartTool, NameConflictPolicy,
    SourceFailurePolicy, ToolAggregator, ToolConnection, ToolError, ToolRegistry, TransportKind,
};

/// Builds the `tools/list` reply for the n-th listing request.
type ListReply = fn(usize, Value) -> Response;

/// A hand-written endpoint that completes the handshake normally and lets
/// each test decide how `tools/list` is answered.
#[derive(Clone)]
struct ScriptedEndpoint {
    list_reply: ListReply,
    list_calls: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl ScriptedEndpoint {
    fn new(list_reply: ListReply) -> Self {
        Self {
            list_reply,
            list_calls: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn router(&self) -> Router {
        Router::new()
            .route(server::MCP_PATH, post(scripted_post).delete(scripted_delete))
            .with_state(self.clone())
    }
}

fn rpc_result(id: Value, result: Value) -> Response {
    Json(json!({ "jsonrpc": "2.0", "id": id, "result": result })).into_response()
}

async fn scripted_post(
    State(endpoint): State<ScriptedEndpoint>,
    Json(request): Json<Value>,
) -> Response {
    let id = request["id"].clone();
    match request["method"].as_str() {
        Some("initialize") => (
            [("mcp-session-id", "scripted-session")],
            rpc_result(id, json!({ "serverInfo": { "name": "scripted" } })),
        )
            .into_response(),
        Some("tools/list") => {
            let call = endpoint.list_calls.fetch_add(1, Ordering::SeqCst);
            (endpoint.list_reply)(call, id)
        }
        _ if id.is_null() => StatusCode::ACCEPTED.into_response(),
        _ => rpc_result(id, json!({})),
    }
}

async fn scripted_delete(State(endpoint): State<ScriptedEndpoint>) -> StatusCode {
    endpoint.closed.store(true, Ordering::SeqCst);
    StatusCode::NO_CONTENT
}

fn cursor_forever(_call: usize, id: Value) -> Response {
    rpc_result(id, json!({ "tools": [], "nextCursor": "again" }))
}

fn wrong_id(_call: usize, _id: Value) -> Response {
    rpc_result(json!(999), json!({ "tools": [] }))
}

fn fails_after_first_listing(call: usize, id: Value) -> Response {
    if call == 0 {
        rpc_result(id, json!({ "tools": [] }))
    } else {
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}

#[tokio::test]
async fn connects_and_lists_remote_catalog() {
    let server = spawn_parts_server().await;

    let connection = ToolConnection::connect(ConnectionDescriptor::new("parts", &server.url))
        .await
        .unwrap();

    assert!(connection.session_id().is_some());
    let catalog = connection.catalog();
    assert_eq!(catalog.len(), 1);
    assert_eq!(catalog[0].name, "lookup_part");
    assert_eq!(catalog[0].input_schema["required"], json!(["sku"]));
    assert!(catalog[0].output_schema.is_some());

    connection.close().await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn invokes_remote_tool() {
    let server = spawn_parts_server().await;
    let connection = ToolConnection::connect(ConnectionDescriptor::new("parts", &server.url))
        .await
        .unwrap();

    let value = connection
        .invoke("lookup_part", json!({ "sku": "ABC123" }))
        .await
        .unwrap();
    assert_eq!(
        value,
        json!({ "sku": "ABC123", "name": "Demo Part ABC123", "price_usd": 42.0 })
    );

    let missing = connection.invoke("lookup_part", json!({})).await.unwrap_err();
    assert!(matches!(missing, ToolError::InvalidArguments { .. }), "{missing:?}");

    let unknown = connection.invoke("nope", json!({})).await.unwrap_err();
    assert!(matches!(unknown, ToolError::UnknownTool(_)), "{unknown:?}");

    server.stop().await;
}

#[tokio::test]
async fn event_stream_transport() {
    let server = spawn_parts_server().await;
    let descriptor =
        ConnectionDescriptor::new("parts", &server.url).with_transport(TransportKind::Sse);

    let connection = ToolConnection::connect(descriptor).await.unwrap();
    let value = connection
        .invoke("lookup_part", json!({ "sku": "SSE1" }))
        .await
        .unwrap();
    assert_eq!(value["name"], "Demo Part SSE1");

    server.stop().await;
}

#[tokio::test]
async fn api_key_is_enforced() {
    let config = EndpointConfig {
        api_key: Some("secret".to_string()),
        ..EndpointConfig::default()
    };
    let server = spawn_server(parts_registry(), config).await;

    let rejected = ToolConnection::connect(ConnectionDescriptor::new("parts", &server.url))
        .await
        .unwrap_err();
    assert!(matches!(rejected, ToolError::Connection { .. }), "{rejected:?}");

    let accepted = ToolConnection::connect(
        ConnectionDescriptor::new("parts", &server.url).with_header("x-api-key", "secret"),
    )
    .await
    .unwrap();
    assert_eq!(accepted.catalog().len(), 1);

    server.stop().await;
}

#[tokio::test]
async fn unreachable_source_is_a_connection_error() {
    let error = ToolConnection::connect(ConnectionDescriptor::new("gone", dead_url().await))
        .await
        .unwrap_err();
    assert!(matches!(error, ToolError::Connection { .. }), "{error:?}");
}

#[tokio::test]
async fn expired_session_is_a_transport_error() {
    let server = spawn_parts_server().await;
    let connection = ToolConnection::connect(ConnectionDescriptor::new("parts", &server.url))
        .await
        .unwrap();

    connection.close().await.unwrap();
    let error = connection
        .invoke("lookup_part", json!({ "sku": "ABC123" }))
        .await
        .unwrap_err();
    assert!(matches!(error, ToolError::Transport { .. }), "{error:?}");

    server.stop().await;
}

#[tokio::test]
async fn slow_remote_call_is_a_timeout() {
    let mut registry = ToolRegistry::new();
    registry
        .register(SlowTool {
            delay: Duration::from_secs(3),
        })
        .unwrap();
    registry.register(LookupPartTool).unwrap();
    let server = spawn_server(registry, EndpointConfig::default()).await;
    let descriptor =
        ConnectionDescriptor::new("parts", &server.url).with_timeout(Duration::from_secs(1));
    let connection = ToolConnection::connect(descriptor).await.unwrap();

    match connection.invoke("rebuild_index", json!({})).await.unwrap_err() {
        ToolError::Timeout { tool, after } => {
            assert_eq!(tool, "rebuild_index");
            assert_eq!(after, Duration::from_secs(1));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // The session survives a timed-out call.
    let value = connection
        .invoke("lookup_part", json!({ "sku": "ABC123" }))
        .await
        .unwrap();
    assert_eq!(value["sku"], "ABC123");

    server.stop().await;
}

#[tokio::test]
async fn repeated_cursor_stops_pagination() {
    let endpoint = ScriptedEndpoint::new(cursor_forever);
    let server = spawn_router(endpoint.router()).await;

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        ToolConnection::connect(ConnectionDescriptor::new("looping", &server.url)),
    )
    .await
    .expect("pagination did not terminate");

    match result.unwrap_err() {
        ToolError::Connection { server, message } => {
            assert_eq!(server, "looping");
            assert!(message.contains("repeated cursor"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(endpoint.list_calls.load(Ordering::SeqCst), 2);

    server.stop().await;
}

#[tokio::test]
async fn response_for_another_request_is_rejected() {
    let server = spawn_router(ScriptedEndpoint::new(wrong_id).router()).await;

    let error = ToolConnection::connect(ConnectionDescriptor::new("confused", &server.url))
        .await
        .unwrap_err();
    match error {
        ToolError::Connection { message, .. } => {
            assert!(message.contains("does not match request"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    server.stop().await;
}

#[tokio::test]
async fn failed_refresh_closes_the_stale_session() {
    let endpoint = ScriptedEndpoint::new(fails_after_first_listing);
    let server = spawn_router(endpoint.router()).await;
    let aggregator =
        ToolAggregator::new(vec![ConnectionDescriptor::new("flaky", &server.url)]);

    assert!(aggregator.get_tools().await.unwrap().is_empty());
    assert!(!endpoint.closed.load(Ordering::SeqCst));

    let error = aggregator.get_tools().await.unwrap_err();
    assert!(matches!(error, ToolError::Aggregation { .. }), "{error:?}");
    assert!(endpoint.closed.load(Ordering::SeqCst));

    server.stop().await;
}

#[tokio::test]
async fn disjoint_sources_keep_bare_names() {
    let parts = spawn_parts_server().await;
    let mut stock_registry = ToolRegistry::new();
    stock_registry.register(StockLevelTool).unwrap();
    let stock = spawn_server(stock_registry, EndpointConfig::default()).await;

    let aggregator = ToolAggregator::new(vec![
        ConnectionDescriptor::new("parts", &parts.url),
        ConnectionDescriptor::new("stock", &stock.url),
    ]);

    let names: Vec<String> = aggregator
        .get_tools()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, ["lookup_part", "stock_level"]);

    let on_hand = aggregator
        .invoke("stock_level", json!({ "sku": "ABC123" }))
        .await
        .unwrap();
    assert_eq!(on_hand["on_hand"], 7);

    aggregator.close().await;
    parts.stop().await;
    stock.stop().await;
}

#[tokio::test]
async fn colliding_sources_are_prefixed() {
    let east = spawn_parts_server().await;
    let west = spawn_parts_server().await;

    let aggregator = ToolAggregator::new(vec![
        ConnectionDescriptor::new("east", &east.url),
        ConnectionDescriptor::new("west", &west.url),
    ]);

    let table = aggregator.refresh_table().await.unwrap();
    let rows: Vec<(&str, &str)> = table
        .iter()
        .map(|r| (r.resolved_name.as_str(), r.source.as_str()))
        .collect();
    assert_eq!(
        rows,
        [("east__lookup_part", "east"), ("west__lookup_part", "west")]
    );

    let value = aggregator
        .invoke("west__lookup_part", json!({ "sku": "W1" }))
        .await
        .unwrap();
    assert_eq!(value["sku"], "W1");

    let bare = aggregator
        .invoke("lookup_part", json!({ "sku": "W1" }))
        .await
        .unwrap_err();
    assert!(matches!(bare, ToolError::UnknownTool(_)));

    aggregator.close().await;
    east.stop().await;
    west.stop().await;
}

#[tokio::test]
async fn reject_policy_fails_on_collision() {
    let east = spawn_parts_server().await;
    let west = spawn_parts_server().await;

    let aggregator = ToolAggregator::new(vec![
        ConnectionDescriptor::new("east", &east.url),
        ConnectionDescriptor::new("west", &west.url),
    ])
    .with_policy(AggregatorPolicy {
        on_name_conflict: NameConflictPolicy::Reject,
        ..AggregatorPolicy::default()
    });

    let error = aggregator.get_tools().await.unwrap_err();
    assert!(matches!(error, ToolError::Aggregation { .. }), "{error:?}");

    aggregator.close().await;
    east.stop().await;
    west.stop().await;
}

#[tokio::test]
async fn fail_fast_names_the_failing_source() {
    let parts = spawn_parts_server().await;
    let aggregator = ToolAggregator::new(vec![
        ConnectionDescriptor::new("parts", &parts.url),
        ConnectionDescriptor::new("offline", dead_url().await),
    ]);

    match aggregator.get_tools().await.unwrap_err() {
        ToolError::Aggregation { server, .. } => assert_eq!(server, "offline"),
        other => panic!("unexpected error: {other:?}"),
    }

    aggregator.close().await;
    parts.stop().await;
}

#[tokio::test]
async fn degrade_excludes_the_failing_source() {
    let parts = spawn_parts_server().await;
    let aggregator = ToolAggregator::new(vec![
        ConnectionDescriptor::new("offline", dead_url().await),
        ConnectionDescriptor::new("parts", &parts.url),
    ])
    .with_policy(AggregatorPolicy {
        on_source_failure: SourceFailurePolicy::Degrade,
        ..AggregatorPolicy::default()
    });

    let tools = aggregator.get_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "lookup_part");
    assert_eq!(aggregator.excluded_sources().await, ["offline"]);

    aggregator.close().await;
    parts.stop().await;
}

#[tokio::test]
async fn concurrent_invocations_share_one_session() {
    let server = spawn_parts_server().await;
    let aggregator = ToolAggregator::new(vec![ConnectionDescriptor::new("parts", &server.url)]);
    aggregator.get_tools().await.unwrap();

    let skus: Vec<String> = (0..16).map(|i| format!("SKU{i}")).collect();
    let results = join_all(
        skus.iter()
            .map(|sku| aggregator.invoke("lookup_part", json!({ "sku": sku }))),
    )
    .await;

    for (sku, result) in skus.iter().zip(results) {
        assert_eq!(result.unwrap()["sku"], sku.as_str());
    }

    aggregator.close().await;
    server.stop().await;
}
