//! End-to-end session lifecycle through the full gateway app

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use futures_util::StreamExt;
use lsp_mcp_gateway::{
    AllowOrigins, CorsPolicy, Gateway, GatewaySettings, ListenerStatus, NotificationSink,
    SESSION_ID_HEADER,
};
use lsp_mcp_protocol::McpServer;
use lsp_mcp_tool::{CallToolResult, ToolContext, ToolDef, ToolError, ToolHandler};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tower::ServiceExt;

struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new("echo", "Echo the text argument").with_input_schema(json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        }))
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> lsp_mcp_tool::Result<CallToolResult> {
        let text = args
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArgument("text is required".to_string()))?;
        ctx.notify(
            "notifications/message",
            json!({ "level": "info", "data": format!("echo: {}", text) }),
        );
        Ok(CallToolResult::text(text))
    }
}

fn register_echo(server: &McpServer) -> Result<(), ToolError> {
    server.register_tool(Arc::new(EchoTool))
}

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

impl NotificationSink for RecordingSink {
    fn info(&self, message: &str) {
        self.messages.lock().push(format!("info: {}", message));
    }

    fn warn(&self, message: &str) {
        self.messages.lock().push(format!("warn: {}", message));
    }

    fn error(&self, message: &str) {
        self.messages.lock().push(format!("error: {}", message));
    }
}

fn gateway_with(settings: GatewaySettings) -> (Gateway, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let gateway = Gateway::new(settings, Arc::new(register_echo), sink.clone());
    (gateway, sink)
}

fn initialize_body() -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "clientInfo": { "name": "lifecycle-test", "version": "1.0.0" }
        }
    })
}

fn post(body: Value, session_id: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT, "application/json");
    if let Some(id) = session_id {
        builder = builder.header(SESSION_ID_HEADER, id);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn bodiless(method: &str, session_id: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri("/mcp")
        .header(header::ACCEPT, "text/event-stream");
    if let Some(id) = session_id {
        builder = builder.header(SESSION_ID_HEADER, id);
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn json_of(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn text_of(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn initialize(app: &Router) -> String {
    let response = send(app, post(initialize_body(), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let session_id = response
        .headers()
        .get(SESSION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap();

    let initialized = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
    let response = send(app, post(initialized, Some(&session_id))).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    session_id
}

#[tokio::test]
async fn test_full_session_lifecycle() {
    let (gateway, _sink) = gateway_with(GatewaySettings::default());
    let app = gateway.router();

    let session_id = initialize(&app).await;
    assert!(gateway.registry().contains(&session_id));

    // tools/list and tools/call on the same session
    let list = json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" });
    let body = json_of(send(&app, post(list, Some(&session_id))).await).await;
    assert_eq!(body["result"]["tools"][0]["name"], "echo");

    // open the notification stream before calling the tool
    let stream = send(&app, bodiless("GET", Some(&session_id))).await;
    assert_eq!(stream.status(), StatusCode::OK);
    assert_eq!(
        stream.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );

    let call = json!({
        "jsonrpc": "2.0",
        "id": 3,
        "method": "tools/call",
        "params": { "name": "echo", "arguments": { "text": "hello" } }
    });
    let body = json_of(send(&app, post(call, Some(&session_id))).await).await;
    assert_eq!(body["id"], 3);
    assert_eq!(body["result"]["content"][0]["text"], "hello");

    let mut frames = stream.into_body().into_data_stream();
    let frame = tokio::time::timeout(Duration::from_secs(5), frames.next())
        .await
        .expect("notification frame")
        .unwrap()
        .unwrap();
    let frame = String::from_utf8(frame.to_vec()).unwrap();
    assert!(frame.contains("event: message"));
    assert!(frame.contains("notifications/message"));
    assert!(frame.contains("echo: hello"));

    // explicit termination
    let response = send(&app, bodiless("DELETE", Some(&session_id))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!gateway.registry().contains(&session_id));

    // the id is dead for every entry point
    let response = send(&app, bodiless("GET", Some(&session_id))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(text_of(response).await, "Invalid or missing session ID");

    let ping = json!({ "jsonrpc": "2.0", "id": 4, "method": "ping" });
    let response = send(&app, post(ping, Some(&session_id))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_of(response).await["error"]["code"], -32000);
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let (gateway, _sink) = gateway_with(GatewaySettings::default());
    let app = gateway.router();

    let first = initialize(&app).await;
    let second = initialize(&app).await;
    assert_ne!(first, second);
    assert_eq!(gateway.registry().len(), 2);

    send(&app, bodiless("DELETE", Some(&first))).await;

    let ping = json!({ "jsonrpc": "2.0", "id": 9, "method": "ping" });
    let response = send(&app, post(ping, Some(&second))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_of(response).await["id"], 9);
    assert_eq!(gateway.registry().ids(), vec![second]);
}

#[tokio::test]
async fn test_non_initialize_without_session() {
    let (gateway, _sink) = gateway_with(GatewaySettings::default());
    let app = gateway.router();

    let call = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/call",
        "params": { "name": "echo", "arguments": { "text": "hi" } }
    });
    let response = send(&app, post(call, None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_of(response).await;
    assert_eq!(body["jsonrpc"], "2.0");
    assert_eq!(body["error"]["code"], -32000);
    assert!(body["id"].is_null());
    assert!(gateway.registry().is_empty());
}

#[tokio::test]
async fn test_get_with_unknown_session() {
    let (gateway, _sink) = gateway_with(GatewaySettings::default());
    let response = send(&gateway.router(), bodiless("GET", Some("no-such-session"))).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(text_of(response).await, "Invalid or missing session ID");
}

#[tokio::test]
async fn test_cors_headers_on_every_response() {
    let settings = GatewaySettings {
        cors: CorsPolicy {
            allow_origins: AllowOrigins::List(vec!["https://a.test".to_string()]),
            ..CorsPolicy::default()
        },
        ..GatewaySettings::default()
    };
    let (gateway, _sink) = gateway_with(settings);
    let app = gateway.router();

    let mut request = post(initialize_body(), None);
    request
        .headers_mut()
        .insert(header::ORIGIN, "https://a.test".parse().unwrap());
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "https://a.test"
    );
    assert_eq!(
        response.headers().get(header::ACCESS_CONTROL_EXPOSE_HEADERS).unwrap(),
        SESSION_ID_HEADER
    );

    // rejected requests still carry the policy; a foreign origin gets no grant
    let mut request = bodiless("GET", None);
    request
        .headers_mut()
        .insert(header::ORIGIN, "https://b.test".parse().unwrap());
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .is_none());
    assert!(response
        .headers()
        .get(header::ACCESS_CONTROL_EXPOSE_HEADERS)
        .is_some());
}

#[tokio::test]
async fn test_preflight_never_reaches_router() {
    let (gateway, _sink) = gateway_with(GatewaySettings::default());

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/mcp")
        .header(header::ORIGIN, "https://a.test")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(
            header::ACCESS_CONTROL_REQUEST_HEADERS,
            "content-type,mcp-session-id",
        )
        .body(Body::empty())
        .unwrap();
    let response = send(&gateway.router(), request).await;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_METHODS).unwrap(), "POST");
    assert_eq!(
        headers.get(header::ACCESS_CONTROL_ALLOW_HEADERS).unwrap(),
        "content-type,mcp-session-id"
    );
    assert_eq!(headers.get(header::ACCESS_CONTROL_MAX_AGE).unwrap(), "86400");
    assert!(gateway.registry().is_empty());
    assert!(text_of(response).await.is_empty());
}

#[tokio::test]
async fn test_busy_port_moves_up_and_serves() {
    let occupied = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let configured_port = occupied.local_addr().unwrap().port();

    let settings = GatewaySettings {
        port: configured_port,
        max_retries: 5,
        ..GatewaySettings::default()
    };
    let (gateway, sink) = gateway_with(settings);
    let handle = gateway.start().unwrap();

    let addr = match handle.wait_ready().await {
        ListenerStatus::Listening {
            addr,
            configured_port: reported,
        } => {
            assert_eq!(reported, configured_port);
            addr
        }
        other => panic!("unexpected status: {other:?}"),
    };
    assert!(addr.port() > configured_port);
    assert!(addr.port() <= configured_port + 5);

    let expected = format!(
        "info: LSP MCP server listening on port {} (port {} was in use)",
        addr.port(),
        configured_port
    );
    assert!(sink.messages.lock().contains(&expected));

    // a raw HTTP/1.1 initialize over the real socket
    let body = initialize_body().to_string();
    let request = format!(
        "POST /mcp HTTP/1.1\r\nHost: 127.0.0.1\r\nContent-Type: application/json\r\n\
         Accept: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut raw = String::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut raw))
        .await
        .unwrap()
        .unwrap();

    assert!(raw.starts_with("HTTP/1.1 200"));
    assert!(raw.to_ascii_lowercase().contains("mcp-session-id:"));
    assert_eq!(handle.registry().len(), 1);

    handle.shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle.join())
        .await
        .unwrap()
        .unwrap();
    assert!(gateway.registry().is_empty());
    drop(occupied);
}

#[tokio::test]
async fn test_disabled_gateway_creates_no_listener() {
    let settings = GatewaySettings {
        enabled: false,
        ..GatewaySettings::default()
    };
    let (gateway, sink) = gateway_with(settings);

    assert!(gateway.start().is_none());
    assert_eq!(
        *sink.messages.lock(),
        vec!["info: LSP MCP server is disabled by configuration.".to_string()]
    );
}
