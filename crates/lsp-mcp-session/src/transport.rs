//! Streamable HTTP transport
//!
//! One transport per session. `POST` carries client messages (answered as
//! JSON or as an SSE stream), `GET` opens the standalone stream used for
//! server-initiated notifications, `DELETE` terminates the session.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use lsp_mcp_protocol::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcResponse, McpServer, ProtocolError,
    ServerTransport, INTERNAL_ERROR, INVALID_REQUEST, PARSE_ERROR, SERVER_ERROR,
    SESSION_NOT_FOUND,
};
use lsp_mcp_tool::{Peer, ToolContext};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::SESSION_ID_HEADER;

type CloseCallback = Box<dyn FnOnce(&str) + Send>;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, initialize not handled yet
    Uninitialized,
    Active,
    Closed,
}

/// Per-transport behaviour switches
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    /// Always answer POST with plain JSON, never an SSE stream
    pub json_response: bool,
    /// Validate the Host header against `allowed_hosts`
    pub dns_rebinding_protection: bool,
    pub allowed_hosts: Vec<String>,
}

/// Build a JSON-RPC error body not tied to any request id
pub fn jsonrpc_error_response(status: StatusCode, code: i64, message: impl Into<String>) -> Response {
    (status, Json(JsonRpcResponse::bare_error(code, message))).into_response()
}

pub struct StreamableHttpTransport {
    session_id: String,
    options: TransportOptions,
    created_at: DateTime<Utc>,
    last_activity: Mutex<DateTime<Utc>>,
    server: RwLock<Option<Arc<McpServer>>>,
    initialized: AtomicBool,
    closed: AtomicBool,
    standalone: Mutex<Option<mpsc::UnboundedSender<JsonRpcNotification>>>,
    on_close: Mutex<Vec<CloseCallback>>,
}

impl StreamableHttpTransport {
    pub fn new(session_id: impl Into<String>, options: TransportOptions) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            options,
            created_at: now,
            last_activity: Mutex::new(now),
            server: RwLock::new(None),
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            standalone: Mutex::new(None),
            on_close: Mutex::new(Vec::new()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SessionState {
        if self.closed.load(Ordering::SeqCst) {
            SessionState::Closed
        } else if self.initialized.load(Ordering::SeqCst) {
            SessionState::Active
        } else {
            SessionState::Uninitialized
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Time since the last exchange on this session
    pub fn idle_time(&self) -> Duration {
        Utc::now() - *self.last_activity.lock()
    }

    /// True while a client holds the standalone notification stream open
    pub fn has_live_stream(&self) -> bool {
        self.standalone
            .lock()
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    fn touch(&self) {
        *self.last_activity.lock() = Utc::now();
    }

    pub fn server(&self) -> Option<Arc<McpServer>> {
        self.server.read().clone()
    }

    pub fn attach_server(&self, server: Arc<McpServer>) -> Result<(), SessionError> {
        let mut slot = self.server.write();
        if slot.is_some() {
            return Err(SessionError::AlreadyBound(self.session_id.clone()));
        }
        *slot = Some(server);
        Ok(())
    }

    /// Register a callback fired once with the session id when the transport
    /// closes. Registering on a closed transport fires it immediately.
    pub fn on_close(&self, callback: impl FnOnce(&str) + Send + 'static) {
        {
            let mut callbacks = self.on_close.lock();
            if !self.is_closed() {
                callbacks.push(Box::new(callback));
                return;
            }
        }
        callback(&self.session_id);
    }

    /// Close the transport. Only the first call has any effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.standalone.lock().take();
        let callbacks = std::mem::take(&mut *self.on_close.lock());

        debug!("Session {} closed", self.session_id);
        for callback in callbacks {
            callback(&self.session_id);
        }
    }

    /// Handle one HTTP exchange for this session.
    pub async fn handle_request(
        self: &Arc<Self>,
        method: &Method,
        headers: &HeaderMap,
        body: Option<Value>,
    ) -> Response {
        if self.is_closed() {
            return jsonrpc_error_response(
                StatusCode::NOT_FOUND,
                SESSION_NOT_FOUND,
                "Session not found",
            );
        }

        if let Err(response) = self.validate_host(headers) {
            return response;
        }

        self.touch();

        if *method == Method::POST {
            self.handle_post(headers, body).await
        } else if *method == Method::GET {
            self.handle_get(headers)
        } else if *method == Method::DELETE {
            self.handle_delete()
        } else {
            let mut response = jsonrpc_error_response(
                StatusCode::METHOD_NOT_ALLOWED,
                SERVER_ERROR,
                "Method not allowed.",
            );
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("GET, POST, DELETE"));
            response
        }
    }

    async fn handle_post(self: &Arc<Self>, headers: &HeaderMap, body: Option<Value>) -> Response {
        let Some(body) = body else {
            return self.reject(
                StatusCode::BAD_REQUEST,
                PARSE_ERROR,
                "Parse error: Request body is required",
            );
        };

        let (raw, is_batch) = match body {
            Value::Array(items) => (items, true),
            other => (vec![other], false),
        };
        if raw.is_empty() {
            return self.reject(
                StatusCode::BAD_REQUEST,
                INVALID_REQUEST,
                "Invalid Request: Empty batch",
            );
        }

        let mut messages = Vec::with_capacity(raw.len());
        for item in raw {
            match serde_json::from_value::<JsonRpcMessage>(item) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    debug!("Session {}: invalid message: {}", self.session_id, e);
                    return self.reject(
                        StatusCode::BAD_REQUEST,
                        PARSE_ERROR,
                        "Parse error: Invalid JSON-RPC message",
                    );
                }
            }
        }

        let has_initialize = messages
            .iter()
            .any(|message| message.is_request() && message.method() == Some("initialize"));

        if has_initialize {
            if self.initialized.load(Ordering::SeqCst) {
                return self.reject(
                    StatusCode::BAD_REQUEST,
                    INVALID_REQUEST,
                    "Invalid Request: Server already initialized",
                );
            }
            if messages.len() > 1 {
                return self.reject(
                    StatusCode::BAD_REQUEST,
                    INVALID_REQUEST,
                    "Invalid Request: Only one initialization request is allowed",
                );
            }
            if self
                .initialized
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return self.reject(
                    StatusCode::BAD_REQUEST,
                    INVALID_REQUEST,
                    "Invalid Request: Server already initialized",
                );
            }
        } else if !self.initialized.load(Ordering::SeqCst) {
            return self.reject(
                StatusCode::BAD_REQUEST,
                SERVER_ERROR,
                "Bad Request: Server not initialized",
            );
        }

        let Some(server) = self.server() else {
            warn!("Session {} has no server bound", self.session_id);
            return self.reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                INTERNAL_ERROR,
                "Internal error: No server bound to session",
            );
        };
        let ctx = self.tool_context();

        if !messages.iter().any(JsonRpcMessage::is_request) {
            for message in messages {
                server.handle_message(message, &ctx).await;
            }
            return self.with_session_header(StatusCode::ACCEPTED.into_response());
        }

        if self.options.json_response || !accepts_event_stream(headers) {
            let mut responses = Vec::with_capacity(messages.len());
            for message in messages {
                if let Some(response) = server.handle_message(message, &ctx).await {
                    responses.push(response);
                }
            }

            let response = if is_batch {
                Json(responses).into_response()
            } else {
                match responses.into_iter().next() {
                    Some(single) => Json(single).into_response(),
                    None => StatusCode::ACCEPTED.into_response(),
                }
            };
            return self.with_session_header(response);
        }

        let session_id = self.session_id.clone();
        let stream = async_stream::stream! {
            for message in messages {
                if let Some(response) = server.handle_message(message, &ctx).await {
                    match Event::default().event("message").json_data(&response) {
                        Ok(event) => yield Ok::<Event, Infallible>(event),
                        Err(e) => warn!("Session {}: failed to encode response: {}", session_id, e),
                    }
                }
            }
        };

        self.with_session_header(Sse::new(stream).into_response())
    }

    fn handle_get(self: &Arc<Self>, headers: &HeaderMap) -> Response {
        if !accepts_event_stream(headers) {
            return self.reject(
                StatusCode::NOT_ACCEPTABLE,
                SERVER_ERROR,
                "Not Acceptable: Client must accept text/event-stream",
            );
        }

        if !self.initialized.load(Ordering::SeqCst) {
            return self.reject(
                StatusCode::BAD_REQUEST,
                SERVER_ERROR,
                "Bad Request: Server not initialized",
            );
        }

        let mut rx = {
            let mut slot = self.standalone.lock();
            if slot.as_ref().map(|tx| !tx.is_closed()).unwrap_or(false) {
                return self.reject(
                    StatusCode::CONFLICT,
                    SERVER_ERROR,
                    "Conflict: Only one SSE stream is allowed per session",
                );
            }
            let (tx, rx) = mpsc::unbounded_channel();
            *slot = Some(tx);
            rx
        };

        debug!("Session {}: standalone stream opened", self.session_id);

        let session_id = self.session_id.clone();
        let stream = async_stream::stream! {
            while let Some(notification) = rx.recv().await {
                match Event::default().event("message").json_data(&notification) {
                    Ok(event) => yield Ok::<Event, Infallible>(event),
                    Err(e) => warn!("Session {}: failed to encode notification: {}", session_id, e),
                }
            }
        };

        self.with_session_header(
            Sse::new(stream)
                .keep_alive(KeepAlive::default())
                .into_response(),
        )
    }

    fn handle_delete(&self) -> Response {
        self.close();
        self.with_session_header(StatusCode::OK.into_response())
    }

    fn validate_host(&self, headers: &HeaderMap) -> Result<(), Response> {
        if !self.options.dns_rebinding_protection {
            return Ok(());
        }

        let host = headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();

        if host_allowed(host, &self.options.allowed_hosts) {
            Ok(())
        } else {
            warn!("Session {}: rejected Host header {:?}", self.session_id, host);
            Err(jsonrpc_error_response(
                StatusCode::FORBIDDEN,
                SERVER_ERROR,
                format!("Invalid Host header: {}", host),
            ))
        }
    }

    fn tool_context(self: &Arc<Self>) -> ToolContext {
        let peer: Arc<dyn Peer> = Arc::clone(self) as Arc<dyn Peer>;
        ToolContext::new(Some(self.session_id.clone()), Some(peer))
    }

    fn reject(&self, status: StatusCode, code: i64, message: &str) -> Response {
        debug!("Session {}: {} {}", self.session_id, status, message);
        self.with_session_header(jsonrpc_error_response(status, code, message))
    }

    fn with_session_header(&self, mut response: Response) -> Response {
        if let Ok(value) = HeaderValue::from_str(&self.session_id) {
            response.headers_mut().insert(SESSION_ID_HEADER, value);
        }
        response
    }
}

impl Peer for StreamableHttpTransport {
    fn notify(&self, method: &str, params: Value) -> bool {
        let mut slot = self.standalone.lock();
        let sent = match slot.as_ref() {
            Some(tx) => tx
                .send(JsonRpcNotification::new(method, Some(params)))
                .is_ok(),
            None => return false,
        };
        if !sent {
            // client went away; the next GET may open a new stream
            *slot = None;
        }
        sent
    }
}

impl ServerTransport for StreamableHttpTransport {
    fn session_id(&self) -> Option<String> {
        Some(self.session_id.clone())
    }

    fn bind(&self, server: Arc<McpServer>) -> lsp_mcp_protocol::Result<()> {
        self.attach_server(server)
            .map_err(|_| ProtocolError::AlreadyConnected)
    }
}

impl std::fmt::Debug for StreamableHttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableHttpTransport")
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .field("created_at", &self.created_at)
            .finish()
    }
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.contains("text/event-stream"))
}

fn host_allowed(host: &str, allowed: &[String]) -> bool {
    if host.is_empty() {
        return false;
    }
    let bare = strip_port(host);
    allowed
        .iter()
        .any(|entry| entry.eq_ignore_ascii_case(host) || entry.eq_ignore_ascii_case(bare))
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}
