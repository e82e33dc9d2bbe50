//! Session router
//!
//! Resolves the session for each request on the protocol endpoint and hands
//! the exchange to that session's transport. A session is only ever created
//! by a POST that carries no session id and a well-formed `initialize`.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use lsp_mcp_observability::create_session_span;
use lsp_mcp_protocol::{
    is_initialize_request, McpServerFactory, ToolSet, INTERNAL_ERROR, PARSE_ERROR, SERVER_ERROR,
};
use lsp_mcp_session::{
    jsonrpc_error_response, SessionRegistry, SessionState, StreamableHttpTransport,
    TransportOptions, SESSION_ID_HEADER,
};
use serde_json::Value;
use tracing::{debug, error, info, Instrument};

use crate::error::GatewayError;

pub const NO_VALID_SESSION_MESSAGE: &str = "Bad Request: No valid session ID provided";
pub const INVALID_SESSION_MESSAGE: &str = "Invalid or missing session ID";

/// Everything a request needs to resolve or create its session
#[derive(Clone)]
pub struct RouterState {
    pub registry: SessionRegistry,
    pub factory: Arc<McpServerFactory>,
    pub tool_set: Arc<dyn ToolSet>,
    pub transport_options: TransportOptions,
}

impl RouterState {
    pub fn new(
        registry: SessionRegistry,
        factory: McpServerFactory,
        tool_set: Arc<dyn ToolSet>,
        transport_options: TransportOptions,
    ) -> Self {
        Self {
            registry,
            factory: Arc::new(factory),
            tool_set,
            transport_options,
        }
    }

    /// Mint an id and bind a fresh server to a fresh transport.
    ///
    /// The transport is not registered yet; see [`RouterState::initialize_session`].
    pub fn create_session(&self) -> Result<Arc<StreamableHttpTransport>, GatewayError> {
        let session_id = self.registry.mint_id();
        let transport = Arc::new(StreamableHttpTransport::new(
            session_id,
            self.transport_options.clone(),
        ));
        transport.on_close(self.registry.remover());

        let server = Arc::new(self.factory.create());
        self.tool_set.register(&server)?;
        server.connect(transport.as_ref())?;

        Ok(transport)
    }

    /// Create a session for an `initialize` exchange.
    ///
    /// The session is registered only once its transport accepted the
    /// exchange; a rejected one is closed and never becomes routable.
    pub async fn initialize_session(
        &self,
        method: &Method,
        headers: &HeaderMap,
        body: Value,
    ) -> Response {
        let transport = match self.create_session() {
            Ok(transport) => transport,
            Err(e) => {
                error!("Failed to create session: {}", e);
                return jsonrpc_error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    INTERNAL_ERROR,
                    format!("Internal error: {}", e),
                );
            }
        };

        let request_id = request_id_of(&body);
        let span = create_session_span(transport.session_id(), request_id.as_deref());
        let response = transport
            .handle_request(method, headers, Some(body))
            .instrument(span)
            .await;

        if response.status().is_success() && transport.state() == SessionState::Active {
            self.registry
                .put(transport.session_id().to_string(), Arc::clone(&transport));
            info!("Session created: {}", transport.session_id());
        } else {
            debug!(
                "Session {} discarded: initialize answered {}",
                transport.session_id(),
                response.status()
            );
            transport.close();
        }
        response
    }
}

impl std::fmt::Debug for RouterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterState")
            .field("registry", &self.registry)
            .field("factory", &self.factory)
            .field("tool_set", &"<tools>")
            .field("transport_options", &self.transport_options)
            .finish()
    }
}

/// Outcome of resolving a body-bearing request
pub enum PostRoute {
    Existing(Arc<StreamableHttpTransport>),
    Initialize,
    Reject,
}

impl std::fmt::Debug for PostRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Existing(transport) => write!(f, "Existing({})", transport.session_id()),
            Self::Initialize => f.write_str("Initialize"),
            Self::Reject => f.write_str("Reject"),
        }
    }
}

pub fn resolve_post(registry: &SessionRegistry, session_id: Option<&str>, body: &Value) -> PostRoute {
    match session_id {
        Some(id) => registry
            .get(id)
            .map(PostRoute::Existing)
            .unwrap_or(PostRoute::Reject),
        None if is_initialize_request(body) => PostRoute::Initialize,
        None => PostRoute::Reject,
    }
}

fn session_id_from(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

fn request_id_of(body: &Value) -> Option<String> {
    body.get("id").filter(|id| !id.is_null()).map(Value::to_string)
}

async fn handle_post(
    State(state): State<RouterState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // an empty body resolves like any other non-initialize payload
    let body: Option<Value> = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        match serde_json::from_slice(&body) {
            Ok(body) => Some(body),
            Err(e) => {
                debug!("Rejected unparsable request body: {}", e);
                return jsonrpc_error_response(
                    StatusCode::BAD_REQUEST,
                    PARSE_ERROR,
                    format!("Parse error: {}", e),
                );
            }
        }
    };

    let session_id = session_id_from(&headers);
    let route = resolve_post(
        &state.registry,
        session_id,
        body.as_ref().unwrap_or(&Value::Null),
    );

    match (route, body) {
        (PostRoute::Existing(transport), body) => {
            let request_id = body.as_ref().and_then(request_id_of);
            let span = create_session_span(transport.session_id(), request_id.as_deref());
            transport
                .handle_request(&method, &headers, body)
                .instrument(span)
                .await
        }
        (PostRoute::Initialize, Some(body)) => {
            state.initialize_session(&method, &headers, body).await
        }
        _ => {
            debug!("Rejected POST without a valid session (header: {:?})", session_id);
            jsonrpc_error_response(
                StatusCode::BAD_REQUEST,
                SERVER_ERROR,
                NO_VALID_SESSION_MESSAGE,
            )
        }
    }
}

/// Bodiless exchanges: the notification stream (`GET`) and termination (`DELETE`)
async fn handle_session_request(
    State(state): State<RouterState>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let Some(transport) = session_id_from(&headers).and_then(|id| state.registry.get(id)) else {
        debug!("Rejected {} without a valid session", method);
        return (StatusCode::BAD_REQUEST, INVALID_SESSION_MESSAGE).into_response();
    };

    let span = create_session_span(transport.session_id(), None);
    transport
        .handle_request(&method, &headers, None)
        .instrument(span)
        .await
}

/// Routes for the protocol endpoint
pub fn mcp_router(endpoint: &str, state: RouterState) -> Router {
    Router::new()
        .route(
            endpoint,
            post(handle_post)
                .get(handle_session_request)
                .delete(handle_session_request),
        )
        .with_state(state)
}
