use std::sync::Arc;

use lsp_mcp_tool::{
    CallToolResult, InMemoryToolRegistry, ToolContext, ToolError, ToolHandler, ToolRegistry,
};
use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{ProtocolError, Result};
use crate::jsonrpc::{
    JsonRpcError, JsonRpcId, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION,
    METHOD_NOT_FOUND, NOT_INITIALIZED,
};
use crate::types::{
    CallToolParams, Implementation, InitializeParams, InitializeResult, ListToolsResult,
    PROTOCOL_VERSION_LATEST, SUPPORTED_PROTOCOL_VERSIONS,
};

/// The transport side of a server connection
pub trait ServerTransport: Send + Sync {
    /// Session this transport serves, once assigned
    fn session_id(&self) -> Option<String>;

    /// Attach `server`; a transport carries at most one server
    fn bind(&self, server: Arc<McpServer>) -> Result<()>;
}

/// Lifecycle of one client connection
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    New,
    /// `initialize` answered, waiting for `notifications/initialized`
    Initializing,
    Ready,
}

/// MCP protocol server: lifecycle enforcement plus method routing.
pub struct McpServer {
    info: Implementation,
    instructions: Option<String>,
    tools: InMemoryToolRegistry,
    state: RwLock<LifecycleState>,
    protocol_version: RwLock<Option<String>>,
    client_info: RwLock<Option<Implementation>>,
    connected: RwLock<bool>,
}

impl McpServer {
    pub fn new(info: Implementation) -> Self {
        Self {
            info,
            instructions: None,
            tools: InMemoryToolRegistry::new(),
            state: RwLock::new(LifecycleState::New),
            protocol_version: RwLock::new(None),
            client_info: RwLock::new(None),
            connected: RwLock::new(false),
        }
    }

    pub fn with_instructions(mut self, instructions: Option<String>) -> Self {
        self.instructions = instructions;
        self
    }

    pub fn info(&self) -> &Implementation {
        &self.info
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    pub fn protocol_version(&self) -> Option<String> {
        self.protocol_version.read().clone()
    }

    pub fn client_info(&self) -> Option<Implementation> {
        self.client_info.read().clone()
    }

    pub fn register_tool(&self, handler: Arc<dyn ToolHandler>) -> std::result::Result<(), ToolError> {
        self.tools.register(handler)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.names()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.read()
    }

    /// Bind this server to `transport`. A server serves exactly one transport.
    pub fn connect(self: &Arc<Self>, transport: &dyn ServerTransport) -> Result<()> {
        {
            let mut connected = self.connected.write();
            if *connected {
                return Err(ProtocolError::AlreadyConnected);
            }
            *connected = true;
        }

        if let Err(e) = transport.bind(Arc::clone(self)) {
            *self.connected.write() = false;
            return Err(e);
        }

        debug!(
            "Server {} connected to session {:?}",
            self.info.name,
            transport.session_id()
        );
        Ok(())
    }

    fn capabilities() -> Value {
        json!({
            "tools": { "listChanged": false },
            "logging": {}
        })
    }

    fn negotiate_protocol(requested: &str) -> String {
        if SUPPORTED_PROTOCOL_VERSIONS.contains(&requested) {
            requested.to_string()
        } else {
            PROTOCOL_VERSION_LATEST.to_string()
        }
    }

    /// Handle a single JSON-RPC message.
    ///
    /// Returns `Some(response)` for requests, `None` for notifications and responses.
    pub async fn handle_message(
        &self,
        msg: JsonRpcMessage,
        ctx: &ToolContext,
    ) -> Option<JsonRpcResponse> {
        match msg {
            JsonRpcMessage::Request(req) => Some(self.handle_request(req, ctx).await),
            JsonRpcMessage::Notification(n) => {
                self.handle_notification(n);
                None
            }
            JsonRpcMessage::Response(resp) => {
                debug!("Ignoring client response for id {}", resp.id);
                None
            }
        }
    }

    fn error(id: JsonRpcId, code: i64, message: impl Into<String>) -> JsonRpcResponse {
        JsonRpcResponse::err(id, JsonRpcError::new(code, message))
    }

    async fn handle_request(&self, req: JsonRpcRequest, ctx: &ToolContext) -> JsonRpcResponse {
        if req.jsonrpc != JSONRPC_VERSION {
            return Self::error(req.id, INVALID_REQUEST, "Invalid jsonrpc version");
        }

        match req.method.as_str() {
            "initialize" => self.handle_initialize(req),
            "ping" => JsonRpcResponse::ok(req.id, json!({})),
            "tools/list" => {
                if self.state() == LifecycleState::New {
                    return Self::error(req.id, NOT_INITIALIZED, "Server not initialized");
                }
                let result = ListToolsResult {
                    tools: self.tools.list(),
                    next_cursor: None,
                };
                match serde_json::to_value(result) {
                    Ok(value) => JsonRpcResponse::ok(req.id, value),
                    Err(e) => Self::error(req.id, INTERNAL_ERROR, e.to_string()),
                }
            }
            "tools/call" => {
                if self.state() == LifecycleState::New {
                    return Self::error(req.id, NOT_INITIALIZED, "Server not initialized");
                }
                self.handle_call_tool(req, ctx).await
            }
            other => Self::error(req.id, METHOD_NOT_FOUND, format!("Method not found: {}", other)),
        }
    }

    fn handle_initialize(&self, req: JsonRpcRequest) -> JsonRpcResponse {
        let Some(params) = req.params else {
            return Self::error(req.id, INVALID_PARAMS, "Missing initialize params");
        };
        let init: InitializeParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => {
                return Self::error(req.id, INVALID_PARAMS, format!("Invalid params: {}", e))
            }
        };

        {
            let mut state = self.state.write();
            if *state != LifecycleState::New {
                return Self::error(req.id, INVALID_REQUEST, "Server already initialized");
            }
            *state = LifecycleState::Initializing;
        }

        let negotiated = Self::negotiate_protocol(&init.protocol_version);
        *self.protocol_version.write() = Some(negotiated.clone());
        debug!(
            "Initialize from {} {} (protocol {})",
            init.client_info.name, init.client_info.version, negotiated
        );
        *self.client_info.write() = Some(init.client_info);

        let result = InitializeResult {
            protocol_version: negotiated,
            capabilities: Self::capabilities(),
            server_info: self.info.clone(),
            instructions: self.instructions.clone(),
        };

        match serde_json::to_value(result) {
            Ok(value) => JsonRpcResponse::ok(req.id, value),
            Err(e) => Self::error(req.id, INTERNAL_ERROR, e.to_string()),
        }
    }

    async fn handle_call_tool(&self, req: JsonRpcRequest, ctx: &ToolContext) -> JsonRpcResponse {
        let params: CallToolParams = match req.params.map(serde_json::from_value) {
            Some(Ok(p)) => p,
            Some(Err(e)) => {
                return Self::error(req.id, INVALID_PARAMS, format!("Invalid params: {}", e))
            }
            None => return Self::error(req.id, INVALID_PARAMS, "Missing tools/call params"),
        };

        let Some(tool) = self.tools.get(&params.name) else {
            return Self::error(
                req.id,
                INVALID_PARAMS,
                format!("Unknown tool: {}", params.name),
            );
        };

        let args = params.arguments.unwrap_or_else(|| json!({}));
        let result = match tool.call(args, ctx).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Tool {} failed: {}", params.name, e);
                CallToolResult::error(e.to_string())
            }
        };

        match serde_json::to_value(result) {
            Ok(value) => JsonRpcResponse::ok(req.id, value),
            Err(e) => Self::error(req.id, INTERNAL_ERROR, e.to_string()),
        }
    }

    fn handle_notification(&self, n: JsonRpcNotification) {
        match n.method.as_str() {
            "notifications/initialized" => {
                let mut state = self.state.write();
                if *state == LifecycleState::Initializing {
                    *state = LifecycleState::Ready;
                }
            }
            other => debug!("Ignoring notification {}", other),
        }
    }
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("info", &self.info)
            .field("state", &self.state())
            .field("tools", &self.tool_names())
            .finish()
    }
}
