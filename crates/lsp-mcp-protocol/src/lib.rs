//! JSON-RPC 2.0 and MCP protocol server used by the LSP MCP gateway.
//!
//! The crate knows nothing about HTTP: a server is attached to its session
//! transport through [`ServerTransport`].

mod error;
mod factory;
mod initialize;
mod jsonrpc;
mod server;
mod types;

pub use error::{ProtocolError, Result};
pub use factory::{McpServerFactory, ToolSet};
pub use initialize::is_initialize_request;
pub use jsonrpc::{
    JsonRpcError, JsonRpcId, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION,
    METHOD_NOT_FOUND, NOT_INITIALIZED, PARSE_ERROR, SERVER_ERROR, SESSION_NOT_FOUND,
};
pub use server::{LifecycleState, McpServer, ServerTransport};
pub use types::{
    CallToolParams, Implementation, InitializeParams, InitializeResult, ListToolsResult,
    PROTOCOL_VERSION_LATEST, SUPPORTED_PROTOCOL_VERSIONS,
};
