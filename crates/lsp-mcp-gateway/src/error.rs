use thiserror::Error;

use crate::bootstrap::BootstrapError;

/// Gateway errors
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid gateway configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error("Session error: {0}")]
    Session(#[from] lsp_mcp_session::SessionError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] lsp_mcp_protocol::ProtocolError),

    #[error("Tool registration failed: {0}")]
    Tool(#[from] lsp_mcp_tool::ToolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Gateway task failed: {0}")]
    Task(String),
}
