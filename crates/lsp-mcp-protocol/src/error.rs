use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Server already connected to a transport")]
    AlreadyConnected,

    #[error("Transport closed")]
    TransportClosed,

    #[error("Tool error: {0}")]
    Tool(#[from] lsp_mcp_tool::ToolError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
