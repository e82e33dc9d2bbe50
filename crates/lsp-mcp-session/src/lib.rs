//! Session management
//!
//! The registry maps session ids to their transports; a transport turns one
//! HTTP exchange into protocol messages for the server bound to it.

pub mod error;
pub mod registry;
pub mod transport;

pub use error::SessionError;
pub use registry::SessionRegistry;
pub use transport::{
    jsonrpc_error_response, SessionState, StreamableHttpTransport, TransportOptions,
};

/// Header carrying the session identifier in both directions
pub const SESSION_ID_HEADER: &str = "mcp-session-id";
