//! LSP MCP Gateway - streamable HTTP endpoint for MCP sessions
//!
//! Multiplexes many logical sessions over a single loopback listener:
//! a CORS policy runs first, the session router resolves or creates the
//! session for each request, and the listener bootstrap walks up from the
//! configured port when it is already taken.

mod bootstrap;
mod cors;
mod error;
mod gateway;
mod notify;
mod router;

pub use bootstrap::{BootstrapError, BoundListener, ListenerBootstrap, PortBinder, TcpBinder};
pub use cors::{cors_middleware, AllowOrigins, CorsDecision, CorsPolicy};
pub use error::GatewayError;
pub use gateway::{
    Gateway, GatewayHandle, GatewaySettings, ListenerStatus, DISABLED_MESSAGE, MAX_BODY_BYTES,
};
pub use notify::{NotificationSink, TracingSink};
pub use router::{mcp_router, resolve_post, PostRoute, RouterState};

pub use lsp_mcp_session::SESSION_ID_HEADER;
