//! lsp-mcp-tool - Tool handlers and registry for the LSP MCP gateway
//!
//! This crate provides:
//! - Tool descriptors and call results in their wire shape
//! - The `ToolHandler` trait implemented by every tool
//! - A per-call context carrying the session id and a client peer
//! - An in-memory tool registry

pub mod error;
pub mod handler;
pub mod registry;
pub mod types;

pub use error::{Result, ToolError};
pub use handler::{Peer, ToolContext, ToolHandler};
pub use registry::{InMemoryToolRegistry, ToolRegistry};
pub use types::{CallToolResult, ContentBlock, ToolDef};

/// Re-export async_trait for implementers
pub use async_trait::async_trait;
