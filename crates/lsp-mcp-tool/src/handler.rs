//! Tool handler trait and per-call context

use crate::error::Result;
use crate::types::{CallToolResult, ToolDef};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Sends server-initiated notifications to the client of one session
pub trait Peer: Send + Sync {
    /// Returns false when the client has no open stream to receive it
    fn notify(&self, method: &str, params: Value) -> bool;
}

/// Context handed to a tool for a single call
#[derive(Clone, Default)]
pub struct ToolContext {
    pub session_id: Option<String>,
    pub peer: Option<Arc<dyn Peer>>,
}

impl ToolContext {
    pub fn new(session_id: Option<String>, peer: Option<Arc<dyn Peer>>) -> Self {
        Self { session_id, peer }
    }

    pub fn notify(&self, method: &str, params: Value) -> bool {
        self.peer
            .as_ref()
            .map(|peer| peer.notify(method, params))
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("session_id", &self.session_id)
            .field("peer", &self.peer.is_some())
            .finish()
    }
}

/// A tool callable through `tools/call`
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Descriptor advertised to clients
    fn definition(&self) -> ToolDef;

    /// Run the tool. An `Err` is reported to the client as an `isError` result.
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<CallToolResult>;
}
