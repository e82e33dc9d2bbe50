//! User-visible notifications from the gateway

/// Accepts informational, warning and error messages for display.
/// Implementations must not block.
pub trait NotificationSink: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Sink that forwards every message to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn info(&self, message: &str) {
        tracing::info!(target: "lsp_mcp::notify", "{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "lsp_mcp::notify", "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "lsp_mcp::notify", "{}", message);
    }
}
