//! LSP MCP Observability
//!
//! 基于 tracing 的日志初始化与 span 工具。

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::LoggingConfig;
pub use error::{ObservabilityError, Result};
pub use logging::{create_request_span, create_session_span, LogManager};
