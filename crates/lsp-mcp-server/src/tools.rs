//! 内置工具集
//!
//! 代替编辑器侧真正的语言服务工具，用于验证网关的会话与通知链路。

use std::sync::Arc;

use lsp_mcp_tool::{
    async_trait, CallToolResult, Result, ToolContext, ToolDef, ToolError, ToolHandler,
};
use serde_json::{json, Value};

/// Returns its `text` argument and logs it to the session's notification stream
pub struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new("echo", "Return the given text unchanged")
            .with_title("Echo")
            .with_input_schema(json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "Text to echo back" }
                },
                "required": ["text"]
            }))
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<CallToolResult> {
        let text = args
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArgument("missing string argument 'text'".to_string()))?;

        ctx.notify(
            "notifications/message",
            json!({ "level": "info", "logger": "echo", "data": text }),
        );

        Ok(CallToolResult::text(text))
    }
}

/// Reports the server identity and the calling session
pub struct ServerInfoTool {
    name: String,
    version: String,
}

impl ServerInfoTool {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

#[async_trait]
impl ToolHandler for ServerInfoTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new("server_info", "Describe this server and the current session")
            .with_title("Server info")
    }

    async fn call(&self, _args: Value, ctx: &ToolContext) -> Result<CallToolResult> {
        Ok(CallToolResult::json(json!({
            "name": self.name,
            "version": self.version,
            "sessionId": ctx.session_id,
        })))
    }
}

/// 每个会话注册的工具
pub fn builtin_tools(server_name: &str, server_version: &str) -> Vec<Arc<dyn ToolHandler>> {
    vec![
        Arc::new(EchoTool),
        Arc::new(ServerInfoTool::new(server_name, server_version)),
    ]
}
