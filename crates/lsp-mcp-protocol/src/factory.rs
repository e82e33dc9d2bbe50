use std::sync::Arc;

use lsp_mcp_tool::{ToolError, ToolHandler};

use crate::server::McpServer;
use crate::types::Implementation;

/// Registers a fixed set of tools on every freshly created server
pub trait ToolSet: Send + Sync {
    fn register(&self, server: &McpServer) -> Result<(), ToolError>;
}

impl<F> ToolSet for F
where
    F: Fn(&McpServer) -> Result<(), ToolError> + Send + Sync,
{
    fn register(&self, server: &McpServer) -> Result<(), ToolError> {
        self(server)
    }
}

impl ToolSet for Vec<Arc<dyn ToolHandler>> {
    fn register(&self, server: &McpServer) -> Result<(), ToolError> {
        self.iter()
            .try_for_each(|tool| server.register_tool(Arc::clone(tool)))
    }
}

/// Builds one protocol server per session
#[derive(Debug, Clone)]
pub struct McpServerFactory {
    pub name: String,
    pub version: String,
    pub instructions: Option<String>,
}

impl McpServerFactory {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            instructions: None,
        }
    }

    pub fn with_instructions(mut self, instructions: Option<String>) -> Self {
        self.instructions = instructions;
        self
    }

    pub fn create(&self) -> McpServer {
        McpServer::new(Implementation::new(&self.name, &self.version))
            .with_instructions(self.instructions.clone())
    }
}

impl Default for McpServerFactory {
    fn default() -> Self {
        Self::new("lsp-server", "0.0.2")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lsp_mcp_tool::{CallToolResult, ToolContext, ToolDef};
    use serde_json::Value;

    struct Named(&'static str);

    #[async_trait]
    impl ToolHandler for Named {
        fn definition(&self) -> ToolDef {
            ToolDef::new(self.0, "test")
        }

        async fn call(&self, _args: Value, _ctx: &ToolContext) -> lsp_mcp_tool::Result<CallToolResult> {
            Ok(CallToolResult::text(self.0))
        }
    }

    #[test]
    fn test_each_server_is_fresh() {
        let factory = McpServerFactory::default().with_instructions(Some("hello".to_string()));
        let tools: Vec<Arc<dyn ToolHandler>> = vec![Arc::new(Named("a")), Arc::new(Named("b"))];

        let first = factory.create();
        let second = factory.create();
        tools.register(&first).unwrap();
        tools.register(&second).unwrap();

        assert_eq!(first.info().name, "lsp-server");
        assert_eq!(first.tool_names(), second.tool_names());
    }

    #[test]
    fn test_closure_tool_set() {
        let set = |server: &McpServer| server.register_tool(Arc::new(Named("only")));
        let server = McpServerFactory::default().create();

        set.register(&server).unwrap();
        assert_eq!(server.tool_names(), vec!["only".to_string()]);

        // registering twice on the same server collides
        assert!(set.register(&server).is_err());
    }
}
