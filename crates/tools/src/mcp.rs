//! MCP tool provider adapter — bridges a connected `McpConnector` into
//! registry entries of kind `mcp`.

use async_trait::async_trait;
use corvid_core::error::{Error, ToolError};
use corvid_core::mcp::McpConnector;
use corvid_core::tool::{Tool, ToolDescriptor, ToolKind, ToolOutput};
use std::sync::Arc;
use tracing::info;

use crate::registry::ToolRegistry;

/// A registry entry proxying calls to a remote MCP tool.
pub struct McpProxyTool {
    connector: Arc<dyn McpConnector>,
    descriptor: ToolDescriptor,
}

#[async_trait]
impl Tool for McpProxyTool {
    fn descriptor(&self) -> ToolDescriptor {
        self.descriptor.clone()
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        self.connector
            .call(&self.descriptor.name, arguments)
            .await
    }
}

/// Connect the provider and register each of its tools.
///
/// Whatever kind the server claims, the registry entry is `mcp` so
/// catalog ordering and BM25 tie-breaks stay honest about provenance.
pub async fn register_mcp_tools(
    registry: &ToolRegistry,
    connector: Arc<dyn McpConnector>,
) -> Result<usize, Error> {
    connector.connect().await?;
    let descriptors = connector.list_tools().await?;
    let count = descriptors.len();

    for mut descriptor in descriptors {
        descriptor.kind = ToolKind::Mcp;
        registry.register(Arc::new(McpProxyTool {
            connector: connector.clone(),
            descriptor,
        }))?;
    }

    info!(server = connector.name(), tools = count, "Registered MCP tools");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_core::tool::{ParamSpec, ParamType, ToolCall};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeConnector {
        connected: AtomicBool,
    }

    #[async_trait]
    impl McpConnector for FakeConnector {
        fn name(&self) -> &str {
            "fake"
        }

        async fn connect(&self) -> Result<(), ToolError> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
            Ok(vec![ToolDescriptor {
                name: "remote_echo".into(),
                description: "Echo on the server side".into(),
                parameters: vec![ParamSpec::required("text", ParamType::String, "")],
                // Deliberately mislabeled; registration must correct it.
                kind: ToolKind::Local,
            }])
        }

        async fn call(
            &self,
            name: &str,
            arguments: serde_json::Value,
        ) -> Result<ToolOutput, ToolError> {
            assert_eq!(name, "remote_echo");
            Ok(ToolOutput::text(format!(
                "remote:{}",
                arguments["text"].as_str().unwrap_or("")
            )))
        }

        async fn close(&self) -> Result<(), ToolError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn registers_and_proxies() {
        let registry = ToolRegistry::new();
        let connector = Arc::new(FakeConnector {
            connected: AtomicBool::new(false),
        });

        let count = register_mcp_tools(&registry, connector.clone()).await.unwrap();
        assert_eq!(count, 1);
        assert!(connector.connected.load(Ordering::SeqCst));

        let descriptor = registry.get("remote_echo").unwrap().descriptor();
        assert_eq!(descriptor.kind, ToolKind::Mcp);

        let output = registry
            .execute(&ToolCall {
                id: "c1".into(),
                name: "remote_echo".into(),
                arguments: serde_json::json!({"text": "hi"}),
            })
            .await
            .unwrap();
        assert_eq!(output.content, "remote:hi");
    }
}
