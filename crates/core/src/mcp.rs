//! MCP connector contract — remote tool providers.
//!
//! The three transports (stdio, HTTP stream, SSE) must satisfy identical
//! call semantics; they differ only in connection setup and auth. The
//! transport implementations themselves live outside this workspace — the
//! registry consumes any `McpConnector` and exposes its tools as kind
//! `mcp`.

use crate::error::ToolError;
use crate::tool::{ToolDescriptor, ToolOutput};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// How to reach an MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum McpTransport {
    /// Spawn a subprocess speaking MCP over stdio.
    Stdio { command: String, args: Vec<String> },
    /// Streamable HTTP endpoint.
    HttpStream { url: String },
    /// Server-sent events endpoint.
    Sse { url: String },
}

/// Authentication for HTTP-based transports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "auth", rename_all = "snake_case")]
pub enum McpAuth {
    /// No authentication.
    #[default]
    None,
    /// Static bearer token.
    Bearer { token: String },
    /// OAuth authorization-code flow with a local loopback redirect.
    OAuth {
        client_id: String,
        auth_url: String,
        token_url: String,
        #[serde(default)]
        scopes: Vec<String>,
    },
}

/// Configuration for one MCP server connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Server name, used to namespace its tools
    pub name: String,
    #[serde(flatten)]
    pub transport: McpTransport,
    #[serde(default, flatten)]
    pub auth: McpAuth,
}

/// The tool provider contract.
#[async_trait]
pub trait McpConnector: Send + Sync {
    /// Server name.
    fn name(&self) -> &str;

    /// Establish the connection (spawn process, open stream, run auth).
    async fn connect(&self) -> std::result::Result<(), ToolError>;

    /// List the tools this server exposes.
    async fn list_tools(&self) -> std::result::Result<Vec<ToolDescriptor>, ToolError>;

    /// Invoke a remote tool.
    async fn call(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolOutput, ToolError>;

    /// Close the connection.
    async fn close(&self) -> std::result::Result<(), ToolError>;
}

/// Pick an unused loopback port for the OAuth redirect.
///
/// Binds port 0 and lets the OS assign one from the ephemeral range
/// (always within [1024, 65535]); the listener is dropped immediately, the
/// caller re-binds when it starts the redirect handler.
pub fn loopback_redirect_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_serializes_tagged() {
        let cfg = McpServerConfig {
            name: "files".into(),
            transport: McpTransport::Stdio {
                command: "mcp-files".into(),
                args: vec!["--root".into(), "/tmp".into()],
            },
            auth: McpAuth::None,
        };
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains(r#""transport":"stdio""#));
        assert!(json.contains("mcp-files"));
    }

    #[test]
    fn sse_with_bearer() {
        let cfg = McpServerConfig {
            name: "search".into(),
            transport: McpTransport::Sse {
                url: "https://mcp.example.com/sse".into(),
            },
            auth: McpAuth::Bearer {
                token: "tok".into(),
            },
        };
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains(r#""auth":"bearer""#));
    }

    #[test]
    fn redirect_port_in_user_range() {
        let port = loopback_redirect_port().unwrap();
        assert!(port >= 1024);
    }
}
