//! Builtin artifact tools.
//!
//! Registered automatically when offloading is enabled, so the model can
//! pull full content back into the conversation on demand.

use async_trait::async_trait;
use corvid_core::error::{Error, ToolError};
use corvid_core::tool::{ParamSpec, ParamType, Tool, ToolDescriptor, ToolKind, ToolOutput};
use std::sync::Arc;

use crate::artifacts::ArtifactStore;
use crate::registry::ToolRegistry;

fn execution_failed(tool: &str, err: Error) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: tool.into(),
        reason: err.to_string(),
    }
}

fn required_str<'a>(args: &'a serde_json::Value, field: &str, tool: &str) -> Result<&'a str, ToolError> {
    args[field].as_str().ok_or_else(|| ToolError::InvalidArguments {
        tool_name: tool.into(),
        reason: format!("missing required string argument '{field}'"),
    })
}

pub struct ReadArtifactTool {
    store: Arc<ArtifactStore>,
}

#[async_trait]
impl Tool for ReadArtifactTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "read_artifact".into(),
            description: "Load the full content of an offloaded tool result by artifact id".into(),
            parameters: vec![ParamSpec::required(
                "artifact_id",
                ParamType::String,
                "The artifact handle from a tool-result preview",
            )],
            kind: ToolKind::Builtin,
        }
    }

    async fn execute(&self, args: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let id = required_str(&args, "artifact_id", "read_artifact")?;
        let bytes = self
            .store
            .read(id)
            .await
            .map_err(|e| execution_failed("read_artifact", e))?;
        Ok(ToolOutput::text(String::from_utf8_lossy(&bytes)))
    }
}

pub struct TailArtifactTool {
    store: Arc<ArtifactStore>,
}

#[async_trait]
impl Tool for TailArtifactTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "tail_artifact".into(),
            description: "Read the last N lines of an offloaded tool result".into(),
            parameters: vec![
                ParamSpec::required("artifact_id", ParamType::String, "The artifact handle"),
                ParamSpec::optional(
                    "n_lines",
                    ParamType::Int,
                    serde_json::json!(20),
                    "How many trailing lines to return",
                ),
            ],
            kind: ToolKind::Builtin,
        }
    }

    async fn execute(&self, args: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let id = required_str(&args, "artifact_id", "tail_artifact")?;
        let n = args["n_lines"].as_u64().unwrap_or(20) as usize;
        let tail = self
            .store
            .tail(id, n)
            .await
            .map_err(|e| execution_failed("tail_artifact", e))?;
        Ok(ToolOutput::text(tail))
    }
}

pub struct SearchArtifactTool {
    store: Arc<ArtifactStore>,
}

#[async_trait]
impl Tool for SearchArtifactTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "search_artifact".into(),
            description: "Case-insensitive substring search inside an offloaded tool result"
                .into(),
            parameters: vec![
                ParamSpec::required("artifact_id", ParamType::String, "The artifact handle"),
                ParamSpec::required("query", ParamType::String, "Substring to look for"),
            ],
            kind: ToolKind::Builtin,
        }
    }

    async fn execute(&self, args: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let id = required_str(&args, "artifact_id", "search_artifact")?;
        let query = required_str(&args, "query", "search_artifact")?;
        let hits = self
            .store
            .search(id, query)
            .await
            .map_err(|e| execution_failed("search_artifact", e))?;

        let rendered = hits
            .iter()
            .map(|h| format!("{}:{}: {}", h.line, h.offset, h.text))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(ToolOutput {
            content: if rendered.is_empty() {
                "no matches".into()
            } else {
                rendered
            },
            data: Some(serde_json::to_value(&hits).unwrap_or_default()),
        })
    }
}

pub struct ListArtifactsTool {
    store: Arc<ArtifactStore>,
}

#[async_trait]
impl Tool for ListArtifactsTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "list_artifacts".into(),
            description: "List offloaded tool results with sizes and previews".into(),
            parameters: vec![ParamSpec::optional(
                "session_id",
                ParamType::String,
                serde_json::Value::Null,
                "Restrict to one session",
            )],
            kind: ToolKind::Builtin,
        }
    }

    async fn execute(&self, args: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let session = args["session_id"].as_str();
        let refs = self.store.list(session).await;
        let stats = self.store.stats(session).await;

        let mut lines = vec![format!(
            "{} artifact(s), {} bytes total",
            stats.count, stats.total_bytes
        )];
        for r in &refs {
            lines.push(format!(
                "- {} ({} bytes, session {})",
                r.artifact_id, r.size_bytes, r.session_id
            ));
        }
        Ok(ToolOutput {
            content: lines.join("\n"),
            data: Some(serde_json::to_value(&refs).unwrap_or_default()),
        })
    }
}

/// Register the four artifact tools against `store`.
pub fn register_artifact_tools(
    registry: &ToolRegistry,
    store: Arc<ArtifactStore>,
) -> Result<(), Error> {
    registry.register(Arc::new(ReadArtifactTool { store: store.clone() }))?;
    registry.register(Arc::new(TailArtifactTool { store: store.clone() }))?;
    registry.register(Arc::new(SearchArtifactTool { store: store.clone() }))?;
    registry.register(Arc::new(ListArtifactsTool { store }))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_core::config::OffloadConfig;
    use corvid_core::tool::ToolCall;

    async fn setup() -> (ToolRegistry, Arc<ArtifactStore>, String) {
        let store = Arc::new(ArtifactStore::new(OffloadConfig {
            enabled: true,
            ..OffloadConfig::default()
        }));
        let registry = ToolRegistry::new();
        register_artifact_tools(&registry, store.clone()).unwrap();

        let meta = store
            .put("s1", b"first line\nsecond line\nthird line".to_vec(), None)
            .await
            .unwrap();
        (registry, store, meta.artifact_id)
    }

    #[tokio::test]
    async fn four_tools_registered() {
        let (registry, _, _) = setup().await;
        let names: Vec<String> = registry.descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec!["list_artifacts", "read_artifact", "search_artifact", "tail_artifact"]
        );
        assert!(
            registry
                .descriptors()
                .iter()
                .all(|d| d.kind == ToolKind::Builtin)
        );
    }

    #[tokio::test]
    async fn read_tool_returns_full_content() {
        let (registry, _, id) = setup().await;
        let output = registry
            .execute(&ToolCall {
                id: "c1".into(),
                name: "read_artifact".into(),
                arguments: serde_json::json!({"artifact_id": id}),
            })
            .await
            .unwrap();
        assert_eq!(output.content, "first line\nsecond line\nthird line");
    }

    #[tokio::test]
    async fn tail_tool_defaults_to_twenty_lines() {
        let (registry, _, id) = setup().await;
        let output = registry
            .execute(&ToolCall {
                id: "c1".into(),
                name: "tail_artifact".into(),
                arguments: serde_json::json!({"artifact_id": id, "n_lines": 1}),
            })
            .await
            .unwrap();
        assert_eq!(output.content, "third line");
    }

    #[tokio::test]
    async fn search_tool_reports_lines() {
        let (registry, _, id) = setup().await;
        let output = registry
            .execute(&ToolCall {
                id: "c1".into(),
                name: "search_artifact".into(),
                arguments: serde_json::json!({"artifact_id": id, "query": "SECOND"}),
            })
            .await
            .unwrap();
        assert!(output.content.contains("second line"));
    }

    #[tokio::test]
    async fn missing_argument_is_invalid_args() {
        let (registry, _, _) = setup().await;
        let err = registry
            .execute(&ToolCall {
                id: "c1".into(),
                name: "read_artifact".into(),
                arguments: serde_json::json!({}),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn list_tool_scopes_by_session() {
        let (registry, store, _) = setup().await;
        store.put("s2", b"elsewhere".to_vec(), None).await.unwrap();

        let output = registry
            .execute(&ToolCall {
                id: "c1".into(),
                name: "list_artifacts".into(),
                arguments: serde_json::json!({"session_id": "s2"}),
            })
            .await
            .unwrap();
        assert!(output.content.starts_with("1 artifact(s)"));
    }
}
