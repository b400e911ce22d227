//! Memory search tool — lets the model search its own stored history.
//!
//! Registered as a builtin when `memory_tool_backend` is `local`. Matches
//! are case-insensitive substring hits over the active messages of a
//! session, newest first.

use async_trait::async_trait;
use corvid_core::error::ToolError;
use corvid_core::message::{Role, SessionId};
use corvid_core::tool::{ParamSpec, ParamType, Tool, ToolDescriptor, ToolKind, ToolOutput};
use corvid_memory::{HistoryFilter, MemoryRouter};
use std::sync::Arc;

pub struct MemorySearchTool {
    router: Arc<MemoryRouter>,
}

impl MemorySearchTool {
    pub fn new(router: Arc<MemoryRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl Tool for MemorySearchTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "memory_search".into(),
            description: "Search stored conversation history for relevant earlier turns. \
                          Use this to recall something discussed before."
                .into(),
            parameters: vec![
                ParamSpec::required("query", ParamType::String, "Text to look for"),
                ParamSpec::required("session_id", ParamType::String, "The session to search"),
                ParamSpec::optional(
                    "limit",
                    ParamType::Int,
                    serde_json::json!(5),
                    "Maximum matches to return",
                ),
            ],
            kind: ToolKind::Builtin,
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments {
                tool_name: "memory_search".into(),
                reason: "missing required string argument 'query'".into(),
            })?
            .to_lowercase();
        let session = arguments["session_id"].as_str().ok_or_else(|| {
            ToolError::InvalidArguments {
                tool_name: "memory_search".into(),
                reason: "missing required string argument 'session_id'".into(),
            }
        })?;
        let limit = arguments["limit"].as_u64().unwrap_or(5) as usize;

        let messages = self
            .router
            .load(&SessionId::from(session), HistoryFilter::default())
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "memory_search".into(),
                reason: e.to_string(),
            })?;

        let hits: Vec<String> = messages
            .iter()
            .rev()
            .filter(|m| m.content.to_lowercase().contains(&query))
            .take(limit)
            .map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                    Role::System => "system",
                    Role::Summary => "summary",
                };
                format!("[#{} {role}] {}", m.id, m.content)
            })
            .collect();

        if hits.is_empty() {
            Ok(ToolOutput::text("no matching history"))
        } else {
            Ok(ToolOutput::text(hits.join("\n")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_core::message::Message;

    #[tokio::test]
    async fn finds_matching_turns_newest_first() {
        let router = Arc::new(MemoryRouter::in_memory());
        let sid = SessionId::from("s1");
        for content in ["crows are clever", "pigeons coo", "a clever crow again"] {
            router.append("a1", Message::user(sid.clone(), content)).await.unwrap();
        }

        let tool = MemorySearchTool::new(router);
        let output = tool
            .execute(serde_json::json!({"query": "clever", "session_id": "s1"}))
            .await
            .unwrap();
        let lines: Vec<&str> = output.content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("again"));
    }

    #[tokio::test]
    async fn no_hits_reports_cleanly() {
        let router = Arc::new(MemoryRouter::in_memory());
        let tool = MemorySearchTool::new(router);
        let output = tool
            .execute(serde_json::json!({"query": "ravens", "session_id": "empty"}))
            .await
            .unwrap();
        assert_eq!(output.content, "no matching history");
    }

    #[tokio::test]
    async fn missing_query_is_invalid_args() {
        let router = Arc::new(MemoryRouter::in_memory());
        let tool = MemorySearchTool::new(router);
        let err = tool
            .execute(serde_json::json!({"session_id": "s1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }
}
