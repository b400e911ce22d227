//! Tool trait and descriptors — the abstraction over agent capabilities.
//!
//! A tool's parameter schema is declared once at registration as a list of
//! `ParamSpec`s and stored as data; nothing introspects a handler at call
//! time. The JSON-schema rendering is deterministic (sorted object keys,
//! declaration-ordered `required` list) so prompt assembly is byte-stable.

use crate::error::ToolError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a tool comes from. Priority (for catalog ordering and BM25
/// tie-breaks): local > builtin > mcp > skill_script > sub_agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Local,
    Builtin,
    Mcp,
    SkillScript,
    SubAgent,
}

impl ToolKind {
    /// Lower value sorts first.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Local => 0,
            Self::Builtin => 1,
            Self::Mcp => 2,
            Self::SkillScript => 3,
            Self::SubAgent => 4,
        }
    }
}

/// The declared type of a single tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Int,
    Float,
    Bool,
    Array(Box<ParamType>),
    Object,
    Enum(Vec<String>),
}

impl ParamType {
    fn json_type(&self) -> &'static str {
        match self {
            Self::String | Self::Enum(_) => "string",
            Self::Int => "integer",
            Self::Float => "number",
            Self::Bool => "boolean",
            Self::Array(_) => "array",
            Self::Object => "object",
        }
    }
}

/// One declared input of a tool handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub description: String,
}

impl ParamSpec {
    pub fn required(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: true,
            default: None,
            description: description.into(),
        }
    }

    pub fn optional(
        name: &str,
        param_type: ParamType,
        default: serde_json::Value,
        description: &str,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: false,
            default: Some(default),
            description: description.into(),
        }
    }

    fn to_schema(&self) -> serde_json::Value {
        // serde_json's default Map is a BTreeMap, so key order is stable.
        let mut prop = serde_json::Map::new();
        prop.insert("type".into(), self.param_type.json_type().into());
        if !self.description.is_empty() {
            prop.insert("description".into(), self.description.clone().into());
        }
        match &self.param_type {
            ParamType::Array(inner) => {
                prop.insert(
                    "items".into(),
                    serde_json::json!({"type": inner.json_type()}),
                );
            }
            ParamType::Enum(values) => {
                prop.insert("enum".into(), serde_json::json!(values));
            }
            _ => {}
        }
        if let Some(default) = &self.default {
            prop.insert("default".into(), default.clone());
        }
        serde_json::Value::Object(prop)
    }
}

/// Static description of a tool, stored in the registry and sent to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique name within an agent's registry
    pub name: String,

    /// What the tool does (sent to the LLM)
    pub description: String,

    /// Declared inputs
    pub parameters: Vec<ParamSpec>,

    /// Provenance
    pub kind: ToolKind,
}

impl ToolDescriptor {
    /// Render the parameter list as a JSON schema object.
    pub fn parameters_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for spec in &self.parameters {
            properties.insert(spec.name.clone(), spec.to_schema());
            if spec.required {
                required.push(serde_json::Value::String(spec.name.clone()));
            }
        }
        let mut schema = serde_json::Map::new();
        schema.insert("type".into(), "object".into());
        schema.insert("properties".into(), serde_json::Value::Object(properties));
        schema.insert("required".into(), serde_json::Value::Array(required));
        serde_json::Value::Object(schema)
    }
}

/// A request to execute a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// The successful output of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// The textual output fed back to the model
    pub content: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            data: None,
        }
    }
}

/// The core Tool trait.
///
/// Implementations include local handlers, builtin artifact tools, MCP
/// proxies, skill scripts, and sub-agent wrappers.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static descriptor: name, description, parameters, kind.
    fn descriptor(&self) -> ToolDescriptor;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolOutput, ToolError>;
}

/// Terminal status of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationStatus {
    Ok,
    Error,
    Timeout,
    Cancelled,
}

/// Where an invocation's result lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultRef {
    /// Small results stay inline in the tool-result message
    Inline { content: String },
    /// Large results were offloaded; only a preview + handle remain
    Artifact { artifact: ArtifactRef },
}

/// Record of one tool execution within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub session_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: InvocationStatus,
    pub result_ref: ResultRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Handle to an offloaded tool output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Content-hash id
    pub artifact_id: String,
    /// Session the artifact belongs to
    pub session_id: String,
    /// When it was stored
    pub created_at: DateTime<Utc>,
    /// Full content size
    pub size_bytes: usize,
    /// Token estimate of the preview as rendered in the prompt
    pub token_estimate: usize,
    /// First lines of the content, newline-truncated
    pub preview: String,
    /// MIME hint if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_hint: Option<String>,
}
