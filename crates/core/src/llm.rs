//! LLM client contract — the abstraction over completion providers.
//!
//! A client takes a rendered message list plus tool schemas and returns
//! text and/or structured tool calls with token usage. Provider-specific
//! wire adapters live outside this workspace; tests script the contract
//! with mock clients.

use crate::error::LlmError;
use crate::message::{Message, MessageToolCall};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A tool schema as presented to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The model to use
    pub model: String,

    /// The rendered prompt
    pub messages: Vec<Message>,

    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,

    /// Temperature (0.0 = deterministic)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

/// Token usage for one completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// A complete response from the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    /// Generated text (reasoning or the final answer)
    #[serde(default)]
    pub text: String,

    /// Structured tool calls, in the order the model requested them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// Token usage
    #[serde(default)]
    pub usage: Usage,
}

/// The LLM client contract.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// A human-readable name for this client.
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<Completion, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults() {
        let req = CompletionRequest {
            model: "mock-echo".into(),
            messages: vec![],
            tools: vec![],
            temperature: default_temperature(),
            max_tokens: None,
        };
        assert!((req.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn usage_total() {
        let usage = Usage {
            input_tokens: 10,
            output_tokens: 5,
        };
        assert_eq!(usage.total(), 15);
    }

    #[test]
    fn completion_deserializes_without_tool_calls() {
        let json = r#"{"text":"hello","usage":{"input_tokens":1,"output_tokens":2}}"#;
        let c: Completion = serde_json::from_str(json).unwrap();
        assert_eq!(c.text, "hello");
        assert!(c.tool_calls.is_empty());
    }
}
