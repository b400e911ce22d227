//! Shared test helpers: scripted LLM clients.

use async_trait::async_trait;
use corvid_core::error::LlmError;
use corvid_core::llm::{Completion, CompletionRequest, LlmClient, Usage};
use corvid_core::message::{MessageToolCall, Role};
use std::sync::Mutex;

/// A mock client that returns a sequence of scripted completions.
///
/// Each call to `complete` returns the next completion in the queue.
/// Panics if more calls are made than completions provided.
pub struct SequentialMockClient {
    responses: Mutex<Vec<Completion>>,
    calls: Mutex<usize>,
    failure: Option<String>,
}

impl SequentialMockClient {
    pub fn new(responses: Vec<Completion>) -> Self {
        Self {
            responses: Mutex::new(responses),
            calls: Mutex::new(0),
            failure: None,
        }
    }

    /// A client whose every call fails with `llm_unavailable`.
    pub fn failing(message: &str) -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            calls: Mutex::new(0),
            failure: Some(message.to_string()),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl LlmClient for SequentialMockClient {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<Completion, LlmError> {
        let mut calls = self.calls.lock().unwrap();
        *calls += 1;
        if let Some(message) = &self.failure {
            return Err(LlmError::Unavailable(message.clone()));
        }
        let responses = self.responses.lock().unwrap();
        if *calls > responses.len() {
            panic!(
                "SequentialMockClient: no more responses (call #{}, have {})",
                *calls,
                responses.len()
            );
        }
        Ok(responses[*calls - 1].clone())
    }
}

/// A client that echoes the newest user message back as the answer.
pub struct EchoClient;

#[async_trait]
impl LlmClient for EchoClient {
    fn name(&self) -> &str {
        "mock-echo"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        let text = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let input_tokens = request.messages.iter().map(|m| m.token_estimate as u64).sum();
        Ok(Completion {
            usage: Usage {
                input_tokens,
                output_tokens: corvid_core::token::estimate_tokens(&text) as u64,
            },
            text,
            tool_calls: vec![],
        })
    }
}

/// Build a plain text completion.
pub fn text_completion(text: &str) -> Completion {
    Completion {
        text: text.to_string(),
        tool_calls: vec![],
        usage: Usage {
            input_tokens: 10,
            output_tokens: 5,
        },
    }
}

/// Build a completion that requests tool calls.
pub fn tool_completion(thought: &str, tool_calls: Vec<MessageToolCall>) -> Completion {
    Completion {
        text: thought.to_string(),
        tool_calls,
        usage: Usage {
            input_tokens: 10,
            output_tokens: 5,
        },
    }
}

/// Build one tool call.
pub fn make_tool_call(name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: args.to_string(),
    }
}
