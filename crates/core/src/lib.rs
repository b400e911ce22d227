//! # Corvid Core
//!
//! Domain types, traits, and error definitions for the Corvid agent
//! runtime. This crate has **zero framework dependencies** — it defines
//! the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem is defined as a trait here. Implementations live in
//! their respective crates. This enables:
//! - Swapping store/LLM/tool implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod config;
pub mod error;
pub mod event;
pub mod llm;
pub mod mcp;
pub mod message;
pub mod store;
pub mod token;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use config::{
    AgentConfig, BudgetMode, ContextManagementConfig, ContextStrategy, GuardrailConfig,
    MemoryConfig, MemoryToolBackend, OffloadConfig, RetentionPolicy, SummaryConfig,
};
pub use error::{BudgetResource, Error, LlmError, Result, StoreError, ToolError};
pub use event::{AgentEvent, EventKind};
pub use llm::{Completion, CompletionRequest, LlmClient, ToolSchema, Usage};
pub use mcp::{McpAuth, McpConnector, McpServerConfig, McpTransport};
pub use message::{Message, MessageToolCall, Role, Session, SessionId};
pub use store::{KVStore, StreamStore};
pub use tool::{
    ArtifactRef, InvocationStatus, ParamSpec, ParamType, ResultRef, Tool, ToolCall,
    ToolDescriptor, ToolInvocation, ToolKind, ToolOutput,
};
