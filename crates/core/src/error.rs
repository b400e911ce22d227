//! Error types for the Corvid domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Each bounded context
//! has its own enum; the top-level `Error` rolls them up. Every error maps
//! to a stable string kind so callers (and the model, for tool errors) can
//! branch without string matching on display text.

use thiserror::Error;

/// The top-level error type for all Corvid operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- LLM errors ---
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Guardrail ---
    #[error("Input blocked by guardrail (threat {threat:.2})")]
    GuardrailBlocked { threat: f32, reasons: Vec<String> },

    // --- Budgets ---
    #[error("Budget exceeded: {resource} limit of {limit} reached")]
    BudgetExceeded { resource: BudgetResource, limit: u64 },

    #[error("Context overflow: {tokens} tokens exceeds budget of {budget}")]
    ContextOverflow { tokens: usize, budget: usize },

    // --- Cancellation ---
    #[error("Run cancelled")]
    Cancelled,

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Which budget a `BudgetExceeded` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetResource {
    Steps,
    Tokens,
    Time,
    Requests,
}

impl std::fmt::Display for BudgetResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Steps => write!(f, "steps"),
            Self::Tokens => write!(f, "tokens"),
            Self::Time => write!(f, "time"),
            Self::Requests => write!(f, "requests"),
        }
    }
}

impl Error {
    /// Stable machine-readable kind for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Llm(LlmError::Unavailable(_)) | Self::Llm(LlmError::Timeout(_)) => {
                "llm_unavailable"
            }
            Self::Llm(LlmError::InvalidOutput(_)) => "llm_invalid_output",
            Self::Tool(ToolError::NotFound(_)) => "tool_not_found",
            Self::Tool(ToolError::InvalidArguments { .. }) => "tool_invalid_args",
            Self::Tool(ToolError::Timeout { .. }) => "tool_timeout",
            Self::Tool(_) => "tool_error",
            Self::Store(StoreError::MigrationFailed(_)) => "migration_failed",
            Self::Store(_) => "store_unavailable",
            Self::GuardrailBlocked { .. } => "guardrail_blocked",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::ContextOverflow { .. } => "context_overflow",
            Self::Cancelled => "cancelled",
            Self::Config { .. } | Self::Serialization(_) | Self::Internal(_) => "internal",
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn retriable(&self) -> bool {
        matches!(
            self,
            Self::Llm(LlmError::Unavailable(_))
                | Self::Llm(LlmError::Timeout(_))
                | Self::Tool(ToolError::Timeout { .. })
                | Self::Store(StoreError::Unavailable(_))
        )
    }
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Invalid model output: {0}")]
    InvalidOutput(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid tool arguments: {tool_name} — {reason}")]
    InvalidArguments { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Sub-agent depth limit exceeded: {depth} > {limit}")]
    DepthExceeded { depth: u8, limit: u8 },
}

impl ToolError {
    /// Stable kind string, reported to the model in tool-result payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "tool_not_found",
            Self::InvalidArguments { .. } => "tool_invalid_args",
            Self::Timeout { .. } => "tool_timeout",
            Self::ExecutionFailed { .. } => "tool_error",
            Self::DepthExceeded { .. } => "tool_error",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}
