//! Message and Session domain types.
//!
//! These are the value objects every subsystem works with: a user turn
//! arrives, the reasoning engine appends assistant/tool turns, the
//! summarizer folds older turns into a `Summary` message, and the memory
//! router persists the lot in `(created_at, id)` order.

use crate::token;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a session (one durable conversation thread).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// Tool execution result
    Tool,
    /// Rolling summary standing in for older turns
    Summary,
}

/// A single message in a session.
///
/// Messages are append-only. `id` is assigned by the store at append time
/// and is monotonic within a session; a value of `0` means "not yet
/// persisted". Summarization never rewrites history — superseded messages
/// are flipped to `active = false` and the summary records their ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Store-assigned id, monotonic within the session (0 = unassigned)
    #[serde(default)]
    pub id: u64,

    /// The session this message belongs to
    pub session_id: SessionId,

    /// Who produced this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Timestamp
    pub created_at: DateTime<Utc>,

    /// Rough token count of the content (chars / 4, rounded up)
    pub token_estimate: usize,

    /// False once this message has been superseded by a summary
    #[serde(default = "default_active")]
    pub active: bool,

    /// For `Summary` messages: the ids this summary stands in for
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supersedes_ids: Vec<u64>,
}

fn default_active() -> bool {
    true
}

impl Message {
    fn base(session_id: SessionId, role: Role, content: String) -> Self {
        let token_estimate = token::estimate_tokens(&content);
        Self {
            id: 0,
            session_id,
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            created_at: Utc::now(),
            token_estimate,
            active: true,
            supersedes_ids: Vec::new(),
        }
    }

    /// Create a new user message.
    pub fn user(session_id: SessionId, content: impl Into<String>) -> Self {
        Self::base(session_id, Role::User, content.into())
    }

    /// Create a new assistant message.
    pub fn assistant(session_id: SessionId, content: impl Into<String>) -> Self {
        Self::base(session_id, Role::Assistant, content.into())
    }

    /// Create an assistant message that requests tool calls.
    pub fn assistant_with_tools(
        session_id: SessionId,
        content: impl Into<String>,
        tool_calls: Vec<MessageToolCall>,
    ) -> Self {
        let mut msg = Self::base(session_id, Role::Assistant, content.into());
        msg.tool_calls = tool_calls;
        msg
    }

    /// Create a new system message.
    pub fn system(session_id: SessionId, content: impl Into<String>) -> Self {
        Self::base(session_id, Role::System, content.into())
    }

    /// Create a tool result message answering `tool_call_id`.
    pub fn tool_result(
        session_id: SessionId,
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::base(session_id, Role::Tool, content.into());
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    /// Create a summary message superseding `supersedes_ids`.
    pub fn summary(
        session_id: SessionId,
        content: impl Into<String>,
        supersedes_ids: Vec<u64>,
    ) -> Self {
        let mut msg = Self::base(session_id, Role::Summary, content.into());
        msg.supersedes_ids = supersedes_ids;
        msg
    }
}

/// A tool call embedded in an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as a JSON string
    pub arguments: String,
}

impl MessageToolCall {
    pub fn new(name: impl Into<String>, arguments: &serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            arguments: arguments.to_string(),
        }
    }
}

/// Durable per-session bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// The session id
    pub session_id: SessionId,

    /// Owning agent
    pub agent_id: String,

    /// When the session was created
    pub created_at: DateTime<Utc>,

    /// When the last message was appended
    pub last_activity: DateTime<Utc>,

    /// Highest message id already covered by the rolling summary
    #[serde(default)]
    pub summary_cursor: u64,

    /// Token estimate over the active view
    #[serde(default)]
    pub total_tokens_estimate: usize,
}

impl Session {
    pub fn new(session_id: SessionId, agent_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            agent_id: agent_id.into(),
            created_at: now,
            last_activity: now,
            summary_cursor: 0,
            total_tokens_estimate: 0,
        }
    }
}
