//! Structured events — the per-session observation stream.
//!
//! Every interesting step of a run (user turn, thought, tool call, final
//! answer, guardrail block, context truncation, summary creation) is
//! emitted as an `AgentEvent`. Events within a session form an ordered,
//! append-only stream; `event_id` is assigned by the stream store and is
//! strictly increasing per session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// All event kinds in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    UserMessage,
    AgentThought,
    ToolCallStarted,
    ToolCallResult,
    FinalAnswer,
    SubAgentStarted,
    SubAgentResult,
    SubAgentError,
    GuardrailBlocked,
    ContextTruncated,
    SummaryCreated,
    RoutingHandover,
    TaskFailed,
    Cancelled,
}

impl EventKind {
    /// Critical events are never dropped by backpressure handling.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::FinalAnswer
                | Self::GuardrailBlocked
                | Self::RoutingHandover
                | Self::TaskFailed
                | Self::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserMessage => "user_message",
            Self::AgentThought => "agent_thought",
            Self::ToolCallStarted => "tool_call_started",
            Self::ToolCallResult => "tool_call_result",
            Self::FinalAnswer => "final_answer",
            Self::SubAgentStarted => "sub_agent_started",
            Self::SubAgentResult => "sub_agent_result",
            Self::SubAgentError => "sub_agent_error",
            Self::GuardrailBlocked => "guardrail_blocked",
            Self::ContextTruncated => "context_truncated",
            Self::SummaryCreated => "summary_created",
            Self::RoutingHandover => "routing_handover",
            Self::TaskFailed => "task_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// A single event in a session's stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    /// Store-assigned id, strictly increasing per session (0 = unassigned)
    #[serde(default)]
    pub event_id: u64,

    /// The session this event belongs to
    pub session_id: String,

    /// The agent that produced it
    pub agent_id: String,

    /// What happened
    pub kind: EventKind,

    /// When it happened
    pub timestamp: DateTime<Utc>,

    /// Event-specific payload
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl AgentEvent {
    pub fn new(
        session_id: impl Into<String>,
        agent_id: impl Into<String>,
        kind: EventKind,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: 0,
            session_id: session_id.into(),
            agent_id: agent_id.into(),
            kind,
            timestamp: Utc::now(),
            payload,
        }
    }
}
