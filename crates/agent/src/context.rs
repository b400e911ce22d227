//! Context manager — live-prompt shaping before every LLM call.
//!
//! When the rendered prompt overflows the configured budget the oldest
//! turns are either dropped (`truncate`) or condensed into a summary
//! message (`summarize_and_truncate`). Three things are always retained:
//! the system instruction, the newest `preserve_recent` messages, and any
//! tool-call/tool-result pair crossing the cut — pairs never split.

use corvid_core::config::{BudgetMode, ContextManagementConfig, ContextStrategy};
use corvid_core::llm::{CompletionRequest, LlmClient};
use corvid_core::message::{Message, Role};
use corvid_core::token;
use std::sync::Arc;
use tracing::{debug, warn};

const CONDENSE_INSTRUCTION: &str = "Condense the following conversation turns into a short \
summary that preserves facts, decisions, and open questions. Respond with the summary only.";

/// What a shaping pass did.
#[derive(Debug, Clone)]
pub struct ShapeOutcome {
    /// The shaped prompt messages
    pub messages: Vec<Message>,
    /// How many messages left the prompt
    pub dropped: usize,
    /// Ids of persisted messages that left the prompt
    pub dropped_ids: Vec<u64>,
    /// The summary standing in for the dropped turns, if one was made
    pub summary: Option<Message>,
    /// True when summarization was requested but fell back to truncation
    pub summarize_failed: bool,
    /// Token estimate of the shaped prompt
    pub prompt_tokens: usize,
}

pub struct ContextManager {
    config: ContextManagementConfig,
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl ContextManager {
    pub fn new(
        config: ContextManagementConfig,
        llm: Arc<dyn LlmClient>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            config,
            llm,
            model: model.into(),
        }
    }

    /// The token level at which shaping starts, and the level it shapes
    /// down to.
    fn token_target(&self) -> usize {
        self.config.value * self.config.threshold_percent as usize / 100
    }

    fn triggered(&self, messages: &[Message]) -> bool {
        match self.config.mode {
            BudgetMode::TokenBudget => {
                token::estimate_messages_tokens(messages) > self.token_target()
            }
            BudgetMode::SlidingWindow => messages.len() > self.config.value,
        }
    }

    /// Shape the prompt. `messages[0]` is expected to be the system
    /// instruction; the newest entries are the current turn.
    pub async fn shape(&self, messages: Vec<Message>) -> ShapeOutcome {
        let prompt_tokens = token::estimate_messages_tokens(&messages);
        if !self.config.enabled || !self.triggered(&messages) {
            return ShapeOutcome {
                messages,
                dropped: 0,
                dropped_ids: Vec::new(),
                summary: None,
                summarize_failed: false,
                prompt_tokens,
            };
        }

        let drop_range = self.drop_range(&messages);
        if drop_range.is_empty() {
            return ShapeOutcome {
                messages,
                dropped: 0,
                dropped_ids: Vec::new(),
                summary: None,
                summarize_failed: false,
                prompt_tokens,
            };
        }

        let dropped: Vec<Message> = messages[drop_range.clone()].to_vec();
        let dropped_ids: Vec<u64> = dropped.iter().filter(|m| m.id > 0).map(|m| m.id).collect();

        let (summary, summarize_failed) = match self.config.strategy {
            ContextStrategy::Truncate => (None, false),
            ContextStrategy::SummarizeAndTruncate => match self.condense(&dropped).await {
                Ok(summary) => (Some(summary), false),
                Err(e) => {
                    warn!("In-loop summarization failed, falling back to truncation: {e}");
                    (None, true)
                }
            },
        };

        let mut shaped: Vec<Message> = Vec::with_capacity(messages.len());
        shaped.extend_from_slice(&messages[..drop_range.start]);
        if let Some(summary) = &summary {
            shaped.push(summary.clone());
        }
        shaped.extend_from_slice(&messages[drop_range.end..]);

        let prompt_tokens = token::estimate_messages_tokens(&shaped);
        debug!(
            dropped = dropped.len(),
            summarized = summary.is_some(),
            prompt_tokens,
            "Context shaped"
        );

        ShapeOutcome {
            messages: shaped,
            dropped: dropped.len(),
            dropped_ids,
            summary,
            summarize_failed,
            prompt_tokens,
        }
    }

    /// The contiguous index range of messages to remove.
    ///
    /// Candidates sit between the protected head (system instruction and
    /// any rolling summary directly after it) and the protected tail
    /// (`preserve_recent` newest messages). The cut is then nudged so a
    /// tool pair is never split.
    fn drop_range(&self, messages: &[Message]) -> std::ops::Range<usize> {
        let mut head = 0;
        while head < messages.len()
            && matches!(messages[head].role, Role::System | Role::Summary)
        {
            head += 1;
        }
        let tail_start = messages
            .len()
            .saturating_sub(self.config.preserve_recent)
            .max(head);

        let mut cut = match self.config.mode {
            BudgetMode::TokenBudget => {
                let target = self.token_target();
                let mut total = token::estimate_messages_tokens(messages);
                let mut cut = head;
                while cut < tail_start && total > target {
                    total -= token::estimate_message_tokens(&messages[cut]);
                    cut += 1;
                }
                cut
            }
            BudgetMode::SlidingWindow => {
                let excess = messages.len().saturating_sub(self.config.value);
                (head + excess).min(tail_start)
            }
        };

        // Never let the kept region start with orphaned tool results.
        while cut < tail_start && messages[cut].role == Role::Tool {
            cut += 1;
        }
        // If the protected tail would begin with tool results, their call
        // message is the last candidate: retain the whole pair instead.
        if cut == tail_start
            && tail_start < messages.len()
            && messages[tail_start].role == Role::Tool
        {
            while cut > head && messages[cut - 1].role == Role::Tool {
                cut -= 1;
            }
            if cut > head && !messages[cut - 1].tool_calls.is_empty() {
                cut -= 1;
            }
        }

        head..cut
    }

    async fn condense(&self, dropped: &[Message]) -> Result<Message, corvid_core::Error> {
        let session_id = dropped[0].session_id.clone();
        let mut transcript = String::new();
        for msg in dropped {
            let role = match msg.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
                Role::System => "system",
                Role::Summary => "summary",
            };
            transcript.push_str(&format!("{role}: {}\n", msg.content));
        }

        let completion = self
            .llm
            .complete(CompletionRequest {
                model: self.model.clone(),
                messages: vec![
                    Message::system(session_id.clone(), CONDENSE_INSTRUCTION),
                    Message::user(session_id.clone(), transcript),
                ],
                tools: vec![],
                temperature: 0.3,
                max_tokens: Some(1024),
            })
            .await?;

        let supersedes: Vec<u64> = dropped.iter().filter(|m| m.id > 0).map(|m| m.id).collect();
        Ok(Message::summary(session_id, completion.text, supersedes))
    }
}
