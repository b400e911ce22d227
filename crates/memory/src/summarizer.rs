//! Memory summarizer — rolling compression of stored history.
//!
//! Runs after turns are persisted, never inside the prompt path. When a
//! session's active history overflows the configured window or token
//! budget, the oldest turns are condensed into a single `Summary` message
//! and flipped inactive (or deleted, per retention policy). A session has
//! at most one rolling summary; each pass folds the previous summary in
//! and its `supersedes_ids` grows.

use corvid_core::config::{BudgetMode, MemoryConfig, RetentionPolicy};
use corvid_core::error::Error;
use corvid_core::llm::{CompletionRequest, LlmClient};
use corvid_core::message::{Message, Role, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::router::{HistoryFilter, MemoryRouter};

/// Fixed prefix that makes summary messages self-describing in renderings.
pub const SUMMARY_HEADER: &str = "[Conversation summary]";

const SUMMARIZE_INSTRUCTION: &str = "You compress conversation history. Condense the \
following turns into a short synopsis that preserves facts, decisions, names, and \
unresolved questions. Respond with the synopsis only.";

/// What a summarization pass produced.
#[derive(Debug, Clone)]
pub struct SummaryOutcome {
    /// The newly appended summary message
    pub message: Message,
    /// How many messages it superseded in this pass
    pub superseded: usize,
}

/// The summarizer. Concurrent passes over the same session serialize on a
/// per-session mutex; different sessions proceed in parallel.
pub struct MemorySummarizer {
    router: Arc<MemoryRouter>,
    llm: Arc<dyn LlmClient>,
    model: String,
    config: MemoryConfig,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MemorySummarizer {
    pub fn new(
        router: Arc<MemoryRouter>,
        llm: Arc<dyn LlmClient>,
        model: impl Into<String>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            router,
            llm,
            model: model.into(),
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn session_lock(&self, session_id: &SessionId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(session_id.0.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run one summarization pass. Returns `None` when nothing overflowed
    /// or summarization is disabled; summarization failures are logged and
    /// leave history untouched.
    pub async fn run(&self, session_id: &SessionId) -> Result<Option<SummaryOutcome>, Error> {
        if !self.config.summary.enabled {
            return Ok(None);
        }

        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        let active = self
            .router
            .load(session_id, HistoryFilter::default())
            .await?;
        if active.is_empty() {
            return Ok(None);
        }

        let previous_summary = active.iter().find(|m| m.role == Role::Summary).cloned();
        let drop_set = self.overflow_set(&active);
        if drop_set.is_empty() {
            return Ok(None);
        }

        let condensed = match self.condense(previous_summary.as_ref(), &drop_set).await {
            Ok(text) => text,
            Err(e) => {
                warn!(session = %session_id, "Summarization failed, leaving history untouched: {e}");
                return Ok(None);
            }
        };

        // The new summary supersedes everything the old one did, plus the
        // freshly dropped turns. The old summary itself is replaced, not
        // summarized.
        let mut supersedes: Vec<u64> = previous_summary
            .as_ref()
            .map(|s| s.supersedes_ids.clone())
            .unwrap_or_default();
        supersedes.extend(drop_set.iter().map(|m| m.id));
        supersedes.sort_unstable();
        supersedes.dedup();

        let agent_id = self
            .router
            .session_meta(session_id)
            .await?
            .map(|s| s.agent_id)
            .unwrap_or_default();

        let summary_msg = self
            .router
            .append(
                &agent_id,
                Message::summary(
                    session_id.clone(),
                    format!("{SUMMARY_HEADER}\n{condensed}"),
                    supersedes,
                ),
            )
            .await?;

        let mut retired: Vec<u64> = drop_set.iter().map(|m| m.id).collect();
        if let Some(prev) = &previous_summary {
            retired.push(prev.id);
        }
        match self.config.summary.retention_policy {
            RetentionPolicy::Keep => {
                self.router
                    .update_active(session_id, &retired, false)
                    .await?;
            }
            RetentionPolicy::Delete => {
                self.router.delete_messages(session_id, &retired).await?;
            }
        }

        if let Some(mut session) = self.router.session_meta(session_id).await? {
            session.summary_cursor = drop_set.iter().map(|m| m.id).max().unwrap_or(0);
            self.router.put_session_meta(&session).await?;
        }
        self.router.refresh_session_totals(session_id).await?;

        debug!(
            session = %session_id,
            superseded = drop_set.len(),
            "Rolling summary updated"
        );
        Ok(Some(SummaryOutcome {
            message: summary_msg,
            superseded: drop_set.len(),
        }))
    }

    /// The oldest messages that must leave the active view. System
    /// messages and the rolling summary itself are never candidates.
    fn overflow_set(&self, active: &[Message]) -> Vec<Message> {
        let candidates: Vec<&Message> = active
            .iter()
            .filter(|m| m.role != Role::System && m.role != Role::Summary)
            .collect();

        let drop_count = match self.config.mode {
            BudgetMode::SlidingWindow => {
                if active.len() <= self.config.value {
                    0
                } else {
                    // Leave room for the replacement summary in the window.
                    (active.len() - self.config.value + 1).min(candidates.len())
                }
            }
            BudgetMode::TokenBudget => {
                let mut total: usize = active.iter().map(|m| m.token_estimate).sum();
                if total <= self.config.value {
                    0
                } else {
                    let mut n = 0;
                    for msg in &candidates {
                        if total <= self.config.value {
                            break;
                        }
                        total -= msg.token_estimate;
                        n += 1;
                    }
                    n
                }
            }
        };

        let mut dropped: Vec<Message> =
            candidates[..drop_count].iter().map(|&m| m.clone()).collect();

        // Tool pairs stay atomic: if the cut lands after an assistant
        // message that requested tools, pull its results in too.
        let ends_with_call = dropped.last().is_some_and(|m| !m.tool_calls.is_empty());
        if ends_with_call {
            for msg in &candidates[drop_count..] {
                if msg.role == Role::Tool {
                    dropped.push((*msg).clone());
                } else {
                    break;
                }
            }
        }
        dropped
    }

    async fn condense(
        &self,
        previous: Option<&Message>,
        drop_set: &[Message],
    ) -> Result<String, Error> {
        let mut transcript = String::new();
        if let Some(prev) = previous {
            transcript.push_str(&prev.content);
            transcript.push_str("\n\n");
        }
        for msg in drop_set {
            let role = match msg.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
                Role::System => "system",
                Role::Summary => "summary",
            };
            transcript.push_str(&format!("{role}: {}\n", msg.content));
        }

        let session_id = drop_set[0].session_id.clone();
        let request = CompletionRequest {
            model: self.model.clone(),
            messages: vec![
                Message::system(session_id.clone(), SUMMARIZE_INSTRUCTION),
                Message::user(session_id, transcript),
            ],
            tools: vec![],
            temperature: 0.3,
            max_tokens: Some(1024),
        };
        let completion = self.llm.complete(request).await?;
        Ok(completion.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use corvid_core::config::SummaryConfig;
    use corvid_core::error::LlmError;
    use corvid_core::llm::{Completion, Usage};

    struct CannedSummarizer {
        text: &'static str,
        fail: bool,
    }

    #[async_trait]
    impl LlmClient for CannedSummarizer {
        fn name(&self) -> &str {
            "canned"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<Completion, LlmError> {
            if self.fail {
                return Err(LlmError::Unavailable("down".into()));
            }
            Ok(Completion {
                text: self.text.to_string(),
                tool_calls: vec![],
                usage: Usage::default(),
            })
        }
    }

    fn config(mode: BudgetMode, value: usize, policy: RetentionPolicy) -> MemoryConfig {
        MemoryConfig {
            mode,
            value,
            summary: SummaryConfig {
                enabled: true,
                retention_policy: policy,
            },
        }
    }

    async fn seeded_router(n: usize) -> Arc<MemoryRouter> {
        let router = Arc::new(MemoryRouter::in_memory());
        for i in 0..n {
            let msg = if i % 2 == 0 {
                Message::user(SessionId::from("s1"), format!("question {i}"))
            } else {
                Message::assistant(SessionId::from("s1"), format!("answer {i}"))
            };
            router.append("a1", msg).await.unwrap();
        }
        router
    }

    #[tokio::test]
    async fn no_overflow_is_a_noop() {
        let router = seeded_router(2).await;
        let summarizer = MemorySummarizer::new(
            router.clone(),
            Arc::new(CannedSummarizer { text: "sum", fail: false }),
            "mock",
            config(BudgetMode::SlidingWindow, 5, RetentionPolicy::Keep),
        );
        assert!(summarizer.run(&SessionId::from("s1")).await.unwrap().is_none());
        assert_eq!(
            router.load(&SessionId::from("s1"), HistoryFilter::default()).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn sliding_window_overflow_summarizes_oldest() {
        let router = seeded_router(5).await;
        let summarizer = MemorySummarizer::new(
            router.clone(),
            Arc::new(CannedSummarizer { text: "the early exchange", fail: false }),
            "mock",
            config(BudgetMode::SlidingWindow, 3, RetentionPolicy::Keep),
        );

        let outcome = summarizer.run(&SessionId::from("s1")).await.unwrap().unwrap();
        assert_eq!(outcome.superseded, 3);
        assert!(outcome.message.content.starts_with(SUMMARY_HEADER));

        // Active view: 2 recent turns + the summary = window size.
        let active = router.load(&SessionId::from("s1"), HistoryFilter::default()).await.unwrap();
        assert_eq!(active.len(), 3);
        assert!(active.iter().any(|m| m.role == Role::Summary));
        assert!(active.iter().all(|m| m.content != "question 0"));

        // Keep policy: sources remain stored, inactive.
        let all = router.load(&SessionId::from("s1"), HistoryFilter::all()).await.unwrap();
        assert_eq!(all.len(), 6);
        let superseded: Vec<_> = all.iter().filter(|m| !m.active).collect();
        assert_eq!(superseded.len(), 3);
    }

    #[tokio::test]
    async fn delete_policy_removes_sources() {
        let router = seeded_router(5).await;
        let summarizer = MemorySummarizer::new(
            router.clone(),
            Arc::new(CannedSummarizer { text: "gone", fail: false }),
            "mock",
            config(BudgetMode::SlidingWindow, 3, RetentionPolicy::Delete),
        );

        summarizer.run(&SessionId::from("s1")).await.unwrap().unwrap();
        let all = router.load(&SessionId::from("s1"), HistoryFilter::all()).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn token_budget_mode_drops_until_under() {
        let router = Arc::new(MemoryRouter::in_memory());
        for i in 0..10 {
            // ~25 tokens each
            router
                .append(
                    "a1",
                    Message::user(SessionId::from("s1"), format!("{i} {}", "x".repeat(96))),
                )
                .await
                .unwrap();
        }
        let summarizer = MemorySummarizer::new(
            router.clone(),
            Arc::new(CannedSummarizer { text: "short", fail: false }),
            "mock",
            config(BudgetMode::TokenBudget, 100, RetentionPolicy::Keep),
        );

        summarizer.run(&SessionId::from("s1")).await.unwrap().unwrap();
        // The pre-existing turns are under budget; only the fresh summary
        // message sits on top.
        let active = router.load(&SessionId::from("s1"), HistoryFilter::default()).await.unwrap();
        let non_summary_tokens: usize = active
            .iter()
            .filter(|m| m.role != Role::Summary)
            .map(|m| m.token_estimate)
            .sum();
        assert!(non_summary_tokens <= 100, "got {non_summary_tokens}");
        assert!(active.len() < 10);
    }

    #[tokio::test]
    async fn rolling_summary_grows() {
        let router = seeded_router(5).await;
        let summarizer = MemorySummarizer::new(
            router.clone(),
            Arc::new(CannedSummarizer { text: "round", fail: false }),
            "mock",
            config(BudgetMode::SlidingWindow, 3, RetentionPolicy::Keep),
        );

        let first = summarizer.run(&SessionId::from("s1")).await.unwrap().unwrap();
        let first_covered = first.message.supersedes_ids.clone();

        for i in 5..9 {
            router
                .append("a1", Message::user(SessionId::from("s1"), format!("later {i}")))
                .await
                .unwrap();
        }
        let second = summarizer.run(&SessionId::from("s1")).await.unwrap().unwrap();

        // One rolling summary in the active view, covering strictly more.
        let active = router.load(&SessionId::from("s1"), HistoryFilter::default()).await.unwrap();
        assert_eq!(active.iter().filter(|m| m.role == Role::Summary).count(), 1);
        assert!(second.message.supersedes_ids.len() > first_covered.len());
        for id in &first_covered {
            assert!(second.message.supersedes_ids.contains(id));
        }
    }

    #[tokio::test]
    async fn llm_failure_leaves_history_untouched() {
        let router = seeded_router(5).await;
        let summarizer = MemorySummarizer::new(
            router.clone(),
            Arc::new(CannedSummarizer { text: "", fail: true }),
            "mock",
            config(BudgetMode::SlidingWindow, 3, RetentionPolicy::Keep),
        );

        assert!(summarizer.run(&SessionId::from("s1")).await.unwrap().is_none());
        let active = router.load(&SessionId::from("s1"), HistoryFilter::default()).await.unwrap();
        assert_eq!(active.len(), 5);
    }
}
