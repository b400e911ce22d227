//! The reasoning loop.
//!
//! One run walks GUARD → LOAD_HISTORY → PLAN_CONTEXT → LLM_CALL → PARSE,
//! looping through TOOL_DISPATCH → WAIT_TOOLS → INTEGRATE until the model
//! answers without tool calls or a budget trips. Tool calls within a turn
//! dispatch concurrently with per-call timeouts and join-all collection;
//! results reach the model in the order they were requested regardless of
//! completion order.

use chrono::Utc;
use corvid_core::error::{BudgetResource, Error, ToolError};
use corvid_core::event::EventKind;
use corvid_core::llm::{CompletionRequest, Usage};
use corvid_core::message::{Message, MessageToolCall, SessionId};
use corvid_core::tool::{InvocationStatus, ResultRef, ToolCall, ToolInvocation};
use futures::future::join_all;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::{AgentCore, RunError, RunScope};

/// How many tools the BM25 selection injects when advanced tool use is on.
const ADVANCED_TOOL_TOP_K: usize = 8;

/// What the loop hands back to the facade.
#[derive(Debug, Clone)]
pub(crate) struct LoopOutcome {
    pub response: String,
    pub error: Option<RunError>,
    pub usage: Usage,
    pub tool_calls: u64,
    pub persist_error: bool,
}

/// One dispatched tool call, ready to be rendered back to the model.
struct DispatchRecord {
    invocation: ToolInvocation,
    /// The tool-result message content (inline payload, offload handle,
    /// or `{error, kind}` report)
    content: String,
    error: Option<ToolError>,
}

impl AgentCore {
    pub(crate) async fn reasoning_loop(
        &self,
        session_id: &SessionId,
        query: &str,
        depth: u8,
        deadline: Option<Instant>,
    ) -> LoopOutcome {
        let mut usage = Usage::default();
        let mut llm_calls: u64 = 0;
        let mut tool_calls_total: u64 = 0;

        let mut history = match self
            .memory
            .load(session_id, corvid_memory::HistoryFilter::default())
            .await
        {
            Ok(history) => history,
            Err(e) => {
                return LoopOutcome {
                    response: String::new(),
                    error: Some(RunError::from_error(&e)),
                    usage,
                    tool_calls: tool_calls_total,
                    persist_error: false,
                };
            }
        };
        // Prompt order is system → rolling summary → history, so float
        // the summary (stored with the newest id) to the front.
        history.sort_by_key(|m| m.role != corvid_core::message::Role::Summary);

        for step in 0..self.config.max_steps {
            // ── Budget checks ──
            if deadline.is_some_and(|d| Instant::now() >= d) {
                self.emit(session_id, EventKind::Cancelled, serde_json::json!({"step": step}))
                    .await;
                return self
                    .abort_run(session_id, BudgetResource::Time, usage, tool_calls_total)
                    .await;
            }
            if self.config.request_limit > 0 && llm_calls >= self.config.request_limit {
                return self
                    .abort_run(session_id, BudgetResource::Requests, usage, tool_calls_total)
                    .await;
            }
            if self.config.total_tokens_limit > 0 && usage.total() >= self.config.total_tokens_limit
            {
                return self
                    .abort_run(session_id, BudgetResource::Tokens, usage, tool_calls_total)
                    .await;
            }

            // ── PLAN_CONTEXT: assemble and shape the prompt ──
            let mut prompt = Vec::with_capacity(history.len() + 1);
            prompt.push(Message::system(
                session_id.clone(),
                self.config.system_instruction.clone(),
            ));
            prompt.extend(history.iter().cloned());

            let shaped = self.context.shape(prompt).await;
            if shaped.dropped > 0 {
                if let Some(summary) = shaped.summary.clone() {
                    match self.append_with_retry(summary).await {
                        Some(persisted) => {
                            let _ = self
                                .memory
                                .update_active(session_id, &shaped.dropped_ids, false)
                                .await;
                            self.emit(
                                session_id,
                                EventKind::SummaryCreated,
                                serde_json::json!({
                                    "message_id": persisted.id,
                                    "superseded": shaped.dropped_ids.len(),
                                }),
                            )
                            .await;
                            // The shaped view replaced them already; keep
                            // the in-loop copy in sync for later steps.
                            history.retain(|m| !shaped.dropped_ids.contains(&m.id));
                            history.insert(0, persisted);
                        }
                        None => warn!("Failed to persist in-loop summary; keeping it prompt-only"),
                    }
                }
                self.emit(
                    session_id,
                    EventKind::ContextTruncated,
                    serde_json::json!({
                        "dropped": shaped.dropped,
                        "summarized": shaped.summary.is_some(),
                        "summarize_failed": shaped.summarize_failed,
                        "prompt_tokens": shaped.prompt_tokens,
                    }),
                )
                .await;
            }

            // ── Tool catalog ──
            let tool_schemas = if self.config.enable_advanced_tool_use {
                let hits = self.tools.search(query, ADVANCED_TOOL_TOP_K);
                if hits.is_empty() {
                    self.tools.schemas()
                } else {
                    self.tools.schemas_for(&hits)
                }
            } else {
                self.tools.schemas()
            };

            // ── LLM_CALL ──
            let request = CompletionRequest {
                model: self.config.model.clone(),
                messages: shaped.messages,
                tools: tool_schemas,
                temperature: 0.7,
                max_tokens: None,
            };
            debug!(step, session = %session_id, "LLM call");
            let completion = match with_deadline(deadline, self.llm.complete(request)).await {
                Some(Ok(completion)) => completion,
                Some(Err(e)) => {
                    let error = Error::Llm(e);
                    return LoopOutcome {
                        response: String::new(),
                        error: Some(RunError::from_error(&error)),
                        usage,
                        tool_calls: tool_calls_total,
                        persist_error: false,
                    };
                }
                None => {
                    self.emit(session_id, EventKind::Cancelled, serde_json::json!({"step": step}))
                        .await;
                    return self
                        .abort_run(session_id, BudgetResource::Time, usage, tool_calls_total)
                        .await;
                }
            };
            llm_calls += 1;
            usage.input_tokens += completion.usage.input_tokens;
            usage.output_tokens += completion.usage.output_tokens;

            self.emit(
                session_id,
                EventKind::AgentThought,
                serde_json::json!({"content": completion.text}),
            )
            .await;

            // ── PARSE: final answer? ──
            if completion.tool_calls.is_empty() {
                let response = completion.text;
                let msg = Message::assistant(session_id.clone(), response.clone());
                let persist_error = self.append_with_retry(msg).await.is_none();
                if persist_error {
                    warn!(session = %session_id, "Session marked dirty: final answer not persisted");
                }
                self.emit(
                    session_id,
                    EventKind::FinalAnswer,
                    serde_json::json!({"content": response}),
                )
                .await;
                info!(steps = step + 1, tool_calls = tool_calls_total, "Run complete");
                return LoopOutcome {
                    response,
                    error: None,
                    usage,
                    tool_calls: tool_calls_total,
                    persist_error,
                };
            }

            // ── TOOL_DISPATCH ──
            let requested = completion.tool_calls.clone();
            let assistant_msg = Message::assistant_with_tools(
                session_id.clone(),
                completion.text,
                requested.clone(),
            );
            match self.memory.append(&self.config.agent_id, assistant_msg).await {
                Ok(appended) => history.push(appended),
                Err(e) => {
                    return LoopOutcome {
                        response: String::new(),
                        error: Some(RunError::from_error(&e)),
                        usage,
                        tool_calls: tool_calls_total,
                        persist_error: true,
                    };
                }
            }

            for tc in &requested {
                self.emit(
                    session_id,
                    EventKind::ToolCallStarted,
                    serde_json::json!({
                        "call_id": tc.id,
                        "tool": tc.name,
                        "arguments": serde_json::from_str::<serde_json::Value>(&tc.arguments)
                            .unwrap_or(serde_json::Value::Null),
                    }),
                )
                .await;
            }

            // ── WAIT_TOOLS: concurrent dispatch, join-all, request order ──
            let records = join_all(
                requested
                    .iter()
                    .map(|tc| self.dispatch_tool(session_id, tc, depth, deadline)),
            )
            .await;

            // ── INTEGRATE ──
            let mut fatal_tool_error: Option<ToolError> = None;
            for (tc, record) in requested.iter().zip(records) {
                tool_calls_total += 1;
                self.emit(
                    session_id,
                    EventKind::ToolCallResult,
                    serde_json::json!({
                        "call_id": tc.id,
                        "tool": tc.name,
                        "invocation": record.invocation,
                    }),
                )
                .await;

                let tool_msg =
                    Message::tool_result(session_id.clone(), tc.id.clone(), record.content);
                match self.memory.append(&self.config.agent_id, tool_msg).await {
                    Ok(appended) => history.push(appended),
                    Err(e) => {
                        return LoopOutcome {
                            response: String::new(),
                            error: Some(RunError::from_error(&e)),
                            usage,
                            tool_calls: tool_calls_total,
                            persist_error: true,
                        };
                    }
                }

                if self.config.fail_fast
                    && fatal_tool_error.is_none()
                    && let Some(error) = record.error
                {
                    fatal_tool_error = Some(error);
                }
            }
            if let Some(error) = fatal_tool_error {
                let error = Error::Tool(error);
                return LoopOutcome {
                    response: String::new(),
                    error: Some(RunError::from_error(&error)),
                    usage,
                    tool_calls: tool_calls_total,
                    persist_error: false,
                };
            }
        }

        self.abort_run(session_id, BudgetResource::Steps, usage, tool_calls_total)
            .await
    }

    /// Persist a best-effort budget message and close out the run.
    async fn abort_run(
        &self,
        session_id: &SessionId,
        resource: BudgetResource,
        usage: Usage,
        tool_calls: u64,
    ) -> LoopOutcome {
        let limit = match resource {
            BudgetResource::Steps => self.config.max_steps as u64,
            BudgetResource::Tokens => self.config.total_tokens_limit,
            BudgetResource::Time => self.config.max_execution_time_s,
            BudgetResource::Requests => self.config.request_limit,
        };
        let error = Error::BudgetExceeded { resource, limit };
        warn!(session = %session_id, %resource, limit, "Run aborted: budget exceeded");

        let response = format!("Budget exceeded: {resource} limit of {limit} reached.");
        let persist_error = self
            .append_with_retry(Message::assistant(session_id.clone(), response.clone()))
            .await
            .is_none();

        LoopOutcome {
            response,
            error: Some(RunError::from_error(&error)),
            usage,
            tool_calls,
            persist_error,
        }
    }

    /// Execute one tool call: sub-agent delegation, or a registry tool
    /// under the per-call timeout, with oversized results offloaded.
    async fn dispatch_tool(
        &self,
        session_id: &SessionId,
        tc: &MessageToolCall,
        depth: u8,
        deadline: Option<Instant>,
    ) -> DispatchRecord {
        let started_at = Utc::now();
        let arguments: serde_json::Value = match serde_json::from_str(&tc.arguments) {
            Ok(value) => value,
            Err(e) => {
                let error = ToolError::InvalidArguments {
                    tool_name: tc.name.clone(),
                    reason: format!("arguments are not valid JSON: {e}"),
                };
                return self.error_record(session_id, tc, arguments_null(), started_at, error);
            }
        };

        // ── Sub-agent dispatch ──
        let child = self.sub_agents.read().unwrap().get(&tc.name).cloned();
        if let Some(child) = child {
            return self
                .dispatch_sub_agent(session_id, tc, child, arguments, depth, deadline, started_at)
                .await;
        }

        // ── Registry tool with per-call timeout ──
        let call = ToolCall {
            id: tc.id.clone(),
            name: tc.name.clone(),
            arguments: arguments.clone(),
        };
        let timeout_s = self.config.tool_call_timeout_s;
        let result = if timeout_s == 0 {
            self.tools.execute(&call).await
        } else {
            match tokio::time::timeout(Duration::from_secs(timeout_s), self.tools.execute(&call))
                .await
            {
                Ok(inner) => inner,
                Err(_) => Err(ToolError::Timeout {
                    tool_name: tc.name.clone(),
                    timeout_secs: timeout_s,
                }),
            }
        };

        match result {
            Ok(output) => {
                // ── Offload oversized results ──
                if self.artifacts.should_offload(output.content.as_bytes()) {
                    match self
                        .artifacts
                        .put(&session_id.0, output.content.clone().into_bytes(), None)
                        .await
                    {
                        Ok(meta) => {
                            let content = serde_json::json!({
                                "artifact_id": meta.artifact_id,
                                "preview": meta.preview,
                                "hint": "use read_artifact to load full content",
                            })
                            .to_string();
                            return DispatchRecord {
                                invocation: ToolInvocation {
                                    id: Uuid::new_v4().to_string(),
                                    session_id: session_id.0.clone(),
                                    tool_name: tc.name.clone(),
                                    arguments,
                                    started_at,
                                    ended_at: Utc::now(),
                                    status: InvocationStatus::Ok,
                                    result_ref: ResultRef::Artifact { artifact: meta },
                                    error: None,
                                },
                                content,
                                error: None,
                            };
                        }
                        Err(e) => {
                            warn!(tool = %tc.name, "Offload failed, keeping result inline: {e}")
                        }
                    }
                }
                let content = output.content;
                DispatchRecord {
                    invocation: ToolInvocation {
                        id: Uuid::new_v4().to_string(),
                        session_id: session_id.0.clone(),
                        tool_name: tc.name.clone(),
                        arguments,
                        started_at,
                        ended_at: Utc::now(),
                        status: InvocationStatus::Ok,
                        result_ref: ResultRef::Inline {
                            content: content.clone(),
                        },
                        error: None,
                    },
                    content,
                    error: None,
                }
            }
            Err(error) => self.error_record(session_id, tc, arguments, started_at, error),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_sub_agent(
        &self,
        session_id: &SessionId,
        tc: &MessageToolCall,
        child: Arc<AgentCore>,
        arguments: serde_json::Value,
        depth: u8,
        deadline: Option<Instant>,
        started_at: chrono::DateTime<Utc>,
    ) -> DispatchRecord {
        if depth >= self.config.sub_agent_depth_limit {
            let error = ToolError::DepthExceeded {
                depth: depth + 1,
                limit: self.config.sub_agent_depth_limit,
            };
            return self.error_record(session_id, tc, arguments, started_at, error);
        }

        let task = arguments["task"].as_str().unwrap_or_default().to_string();
        if task.is_empty() {
            let error = ToolError::InvalidArguments {
                tool_name: tc.name.clone(),
                reason: "missing required string argument 'task'".into(),
            };
            return self.error_record(session_id, tc, arguments, started_at, error);
        }

        // Each delegation opens a fresh session in the child and inherits
        // the parent turn's remaining deadline.
        let child_session = SessionId::new();
        self.emit(
            session_id,
            EventKind::SubAgentStarted,
            serde_json::json!({"agent": tc.name, "session": child_session.0, "task": task}),
        )
        .await;

        let result = child
            .run_scoped(
                task,
                child_session.clone(),
                RunScope {
                    depth: depth + 1,
                    deadline,
                },
            )
            .await;
        self.metrics.absorb(&result.metric);

        match result.error {
            None => {
                self.emit(
                    session_id,
                    EventKind::SubAgentResult,
                    serde_json::json!({"agent": tc.name, "session": child_session.0}),
                )
                .await;
                DispatchRecord {
                    invocation: ToolInvocation {
                        id: Uuid::new_v4().to_string(),
                        session_id: session_id.0.clone(),
                        tool_name: tc.name.clone(),
                        arguments,
                        started_at,
                        ended_at: Utc::now(),
                        status: InvocationStatus::Ok,
                        result_ref: ResultRef::Inline {
                            content: result.response.clone(),
                        },
                        error: None,
                    },
                    content: result.response,
                    error: None,
                }
            }
            Some(child_error) => {
                self.emit(
                    session_id,
                    EventKind::SubAgentError,
                    serde_json::json!({
                        "agent": tc.name,
                        "session": child_session.0,
                        "kind": child_error.kind,
                    }),
                )
                .await;
                let error = ToolError::ExecutionFailed {
                    tool_name: tc.name.clone(),
                    reason: child_error.message,
                };
                self.error_record(session_id, tc, arguments, started_at, error)
            }
        }
    }

    /// Render a failed call as a `{error, kind}` tool-result so the model
    /// can recover.
    fn error_record(
        &self,
        session_id: &SessionId,
        tc: &MessageToolCall,
        arguments: serde_json::Value,
        started_at: chrono::DateTime<Utc>,
        error: ToolError,
    ) -> DispatchRecord {
        let status = match error {
            ToolError::Timeout { .. } => InvocationStatus::Timeout,
            _ => InvocationStatus::Error,
        };
        let content = serde_json::json!({
            "error": error.to_string(),
            "kind": error.kind(),
        })
        .to_string();
        DispatchRecord {
            invocation: ToolInvocation {
                id: Uuid::new_v4().to_string(),
                session_id: session_id.0.clone(),
                tool_name: tc.name.clone(),
                arguments,
                started_at,
                ended_at: Utc::now(),
                status,
                result_ref: ResultRef::Inline {
                    content: content.clone(),
                },
                error: Some(error.to_string()),
            },
            content,
            error: Some(error),
        }
    }
}

fn arguments_null() -> serde_json::Value {
    serde_json::Value::Null
}

/// Run `fut`, bounded by the optional deadline. `None` means the deadline
/// fired first.
async fn with_deadline<F, T>(deadline: Option<Instant>, fut: F) -> Option<T>
where
    F: std::future::Future<Output = T>,
{
    match deadline {
        None => Some(fut.await),
        Some(d) => tokio::time::timeout_at(d, fut).await.ok(),
    }
}
