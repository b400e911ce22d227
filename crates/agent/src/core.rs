//! The agent facade.
//!
//! `AgentCore` wires the guardrail, memory and event routers, tool
//! registry, artifact store, context manager, summarizer, and metrics
//! around the reasoning loop. Exceptions never cross this surface: every
//! run returns a structured `RunResult`.

use corvid_core::config::AgentConfig;
use corvid_core::error::Error;
use corvid_core::event::{AgentEvent, EventKind};
use corvid_core::llm::{LlmClient, Usage};
use corvid_core::mcp::McpConnector;
use corvid_core::message::{Message, SessionId};
use corvid_core::store::keys;
use corvid_core::tool::{ParamSpec, ParamType, Tool, ToolDescriptor, ToolKind};
use corvid_events::{EventBackendConfig, EventBackendKind, EventRouter};
use corvid_guardrail::{Guardrail, GuardrailResult, REFUSAL_MESSAGE};
use corvid_memory::{
    HistoryFilter, MemoryBackendConfig, MemoryKind, MemoryRouter, MemorySummarizer,
};
use corvid_scheduler::{TaskConfig, TaskRunner};
use corvid_telemetry::{AgentMetrics, MetricsEngine};
use corvid_tools::{ArtifactStore, ToolRegistry, register_artifact_tools, register_mcp_tools};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Duration, Instant};
use tracing::{info, warn};

use crate::context::ContextManager;

/// Per-run execution scope: delegation depth and the inherited deadline.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RunScope {
    pub depth: u8,
    pub deadline: Option<Instant>,
}

/// Structured error surfaced on a `RunResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    pub kind: String,
    pub message: String,
    pub retriable: bool,
}

impl RunError {
    pub(crate) fn from_error(e: &Error) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
            retriable: e.retriable(),
        }
    }
}

/// The outcome of one `run`.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// The final answer (or refusal / budget message)
    pub response: String,
    /// The session the run executed in
    pub session_id: SessionId,
    /// Metrics snapshot taken after the run
    pub metric: AgentMetrics,
    /// Present when the guardrail screened the input
    pub guardrail_result: Option<GuardrailResult>,
    /// Present when the run did not complete normally
    pub error: Option<RunError>,
    /// True when the response could not be persisted after retries
    pub persist_error: bool,
}

pub struct AgentCore {
    pub(crate) config: AgentConfig,
    pub(crate) llm: Arc<dyn LlmClient>,
    pub(crate) tools: Arc<ToolRegistry>,
    pub(crate) memory: Arc<MemoryRouter>,
    pub(crate) events: Arc<EventRouter>,
    pub(crate) artifacts: Arc<ArtifactStore>,
    pub(crate) guardrail: Guardrail,
    pub(crate) metrics: Arc<MetricsEngine>,
    pub(crate) summarizer: Option<MemorySummarizer>,
    pub(crate) context: ContextManager,
    pub(crate) sub_agents: std::sync::RwLock<HashMap<String, Arc<AgentCore>>>,
    /// One request per session at a time
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AgentCore {
    /// Build an agent over fresh in-memory stores.
    pub fn new(config: AgentConfig, llm: Arc<dyn LlmClient>) -> Result<Arc<Self>, Error> {
        config.validate()?;

        let memory = Arc::new(MemoryRouter::in_memory());
        let events = Arc::new(EventRouter::in_memory());
        let tools = Arc::new(ToolRegistry::new());
        let artifacts = Arc::new(ArtifactStore::new(config.tool_offload.clone()));
        let guardrail = Guardrail::new(config.guardrail_config.clone())?;
        let metrics = Arc::new(MetricsEngine::new());

        if config.tool_offload.enabled {
            register_artifact_tools(&tools, artifacts.clone())?;
        }
        if config.enable_agent_skills
            && let Some(dir) = &config.skills_dir
        {
            for skill in corvid_tools::discover_skills(
                std::path::Path::new(dir),
                config.tool_call_timeout_s,
            ) {
                tools.register(Arc::new(skill))?;
            }
        }
        if config.memory_tool_backend == corvid_core::config::MemoryToolBackend::Local {
            tools.register(Arc::new(crate::memory_tool::MemorySearchTool::new(
                memory.clone(),
            )))?;
        }

        let summarizer = config.memory_config.summary.enabled.then(|| {
            MemorySummarizer::new(
                memory.clone(),
                llm.clone(),
                config.model.clone(),
                config.memory_config.clone(),
            )
        });
        let context = ContextManager::new(
            config.context_management.clone(),
            llm.clone(),
            config.model.clone(),
        );

        info!(agent = %config.agent_id, model = %config.model, "Agent created");
        Ok(Arc::new(Self {
            config,
            llm,
            tools,
            memory,
            events,
            artifacts,
            guardrail,
            metrics,
            summarizer,
            context,
            sub_agents: std::sync::RwLock::new(HashMap::new()),
            session_locks: Mutex::new(HashMap::new()),
        }))
    }

    pub fn agent_id(&self) -> &str {
        &self.config.agent_id
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn memory(&self) -> &Arc<MemoryRouter> {
        &self.memory
    }

    pub fn events(&self) -> &Arc<EventRouter> {
        &self.events
    }

    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    async fn session_lock(&self, session_id: &SessionId) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        locks
            .entry(session_id.0.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Process one query. A fresh session is opened when none is given.
    pub async fn run(&self, query: &str, session_id: Option<SessionId>) -> RunResult {
        let session_id = session_id.unwrap_or_default();
        self.run_scoped(query.to_string(), session_id, RunScope::default())
            .await
    }

    /// Process one query, emitting the session's events as they happen.
    ///
    /// The returned stream starts at the session's current tail; the run
    /// executes in the background. The `final_answer` (or terminal error
    /// event) marks the end of the run's events.
    pub async fn stream(
        self: Arc<Self>,
        query: &str,
        session_id: Option<SessionId>,
    ) -> mpsc::Receiver<AgentEvent> {
        let session_id = session_id.unwrap_or_default();
        let rx = self.events.stream(&session_id.0, None).await;

        let this = self;
        let query = query.to_string();
        tokio::spawn(async move {
            let _ = this.run_scoped(query, session_id, RunScope::default()).await;
        });
        rx
    }

    /// The boxed recursion point shared by `run`, `stream`, and
    /// sub-agent dispatch.
    pub(crate) fn run_scoped(
        &self,
        query: String,
        session_id: SessionId,
        scope: RunScope,
    ) -> Pin<Box<dyn Future<Output = RunResult> + Send + '_>> {
        Box::pin(async move {
            let started = Instant::now();
            let deadline = scope.deadline.or_else(|| {
                (self.config.max_execution_time_s > 0)
                    .then(|| started + Duration::from_secs(self.config.max_execution_time_s))
            });

            // ── Guardrail ──
            let guardrail_result = self.guardrail.check(&query);
            if guardrail_result.blocked {
                self.emit(
                    &session_id,
                    EventKind::GuardrailBlocked,
                    serde_json::json!({
                        "threat": guardrail_result.threat,
                        "detectors": guardrail_result.detectors,
                    }),
                )
                .await;
                self.metrics
                    .record_run(started.elapsed().as_millis() as u64, Usage::default(), 0, false);
                return RunResult {
                    response: REFUSAL_MESSAGE.to_string(),
                    session_id,
                    metric: self.metrics.snapshot(),
                    guardrail_result: Some(guardrail_result),
                    error: None,
                    persist_error: false,
                };
            }

            // ── Serialize per session ──
            let lock = self.session_lock(&session_id).await;
            let _guard = lock.lock().await;

            // ── Persist the user turn ──
            let user_msg = Message::user(session_id.clone(), query.clone());
            if let Err(e) = self.memory.append(&self.config.agent_id, user_msg).await {
                self.metrics
                    .record_run(started.elapsed().as_millis() as u64, Usage::default(), 0, true);
                return RunResult {
                    response: String::new(),
                    session_id,
                    metric: self.metrics.snapshot(),
                    guardrail_result: None,
                    error: Some(RunError::from_error(&e)),
                    persist_error: true,
                };
            }
            self.emit(
                &session_id,
                EventKind::UserMessage,
                serde_json::json!({"content": query}),
            )
            .await;

            // ── The reasoning loop ──
            let outcome = self
                .reasoning_loop(&session_id, &query, scope.depth, deadline)
                .await;

            // ── Post-persist summarization ──
            if let Some(summarizer) = &self.summarizer {
                match summarizer.run(&session_id).await {
                    Ok(Some(summary)) => {
                        self.emit(
                            &session_id,
                            EventKind::SummaryCreated,
                            serde_json::json!({
                                "message_id": summary.message.id,
                                "superseded": summary.superseded,
                            }),
                        )
                        .await;
                    }
                    Ok(None) => {}
                    Err(e) => warn!(session = %session_id, "Summarizer failed: {e}"),
                }
            }

            // ── Metrics ──
            let elapsed_ms = started.elapsed().as_millis() as u64;
            self.metrics.record_run(
                elapsed_ms,
                outcome.usage,
                outcome.tool_calls,
                outcome.error.is_some(),
            );
            if let Ok(bytes) = serde_json::to_vec(&self.metrics.snapshot()) {
                let _ = self
                    .memory
                    .put_blob(&keys::metrics(&self.config.agent_id), bytes)
                    .await;
            }

            RunResult {
                response: outcome.response,
                session_id,
                metric: self.metrics.snapshot(),
                guardrail_result: None,
                error: outcome.error,
                persist_error: outcome.persist_error,
            }
        })
    }

    pub(crate) async fn emit(
        &self,
        session_id: &SessionId,
        kind: EventKind,
        payload: serde_json::Value,
    ) {
        let event = AgentEvent::new(
            session_id.0.clone(),
            self.config.agent_id.clone(),
            kind,
            payload,
        );
        if let Err(e) = self.events.emit(event).await {
            warn!(session = %session_id, kind = kind.as_str(), "Event emission failed: {e}");
        }
    }

    /// Persist with the post-turn retry schedule: three retries backing
    /// off 50ms, 200ms, 800ms. Returns the appended message, or `None`
    /// when the store stayed unavailable — the response is still returned
    /// to the caller with `persist_error` set.
    pub(crate) async fn append_with_retry(&self, msg: Message) -> Option<Message> {
        const BACKOFF_MS: [u64; 3] = [50, 200, 800];
        let mut attempt = 0;
        loop {
            match self.memory.append(&self.config.agent_id, msg.clone()).await {
                Ok(appended) => return Some(appended),
                Err(e) if attempt < BACKOFF_MS.len() => {
                    let delay = BACKOFF_MS[attempt];
                    warn!(attempt, "Persist failed, backing off {delay}ms: {e}");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!("Persist failed after {attempt} retries: {e}");
                    return None;
                }
            }
        }
    }

    // ── Public management surface ─────────────────────────────────────

    /// Hot-swap the memory backend, migrating all sessions.
    pub async fn switch_memory(&self, kind: &str, path: Option<String>) -> Result<(), Error> {
        let kind = MemoryKind::parse(kind)?;
        self.memory
            .switch_memory_store(kind, MemoryBackendConfig { path })
            .await
    }

    /// Hot-swap the event backend, leaving emitted events behind a
    /// handover marker.
    pub async fn switch_events(&self, kind: &str, path: Option<String>) -> Result<(), Error> {
        let kind = EventBackendKind::parse(kind)?;
        self.events
            .switch_events(kind, EventBackendConfig { path })
            .await
    }

    /// Connect MCP providers and register their tools.
    pub async fn connect_tool_providers(
        &self,
        connectors: Vec<Arc<dyn McpConnector>>,
    ) -> Result<usize, Error> {
        let mut total = 0;
        for connector in connectors {
            total += register_mcp_tools(&self.tools, connector).await?;
        }
        Ok(total)
    }

    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.tools.descriptors()
    }

    /// Active messages of a session in `(created_at, id)` order.
    pub async fn get_session_history(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<Message>, Error> {
        self.memory.load(session_id, HistoryFilter::default()).await
    }

    /// Drop one session, or all sessions when `None`.
    pub async fn clear_session(&self, session_id: Option<&SessionId>) -> Result<usize, Error> {
        self.memory.clear(session_id).await
    }

    pub fn get_metrics(&self) -> AgentMetrics {
        self.metrics.snapshot()
    }

    /// Register a child agent as a callable tool of kind `sub_agent`.
    pub fn register_sub_agent(
        &self,
        child: Arc<AgentCore>,
        description: impl Into<String>,
    ) -> Result<(), Error> {
        let name = child.config.agent_id.clone();
        self.tools.register(Arc::new(SubAgentEntry {
            name: name.clone(),
            description: description.into(),
        }))?;
        self.sub_agents.write().unwrap().insert(name, child);
        Ok(())
    }

    /// Flush metrics and sweep expired artifacts.
    pub async fn cleanup(&self) -> Result<(), Error> {
        if let Ok(bytes) = serde_json::to_vec(&self.metrics.snapshot()) {
            self.memory
                .put_blob(&keys::metrics(&self.config.agent_id), bytes)
                .await?;
        }
        let swept = self.artifacts.cleanup_expired().await;
        info!(agent = %self.config.agent_id, swept, "Agent cleanup complete");
        Ok(())
    }
}

/// Catalog entry for a sub-agent. Dispatch happens inside the reasoning
/// loop (it needs depth and deadline), so direct execution is an error.
struct SubAgentEntry {
    name: String,
    description: String,
}

#[async_trait::async_trait]
impl Tool for SubAgentEntry {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: vec![ParamSpec::required(
                "task",
                ParamType::String,
                "The task to delegate to this agent",
            )],
            kind: ToolKind::SubAgent,
        }
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
    ) -> Result<corvid_core::tool::ToolOutput, corvid_core::error::ToolError> {
        Err(corvid_core::error::ToolError::ExecutionFailed {
            tool_name: self.name.clone(),
            reason: "sub-agent invocations are dispatched by the reasoning loop".into(),
        })
    }
}

#[async_trait::async_trait]
impl TaskRunner for AgentCore {
    async fn run_task(&self, config: &TaskConfig) -> Result<String, Error> {
        let session_id = config
            .session_id
            .as_deref()
            .map(SessionId::from)
            .unwrap_or_default();
        let result = self.run(&config.query, Some(session_id)).await;
        match result.error {
            None => Ok(result.response),
            Some(e) => Err(Error::Internal(format!("{}: {}", e.kind, e.message))),
        }
    }
}
