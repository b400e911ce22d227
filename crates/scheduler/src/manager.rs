//! The background manager — one worker per agent.
//!
//! Each worker owns a bounded queue of pending triggers, a ticker task
//! that enqueues on schedule, and a drainer task that executes serially.
//! Pausing suspends the ticker but the drainer keeps working the queue;
//! stopping closes the queue so the drainer finishes what is pending and
//! exits.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use corvid_core::error::Error;
use corvid_core::event::{AgentEvent, EventKind};
use corvid_events::EventRouter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::{Duration, sleep, timeout};
use tracing::{debug, info, warn};

use crate::cron::CronExpr;
use crate::registry::{Schedule, TaskConfig, TaskRegistry};

/// Executes one background run. Implemented by the agent facade.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run_task(&self, config: &TaskConfig) -> Result<String, Error>;
}

/// Lifecycle state of a background agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Created,
    Scheduled,
    Running,
    Paused,
    Stopped,
    Deleted,
}

/// What happened to a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    QueueOverflow,
}

/// Point-in-time report for one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub agent_id: String,
    pub state: AgentState,
    pub queue_overflow: u64,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub next_fire: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Counters {
    queue_overflow: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    executing: AtomicBool,
    next_fire: std::sync::RwLock<Option<DateTime<Utc>>>,
}

struct WorkerHandle {
    config: TaskConfig,
    state_tx: watch::Sender<AgentState>,
    /// Dropped on stop so the drainer finishes the backlog and exits
    queue_tx: Option<mpsc::Sender<()>>,
    ticker: tokio::task::JoinHandle<()>,
    drainer: tokio::task::JoinHandle<()>,
    counters: Arc<Counters>,
}

/// Manages all background workers of a process.
pub struct BackgroundManager {
    registry: Arc<TaskRegistry>,
    runner: Arc<dyn TaskRunner>,
    events: Option<Arc<EventRouter>>,
    workers: Mutex<HashMap<String, WorkerHandle>>,
    shutdown_grace_s: u64,
}

impl BackgroundManager {
    pub fn new(runner: Arc<dyn TaskRunner>) -> Self {
        Self {
            registry: Arc::new(TaskRegistry::new()),
            runner,
            events: None,
            workers: Mutex::new(HashMap::new()),
            shutdown_grace_s: 10,
        }
    }

    pub fn with_events(mut self, events: Arc<EventRouter>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_shutdown_grace(mut self, grace_s: u64) -> Self {
        self.shutdown_grace_s = grace_s;
        self
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Register a task and start its worker.
    pub async fn create_agent(&self, config: TaskConfig) -> Result<(), Error> {
        config.validate()?;
        let mut workers = self.workers.lock().await;
        if workers.contains_key(&config.agent_id) {
            return Err(Error::Config {
                message: format!("background agent already exists: {}", config.agent_id),
            });
        }
        self.registry.register(config.clone())?;

        let handle = self.spawn_worker(config.clone());
        workers.insert(config.agent_id.clone(), handle);
        info!(agent = %config.agent_id, "Background agent created");
        Ok(())
    }

    fn spawn_worker(&self, config: TaskConfig) -> WorkerHandle {
        let (state_tx, state_rx) = watch::channel(AgentState::Scheduled);
        let (queue_tx, queue_rx) = mpsc::channel::<()>(config.queue_size);
        let counters = Arc::new(Counters::default());

        let ticker = tokio::spawn(ticker_loop(
            config.clone(),
            state_rx.clone(),
            queue_tx.clone(),
            counters.clone(),
        ));
        let drainer = tokio::spawn(drainer_loop(
            config.clone(),
            queue_rx,
            self.runner.clone(),
            self.events.clone(),
            counters.clone(),
        ));

        WorkerHandle {
            config,
            state_tx,
            queue_tx: Some(queue_tx),
            ticker,
            drainer,
            counters,
        }
    }

    /// Submit a run immediately, outside the schedule.
    pub async fn run_task_now(&self, agent_id: &str) -> Result<SubmitOutcome, Error> {
        let workers = self.workers.lock().await;
        let handle = workers.get(agent_id).ok_or_else(|| Error::Config {
            message: format!("unknown background agent: {agent_id}"),
        })?;
        let Some(tx) = &handle.queue_tx else {
            return Err(Error::Config {
                message: format!("background agent is stopped: {agent_id}"),
            });
        };
        match tx.try_send(()) {
            Ok(()) => Ok(SubmitOutcome::Queued),
            Err(mpsc::error::TrySendError::Full(())) => {
                handle.counters.queue_overflow.fetch_add(1, Ordering::Relaxed);
                warn!(agent = agent_id, "Task queue full, submission dropped");
                Ok(SubmitOutcome::QueueOverflow)
            }
            Err(mpsc::error::TrySendError::Closed(())) => Err(Error::Config {
                message: format!("background agent is stopped: {agent_id}"),
            }),
        }
    }

    /// Suspend the ticker; queued runs keep draining.
    pub async fn pause(&self, agent_id: &str) -> bool {
        self.set_state(agent_id, AgentState::Paused).await
    }

    /// Resume the ticker. The next fire time is re-derived from now.
    pub async fn resume(&self, agent_id: &str) -> bool {
        self.set_state(agent_id, AgentState::Scheduled).await
    }

    async fn set_state(&self, agent_id: &str, state: AgentState) -> bool {
        let workers = self.workers.lock().await;
        match workers.get(agent_id) {
            Some(handle) => handle.state_tx.send(state).is_ok(),
            None => false,
        }
    }

    /// Cancel the ticker and let the drainer finish the backlog.
    pub async fn stop(&self, agent_id: &str) -> bool {
        let mut workers = self.workers.lock().await;
        match workers.get_mut(agent_id) {
            Some(handle) => {
                let _ = handle.state_tx.send(AgentState::Stopped);
                handle.queue_tx = None;
                true
            }
            None => false,
        }
    }

    /// Stop, then remove the worker and its registration.
    pub async fn delete(&self, agent_id: &str) -> bool {
        let removed = {
            let mut workers = self.workers.lock().await;
            match workers.remove(agent_id) {
                Some(handle) => {
                    let _ = handle.state_tx.send(AgentState::Deleted);
                    drop(handle.queue_tx);
                    handle.ticker.abort();
                    Some(handle.drainer)
                }
                None => None,
            }
        };
        let Some(drainer) = removed else {
            return false;
        };
        let _ = timeout(Duration::from_secs(self.shutdown_grace_s), drainer).await;
        self.registry.remove(agent_id);
        info!(agent = agent_id, "Background agent deleted");
        true
    }

    /// Per-worker status report.
    pub async fn status(&self) -> Vec<AgentStatus> {
        let workers = self.workers.lock().await;
        let mut statuses: Vec<AgentStatus> = workers
            .values()
            .map(|handle| {
                let lifecycle = *handle.state_tx.borrow();
                let state = if lifecycle == AgentState::Scheduled
                    && handle.counters.executing.load(Ordering::Relaxed)
                {
                    AgentState::Running
                } else {
                    lifecycle
                };
                AgentStatus {
                    agent_id: handle.config.agent_id.clone(),
                    state,
                    queue_overflow: handle.counters.queue_overflow.load(Ordering::Relaxed),
                    runs_completed: handle.counters.completed.load(Ordering::Relaxed),
                    runs_failed: handle.counters.failed.load(Ordering::Relaxed),
                    next_fire: *handle.counters.next_fire.read().unwrap(),
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        statuses
    }

    /// Stop every worker: tickers cancel, drainers get the grace period
    /// to finish their current run, then everything is aborted.
    pub async fn shutdown(&self) {
        let mut workers = self.workers.lock().await;
        let handles: Vec<WorkerHandle> = workers.drain().map(|(_, h)| h).collect();
        drop(workers);

        for handle in &handles {
            let _ = handle.state_tx.send(AgentState::Stopped);
        }
        let grace = Duration::from_secs(self.shutdown_grace_s);
        for mut handle in handles {
            handle.queue_tx = None;
            handle.ticker.abort();
            if timeout(grace, &mut handle.drainer).await.is_err() {
                warn!(agent = %handle.config.agent_id, "Shutdown grace elapsed, aborting worker");
                handle.drainer.abort();
            }
        }
        info!("Background manager shut down");
    }
}

async fn ticker_loop(
    config: TaskConfig,
    mut state_rx: watch::Receiver<AgentState>,
    queue_tx: mpsc::Sender<()>,
    counters: Arc<Counters>,
) {
    let cron = match &config.schedule {
        Schedule::Cron { expr } => Some(CronExpr::parse(expr).expect("validated at registration")),
        Schedule::Interval { .. } => None,
    };

    loop {
        // Copy the state out; holding the watch borrow across an await
        // would block the sender.
        let state = *state_rx.borrow_and_update();
        match state {
            AgentState::Stopped | AgentState::Deleted => break,
            AgentState::Paused => {
                *counters.next_fire.write().unwrap() = None;
                if state_rx.changed().await.is_err() {
                    break;
                }
                continue;
            }
            _ => {}
        }

        let now = Utc::now();
        let fire_at = match (&config.schedule, &cron) {
            (Schedule::Interval { seconds }, _) => now + ChronoDuration::seconds(*seconds as i64),
            (Schedule::Cron { .. }, Some(expr)) => match expr.next_after(&now) {
                Some(t) => t,
                None => break,
            },
            _ => unreachable!(),
        };
        *counters.next_fire.write().unwrap() = Some(fire_at);
        let delay = (fire_at - now).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = sleep(delay) => {
                if *state_rx.borrow() != AgentState::Scheduled {
                    continue;
                }
                match queue_tx.try_send(()) {
                    Ok(()) => debug!(agent = %config.agent_id, "Scheduled task enqueued"),
                    Err(mpsc::error::TrySendError::Full(())) => {
                        counters.queue_overflow.fetch_add(1, Ordering::Relaxed);
                        warn!(agent = %config.agent_id, "Task queue full, scheduled fire dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(())) => break,
                }
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                // Re-derive the next fire from the new state.
                continue;
            }
        }
    }
}

async fn drainer_loop(
    config: TaskConfig,
    mut queue_rx: mpsc::Receiver<()>,
    runner: Arc<dyn TaskRunner>,
    events: Option<Arc<EventRouter>>,
    counters: Arc<Counters>,
) {
    while queue_rx.recv().await.is_some() {
        counters.executing.store(true, Ordering::Relaxed);
        let mut attempt_errors: Vec<String> = Vec::new();

        for attempt in 0..=config.max_retries {
            let result = if config.timeout_s == 0 {
                runner.run_task(&config).await
            } else {
                match timeout(Duration::from_secs(config.timeout_s), runner.run_task(&config))
                    .await
                {
                    Ok(inner) => inner,
                    Err(_) => Err(Error::Tool(corvid_core::error::ToolError::Timeout {
                        tool_name: config.agent_id.clone(),
                        timeout_secs: config.timeout_s,
                    })),
                }
            };

            match result {
                Ok(_) => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                    attempt_errors.clear();
                    break;
                }
                Err(e) => {
                    warn!(
                        agent = %config.agent_id,
                        attempt,
                        kind = e.kind(),
                        "Background run failed: {e}"
                    );
                    attempt_errors.push(e.kind().to_string());
                    if attempt < config.max_retries && config.retry_delay_s > 0 {
                        sleep(Duration::from_secs(config.retry_delay_s)).await;
                    }
                }
            }
        }

        if !attempt_errors.is_empty() {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            if let Some(events) = &events {
                let session = config
                    .session_id
                    .clone()
                    .unwrap_or_else(|| config.agent_id.clone());
                let _ = events
                    .emit(AgentEvent::new(
                        session,
                        config.agent_id.clone(),
                        EventKind::TaskFailed,
                        serde_json::json!({
                            "query": config.query,
                            "attempts": attempt_errors.len(),
                            "errors": attempt_errors,
                        }),
                    ))
                    .await;
            }
        }
        counters.executing.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    /// Runner that counts attempts and either succeeds, fails, or hangs.
    struct ScriptedRunner {
        attempts: AtomicU64,
        behavior: Behavior,
    }

    enum Behavior {
        Succeed,
        SleepSecs(u64),
        FailAlways,
    }

    #[async_trait]
    impl TaskRunner for ScriptedRunner {
        async fn run_task(&self, _config: &TaskConfig) -> Result<String, Error> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Succeed => Ok("done".into()),
                Behavior::SleepSecs(s) => {
                    sleep(Duration::from_secs(s)).await;
                    Ok("slow done".into())
                }
                Behavior::FailAlways => Err(Error::Internal("scripted failure".into())),
            }
        }
    }

    fn interval_config(agent: &str, queue_size: usize) -> TaskConfig {
        TaskConfig {
            agent_id: agent.into(),
            query: "tick".into(),
            schedule: Schedule::Interval { seconds: 3600 },
            timeout_s: 0,
            max_retries: 0,
            retry_delay_s: 0,
            queue_size,
            session_id: None,
        }
    }

    #[tokio::test]
    async fn create_then_status() {
        let runner = Arc::new(ScriptedRunner {
            attempts: AtomicU64::new(0),
            behavior: Behavior::Succeed,
        });
        let manager = BackgroundManager::new(runner);
        manager.create_agent(interval_config("a1", 4)).await.unwrap();

        let status = manager.status().await;
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].agent_id, "a1");
        assert_eq!(status[0].state, AgentState::Scheduled);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_agent_rejected() {
        let runner = Arc::new(ScriptedRunner {
            attempts: AtomicU64::new(0),
            behavior: Behavior::Succeed,
        });
        let manager = BackgroundManager::new(runner);
        manager.create_agent(interval_config("a1", 4)).await.unwrap();
        assert!(manager.create_agent(interval_config("a1", 4)).await.is_err());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn run_task_now_executes() {
        let runner = Arc::new(ScriptedRunner {
            attempts: AtomicU64::new(0),
            behavior: Behavior::Succeed,
        });
        let manager = BackgroundManager::new(runner.clone());
        manager.create_agent(interval_config("a1", 4)).await.unwrap();

        assert_eq!(
            manager.run_task_now("a1").await.unwrap(),
            SubmitOutcome::Queued
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runner.attempts.load(Ordering::SeqCst), 1);

        let status = manager.status().await;
        assert_eq!(status[0].runs_completed, 1);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn queue_overflow_on_full_queue() {
        // A runner that hangs keeps the drainer busy; with queue_size 1
        // the first extra submission fills the queue, the second drops.
        let runner = Arc::new(ScriptedRunner {
            attempts: AtomicU64::new(0),
            behavior: Behavior::SleepSecs(3600),
        });
        let manager = BackgroundManager::new(runner).with_shutdown_grace(0);
        manager.create_agent(interval_config("a1", 1)).await.unwrap();

        assert_eq!(manager.run_task_now("a1").await.unwrap(), SubmitOutcome::Queued);
        tokio::time::sleep(Duration::from_millis(50)).await; // drainer picks it up
        assert_eq!(manager.run_task_now("a1").await.unwrap(), SubmitOutcome::Queued);
        assert_eq!(
            manager.run_task_now("a1").await.unwrap(),
            SubmitOutcome::QueueOverflow
        );

        let status = manager.status().await;
        assert_eq!(status[0].queue_overflow, 1);
        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_retries_then_failed_status() {
        // Handler sleeps 2s against a 1s timeout with 2 retries: three
        // attempts, each timing out, then the run is marked failed.
        let runner = Arc::new(ScriptedRunner {
            attempts: AtomicU64::new(0),
            behavior: Behavior::SleepSecs(2),
        });
        let events = Arc::new(EventRouter::in_memory());
        let manager = BackgroundManager::new(runner.clone())
            .with_events(events.clone())
            .with_shutdown_grace(0);

        let mut config = interval_config("a1", 4);
        config.timeout_s = 1;
        config.max_retries = 2;
        config.retry_delay_s = 0;
        config.session_id = Some("bg-session".into());
        manager.create_agent(config).await.unwrap();

        manager.run_task_now("a1").await.unwrap();
        // Paused clock: sleeps auto-advance, so the retries resolve fast.
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if runner.attempts.load(Ordering::SeqCst) >= 3 {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(runner.attempts.load(Ordering::SeqCst), 3);
        let status = manager.status().await;
        assert_eq!(status[0].runs_failed, 1);
        assert_eq!(status[0].runs_completed, 0);

        let emitted = events.read("bg-session", 0, 0).await.unwrap();
        let failed: Vec<_> = emitted
            .iter()
            .filter(|e| e.kind == EventKind::TaskFailed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].payload["attempts"], 3);
        assert_eq!(failed[0].payload["errors"][0], "tool_timeout");

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn pause_suspends_ticker_resume_rearms() {
        let runner = Arc::new(ScriptedRunner {
            attempts: AtomicU64::new(0),
            behavior: Behavior::Succeed,
        });
        let manager = BackgroundManager::new(runner);
        manager.create_agent(interval_config("a1", 4)).await.unwrap();

        assert!(manager.pause("a1").await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let status = manager.status().await;
        assert_eq!(status[0].state, AgentState::Paused);
        assert!(status[0].next_fire.is_none());

        let before_resume = Utc::now();
        assert!(manager.resume("a1").await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let status = manager.status().await;
        assert_eq!(status[0].state, AgentState::Scheduled);
        assert!(status[0].next_fire.unwrap() >= before_resume);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn stop_rejects_new_submissions() {
        let runner = Arc::new(ScriptedRunner {
            attempts: AtomicU64::new(0),
            behavior: Behavior::Succeed,
        });
        let manager = BackgroundManager::new(runner);
        manager.create_agent(interval_config("a1", 4)).await.unwrap();

        assert!(manager.stop("a1").await);
        assert!(manager.run_task_now("a1").await.is_err());
        let status = manager.status().await;
        assert_eq!(status[0].state, AgentState::Stopped);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn delete_removes_worker_and_registration() {
        let runner = Arc::new(ScriptedRunner {
            attempts: AtomicU64::new(0),
            behavior: Behavior::Succeed,
        });
        let manager = BackgroundManager::new(runner).with_shutdown_grace(1);
        manager.create_agent(interval_config("a1", 4)).await.unwrap();

        assert!(manager.delete("a1").await);
        assert!(manager.status().await.is_empty());
        assert!(manager.registry().get("a1").is_none());
        assert!(!manager.delete("a1").await);
    }
}
