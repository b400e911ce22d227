//! Background task configuration and registry.

use corvid_core::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::cron::CronExpr;

/// When a background task fires. Exactly one trigger per task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    /// Fixed period in seconds
    Interval { seconds: u64 },
    /// 5-field cron expression, evaluated in UTC
    Cron { expr: String },
}

/// Configuration for one background agent task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Agent this task belongs to (one worker per agent)
    pub agent_id: String,

    /// The query submitted on every fire
    pub query: String,

    /// Trigger
    pub schedule: Schedule,

    /// Per-run timeout in seconds (0 = no timer)
    #[serde(default = "default_timeout")]
    pub timeout_s: u64,

    /// Retries after a failed run
    #[serde(default)]
    pub max_retries: u32,

    /// Fixed delay between retries
    #[serde(default)]
    pub retry_delay_s: u64,

    /// Bound of the pending-task queue
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Session the runs execute in (fresh per run when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

fn default_timeout() -> u64 {
    60
}
fn default_queue_size() -> usize {
    8
}

impl TaskConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.agent_id.is_empty() {
            return Err(Error::Config {
                message: "agent_id must not be empty".into(),
            });
        }
        if self.queue_size == 0 {
            return Err(Error::Config {
                message: "queue_size must be at least 1".into(),
            });
        }
        match &self.schedule {
            Schedule::Interval { seconds } if *seconds == 0 => Err(Error::Config {
                message: "interval must be positive".into(),
            }),
            Schedule::Cron { expr } => {
                CronExpr::parse(expr).map_err(|e| Error::Config {
                    message: format!("invalid cron expression '{expr}': {e}"),
                })?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Registry of task configs, keyed by agent id.
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, TaskConfig>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, config: TaskConfig) -> Result<(), Error> {
        config.validate()?;
        self.tasks
            .write()
            .unwrap()
            .insert(config.agent_id.clone(), config);
        Ok(())
    }

    pub fn get(&self, agent_id: &str) -> Option<TaskConfig> {
        self.tasks.read().unwrap().get(agent_id).cloned()
    }

    /// Update an existing config. Fails when the agent is unknown.
    pub fn update(&self, config: TaskConfig) -> Result<(), Error> {
        config.validate()?;
        let mut tasks = self.tasks.write().unwrap();
        if !tasks.contains_key(&config.agent_id) {
            return Err(Error::Config {
                message: format!("no task registered for agent: {}", config.agent_id),
            });
        }
        tasks.insert(config.agent_id.clone(), config);
        Ok(())
    }

    pub fn remove(&self, agent_id: &str) -> bool {
        self.tasks.write().unwrap().remove(agent_id).is_some()
    }

    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tasks.read().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn all(&self) -> Vec<TaskConfig> {
        let mut configs: Vec<TaskConfig> = self.tasks.read().unwrap().values().cloned().collect();
        configs.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        configs
    }

    pub fn clear(&self) {
        self.tasks.write().unwrap().clear();
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(agent: &str) -> TaskConfig {
        TaskConfig {
            agent_id: agent.into(),
            query: "check the queue".into(),
            schedule: Schedule::Interval { seconds: 60 },
            timeout_s: 30,
            max_retries: 1,
            retry_delay_s: 5,
            queue_size: 4,
            session_id: None,
        }
    }

    #[test]
    fn register_and_get() {
        let registry = TaskRegistry::new();
        registry.register(config("a1")).unwrap();
        assert_eq!(registry.get("a1").unwrap().query, "check the queue");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn update_requires_existing() {
        let registry = TaskRegistry::new();
        assert!(registry.update(config("a1")).is_err());
        registry.register(config("a1")).unwrap();

        let mut updated = config("a1");
        updated.query = "new query".into();
        registry.update(updated).unwrap();
        assert_eq!(registry.get("a1").unwrap().query, "new query");
    }

    #[test]
    fn remove_and_clear() {
        let registry = TaskRegistry::new();
        registry.register(config("a1")).unwrap();
        registry.register(config("a2")).unwrap();
        assert_eq!(registry.agent_ids(), vec!["a1", "a2"]);

        assert!(registry.remove("a1"));
        assert!(!registry.remove("a1"));

        registry.clear();
        assert!(registry.agent_ids().is_empty());
    }

    #[test]
    fn invalid_cron_rejected() {
        let registry = TaskRegistry::new();
        let mut bad = config("a1");
        bad.schedule = Schedule::Cron { expr: "not a cron".into() };
        assert!(registry.register(bad).is_err());
    }

    #[test]
    fn zero_interval_rejected() {
        let mut bad = config("a1");
        bad.schedule = Schedule::Interval { seconds: 0 };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn zero_queue_rejected() {
        let mut bad = config("a1");
        bad.queue_size = 0;
        assert!(bad.validate().is_err());
    }
}
