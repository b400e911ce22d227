//! Background scheduling for Corvid — cron/interval triggers, bounded
//! per-agent task queues, retries, and worker lifecycle.

pub mod cron;
pub mod manager;
pub mod registry;

pub use cron::CronExpr;
pub use manager::{
    AgentState, AgentStatus, BackgroundManager, SubmitOutcome, TaskRunner,
};
pub use registry::{Schedule, TaskConfig, TaskRegistry};
