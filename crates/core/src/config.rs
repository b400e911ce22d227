//! Agent configuration — a single record with every runtime knob.
//!
//! All fields have serde defaults so partial configs deserialize cleanly.
//! `validate()` enforces the construction-time invariants; an invalid
//! config never reaches a running agent.

use crate::error::Error;
use serde::{Deserialize, Serialize};

/// Configuration for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent identifier
    pub agent_id: String,

    /// Model name passed to the LLM client
    #[serde(default = "default_model")]
    pub model: String,

    /// System instruction prepended to every prompt
    #[serde(default)]
    pub system_instruction: String,

    /// Maximum reasoning-loop steps per run
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Per-tool-call timeout in seconds (0 = no timer)
    #[serde(default = "default_tool_call_timeout")]
    pub tool_call_timeout_s: u64,

    /// Wall-clock deadline per run in seconds (0 = unbounded)
    #[serde(default)]
    pub max_execution_time_s: u64,

    /// LLM request limit per run (0 = unbounded)
    #[serde(default)]
    pub request_limit: u64,

    /// Combined input+output token limit per run (0 = unbounded)
    #[serde(default)]
    pub total_tokens_limit: u64,

    /// Abort the run on the first tool failure instead of reporting it
    /// to the model
    #[serde(default)]
    pub fail_fast: bool,

    /// Maximum sub-agent nesting depth
    #[serde(default = "default_sub_agent_depth")]
    pub sub_agent_depth_limit: u8,

    /// Stored-history shaping (post-persist summarization)
    #[serde(default)]
    pub memory_config: MemoryConfig,

    /// Live-prompt shaping (pre-LLM truncation/summarization)
    #[serde(default)]
    pub context_management: ContextManagementConfig,

    /// Large tool-output offloading
    #[serde(default)]
    pub tool_offload: OffloadConfig,

    /// Input screening
    #[serde(default)]
    pub guardrail_config: GuardrailConfig,

    /// BM25 tool selection instead of the full catalog
    #[serde(default)]
    pub enable_advanced_tool_use: bool,

    /// Register skill scripts as tools
    #[serde(default)]
    pub enable_agent_skills: bool,

    /// Directory scanned for skill scripts when skills are enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills_dir: Option<String>,

    /// Whether the model gets a builtin tool for searching its own
    /// session history
    #[serde(default)]
    pub memory_tool_backend: MemoryToolBackend,
}

/// Backend for the builtin memory-search tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryToolBackend {
    /// No memory tool registered
    #[default]
    None,
    /// Search the local memory router
    Local,
}

fn default_model() -> String {
    "default".into()
}
fn default_max_steps() -> u32 {
    15
}
fn default_tool_call_timeout() -> u64 {
    30
}
fn default_sub_agent_depth() -> u8 {
    3
}

impl AgentConfig {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            model: default_model(),
            system_instruction: String::new(),
            max_steps: default_max_steps(),
            tool_call_timeout_s: default_tool_call_timeout(),
            max_execution_time_s: 0,
            request_limit: 0,
            total_tokens_limit: 0,
            fail_fast: false,
            sub_agent_depth_limit: default_sub_agent_depth(),
            memory_config: MemoryConfig::default(),
            context_management: ContextManagementConfig::default(),
            tool_offload: OffloadConfig::default(),
            guardrail_config: GuardrailConfig::default(),
            enable_advanced_tool_use: false,
            enable_agent_skills: false,
            skills_dir: None,
            memory_tool_backend: MemoryToolBackend::None,
        }
    }

    /// Check construction-time invariants.
    pub fn validate(&self) -> Result<(), Error> {
        if self.agent_id.is_empty() {
            return Err(Error::Config {
                message: "agent_id must not be empty".into(),
            });
        }
        if self.max_steps == 0 {
            return Err(Error::Config {
                message: "max_steps must be at least 1".into(),
            });
        }
        if self.context_management.enabled && self.context_management.preserve_recent < 4 {
            return Err(Error::Config {
                message: "context_management.preserve_recent must be at least 4".into(),
            });
        }
        if self.context_management.threshold_percent == 0
            || self.context_management.threshold_percent > 100
        {
            return Err(Error::Config {
                message: "context_management.threshold_percent must be in 1..=100".into(),
            });
        }
        if self.tool_offload.enabled && self.tool_offload.threshold_tokens == 0 {
            return Err(Error::Config {
                message: "tool_offload.threshold_tokens must be positive".into(),
            });
        }
        if self.tool_offload.enabled && self.tool_offload.max_preview_tokens == 0 {
            return Err(Error::Config {
                message: "tool_offload.max_preview_tokens must be positive".into(),
            });
        }
        if self.memory_config.value == 0 && self.memory_config.summary.enabled {
            return Err(Error::Config {
                message: "memory_config.value must be positive when summarization is enabled"
                    .into(),
            });
        }
        Ok(())
    }
}

/// Mode shared by memory and context shaping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetMode {
    /// Count messages
    SlidingWindow,
    /// Count tokens
    #[default]
    TokenBudget,
}

/// Stored-history shaping config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub mode: BudgetMode,

    /// Window size (messages) or token budget, per mode
    #[serde(default = "default_memory_value")]
    pub value: usize,

    #[serde(default)]
    pub summary: SummaryConfig,
}

fn default_memory_value() -> usize {
    100_000
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            mode: BudgetMode::TokenBudget,
            value: default_memory_value(),
            summary: SummaryConfig::default(),
        }
    }
}

/// Rolling-summary config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub retention_policy: RetentionPolicy,
}

/// What happens to messages once a summary supersedes them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Keep them stored, marked inactive
    #[default]
    Keep,
    /// Remove them from the store
    Delete,
}

/// Live-prompt shaping config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextManagementConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub mode: BudgetMode,

    /// Token budget or message-count window, per mode
    #[serde(default = "default_context_value")]
    pub value: usize,

    /// Trigger at value × threshold_percent / 100
    #[serde(default = "default_threshold_percent")]
    pub threshold_percent: u8,

    #[serde(default)]
    pub strategy: ContextStrategy,

    /// Newest messages always retained
    #[serde(default = "default_preserve_recent")]
    pub preserve_recent: usize,
}

fn default_context_value() -> usize {
    100_000
}
fn default_threshold_percent() -> u8 {
    75
}
fn default_preserve_recent() -> usize {
    4
}

impl Default for ContextManagementConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: BudgetMode::TokenBudget,
            value: default_context_value(),
            threshold_percent: default_threshold_percent(),
            strategy: ContextStrategy::default(),
            preserve_recent: default_preserve_recent(),
        }
    }
}

/// What to do with overflowing prompt history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextStrategy {
    #[default]
    Truncate,
    SummarizeAndTruncate,
}

/// Tool-output offloading config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffloadConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Offload when the result token estimate exceeds this
    #[serde(default = "default_threshold_tokens")]
    pub threshold_tokens: usize,

    /// Offload when the result byte size exceeds this
    #[serde(default = "default_threshold_bytes")]
    pub threshold_bytes: usize,

    /// Cap on the preview rendered into the prompt
    #[serde(default = "default_max_preview_tokens")]
    pub max_preview_tokens: usize,

    /// Cap on preview line count
    #[serde(default = "default_max_preview_lines")]
    pub max_preview_lines: usize,

    /// Optional on-disk mirror for artifact content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<String>,

    /// Artifacts older than this are swept by cleanup
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_threshold_tokens() -> usize {
    500
}
fn default_threshold_bytes() -> usize {
    2000
}
fn default_max_preview_tokens() -> usize {
    150
}
fn default_max_preview_lines() -> usize {
    10
}
fn default_retention_days() -> u32 {
    7
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_tokens: default_threshold_tokens(),
            threshold_bytes: default_threshold_bytes(),
            max_preview_tokens: default_max_preview_tokens(),
            max_preview_lines: default_max_preview_lines(),
            storage_dir: None,
            retention_days: default_retention_days(),
        }
    }
}

/// Input screening config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Block on any nonzero threat
    #[serde(default)]
    pub strict_mode: bool,

    /// Multiplier on the aggregate threat score
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f32,

    #[serde(default = "default_max_input_length")]
    pub max_input_length: usize,

    #[serde(default = "default_true")]
    pub enable_pattern_detection: bool,

    #[serde(default = "default_true")]
    pub enable_heuristic_detection: bool,

    #[serde(default = "default_true")]
    pub enable_encoding_detection: bool,

    #[serde(default = "default_true")]
    pub enable_entropy_detection: bool,

    #[serde(default = "default_true")]
    pub enable_sequential_detection: bool,

    /// Inputs matching any of these regexes pass with threat 0
    #[serde(default)]
    pub allowlist_patterns: Vec<String>,

    /// Inputs matching any of these regexes block with threat 1
    #[serde(default)]
    pub blocklist_patterns: Vec<String>,
}

fn default_sensitivity() -> f32 {
    1.0
}
fn default_max_input_length() -> usize {
    10_000
}
fn default_true() -> bool {
    true
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strict_mode: false,
            sensitivity: default_sensitivity(),
            max_input_length: default_max_input_length(),
            enable_pattern_detection: true,
            enable_heuristic_detection: true,
            enable_encoding_detection: true,
            enable_entropy_detection: true,
            enable_sequential_detection: true,
            allowlist_patterns: Vec::new(),
            blocklist_patterns: Vec::new(),
        }
    }
}
