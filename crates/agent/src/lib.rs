//! The Corvid agent runtime — the reasoning loop and its facade.
//!
//! A run walks an observe–think–act cycle:
//!
//! 1. **Guard** the input (pattern/heuristic/encoding/entropy screening)
//! 2. **Load** session history through the memory router
//! 3. **Shape** the prompt to the context budget
//! 4. **Call** the LLM; dispatch any requested tools concurrently
//! 5. **Integrate** results (offloading oversized ones) and loop
//!
//! The loop ends on a tool-free answer or when a step/token/time budget
//! trips. `AgentCore` is the public surface; `workflow` composes agents
//! into sequential, parallel, and routed pipelines.

pub mod context;
pub mod core;
mod engine;
pub mod memory_tool;
pub mod test_helpers;
pub mod workflow;

pub use context::{ContextManager, ShapeOutcome};
pub use core::{AgentCore, RunError, RunResult};
pub use workflow::{ParallelWorkflow, Route, RouterWorkflow, SequentialWorkflow};
