//! Thread-safe metrics engine — monotonic counters plus a response-time
//! exponential moving average.
//!
//! One engine per agent. Sub-agent runs report their own snapshot, which
//! the parent absorbs so totals roll up the delegation tree.

use corvid_core::llm::Usage;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

/// Smoothing factor for the response-time EMA.
const EMA_ALPHA: f64 = 0.2;

/// A point-in-time metrics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Completed runs (successful or not)
    pub requests: u64,
    /// Prompt tokens consumed
    pub input_tokens: u64,
    /// Completion tokens produced
    pub output_tokens: u64,
    /// Tool invocations dispatched
    pub tool_calls: u64,
    /// Runs that ended in an error
    pub errors: u64,
    /// Wall-clock time across all runs
    pub total_time_ms: u64,
    /// Exponential moving average of per-run response time
    pub avg_response_ms: f64,
}

#[derive(Debug, Default)]
struct Totals {
    requests: u64,
    input_tokens: u64,
    output_tokens: u64,
    tool_calls: u64,
    errors: u64,
    total_time_ms: u64,
    ema_response_ms: Option<f64>,
}

/// The metrics engine. Counters only ever go up.
pub struct MetricsEngine {
    totals: RwLock<Totals>,
}

impl MetricsEngine {
    pub fn new() -> Self {
        Self {
            totals: RwLock::new(Totals::default()),
        }
    }

    /// Record one completed run.
    pub fn record_run(&self, duration_ms: u64, usage: Usage, tool_calls: u64, error: bool) {
        let mut totals = self.totals.write().unwrap();
        totals.requests += 1;
        totals.input_tokens += usage.input_tokens;
        totals.output_tokens += usage.output_tokens;
        totals.tool_calls += tool_calls;
        if error {
            totals.errors += 1;
        }
        totals.total_time_ms += duration_ms;
        totals.ema_response_ms = Some(match totals.ema_response_ms {
            Some(prev) => EMA_ALPHA * duration_ms as f64 + (1.0 - EMA_ALPHA) * prev,
            None => duration_ms as f64,
        });
    }

    /// Fold a sub-agent's snapshot into this engine.
    ///
    /// Counters and time aggregate; the EMA stays the parent's own, since
    /// child turn latencies are already inside the parent's run time.
    pub fn absorb(&self, child: &AgentMetrics) {
        let mut totals = self.totals.write().unwrap();
        totals.requests += child.requests;
        totals.input_tokens += child.input_tokens;
        totals.output_tokens += child.output_tokens;
        totals.tool_calls += child.tool_calls;
        totals.errors += child.errors;
        totals.total_time_ms += child.total_time_ms;
    }

    pub fn snapshot(&self) -> AgentMetrics {
        let totals = self.totals.read().unwrap();
        AgentMetrics {
            requests: totals.requests,
            input_tokens: totals.input_tokens,
            output_tokens: totals.output_tokens,
            tool_calls: totals.tool_calls,
            errors: totals.errors,
            total_time_ms: totals.total_time_ms,
            avg_response_ms: totals.ema_response_ms.unwrap_or(0.0),
        }
    }
}

impl Default for MetricsEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(input: u64, output: u64) -> Usage {
        Usage {
            input_tokens: input,
            output_tokens: output,
        }
    }

    #[test]
    fn counters_accumulate() {
        let engine = MetricsEngine::new();
        engine.record_run(100, usage(10, 5), 2, false);
        engine.record_run(200, usage(20, 10), 0, true);

        let m = engine.snapshot();
        assert_eq!(m.requests, 2);
        assert_eq!(m.input_tokens, 30);
        assert_eq!(m.output_tokens, 15);
        assert_eq!(m.tool_calls, 2);
        assert_eq!(m.errors, 1);
        assert_eq!(m.total_time_ms, 300);
    }

    #[test]
    fn ema_seeds_then_smooths() {
        let engine = MetricsEngine::new();
        engine.record_run(100, usage(0, 0), 0, false);
        assert!((engine.snapshot().avg_response_ms - 100.0).abs() < f64::EPSILON);

        engine.record_run(200, usage(0, 0), 0, false);
        // 0.2 * 200 + 0.8 * 100 = 120
        assert!((engine.snapshot().avg_response_ms - 120.0).abs() < 1e-9);
    }

    #[test]
    fn absorb_rolls_up_child_counters() {
        let parent = MetricsEngine::new();
        parent.record_run(50, usage(5, 5), 1, false);
        let before_ema = parent.snapshot().avg_response_ms;

        let child = AgentMetrics {
            requests: 3,
            input_tokens: 30,
            output_tokens: 12,
            tool_calls: 4,
            errors: 1,
            total_time_ms: 400,
            avg_response_ms: 133.0,
        };
        parent.absorb(&child);

        let m = parent.snapshot();
        assert_eq!(m.requests, 4);
        assert_eq!(m.input_tokens, 35);
        assert_eq!(m.tool_calls, 5);
        assert_eq!(m.errors, 1);
        assert_eq!(m.total_time_ms, 450);
        assert!((m.avg_response_ms - before_ema).abs() < f64::EPSILON);
    }

    #[test]
    fn snapshot_serializes() {
        let engine = MetricsEngine::new();
        engine.record_run(10, usage(1, 2), 0, false);
        let json = serde_json::to_string(&engine.snapshot()).unwrap();
        assert!(json.contains(r#""requests":1"#));
        assert!(json.contains(r#""input_tokens":1"#));
    }
}
