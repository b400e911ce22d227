//! Guardrail for Corvid — pre-LLM input screening.
//!
//! A pipeline of independent detectors each scores the input in [0, 1];
//! the aggregate threat is `max(scores) × sensitivity`. Allowlist matches
//! short-circuit to threat 0, blocklist matches to threat 1. A blocked
//! input never reaches the LLM — the agent returns a synthetic refusal
//! and emits a `guardrail_blocked` event.

pub mod detectors;

use corvid_core::config::GuardrailConfig;
use corvid_core::error::Error;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use detectors::DetectorHit;

/// The refusal text returned for blocked inputs.
pub const REFUSAL_MESSAGE: &str =
    "I can't process this input because it was flagged by safety checks.";

/// One detector's contribution, as reported to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorReport {
    pub name: String,
    pub score: f32,
    pub reason: String,
}

/// The screening verdict for one input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailResult {
    pub blocked: bool,
    pub threat: f32,
    pub detectors: Vec<DetectorReport>,
}

impl GuardrailResult {
    fn clean() -> Self {
        Self {
            blocked: false,
            threat: 0.0,
            detectors: Vec::new(),
        }
    }
}

/// The guardrail pipeline. Allow/block regexes compile once at
/// construction; an invalid user pattern is a configuration error.
pub struct Guardrail {
    config: GuardrailConfig,
    allowlist: Vec<Regex>,
    blocklist: Vec<Regex>,
}

impl Guardrail {
    pub fn new(config: GuardrailConfig) -> Result<Self, Error> {
        let compile = |patterns: &[String], which: &str| -> Result<Vec<Regex>, Error> {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| Error::Config {
                        message: format!("invalid {which} pattern '{p}': {e}"),
                    })
                })
                .collect()
        };
        let allowlist = compile(&config.allowlist_patterns, "allowlist")?;
        let blocklist = compile(&config.blocklist_patterns, "blocklist")?;
        Ok(Self {
            config,
            allowlist,
            blocklist,
        })
    }

    /// Screen one input.
    pub fn check(&self, input: &str) -> GuardrailResult {
        if !self.config.enabled {
            return GuardrailResult::clean();
        }

        // Blocklist wins over allowlist; both short-circuit the detectors.
        if let Some(re) = self.blocklist.iter().find(|re| re.is_match(input)) {
            return GuardrailResult {
                blocked: true,
                threat: 1.0,
                detectors: vec![DetectorReport {
                    name: "blocklist".into(),
                    score: 1.0,
                    reason: format!("matched blocklist pattern '{}'", re.as_str()),
                }],
            };
        }
        if self.allowlist.iter().any(|re| re.is_match(input)) {
            return GuardrailResult::clean();
        }

        let mut hits: Vec<DetectorHit> = Vec::new();

        if input.len() > self.config.max_input_length {
            hits.push(DetectorHit {
                name: "input_too_long",
                score: 1.0,
                reason: format!(
                    "{} chars exceeds max_input_length {}",
                    input.len(),
                    self.config.max_input_length
                ),
            });
        }
        if self.config.enable_pattern_detection
            && let Some(hit) = detectors::pattern(input)
        {
            hits.push(hit);
        }
        if self.config.enable_heuristic_detection
            && let Some(hit) = detectors::heuristic(input)
        {
            hits.push(hit);
        }
        if self.config.enable_encoding_detection
            && let Some(hit) = detectors::encoding(input)
        {
            hits.push(hit);
        }
        if self.config.enable_entropy_detection
            && let Some(hit) = detectors::entropy(input)
        {
            hits.push(hit);
        }
        if self.config.enable_sequential_detection
            && let Some(hit) = detectors::sequential(input)
        {
            hits.push(hit);
        }

        let raw = hits.iter().map(|h| h.score).fold(0.0f32, f32::max);
        let threat = (raw * self.config.sensitivity).clamp(0.0, 1.0);
        let blocked = (self.config.strict_mode && threat > 0.0) || threat > 0.5;

        if blocked {
            debug!(threat, detectors = hits.len(), "Guardrail blocked input");
        }

        GuardrailResult {
            blocked,
            threat,
            detectors: hits
                .into_iter()
                .map(|h| DetectorReport {
                    name: h.name.into(),
                    score: h.score,
                    reason: h.reason,
                })
                .collect(),
        }
    }
}
