//! Workflow composition over agents.
//!
//! Three orchestrators: `Sequential` threads each step's answer into the
//! next step's input, `Parallel` fans one task out to every child and
//! joins all results, `Router` asks an LLM to pick exactly one child for
//! the task (with bounded re-routing on refusal).

use corvid_core::error::{Error, LlmError};
use corvid_core::llm::{CompletionRequest, LlmClient};
use corvid_core::message::{Message, SessionId};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::{AgentCore, RunError};

/// Runs agents one after another, threading answers forward.
pub struct SequentialWorkflow {
    steps: Vec<Arc<AgentCore>>,
}

impl SequentialWorkflow {
    pub fn new(steps: Vec<Arc<AgentCore>>) -> Self {
        Self { steps }
    }

    /// The output of step *i* becomes the user input of step *i+1*.
    /// A step that ends in an error aborts the chain.
    pub async fn run(&self, input: &str) -> Result<String, Error> {
        let mut current = input.to_string();
        for (i, step) in self.steps.iter().enumerate() {
            debug!(step = i, agent = step.agent_id(), "Sequential step");
            let result = step.run(&current, None).await;
            if let Some(error) = result.error {
                return Err(Error::Internal(format!(
                    "step {i} ({}) failed: {}: {}",
                    step.agent_id(),
                    error.kind,
                    error.message
                )));
            }
            current = result.response;
        }
        Ok(current)
    }
}

/// Runs every child on the same task concurrently.
pub struct ParallelWorkflow {
    children: Vec<Arc<AgentCore>>,
}

impl ParallelWorkflow {
    pub fn new(children: Vec<Arc<AgentCore>>) -> Self {
        Self { children }
    }

    /// Join-all semantics: waits for every child, then returns a map
    /// from child name to its answer or error.
    pub async fn run(&self, input: &str) -> BTreeMap<String, Result<String, RunError>> {
        let runs = self.children.iter().map(|child| {
            let child = child.clone();
            let input = input.to_string();
            async move {
                let result = child.run(&input, None).await;
                let value = match result.error {
                    None => Ok(result.response),
                    Some(error) => Err(error),
                };
                (child.agent_id().to_string(), value)
            }
        });

        join_all(runs).await.into_iter().collect()
    }
}

/// A routed child: name, routing description, agent.
pub struct Route {
    pub name: String,
    pub description: String,
    pub agent: Arc<AgentCore>,
}

/// Dispatches each task to exactly one child, chosen by an LLM call.
pub struct RouterWorkflow {
    llm: Arc<dyn LlmClient>,
    model: String,
    routes: Vec<Route>,
    retry_limit: u32,
}

impl RouterWorkflow {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>, routes: Vec<Route>) -> Self {
        Self {
            llm,
            model: model.into(),
            routes,
            retry_limit: 1,
        }
    }

    /// Bound on re-routing attempts after a refusal.
    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    fn routing_prompt(&self, task: &str) -> String {
        let catalog: String = self
            .routes
            .iter()
            .map(|r| format!("- {}: {}", r.name, r.description))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "You route tasks to agents. Available agents:\n{catalog}\n\n\
             Task: {task}\n\n\
             Respond with exactly one agent name from the list. If no agent \
             fits, respond with REFUSE: <reason>."
        )
    }

    /// Pick a child and run the original task through it.
    pub async fn run(&self, task: &str) -> Result<String, Error> {
        if self.routes.is_empty() {
            return Err(Error::Config {
                message: "router workflow has no routes".into(),
            });
        }

        let mut last_refusal = String::new();
        for attempt in 0..=self.retry_limit {
            let session = SessionId::new();
            let completion = self
                .llm
                .complete(CompletionRequest {
                    model: self.model.clone(),
                    messages: vec![Message::system(session, self.routing_prompt(task))],
                    tools: vec![],
                    temperature: 0.0,
                    max_tokens: Some(128),
                })
                .await?;

            let choice = completion.text.trim();
            if let Some(reason) = choice.strip_prefix("REFUSE:") {
                last_refusal = reason.trim().to_string();
                warn!(attempt, reason = %last_refusal, "Router refused");
                continue;
            }

            let selected = self
                .routes
                .iter()
                .find(|r| r.name.eq_ignore_ascii_case(choice));
            let Some(route) = selected else {
                last_refusal = format!("unknown agent '{choice}'");
                warn!(attempt, choice, "Router picked an unknown agent");
                continue;
            };

            info!(agent = %route.name, "Router selected agent");
            let result = route.agent.run(task, None).await;
            return match result.error {
                None => Ok(result.response),
                Some(error) => Err(Error::Internal(format!(
                    "routed agent {} failed: {}: {}",
                    route.name, error.kind, error.message
                ))),
            };
        }

        Err(Error::Llm(LlmError::InvalidOutput(format!(
            "router gave no usable selection after {} attempts: {last_refusal}",
            self.retry_limit + 1
        ))))
    }
}
