//! Tool registry — copy-on-write snapshots of the tool catalog.
//!
//! Registrations replace the whole map pointer, so the reasoning loop can
//! hold a consistent snapshot for an entire turn without locking. The
//! catalog rendering is deterministic: tools sort by (kind priority,
//! name).

use corvid_core::error::{Error, ToolError};
use corvid_core::llm::ToolSchema;
use corvid_core::tool::{Tool, ToolCall, ToolDescriptor, ToolOutput};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::bm25::Bm25Index;

pub struct ToolRegistry {
    tools: RwLock<Arc<HashMap<String, Arc<dyn Tool>>>>,
    index: RwLock<Arc<Bm25Index>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(Arc::new(HashMap::new())),
            index: RwLock::new(Arc::new(Bm25Index::build(&[]))),
        }
    }

    /// Register a tool. Duplicate names fail.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<(), Error> {
        let descriptor = tool.descriptor();
        let mut guard = self.tools.write().unwrap();
        if guard.contains_key(&descriptor.name) {
            return Err(Error::Config {
                message: format!("tool already registered: {}", descriptor.name),
            });
        }
        let mut next = (**guard).clone();
        next.insert(descriptor.name.clone(), tool);
        *guard = Arc::new(next);
        drop(guard);

        debug!(tool = %descriptor.name, kind = ?descriptor.kind, "Registered tool");
        self.rebuild_index();
        Ok(())
    }

    fn rebuild_index(&self) {
        let snapshot = self.snapshot();
        let mut entries: Vec<(String, corvid_core::tool::ToolKind, String)> = snapshot
            .values()
            .map(|tool| {
                let d = tool.descriptor();
                let param_names: Vec<&str> =
                    d.parameters.iter().map(|p| p.name.as_str()).collect();
                let text = format!("{} {} {}", d.name, d.description, param_names.join(" "));
                (d.name, d.kind, text)
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        *self.index.write().unwrap() = Arc::new(Bm25Index::build(&entries));
    }

    fn snapshot(&self) -> Arc<HashMap<String, Arc<dyn Tool>>> {
        self.tools.read().unwrap().clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.snapshot().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// All descriptors, sorted by (kind priority, name).
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let snapshot = self.snapshot();
        let mut descriptors: Vec<ToolDescriptor> =
            snapshot.values().map(|t| t.descriptor()).collect();
        descriptors.sort_by(|a, b| {
            a.kind
                .priority()
                .cmp(&b.kind.priority())
                .then_with(|| a.name.cmp(&b.name))
        });
        descriptors
    }

    /// The full catalog rendered for the LLM.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.descriptors()
            .into_iter()
            .map(|d| ToolSchema {
                parameters: d.parameters_schema(),
                name: d.name,
                description: d.description,
            })
            .collect()
    }

    /// Schemas for a subset of tools, preserving catalog order.
    pub fn schemas_for(&self, names: &[String]) -> Vec<ToolSchema> {
        self.schemas()
            .into_iter()
            .filter(|s| names.contains(&s.name))
            .collect()
    }

    /// Top-k tool names by BM25 relevance to the query.
    pub fn search(&self, query: &str, k: usize) -> Vec<String> {
        self.index.read().unwrap().search(query, k)
    }

    /// Execute a tool call.
    pub async fn execute(&self, call: &ToolCall) -> Result<ToolOutput, ToolError> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        tool.execute(call.arguments.clone()).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
