//! Tooling for Corvid — the registry, BM25 tool selection, artifact
//! offloading, skill scripts, and the MCP provider adapter.

pub mod artifact_tools;
pub mod artifacts;
pub mod bm25;
pub mod mcp;
pub mod registry;
pub mod skill;

pub use artifact_tools::register_artifact_tools;
pub use artifacts::{ArtifactStats, ArtifactStore, ELLIPSIS, MAX_SEARCH_HITS, SearchHit};
pub use bm25::Bm25Index;
pub use mcp::{McpProxyTool, register_mcp_tools};
pub use registry::ToolRegistry;
pub use skill::{SkillScriptTool, discover_skills};
