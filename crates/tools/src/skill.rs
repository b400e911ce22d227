//! Skill-script tools — local executables wrapped as tools.
//!
//! A skill is any executable in the skills directory. Invocation shells
//! out under a timeout with the arguments serialized as JSON on stdin;
//! whatever the script prints on stdout becomes the tool output.

use async_trait::async_trait;
use corvid_core::error::ToolError;
use corvid_core::tool::{ParamSpec, ParamType, Tool, ToolDescriptor, ToolKind, ToolOutput};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::{Duration, timeout};
use tracing::{debug, warn};

pub struct SkillScriptTool {
    name: String,
    path: PathBuf,
    timeout_s: u64,
}

impl SkillScriptTool {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, timeout_s: u64) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            timeout_s,
        }
    }
}

#[async_trait]
impl Tool for SkillScriptTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name.clone(),
            description: format!("Run the '{}' skill script", self.name),
            parameters: vec![ParamSpec::optional(
                "input",
                ParamType::Object,
                serde_json::json!({}),
                "Arguments passed to the script as JSON on stdin",
            )],
            kind: ToolKind::SkillScript,
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let payload = arguments.get("input").cloned().unwrap_or(arguments);
        let stdin_bytes =
            serde_json::to_vec(&payload).map_err(|e| ToolError::InvalidArguments {
                tool_name: self.name.clone(),
                reason: format!("arguments not serializable: {e}"),
            })?;

        let mut child = Command::new(&self.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name.clone(),
                reason: format!("spawn {}: {e}", self.path.display()),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(&stdin_bytes).await;
            // Close stdin so scripts reading to EOF terminate.
        }

        let waited = if self.timeout_s == 0 {
            child.wait_with_output().await
        } else {
            match timeout(Duration::from_secs(self.timeout_s), child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(ToolError::Timeout {
                        tool_name: self.name.clone(),
                        timeout_secs: self.timeout_s,
                    });
                }
            }
        };

        let output = waited.map_err(|e| ToolError::ExecutionFailed {
            tool_name: self.name.clone(),
            reason: format!("wait: {e}"),
        })?;

        if !output.status.success() {
            return Err(ToolError::ExecutionFailed {
                tool_name: self.name.clone(),
                reason: format!(
                    "exit {}: {}",
                    output.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(ToolOutput::text(
            String::from_utf8_lossy(&output.stdout).trim_end(),
        ))
    }
}

/// Scan a directory for skill scripts, one tool per executable file.
pub fn discover_skills(dir: &Path, timeout_s: u64) -> Vec<SkillScriptTool> {
    let mut skills = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        warn!(dir = %dir.display(), "Skill directory not readable");
        return skills;
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    for path in paths {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(|s| s.to_string()) else {
            continue;
        };
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let executable = path
                .metadata()
                .map(|m| m.permissions().mode() & 0o111 != 0)
                .unwrap_or(false);
            if !executable {
                continue;
            }
        }
        debug!(skill = stem, path = %path.display(), "Discovered skill script");
        skills.push(SkillScriptTool::new(stem, path, timeout_s));
    }
    skills
}
