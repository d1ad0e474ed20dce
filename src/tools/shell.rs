//! Terminal operations - run shell commands in the workspace

use std::path::PathBuf;
use std::time::Duration;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;
use crate::Result;
use crate::error::Error;
use super::{required_str, truncate_output, Tool};

/// Sandboxed command execution (`terminal_op`)
pub struct Terminal {
    workspace: PathBuf,
    timeout: Duration,
}

impl Terminal {
    pub fn new(workspace: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self { workspace: workspace.into(), timeout }
    }
}

#[async_trait]
impl Tool for Terminal {
    fn name(&self) -> &str { "terminal_op" }
    fn description(&self) -> &str { "Execute a shell command in the workspace" }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Shell command to execute"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, params: &Value) -> Result<String> {
        let command = required_str(params, "command")?;
        debug!(command, "terminal_op");

        // kill_on_drop: a cancelled turn takes the child down with it
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workspace)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| {
                Error::UpstreamTimeout(format!(
                    "command exceeded {}s: {command}",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| Error::Tool(format!("Failed to execute command: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            if stderr.is_empty() {
                Ok(truncate_output(stdout.to_string()))
            } else {
                Ok(truncate_output(format!("{stdout}\n\n[stderr]\n{stderr}")))
            }
        } else {
            Err(Error::Tool(truncate_output(format!(
                "Command failed with exit code {}\nstdout: {}\nstderr: {}",
                output.status.code().unwrap_or(-1),
                stdout,
                stderr
            ))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn terminal(tmp: &TempDir) -> Terminal {
        Terminal::new(tmp.path(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_exec_echo() {
        let tmp = TempDir::new().unwrap();
        let result = terminal(&tmp)
            .execute(&json!({"command": "echo 'Hello, World!'"}))
            .await
            .unwrap();

        assert!(result.contains("Hello, World!"));
    }

    #[tokio::test]
    async fn test_runs_in_workspace() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("marker.txt"), "").unwrap();

        let result = terminal(&tmp).execute(&json!({"command": "ls"})).await.unwrap();
        assert!(result.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_exec_failed_command() {
        let tmp = TempDir::new().unwrap();
        let result = terminal(&tmp).execute(&json!({"command": "exit 1"})).await;

        assert!(matches!(result, Err(Error::Tool(_))));
    }

    #[tokio::test]
    async fn test_exec_timeout() {
        let tmp = TempDir::new().unwrap();
        let terminal = Terminal::new(tmp.path(), Duration::from_millis(100));

        let result = terminal.execute(&json!({"command": "sleep 5"})).await;
        assert!(matches!(result, Err(Error::UpstreamTimeout(_))));
    }
}
