//! File operations - read, write and list, confined to the workspace

use std::path::{Component, Path, PathBuf};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;
use crate::Result;
use crate::error::Error;
use super::{required_str, truncate_output, Tool};

/// Sandboxed file operations (`file_op`)
pub struct FileOps {
    workspace: PathBuf,
}

impl FileOps {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self { workspace: workspace.into() }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Resolve `path` inside the workspace, rejecting anything that escapes it.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let candidate = Path::new(path);
        let relative = if candidate.is_absolute() {
            candidate
                .strip_prefix(&self.workspace)
                .map_err(|_| Error::Tool(format!("Path outside workspace: {path}")))?
        } else {
            candidate
        };

        let mut resolved = self.workspace.clone();
        let mut depth = 0usize;
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir if depth > 0 => {
                    resolved.pop();
                    depth -= 1;
                }
                _ => return Err(Error::Tool(format!("Path outside workspace: {path}"))),
            }
        }
        Ok(resolved)
    }

    async fn read(&self, path: &str) -> Result<String> {
        let full = self.resolve(path)?;
        tokio::fs::read_to_string(&full)
            .await
            .map(truncate_output)
            .map_err(|e| Error::Tool(format!("Failed to read {path}: {e}")))
    }

    async fn write(&self, path: &str, content: &str) -> Result<String> {
        let full = self.resolve(path)?;

        // Create parent directories if needed
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Tool(format!("Failed to create directory: {e}")))?;
        }

        tokio::fs::write(&full, content)
            .await
            .map_err(|e| Error::Tool(format!("Failed to write {path}: {e}")))?;

        Ok(format!("Successfully wrote {} bytes to {}", content.len(), path))
    }

    async fn list(&self, path: &str) -> Result<String> {
        let full = self.resolve(path)?;
        let mut dir = tokio::fs::read_dir(&full)
            .await
            .map_err(|e| Error::Tool(format!("Failed to read directory {path}: {e}")))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().await.map(|ft| ft.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
        entries.sort();

        Ok(truncate_output(entries.join("\n")))
    }
}

#[async_trait]
impl Tool for FileOps {
    fn name(&self) -> &str { "file_op" }
    fn description(&self) -> &str { "Read, write or list files inside the workspace" }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "op": {
                    "type": "string",
                    "enum": ["read", "write", "list"],
                    "description": "Operation to perform"
                },
                "path": {
                    "type": "string",
                    "description": "Path relative to the workspace"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write (write only)"
                }
            },
            "required": ["op", "path"]
        })
    }

    async fn execute(&self, params: &Value) -> Result<String> {
        let op = required_str(params, "op")?;
        let path = params.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        debug!(op, path, "file_op");

        match op {
            "read" => self.read(path).await,
            "write" => self.write(path, required_str(params, "content")?).await,
            "list" => self.list(path).await,
            other => Err(Error::UnsupportedAction(format!("file_op: {other}"))),
        }
    }
}
