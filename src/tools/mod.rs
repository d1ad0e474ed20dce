//! Tools module - external collaborators the agent acts through
//!
//! File and terminal operations are sandboxed to the workspace. Web search
//! goes through a [`SearchProvider`].

mod filesystem;
mod shell;
pub mod web;

pub use filesystem::FileOps;
pub use shell::Terminal;
pub use web::{SearchHit, SearchProvider, SearchResponse, TavilySearch};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::Result;
use crate::error::Error;

/// Cap on tool output handed back to the model, in characters.
pub const MAX_OUTPUT_CHARS: usize = 10_000;

/// Tool definition for LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Tool trait - interface for sandboxed collaborators
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name used in function calls
    fn name(&self) -> &str;

    /// Description of what the tool does
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters(&self) -> Value;

    /// Execute the tool with given parameters
    async fn execute(&self, params: &Value) -> Result<String>;

    /// Convert to tool definition for LLM
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Fetch a required string parameter
pub(crate) fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Tool(format!("Missing '{key}' parameter")))
}

/// Truncate output to [`MAX_OUTPUT_CHARS`], on a char boundary
pub fn truncate_output(text: String) -> String {
    if text.len() <= MAX_OUTPUT_CHARS {
        return text;
    }
    let mut end = MAX_OUTPUT_CHARS;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...\n\n[Truncated - {} total chars]", &text[..end], text.len())
}
