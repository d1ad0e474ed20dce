//! Actions the model can request, and their results.
//!
//! The capability set is closed: a completion either names one of the
//! [`ActionKind`]s, names something else (`UnsupportedAction`), or carries no
//! action at all and is treated as a plain assistant message.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::Error;
use crate::Result;

use super::llm::LlmResponse;

/// Capability requested by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Search,
    FileOp,
    TerminalOp,
    Finalize,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Search => "search",
            ActionKind::FileOp => "file_op",
            ActionKind::TerminalOp => "terminal_op",
            ActionKind::Finalize => "finalize",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "search" | "web_search" => Ok(ActionKind::Search),
            "file_op" => Ok(ActionKind::FileOp),
            "terminal_op" => Ok(ActionKind::TerminalOp),
            "finalize" => Ok(ActionKind::Finalize),
            _ => Err(Error::UnsupportedAction(s.to_string())),
        }
    }
}

/// A parsed action request.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub kind: ActionKind,
    pub parameters: Value,
    /// Provider call id when the request came from a native function call.
    pub call_id: Option<String>,
}

impl ActionRequest {
    pub fn new(kind: ActionKind, parameters: Value) -> Self {
        let parameters = match parameters {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        Self {
            kind,
            parameters,
            call_id: None,
        }
    }

    pub fn search(query: impl Into<String>) -> Self {
        Self::new(ActionKind::Search, json!({ "query": query.into() }))
    }

    pub fn with_call_id(mut self, id: impl Into<String>) -> Self {
        self.call_id = Some(id.into());
        self
    }

    /// String parameter, if present.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }
}

/// Why an action did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionError {
    SearchUnavailable,
    Timeout,
    Failed,
    InvalidParameters,
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActionError::SearchUnavailable => "search unavailable",
            ActionError::Timeout => "timed out",
            ActionError::Failed => "failed",
            ActionError::InvalidParameters => "invalid parameters",
        })
    }
}

/// Normalized outcome of a dispatched action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResult {
    pub kind: ActionKind,
    pub success: bool,
    pub payload: Value,
    pub error: Option<ActionError>,
}

impl ActionResult {
    pub fn ok(kind: ActionKind, payload: Value) -> Self {
        Self {
            kind,
            success: true,
            payload,
            error: None,
        }
    }

    pub fn failed(kind: ActionKind, error: ActionError, message: impl Into<String>) -> Self {
        Self {
            kind,
            success: false,
            payload: json!({ "message": message.into() }),
            error: Some(error),
        }
    }

    /// Text fed back to the model as the tool message content.
    pub fn content(&self) -> String {
        if !self.success {
            let message = self.payload.get("message").and_then(Value::as_str).unwrap_or("");
            let error = self.error.unwrap_or(ActionError::Failed);
            return format!("{} {}: {}", self.kind, error, message);
        }

        ["text", "output", "answer"]
            .iter()
            .find_map(|key| self.payload.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| self.payload.to_string())
    }
}

fn fenced_json() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap_or_else(|e| panic!("invalid action regex: {e}"))
    })
}

/// Find a JSON object in completion text: a fenced block first, then a bare object.
fn extract_json(text: &str) -> Option<Value> {
    if let Some(captures) = fenced_json().captures(text) {
        if let Ok(value) = serde_json::from_str::<Value>(&captures[1]) {
            return Some(value);
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Parse the action a completion requests, if any.
///
/// Only the first native function call is honoured; one action per cycle.
pub fn parse_action(response: &LlmResponse) -> Result<Option<ActionRequest>> {
    if let Some(call) = response.tool_calls.first() {
        let kind: ActionKind = call.name.parse()?;
        return Ok(Some(
            ActionRequest::new(kind, call.arguments.clone()).with_call_id(call.id.clone()),
        ));
    }

    let Some(text) = response.content.as_deref() else {
        return Ok(None);
    };
    let Some(Value::Object(mut object)) = extract_json(text) else {
        return Ok(None);
    };
    let Some(action) = object.get("action").and_then(Value::as_str).map(str::to_string) else {
        return Ok(None);
    };

    let kind: ActionKind = action.parse()?;
    let parameters = object.remove("parameters").unwrap_or(Value::Null);
    Ok(Some(ActionRequest::new(kind, parameters)))
}
