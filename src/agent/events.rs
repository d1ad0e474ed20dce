//! Operational events streamed to the client, one per state transition.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::tools::SearchHit;

use super::action::{ActionError, ActionKind};
use super::llm::Usage;

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    LoopDetected,
    Failed,
    Cancelled,
}

/// Events emitted by an agent session, in transition order.
///
/// Serialized as `{"type": ..., "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A model invocation is about to be issued.
    Thinking { iteration: usize },

    /// An action is being dispatched.
    ToolCall { kind: ActionKind, parameters: Value },

    /// The action completed.
    ToolResult {
        kind: ActionKind,
        success: bool,
        payload: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ActionError>,
    },

    /// Hits returned by a successful search.
    SearchResult {
        query: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        answer: Option<String>,
        results: Vec<SearchHit>,
    },

    /// Final assistant text for the turn.
    AssistantDelta { content: String },

    Error { code: String, message: String },

    /// The turn is over.
    Done {
        status: TurnStatus,
        iterations: usize,
        usage: Usage,
    },
}

impl AgentEvent {
    /// Wire name of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Thinking { .. } => "thinking",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::SearchResult { .. } => "search_result",
            Self::AssistantDelta { .. } => "assistant_delta",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }

    pub fn error(err: &crate::error::Error) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Outbound half of a session's event stream.
pub type EventSink = mpsc::UnboundedSender<AgentEvent>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let event = AgentEvent::Thinking { iteration: 1 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json, json!({"type": "thinking", "payload": {"iteration": 1}}));
    }

    #[test]
    fn test_done_shape() {
        let event = AgentEvent::Done {
            status: TurnStatus::LoopDetected,
            iterations: 3,
            usage: Usage::default(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "done");
        assert_eq!(json["payload"]["status"], "loop_detected");
        assert_eq!(json["payload"]["usage"]["total_tokens"], 0);
    }

    #[test]
    fn test_event_type_matches_tag() {
        let events = [
            AgentEvent::AssistantDelta { content: "hi".into() },
            AgentEvent::ToolCall { kind: ActionKind::Search, parameters: json!({}) },
            AgentEvent::error(&crate::error::Error::MaxIterations),
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.event_type());
        }
    }

    #[test]
    fn test_roundtrip() {
        let event = AgentEvent::ToolResult {
            kind: ActionKind::FileOp,
            success: false,
            payload: json!({"message": "nope"}),
            error: Some(ActionError::Failed),
        };
        let text = serde_json::to_string(&event).unwrap();
        assert_eq!(serde_json::from_str::<AgentEvent>(&text).unwrap(), event);
    }
}
