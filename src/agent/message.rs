//! Message types for agent communication

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use chrono::{DateTime, Utc};

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in the conversation. Immutable once appended to a history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,

    /// Structured payload (tool results, archive placeholders)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    pub timestamp: DateTime<Utc>,

    /// Tool call ID (for tool responses)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool calls made by assistant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            payload: None,
            timestamp: Utc::now(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a user message listing attached file references
    pub fn user_with_attachments(content: impl Into<String>, attachments: &[String]) -> Self {
        let mut content = content.into();
        if !attachments.is_empty() {
            content.push_str("\n\nAttached files:\n");
            for file in attachments {
                content.push_str("- ");
                content.push_str(file);
                content.push('\n');
            }
        }
        let mut msg = Self::new(Role::User, content);
        if !attachments.is_empty() {
            msg.payload = Some(serde_json::json!({ "attachments": attachments }));
        }
        msg
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create an assistant message with tool calls
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        let mut msg = Self::new(Role::Assistant, content);
        msg.tool_calls = Some(tool_calls);
        msg
    }

    /// Create a tool result message
    pub fn tool_result(call_id: impl Into<String>, result: impl Into<String>, payload: Value) -> Self {
        let mut msg = Self::new(Role::Tool, result);
        msg.tool_call_id = Some(call_id.into());
        msg.payload = Some(payload);
        msg
    }

    /// Create the placeholder left behind when a range is archived
    pub fn archive_placeholder(locator: &str, count: usize) -> Self {
        let mut msg = Self::new(
            Role::System,
            format!(
                "[{count} earlier messages were archived to {locator} to keep the conversation within the context window.]"
            ),
        );
        msg.payload = Some(serde_json::json!({
            "archived": locator,
            "count": count,
        }));
        msg
    }

    /// Whether this message is an archive placeholder
    pub fn is_placeholder(&self) -> bool {
        self.role == Role::System
            && self
                .payload
                .as_ref()
                .is_some_and(|p| p.get("archived").is_some())
    }

    /// Locator of the archived range, for placeholders
    pub fn archive_locator(&self) -> Option<&str> {
        self.payload.as_ref()?.get("archived")?.as_str()
    }
}

/// Ids of every tool call that has a result in `messages`.
pub fn answered_call_ids(messages: &[Message]) -> HashSet<&str> {
    messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect()
}

/// Tool calls in `messages` that never received a result.
pub fn unanswered_calls(messages: &[Message]) -> Vec<&ToolCallRequest> {
    let answered = answered_call_ids(messages);
    messages
        .iter()
        .filter_map(|m| m.tool_calls.as_ref())
        .flatten()
        .filter(|tc| !answered.contains(tc.id.as_str()))
        .collect()
}

/// A tool call request from the LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Final response of a turn
#[derive(Debug, Clone)]
pub struct Response {
    pub content: String,
    pub iterations: usize,
}

impl Response {
    pub fn new(content: impl Into<String>, iterations: usize) -> Self {
        Self {
            content: content.into(),
            iterations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello");
        assert!(msg.payload.is_none());
    }

    #[test]
    fn test_attachments_listed_in_content() {
        let msg = Message::user_with_attachments(
            "Summarise these",
            &["notes/a.md".to_string(), "notes/b.md".to_string()],
        );
        assert!(msg.content.contains("- notes/a.md"));
        assert!(msg.content.contains("- notes/b.md"));
        assert_eq!(msg.payload.unwrap()["attachments"][1], "notes/b.md");
    }

    #[test]
    fn test_placeholder() {
        let msg = Message::archive_placeholder("archive://s1/0001", 6);
        assert!(msg.is_placeholder());
        assert_eq!(msg.archive_locator(), Some("archive://s1/0001"));
        assert!(msg.content.contains("6 earlier messages"));

        assert!(!Message::system("You are helpful").is_placeholder());
    }

    #[test]
    fn test_message_json_shape() {
        let msg = Message::assistant("Hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn test_unanswered_calls() {
        let call = |id: &str| ToolCallRequest {
            id: id.to_string(),
            name: "terminal_op".to_string(),
            arguments: serde_json::json!({"command": "ls"}),
        };
        let messages = vec![
            Message::assistant_with_tools("", vec![call("tc_1")]),
            Message::tool_result("tc_1", "ok", Value::Null),
            Message::assistant_with_tools("", vec![call("tc_2")]),
        ];

        let pending: Vec<&str> = unanswered_calls(&messages).iter().map(|tc| tc.id.as_str()).collect();
        assert_eq!(pending, ["tc_2"]);
        assert!(answered_call_ids(&messages).contains("tc_1"));
    }
}
