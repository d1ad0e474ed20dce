//! Wire frames of the WebSocket channel.
//!
//! Inbound frames are tagged by `type`. Outbound agent events live in
//! [`crate::agent::AgentEvent`]; this module only adds the control replies.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::Result;

/// A client frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    /// A user utterance starting a new turn.
    Message {
        content: String,
        #[serde(default)]
        attachments: Vec<String>,
    },
    /// Cancel the in-flight turn.
    Stop,
    InitAgent,
    WorkspaceInfo,
}

/// Parse one text frame. Anything not understood is a protocol error.
pub fn parse_inbound(text: &str) -> Result<Inbound> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| Error::Protocol(format!("invalid JSON: {}", e)))?;

    let Some(kind) = value.get("type").and_then(|t| t.as_str()) else {
        return Err(Error::Protocol("missing 'type' field".to_string()));
    };
    let kind = kind.to_string();

    let inbound: Inbound = serde_json::from_value(value)
        .map_err(|e| Error::Protocol(format!("bad '{}' frame: {}", kind, e)))?;

    if let Inbound::Message { content, .. } = &inbound {
        if content.trim().is_empty() {
            return Err(Error::Protocol("empty message content".to_string()));
        }
    }
    Ok(inbound)
}

/// Replies to control frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ControlReply {
    AgentInitialized { session_id: String, model: String },
    WorkspaceInfo { path: String, static_base_url: String },
}

impl ControlReply {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
