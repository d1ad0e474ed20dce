//! OpenAI-compatible LLM client.
//!
//! Works with OpenAI and any endpoint exposing `/chat/completions`
//! (OpenRouter, Ollama, vLLM and friends).

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::Error;
use crate::tools::ToolDefinition;
use crate::Result;

use super::super::message::{answered_call_ids, Message, Role, ToolCallRequest};
use super::{ChatCompletion, GenerationConfig, LlmClient, LlmResponse, Usage};

/// Client for an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    model: String,
    client: Client,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
        })
    }

    fn convert_messages(messages: &[Message]) -> Vec<Value> {
        let mut call_ids: HashSet<&str> = HashSet::new();
        // The endpoint rejects calls that are not followed by their result.
        let answered = answered_call_ids(messages);

        messages
            .iter()
            .map(|m| match m.role {
                Role::System => json!({"role": "system", "content": m.content}),
                Role::User => json!({"role": "user", "content": m.content}),
                Role::Assistant => {
                    let calls: Vec<&ToolCallRequest> = m
                        .tool_calls
                        .iter()
                        .flatten()
                        .filter(|tc| answered.contains(tc.id.as_str()))
                        .collect();
                    if calls.is_empty() {
                        json!({"role": "assistant", "content": m.content})
                    } else {
                        let calls: Vec<Value> = calls
                            .into_iter()
                            .map(|tc| {
                                call_ids.insert(tc.id.as_str());
                                json!({
                                    "id": tc.id,
                                    "type": "function",
                                    "function": {
                                        "name": tc.name,
                                        "arguments": tc.arguments.to_string()
                                    }
                                })
                            })
                            .collect();
                        json!({"role": "assistant", "content": m.content, "tool_calls": calls})
                    }
                }
                Role::Tool => match m.tool_call_id.as_deref().filter(|id| call_ids.contains(id)) {
                    Some(id) => json!({"role": "tool", "tool_call_id": id, "content": m.content}),
                    // The endpoint rejects tool messages without their call.
                    None => json!({"role": "user", "content": format!("Tool result:\n{}", m.content)}),
                },
            })
            .collect()
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters
                    }
                })
            })
            .collect()
    }

    fn build_request(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        generation: &GenerationConfig,
    ) -> Value {
        let model = if generation.model_id.is_empty() {
            &self.model
        } else {
            &generation.model_id
        };

        let mut body = json!({
            "model": model,
            "messages": Self::convert_messages(messages),
            "temperature": generation.temperature,
            "max_tokens": generation.max_tokens,
            "stream": false,
        });

        if !tools.is_empty() {
            body["tools"] = json!(Self::convert_tools(tools));
        }

        body
    }

    fn parse_response(completion: ChatCompletion) -> Result<LlmResponse> {
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Llm("No choices in response".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|tc| ToolCallRequest {
                id: tc.id,
                arguments: serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(Value::String(tc.function.arguments)),
                name: tc.function.name,
            })
            .collect();

        let usage = completion
            .usage
            .map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content: choice.message.content.filter(|c| !c.is_empty()),
            tool_calls,
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            usage,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        generation: &GenerationConfig,
    ) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_request(messages, tools, generation);

        debug!(model = %body["model"], messages = messages.len(), "Sending completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(%status, body = %error_body, "Provider returned error");
            return Err(Error::Llm(format!("OpenAI API error ({status}): {error_body}")));
        }

        let completion: ChatCompletion = response.json().await?;
        Self::parse_response(completion)
    }

    fn default_model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OpenAiClient {
        OpenAiClient::new("http://localhost:11434/v1/", "key", "gpt-4o-mini", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_base_url_trimmed() {
        assert_eq!(client().base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn test_request_shape() {
        let tools = vec![ToolDefinition {
            name: "search".to_string(),
            description: "Search the web".to_string(),
            parameters: json!({"type": "object"}),
        }];
        let generation = GenerationConfig {
            temperature: 0.5,
            max_tokens: 100,
            model_id: "gpt-4o".to_string(),
        };
        let body = client().build_request(&[Message::user("hi")], &tools, &generation);

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 100);
        assert_eq!(body["tools"][0]["function"]["name"], "search");
    }

    #[test]
    fn test_orphan_tool_message_becomes_user() {
        let call = ToolCallRequest {
            id: "call_1".to_string(),
            name: "terminal_op".to_string(),
            arguments: json!({"command": "ls"}),
        };
        let messages = vec![
            Message::assistant_with_tools("", vec![call]),
            Message::tool_result("call_1", "a.txt", Value::Null),
            Message::tool_result("action_3", "b.txt", Value::Null),
        ];
        let converted = OpenAiClient::convert_messages(&messages);

        assert_eq!(converted[0]["tool_calls"][0]["function"]["arguments"], "{\"command\":\"ls\"}");
        assert_eq!(converted[1]["role"], "tool");
        assert_eq!(converted[2]["role"], "user");
    }

    #[test]
    fn test_unanswered_call_is_sent_as_plain_text() {
        let call = ToolCallRequest {
            id: "tc_1".to_string(),
            name: "terminal_op".to_string(),
            arguments: json!({"command": "sleep 3"}),
        };
        let messages = vec![
            Message::system("sys"),
            Message::user("run it"),
            Message::assistant_with_tools("", vec![call]),
            Message::user("next turn"),
        ];
        let converted = OpenAiClient::convert_messages(&messages);

        assert_eq!(converted.len(), 4);
        assert_eq!(converted[2]["role"], "assistant");
        assert!(converted[2].get("tool_calls").is_none());
        assert!(converted.iter().all(|m| m["role"] != "tool"));
        assert_eq!(converted[3]["content"], "next turn");
    }

    #[test]
    fn test_parse_response() {
        let completion: ChatCompletion = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "search", "arguments": "{\"query\":\"rust 2025\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 20, "completion_tokens": 7, "total_tokens": 27}
        }))
        .unwrap();

        let response = OpenAiClient::parse_response(completion).unwrap();
        assert!(response.content.is_none());
        assert_eq!(response.tool_calls[0].arguments["query"], "rust 2025");
        assert_eq!(response.usage.completion_tokens, 7);
        assert_eq!(response.finish_reason, "tool_calls");
    }
}
