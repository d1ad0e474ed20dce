//! Gemini LLM client implementation (API key authentication).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::Error;
use crate::tools::ToolDefinition;
use crate::Result;

use super::super::message::{answered_call_ids, Message, Role, ToolCallRequest};
use super::{GeminiResponse, GenerationConfig, LlmClient, LlmResponse, Usage};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Gemini API client using API key authentication.
#[derive(Clone)]
pub struct GeminiClient {
    api_key: String,
    model: String,
    client: Client,
}

impl GeminiClient {
    /// Create a new Gemini client with API key.
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
        })
    }

    fn build_url(&self, model: &str) -> String {
        format!(
            "{}/{}:generateContent?key={}",
            GEMINI_API_URL, model, self.api_key
        )
    }

    fn convert_messages(messages: &[Message]) -> Vec<Value> {
        // Tool results pair with a functionCall only when the call is in the prompt.
        let mut call_names: HashMap<&str, &str> = HashMap::new();
        // A functionCall must be answered by a functionResponse.
        let answered = answered_call_ids(messages);

        messages
            .iter()
            .filter(|m| m.role != Role::System)
            .filter_map(|m| Some(match m.role {
                Role::Tool => {
                    let paired = m
                        .tool_call_id
                        .as_deref()
                        .and_then(|id| call_names.get(id).copied());
                    match paired {
                        Some(name) => json!({
                            "role": "function",
                            "parts": [{
                                "functionResponse": {
                                    "name": name,
                                    "response": {"result": m.content}
                                }
                            }]
                        }),
                        None => json!({
                            "role": "user",
                            "parts": [{"text": format!("Tool result:\n{}", m.content)}]
                        }),
                    }
                }
                Role::Assistant => {
                    let tool_calls: Vec<&ToolCallRequest> = m
                        .tool_calls
                        .iter()
                        .flatten()
                        .filter(|tc| answered.contains(tc.id.as_str()))
                        .collect();
                    if tool_calls.is_empty() {
                        if m.content.trim().is_empty() {
                            return None;
                        }
                        json!({"role": "model", "parts": [{"text": m.content}]})
                    } else {
                        let calls: Vec<Value> = tool_calls
                            .into_iter()
                            .map(|tc| {
                                call_names.insert(tc.id.as_str(), tc.name.as_str());
                                json!({
                                    "functionCall": {
                                        "name": tc.name,
                                        "args": tc.arguments
                                    }
                                })
                            })
                            .collect();
                        json!({"role": "model", "parts": calls})
                    }
                }
                _ => json!({"role": "user", "parts": [{"text": m.content}]}),
            }))
            .collect()
    }

    /// All system messages (instructions and archive placeholders), in order.
    fn get_system_instruction(messages: &[Message]) -> Option<String> {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        (!system.is_empty()).then(|| system.join("\n\n"))
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Option<Value> {
        if tools.is_empty() {
            return None;
        }

        let function_declarations: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters
                })
            })
            .collect();

        Some(json!([{
            "functionDeclarations": function_declarations
        }]))
    }

    fn build_request(
        messages: &[Message],
        tools: &[ToolDefinition],
        generation: &GenerationConfig,
    ) -> Value {
        let mut request = json!({
            "contents": Self::convert_messages(messages),
            "generationConfig": {
                "temperature": generation.temperature,
                "maxOutputTokens": generation.max_tokens
            }
        });

        if let Some(system) = Self::get_system_instruction(messages) {
            request["systemInstruction"] = json!({
                "parts": [{"text": system}]
            });
        }

        if let Some(tool_config) = Self::convert_tools(tools) {
            request["tools"] = tool_config;
        }

        request
    }

    fn parse_response(response: &GeminiResponse) -> Result<LlmResponse> {
        let candidate = response
            .candidates
            .first()
            .ok_or_else(|| Error::Llm("No candidates in response".to_string()))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for part in &candidate.content.parts {
            if let Some(ref t) = part.text {
                text.push_str(t);
            }

            if let Some(ref fc) = part.function_call {
                tool_calls.push(ToolCallRequest {
                    id: format!("tc_{}", tool_calls.len()),
                    name: fc.name.clone(),
                    arguments: fc.args.clone(),
                });
            }
        }

        let usage = response
            .usage_metadata
            .as_ref()
            .map(|u| Usage {
                prompt_tokens: u.prompt_token_count.unwrap_or(0),
                completion_tokens: u.candidates_token_count.unwrap_or(0),
                total_tokens: u.total_token_count.unwrap_or(0),
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content: (!text.is_empty()).then_some(text),
            tool_calls,
            finish_reason: candidate
                .finish_reason
                .clone()
                .unwrap_or_else(|| "stop".to_string()),
            usage,
        })
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        generation: &GenerationConfig,
    ) -> Result<LlmResponse> {
        let request = Self::build_request(messages, tools, generation);
        let model = if generation.model_id.is_empty() {
            self.model.as_str()
        } else {
            generation.model_id.as_str()
        };

        debug!(model, messages = messages.len(), "Sending Gemini request");
        let response = self.client.post(self.build_url(model)).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            warn!(%status, "Gemini returned error");
            return Err(Error::Llm(format!("Gemini API error ({status}): {error_text}")));
        }

        let gemini_response: GeminiResponse = response.json().await?;
        Self::parse_response(&gemini_response)
    }

    fn default_model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generation() -> GenerationConfig {
        GenerationConfig {
            temperature: 0.2,
            max_tokens: 512,
            model_id: "gemini-2.0-flash".to_string(),
        }
    }

    #[test]
    fn test_request_shape() {
        let messages = vec![
            Message::system("Be brief."),
            Message::user("Hi"),
            Message::assistant("Hello!"),
            Message::archive_placeholder("memory://s/1", 4),
        ];
        let request = GeminiClient::build_request(&messages, &[], &generation());

        assert_eq!(request["generationConfig"]["maxOutputTokens"], 512);
        let system = request["systemInstruction"]["parts"][0]["text"].as_str().unwrap();
        assert!(system.starts_with("Be brief."));
        assert!(system.contains("memory://s/1"));

        let contents = request["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[1]["role"], "model");
        assert!(request.get("tools").is_none());
    }

    #[test]
    fn test_tool_results_pair_with_calls() {
        let call = ToolCallRequest {
            id: "tc_0".to_string(),
            name: "search".to_string(),
            arguments: json!({"query": "rust"}),
        };
        let messages = vec![
            Message::user("q"),
            Message::assistant_with_tools("", vec![call]),
            Message::tool_result("tc_0", "found", Value::Null),
            Message::tool_result("action_2", "orphan", Value::Null),
        ];
        let contents = GeminiClient::convert_messages(&messages);

        assert_eq!(contents[2]["parts"][0]["functionResponse"]["name"], "search");
        assert_eq!(contents[3]["role"], "user");
        assert!(contents[3]["parts"][0]["text"].as_str().unwrap().contains("orphan"));
    }

    #[test]
    fn test_unanswered_call_is_not_sent() {
        let call = ToolCallRequest {
            id: "tc_1".to_string(),
            name: "terminal_op".to_string(),
            arguments: json!({"command": "sleep 3"}),
        };
        let messages = vec![
            Message::user("run it"),
            Message::assistant_with_tools("", vec![call]),
            Message::user("next turn"),
        ];
        let contents = GeminiClient::convert_messages(&messages);

        assert_eq!(contents.len(), 2);
        assert!(contents.iter().all(|c| c["parts"][0].get("functionCall").is_none()));
        assert_eq!(contents[1]["parts"][0]["text"], "next turn");
    }

    #[test]
    fn test_parse_response() {
        let raw = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "Let me "},
                    {"text": "check."},
                    {"functionCall": {"name": "search", "args": {"query": "news"}}}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 3, "totalTokenCount": 15}
        });
        let parsed: GeminiResponse = serde_json::from_value(raw).unwrap();
        let response = GeminiClient::parse_response(&parsed).unwrap();

        assert_eq!(response.content.as_deref(), Some("Let me check."));
        assert_eq!(response.tool_calls[0].name, "search");
        assert_eq!(response.usage.total_tokens, 15);
    }

    #[test]
    fn test_no_candidates_is_error() {
        let parsed: GeminiResponse = serde_json::from_value(json!({})).unwrap();
        assert!(GeminiClient::parse_response(&parsed).is_err());
    }
}
