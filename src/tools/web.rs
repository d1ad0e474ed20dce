//! Web search - provider trait and the Tavily client

use std::time::Duration;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use crate::Result;
use crate::config::SearchConfig;
use crate::error::Error;
use super::ToolDefinition;

const TAVILY_API_URL: &str = "https://api.tavily.com/search";

/// Sources shown to the model per search.
const PROMPT_SOURCES: usize = 3;
const SNIPPET_CHARS: usize = 200;

/// One search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Ordered hits plus the provider's direct answer, if it gave one
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub hits: Vec<SearchHit>,
}

/// Search provider boundary
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str) -> Result<SearchResponse>;
}

/// Tavily search API client
pub struct TavilySearch {
    api_key: String,
    max_results: usize,
    depth: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct TavilyReply {
    answer: Option<String>,
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

impl TavilySearch {
    pub fn new(api_key: &str, max_results: usize, depth: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_key: api_key.to_string(),
            max_results,
            depth: depth.to_string(),
            client,
        })
    }

    /// `None` when no API key is configured.
    pub fn from_config(config: &SearchConfig, timeout: Duration) -> Result<Option<Self>> {
        if config.api_key.trim().is_empty() {
            return Ok(None);
        }
        Self::new(&config.api_key, config.max_results, &config.depth, timeout).map(Some)
    }

    fn into_response(reply: TavilyReply) -> SearchResponse {
        SearchResponse {
            answer: reply.answer.filter(|a| !a.trim().is_empty()),
            hits: reply
                .results
                .into_iter()
                .map(|r| SearchHit {
                    title: if r.title.is_empty() { "Untitled".to_string() } else { r.title },
                    url: r.url,
                    snippet: r.content,
                })
                .collect(),
        }
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn search(&self, query: &str) -> Result<SearchResponse> {
        let body = json!({
            "api_key": self.api_key,
            "query": query,
            "search_depth": self.depth,
            "include_answer": true,
            "include_raw_content": false,
            "max_results": self.max_results,
        });

        let response = self.client.post(TAVILY_API_URL).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(%status, "Tavily returned error");
            return Err(Error::Llm(format!("search provider error: {status}")));
        }

        let reply: TavilyReply = response.json().await?;
        let response = Self::into_response(reply);
        info!(query, hits = response.hits.len(), "Web search completed");
        Ok(response)
    }
}

/// Render results as a short block for the model.
pub fn format_for_prompt(query: &str, response: &SearchResponse) -> String {
    let mut out = format!("Web search results for \"{query}\":\n");

    if let Some(answer) = &response.answer {
        out.push_str(&format!("\nDirect answer: {answer}\n"));
    }

    if response.hits.is_empty() {
        out.push_str("\nNo sources found.");
        return out;
    }

    out.push_str("\nSources:");
    for (i, hit) in response.hits.iter().take(PROMPT_SOURCES).enumerate() {
        let snippet: String = hit.snippet.chars().take(SNIPPET_CHARS).collect();
        let ellipsis = if hit.snippet.chars().count() > SNIPPET_CHARS { "..." } else { "" };
        out.push_str(&format!(
            "\n{}. {}\n   {}{}\n   Source: {}",
            i + 1,
            hit.title,
            snippet,
            ellipsis,
            hit.url
        ));
    }
    out
}

/// Definition advertised to the model for the `search` action
pub fn search_definition() -> ToolDefinition {
    ToolDefinition {
        name: "search".to_string(),
        description: "Search the web for current information".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                }
            },
            "required": ["query"]
        }),
    }
}

/// Search provider double: fixed hits or forced failure
#[cfg(test)]
pub struct FakeSearchProvider {
    response: Option<SearchResponse>,
    delay: Option<Duration>,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl FakeSearchProvider {
    pub fn with_hits(hits: Vec<SearchHit>) -> Self {
        Self {
            response: Some(SearchResponse { answer: None, hits }),
            delay: None,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            response: None,
            delay: None,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl SearchProvider for FakeSearchProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn search(&self, _query: &str) -> Result<SearchResponse> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.response
            .clone()
            .ok_or_else(|| Error::Llm("search provider unreachable".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(n: usize, snippet: &str) -> SearchHit {
        SearchHit {
            title: format!("Result {n}"),
            url: format!("https://example.com/{n}"),
            snippet: snippet.to_string(),
        }
    }

    #[test]
    fn test_format_caps_sources_and_snippets() {
        let response = SearchResponse {
            answer: Some("Three new series.".to_string()),
            hits: vec![hit(1, &"a".repeat(500)), hit(2, "short"), hit(3, "x"), hit(4, "hidden")],
        };
        let text = format_for_prompt("anime 2025", &response);

        assert!(text.contains("Direct answer: Three new series."));
        assert!(text.contains("3. Result 3"));
        assert!(!text.contains("Result 4"));
        assert!(text.contains(&format!("{}...", "a".repeat(200))));
        assert!(!text.contains(&"a".repeat(201)));
    }

    #[test]
    fn test_format_without_hits() {
        let text = format_for_prompt("nothing", &SearchResponse::default());
        assert!(text.contains("No sources found."));
    }

    #[test]
    fn test_tavily_reply_mapping() {
        let reply: TavilyReply = serde_json::from_value(json!({
            "answer": "",
            "results": [
                {"title": "", "url": "https://a.example", "content": "alpha", "score": 0.9}
            ]
        }))
        .unwrap();
        let response = TavilySearch::into_response(reply);

        assert!(response.answer.is_none());
        assert_eq!(response.hits[0].title, "Untitled");
        assert_eq!(response.hits[0].snippet, "alpha");
    }

    #[test]
    fn test_no_key_no_provider() {
        let config = SearchConfig::default();
        let provider = TavilySearch::from_config(&config, Duration::from_secs(1)).unwrap();
        assert!(provider.is_none());
    }

    #[tokio::test]
    async fn test_fake_provider() {
        let ok = FakeSearchProvider::with_hits(vec![hit(1, "s")]);
        assert_eq!(ok.search("q").await.unwrap().hits.len(), 1);
        assert!(FakeSearchProvider::failing().search("q").await.is_err());
        assert_eq!(ok.calls(), 1);
    }
}
