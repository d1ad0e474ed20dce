//! Tool dispatcher: one branch per [`ActionKind`].
//!
//! Collaborator failures come back as failed [`ActionResult`]s. The only
//! error that escapes is `UnsupportedAction`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Error;
use crate::tools::web::{format_for_prompt, search_definition};
use crate::tools::{FileOps, SearchHit, SearchProvider, TavilySearch, Terminal, Tool, ToolDefinition};
use crate::Result;

use super::action::{ActionError, ActionKind, ActionRequest, ActionResult};
use super::trigger::should_search;

/// Longest utterance used verbatim as a preflight query.
const MAX_PREFLIGHT_QUERY: usize = 400;

pub struct ToolDispatcher {
    search: Option<Arc<dyn SearchProvider>>,
    files: FileOps,
    terminal: Terminal,
    search_timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(
        search: Option<Arc<dyn SearchProvider>>,
        files: FileOps,
        terminal: Terminal,
        search_timeout: Duration,
    ) -> Self {
        Self {
            search,
            files,
            terminal,
            search_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let search = TavilySearch::from_config(&config.search, config.timeouts.search())?
            .map(|s| Arc::new(s) as Arc<dyn SearchProvider>);
        if search.is_none() {
            warn!("No search API key configured; web search is unavailable");
        }

        Ok(Self::new(
            search,
            FileOps::new(&config.workspace),
            Terminal::new(&config.workspace, config.timeouts.terminal()),
            config.timeouts.search(),
        ))
    }

    pub fn search_enabled(&self) -> bool {
        self.search.is_some()
    }

    /// Definitions advertised to the model.
    pub fn capabilities(&self) -> Vec<ToolDefinition> {
        vec![
            search_definition(),
            self.files.to_definition(),
            self.terminal.to_definition(),
            ToolDefinition {
                name: ActionKind::Finalize.as_str().to_string(),
                description: "End the turn with the final answer".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "answer": {"type": "string", "description": "Final answer for the user"}
                    },
                    "required": ["answer"]
                }),
            },
        ]
    }

    /// Search to run before the first model call of a turn, if any.
    pub fn preflight(&self, utterance: &str) -> Option<ActionRequest> {
        if !should_search(utterance) {
            return None;
        }
        let query: String = utterance.trim().chars().take(MAX_PREFLIGHT_QUERY).collect();
        debug!(query = %query, "Preflight search triggered");
        Some(ActionRequest::search(query))
    }

    pub async fn dispatch(&self, request: &ActionRequest) -> Result<ActionResult> {
        match request.kind {
            ActionKind::Search => Ok(self.search(request).await),
            ActionKind::FileOp => self.run_tool(&self.files, request).await,
            ActionKind::TerminalOp => self.run_tool(&self.terminal, request).await,
            ActionKind::Finalize => {
                let answer = request.param_str("answer").unwrap_or_default();
                Ok(ActionResult::ok(ActionKind::Finalize, json!({ "answer": answer })))
            }
        }
    }

    async fn search(&self, request: &ActionRequest) -> ActionResult {
        let Some(query) = request.param_str("query").map(str::trim).filter(|q| !q.is_empty()) else {
            return ActionResult::failed(
                ActionKind::Search,
                ActionError::InvalidParameters,
                "Missing 'query' parameter",
            );
        };

        let Some(provider) = &self.search else {
            return ActionResult::failed(
                ActionKind::Search,
                ActionError::SearchUnavailable,
                "web search is not configured",
            );
        };

        match tokio::time::timeout(self.search_timeout, provider.search(query)).await {
            Ok(Ok(response)) => {
                info!(provider = provider.name(), query, hits = response.hits.len(), "Search dispatched");
                ActionResult::ok(
                    ActionKind::Search,
                    json!({
                        "query": query,
                        "answer": response.answer,
                        "hits": response.hits,
                        "text": format_for_prompt(query, &response),
                    }),
                )
            }
            Ok(Err(e)) => {
                warn!(provider = provider.name(), error = %e, "Search failed");
                ActionResult::failed(ActionKind::Search, ActionError::SearchUnavailable, e.to_string())
            }
            Err(_) => {
                warn!(provider = provider.name(), "Search timed out");
                ActionResult::failed(
                    ActionKind::Search,
                    ActionError::SearchUnavailable,
                    format!("search timed out after {}s", self.search_timeout.as_secs()),
                )
            }
        }
    }

    async fn run_tool(&self, tool: &dyn Tool, request: &ActionRequest) -> Result<ActionResult> {
        match tool.execute(&request.parameters).await {
            Ok(output) => Ok(ActionResult::ok(request.kind, json!({ "output": output }))),
            Err(e @ Error::UnsupportedAction(_)) => Err(e),
            Err(e @ Error::UpstreamTimeout(_)) => {
                Ok(ActionResult::failed(request.kind, ActionError::Timeout, e.to_string()))
            }
            Err(e) => Ok(ActionResult::failed(request.kind, ActionError::Failed, e.to_string())),
        }
    }
}

/// Hits of a successful search result, for the `search_result` event.
pub(crate) fn search_hits(result: &ActionResult) -> Option<(String, Option<String>, Vec<SearchHit>)> {
    if result.kind != ActionKind::Search || !result.success {
        return None;
    }
    let query = result.payload.get("query")?.as_str()?.to_string();
    let answer = result.payload.get("answer").and_then(Value::as_str).map(str::to_string);
    let hits = serde_json::from_value(result.payload.get("hits")?.clone()).ok()?;
    Some((query, answer, hits))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::web::FakeSearchProvider;
    use tempfile::TempDir;

    fn dispatcher(tmp: &TempDir, search: Option<Arc<dyn SearchProvider>>) -> ToolDispatcher {
        ToolDispatcher::new(
            search,
            FileOps::new(tmp.path()),
            Terminal::new(tmp.path(), Duration::from_secs(5)),
            Duration::from_millis(200),
        )
    }

    fn hits() -> Vec<SearchHit> {
        vec![SearchHit {
            title: "Spring 2025 lineup".to_string(),
            url: "https://example.com/anime".to_string(),
            snippet: "Twelve new shows".to_string(),
        }]
    }

    #[tokio::test]
    async fn test_search_success() {
        let tmp = TempDir::new().unwrap();
        let provider = Arc::new(FakeSearchProvider::with_hits(hits()));
        let d = dispatcher(&tmp, Some(provider.clone()));

        let result = d.dispatch(&ActionRequest::search("anime 2025")).await.unwrap();
        assert!(result.success);
        assert!(result.content().contains("Spring 2025 lineup"));
        assert_eq!(provider.calls(), 1);

        let (query, _, hits) = search_hits(&result).unwrap();
        assert_eq!(query, "anime 2025");
        assert_eq!(hits[0].url, "https://example.com/anime");
    }

    #[tokio::test]
    async fn test_search_failure_is_unavailable_not_error() {
        let tmp = TempDir::new().unwrap();
        let d = dispatcher(&tmp, Some(Arc::new(FakeSearchProvider::failing())));

        let result = d.dispatch(&ActionRequest::search("q")).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error, Some(ActionError::SearchUnavailable));
        assert!(search_hits(&result).is_none());
    }

    #[tokio::test]
    async fn test_search_timeout_is_unavailable() {
        let tmp = TempDir::new().unwrap();
        let slow = FakeSearchProvider::with_hits(hits()).with_delay(Duration::from_secs(5));
        let d = dispatcher(&tmp, Some(Arc::new(slow)));

        let result = d.dispatch(&ActionRequest::search("q")).await.unwrap();
        assert_eq!(result.error, Some(ActionError::SearchUnavailable));
    }

    #[tokio::test]
    async fn test_search_without_provider() {
        let tmp = TempDir::new().unwrap();
        let d = dispatcher(&tmp, None);
        assert!(!d.search_enabled());

        let result = d.dispatch(&ActionRequest::search("q")).await.unwrap();
        assert_eq!(result.error, Some(ActionError::SearchUnavailable));

        let empty = d.dispatch(&ActionRequest::new(ActionKind::Search, json!({}))).await.unwrap();
        assert_eq!(empty.error, Some(ActionError::InvalidParameters));
    }

    #[tokio::test]
    async fn test_file_and_terminal_branches() {
        let tmp = TempDir::new().unwrap();
        let d = dispatcher(&tmp, None);

        let write = ActionRequest::new(
            ActionKind::FileOp,
            json!({"op": "write", "path": "hello.txt", "content": "hi"}),
        );
        assert!(d.dispatch(&write).await.unwrap().success);

        let cat = ActionRequest::new(ActionKind::TerminalOp, json!({"command": "cat hello.txt"}));
        let result = d.dispatch(&cat).await.unwrap();
        assert!(result.success);
        assert_eq!(result.content().trim(), "hi");

        let fail = ActionRequest::new(ActionKind::TerminalOp, json!({"command": "exit 3"}));
        let result = d.dispatch(&fail).await.unwrap();
        assert_eq!(result.error, Some(ActionError::Failed));
    }

    #[tokio::test]
    async fn test_unknown_file_op_fails_fast() {
        let tmp = TempDir::new().unwrap();
        let d = dispatcher(&tmp, None);

        let request = ActionRequest::new(ActionKind::FileOp, json!({"op": "chmod", "path": "x"}));
        assert!(matches!(d.dispatch(&request).await, Err(Error::UnsupportedAction(_))));
    }

    #[tokio::test]
    async fn test_finalize_always_succeeds() {
        let tmp = TempDir::new().unwrap();
        let d = dispatcher(&tmp, None);

        let request = ActionRequest::new(ActionKind::Finalize, json!({"answer": "All done."}));
        let result = d.dispatch(&request).await.unwrap();
        assert!(result.success);
        assert_eq!(result.content(), "All done.");
    }

    #[test]
    fn test_preflight() {
        let tmp = TempDir::new().unwrap();
        let d = dispatcher(&tmp, None);

        let request = d.preflight("What are the latest anime releases in 2025?").unwrap();
        assert_eq!(request.kind, ActionKind::Search);
        assert!(d.preflight("Write a function that reverses a string").is_none());
        assert_eq!(d.capabilities().len(), 4);
    }
}
