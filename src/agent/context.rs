//! Conversation state and context window management.
//!
//! The live history of a session must always fit the active model's token
//! budget (minus a reserved completion margin). When it does not, the oldest
//! droppable messages are archived FIFO to an [`ArchiveStore`] and replaced
//! by a placeholder. The system message, the user message that triggered the
//! current turn, and the most recent message are never dropped.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::Error;
use crate::memory::ArchiveStore;
use crate::Result;

use super::message::{Message, Role};
use super::tokens::{estimate_history, estimate_message};

/// Locator length assumed when sizing a placeholder before it is stored.
const PLACEHOLDER_LOCATOR_ESTIMATE: usize = 96;

/// A range of messages moved out of the live history.
#[derive(Debug, Clone)]
pub struct ArchivedRange {
    pub locator: String,
    pub count: usize,
    pub archived_at: DateTime<Utc>,
}

/// Conversation state, owned exclusively by one agent session.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub session_id: String,
    history: Vec<Message>,
    archived_refs: Vec<ArchivedRange>,
    pub token_budget: usize,
    pub active_model: String,
}

impl ConversationState {
    pub fn new(session_id: impl Into<String>, token_budget: usize, active_model: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            history: Vec::new(),
            archived_refs: Vec::new(),
            token_budget,
            active_model: active_model.into(),
        }
    }

    /// Start the history with a system/instruction message.
    pub fn with_system(mut self, prompt: impl Into<String>) -> Self {
        self.history.insert(0, Message::system(prompt));
        self
    }

    /// Append a message. Messages are never edited after this.
    pub fn push(&mut self, message: Message) {
        self.history.push(message);
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn archived_refs(&self) -> &[ArchivedRange] {
        &self.archived_refs
    }

    /// Estimated token cost of the live history.
    pub fn live_tokens(&self) -> usize {
        estimate_history(&self.history)
    }

    /// Index of the leading system/instruction message, if any.
    fn system_index(&self) -> Option<usize> {
        match self.history.first() {
            Some(m) if m.role == Role::System && !m.is_placeholder() => Some(0),
            _ => None,
        }
    }

    /// Index of the user message that triggered the current turn.
    fn turn_index(&self) -> Option<usize> {
        self.history.iter().rposition(|m| m.role == Role::User)
    }

    fn is_required(&self, index: usize) -> bool {
        Some(index) == self.system_index()
            || Some(index) == self.turn_index()
            || index + 1 == self.history.len()
    }

    fn is_droppable(&self, index: usize) -> bool {
        !self.is_required(index) && !self.history[index].is_placeholder()
    }

    fn required_tokens(&self) -> usize {
        (0..self.history.len())
            .filter(|&i| self.is_required(i))
            .map(|i| estimate_message(&self.history[i]))
            .sum()
    }
}

/// Builds bounded prompts and archives history that no longer fits.
pub struct ContextManager {
    archive: Arc<dyn ArchiveStore>,
    reserved_margin: usize,
}

impl ContextManager {
    /// `reserved_margin` is kept free for the completion (and tool schemas).
    pub fn new(archive: Arc<dyn ArchiveStore>, reserved_margin: usize) -> Self {
        Self {
            archive,
            reserved_margin,
        }
    }

    /// Tokens available to the prompt itself.
    pub fn limit(&self, state: &ConversationState) -> usize {
        state.token_budget.saturating_sub(self.reserved_margin)
    }

    /// Largest trailing window of the history that fits the budget.
    ///
    /// The system message, the current turn's user message and the most
    /// recent message are always included. Fails with `ContextOverflow`
    /// rather than returning an over-budget prompt.
    pub fn build_prompt(&self, state: &ConversationState) -> Result<Vec<Message>> {
        let limit = self.limit(state);
        let history = &state.history;

        if estimate_history(history) <= limit {
            return Ok(history.to_vec());
        }

        let required = state.required_tokens();
        if required > limit {
            return Err(Error::ContextOverflow { required, budget: limit });
        }

        let last = history.len() - 1;
        let floor = state.system_index().map(|i| i + 1).unwrap_or(0);
        let turn = state.turn_index();

        let mut used = required;
        let mut start = last;
        for i in (floor..last).rev() {
            if Some(i) == turn {
                start = i;
                continue;
            }
            let cost = estimate_message(&history[i]);
            if used + cost > limit {
                break;
            }
            used += cost;
            start = i;
        }

        let mut prompt = Vec::with_capacity(last - start + 3);
        if let Some(i) = state.system_index() {
            prompt.push(history[i].clone());
        }
        if let Some(t) = turn.filter(|&t| t < start && Some(t) != state.system_index()) {
            prompt.push(history[t].clone());
        }
        prompt.extend(history[start..].iter().cloned());

        debug!(
            "Truncated prompt to {} of {} messages ({} tokens, limit {})",
            prompt.len(),
            history.len(),
            used,
            limit
        );
        Ok(prompt)
    }

    /// Archive the oldest droppable runs until the live history fits.
    ///
    /// Returns the number of messages moved out of the live history.
    pub fn archive(&self, state: &mut ConversationState) -> Result<usize> {
        let limit = self.limit(state);
        let placeholder_cost = estimate_message(&Message::archive_placeholder(
            &"x".repeat(PLACEHOLDER_LOCATOR_ESTIMATE),
            0,
        ));
        let mut archived = 0;

        loop {
            let cost = state.live_tokens();
            if cost <= limit {
                break;
            }
            let excess = cost - limit;

            let Some(start) = (0..state.history.len()).find(|&i| state.is_droppable(i)) else {
                break;
            };

            let mut end = start;
            let mut freed = 0;
            while end < state.history.len() && state.is_droppable(end) {
                freed += estimate_message(&state.history[end]);
                end += 1;
                if freed >= excess + placeholder_cost {
                    break;
                }
            }

            let range: Vec<Message> = state.history[start..end].to_vec();
            let locator = self.archive.store(&state.session_id, &range)?;
            let placeholder = Message::archive_placeholder(&locator, range.len());
            state.history.splice(start..end, [placeholder]);

            info!(
                "Archived {} messages of session {} to {}",
                range.len(),
                state.session_id,
                locator
            );
            state.archived_refs.push(ArchivedRange {
                locator,
                count: range.len(),
                archived_at: Utc::now(),
            });
            archived += range.len();
        }

        // Placeholders are the last thing to go, oldest first. Their ranges
        // stay in archived_refs.
        while state.live_tokens() > limit {
            let Some(oldest) = state.history.iter().position(Message::is_placeholder) else {
                break;
            };
            let dropped = state.history.remove(oldest);
            debug!(
                "Dropped placeholder for {} from session {}",
                dropped.archive_locator().unwrap_or("?"),
                state.session_id
            );
        }

        let cost = state.live_tokens();
        if cost > limit {
            return Err(Error::ContextOverflow { required: cost, budget: limit });
        }

        Ok(archived)
    }

    /// Produce the prompt for the next model invocation, archiving first if
    /// the live history has outgrown the budget.
    pub fn prepare(&self, state: &mut ConversationState) -> Result<Vec<Message>> {
        if state.live_tokens() > self.limit(state) {
            self.archive(state)?;
        }
        self.build_prompt(state)
    }

    /// Load an archived range back from the store.
    pub fn retrieve(&self, locator: &str) -> Result<Vec<Message>> {
        self.archive.retrieve(locator)
    }
}

/// System/instruction prompt for a session.
pub fn system_prompt(workspace: &Path, search_enabled: bool) -> String {
    let now = chrono::Local::now().format("%Y-%m-%d %H:%M (%A)");
    let search_note = if search_enabled {
        "Live web search is available."
    } else {
        "Live web search is not configured; a search action will report that it is unavailable."
    };

    format!(
        r#"You are a helpful conversational assistant.

## Current Time
{now}

## Workspace
Files and commands are confined to `{workspace}`. Use relative paths.

## Actions
When you need to act, reply with a single JSON object and nothing else:

```json
{{"action": "<kind>", "parameters": {{ ... }}}}
```

Available kinds:
- `search`: `{{"query": "..."}}` look up current information on the web. {search_note}
- `file_op`: `{{"op": "read" | "write" | "list", "path": "...", "content": "..."}}`
- `terminal_op`: `{{"command": "..."}}` run a shell command in the workspace
- `finalize`: `{{"answer": "..."}}` end the turn with your final answer

Results come back as tool messages. Do not repeat an action that already failed with the same parameters.
When no action is needed, answer in plain text."#,
        workspace = workspace.display()
    )
}
