//! Agent session - the per-connection state machine
//!
//! `Idle → Thinking → Acting → Observing → (Thinking | Idle | Terminated)`.
//! One turn runs at a time; every transition emits its event before the next
//! one starts.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::{Config, GuardConfig};
use crate::error::Error;
use crate::memory::{ArchiveStore, FileArchiveStore};
use crate::tools::ToolDefinition;
use crate::Result;

use super::action::{parse_action, ActionError, ActionKind, ActionRequest};
use super::context::{system_prompt, ContextManager, ConversationState};
use super::dispatcher::{search_hits, ToolDispatcher};
use super::events::{AgentEvent, EventSink, TurnStatus};
use super::guard::LoopGuard;
use super::llm::{models, GenerationConfig, LlmClient, ModelSpec, ProviderRegistry, Usage};
use super::message::{unanswered_calls, Message, Response, ToolCallRequest};
use super::tokens::estimate_tools;

/// Where a session is in its turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Thinking,
    Acting,
    Observing,
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Idle => "idle",
            SessionState::Thinking => "thinking",
            SessionState::Acting => "acting",
            SessionState::Observing => "observing",
            SessionState::Terminated => "terminated",
        })
    }
}

/// Per-session settings, fixed at process start.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub generation: GenerationConfig,
    pub model: ModelSpec,
    pub token_budget: usize,
    pub max_iterations: usize,
    pub llm_timeout: Duration,
    pub guard: GuardConfig,
    pub system_prompt: String,
}

impl SessionSettings {
    pub fn from_config(config: &Config, search_enabled: bool) -> Self {
        Self {
            generation: config.generation(),
            model: models::resolve_or_custom(&config.model, &config.provider),
            token_budget: config.token_budget(),
            max_iterations: config.max_iterations.max(1),
            llm_timeout: config.timeouts.llm(),
            guard: config.guard.clone(),
            system_prompt: system_prompt(&config.workspace, search_enabled),
        }
    }
}

/// Builds sessions that share the process-wide collaborators.
pub struct SessionFactory {
    llm: Arc<dyn LlmClient>,
    dispatcher: Arc<ToolDispatcher>,
    archive: Arc<dyn ArchiveStore>,
    settings: SessionSettings,
}

impl SessionFactory {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        dispatcher: Arc<ToolDispatcher>,
        archive: Arc<dyn ArchiveStore>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            llm,
            dispatcher,
            archive,
            settings,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let llm = ProviderRegistry::create(config)?;
        let dispatcher = Arc::new(ToolDispatcher::from_config(config)?);
        let archive: Arc<dyn ArchiveStore> = Arc::new(FileArchiveStore::new(&config.archive_dir()));
        let settings = SessionSettings::from_config(config, dispatcher.search_enabled());
        Ok(Self::new(llm, dispatcher, archive, settings))
    }

    pub fn model_id(&self) -> &str {
        &self.settings.generation.model_id
    }

    pub fn create(&self, id: &str) -> AgentSession {
        let settings = &self.settings;
        let tools = self.dispatcher.capabilities();
        let margin = settings.generation.max_tokens + estimate_tools(&tools);

        AgentSession {
            id: id.to_string(),
            label: None,
            state: SessionState::Idle,
            conversation: ConversationState::new(id, settings.token_budget, settings.model.id.to_string())
                .with_system(settings.system_prompt.clone()),
            guard: LoopGuard::from_config(&settings.guard),
            context: ContextManager::new(self.archive.clone(), margin),
            llm: self.llm.clone(),
            dispatcher: self.dispatcher.clone(),
            tools,
            generation: settings.generation.clone(),
            model: settings.model.clone(),
            max_iterations: settings.max_iterations,
            llm_timeout: settings.llm_timeout,
        }
    }
}

/// One conversation, owned by one connection.
pub struct AgentSession {
    id: String,
    label: Option<String>,
    state: SessionState,
    conversation: ConversationState,
    guard: LoopGuard,
    context: ContextManager,
    llm: Arc<dyn LlmClient>,
    dispatcher: Arc<ToolDispatcher>,
    tools: Vec<ToolDefinition>,
    generation: GenerationConfig,
    model: ModelSpec,
    max_iterations: usize,
    llm_timeout: Duration,
}

impl AgentSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Client-supplied label (device id), for logs.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = Some(label.into());
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.conversation
    }

    pub fn model_id(&self) -> &str {
        &self.generation.model_id
    }

    /// Reset after the in-flight turn was cancelled from outside.
    pub fn cancel(&mut self) {
        if self.state != SessionState::Idle {
            info!(session = %self.id, from = %self.state, "Turn cancelled");
            self.transition(SessionState::Terminated);
        }
        self.close_unanswered_calls("turn cancelled");
        self.guard.reset();
        self.transition(SessionState::Idle);
    }

    /// Run one turn: from a user message to a final answer or a turn-fatal error.
    pub async fn run_turn(
        &mut self,
        content: &str,
        attachments: &[String],
        events: &EventSink,
    ) -> Result<Response> {
        info!(session = %self.id, label = ?self.label, "Starting turn: {} chars", content.len());

        self.guard.reset();
        self.conversation.push(Message::user_with_attachments(content, attachments));

        let mut usage = Usage::default();
        let mut iterations = 0;
        let outcome = self.drive(content, events, &mut usage, &mut iterations).await;

        match outcome {
            Ok(answer) => {
                emit(events, AgentEvent::AssistantDelta { content: answer.clone() });
                emit(
                    events,
                    AgentEvent::Done {
                        status: TurnStatus::Completed,
                        iterations,
                        usage,
                    },
                );
                self.transition(SessionState::Idle);

                let cost = models::estimate_cost(&self.model, usage.prompt_tokens, usage.completion_tokens);
                info!(
                    session = %self.id,
                    iterations,
                    tokens = usage.total_tokens,
                    "Turn completed (estimated cost ${:.6})",
                    cost
                );
                Ok(Response::new(answer, iterations))
            }
            Err(e) => {
                let status = match e {
                    Error::LoopDetected { .. } => TurnStatus::LoopDetected,
                    _ => TurnStatus::Failed,
                };
                warn!(session = %self.id, iterations, code = e.code(), "Turn failed: {}", e);
                self.close_unanswered_calls(&e.to_string());

                emit(events, AgentEvent::error(&e));
                emit(events, AgentEvent::Done { status, iterations, usage });
                self.transition(SessionState::Terminated);
                self.transition(SessionState::Idle);
                Err(e)
            }
        }
    }

    async fn drive(
        &mut self,
        content: &str,
        events: &EventSink,
        usage: &mut Usage,
        iterations: &mut usize,
    ) -> Result<String> {
        if let Some(request) = self.dispatcher.preflight(content) {
            self.act(request.with_call_id("preflight"), events).await?;
        }

        for iteration in 1..=self.max_iterations {
            *iterations = iteration;
            self.transition(SessionState::Thinking);
            emit(events, AgentEvent::Thinking { iteration });

            let prompt = self.context.prepare(&mut self.conversation)?;
            debug!(session = %self.id, iteration, messages = prompt.len(), "Invoking model");

            let response = tokio::time::timeout(
                self.llm_timeout,
                self.llm.chat(&prompt, &self.tools, &self.generation),
            )
            .await
            .map_err(|_| {
                Error::UpstreamTimeout(format!(
                    "model did not answer within {}s",
                    self.llm_timeout.as_secs()
                ))
            })??;
            *usage += response.usage;

            let text = response.content.clone().unwrap_or_default();
            let Some(request) = parse_action(&response)? else {
                self.conversation.push(Message::assistant(text.clone()));
                return Ok(text);
            };

            if request.kind == ActionKind::Finalize {
                let result = self.dispatcher.dispatch(&request).await?;
                let answer = match result.content() {
                    a if a.trim().is_empty() => text,
                    a => a,
                };
                self.conversation.push(Message::assistant(answer.clone()));
                return Ok(answer);
            }

            let assistant = match &request.call_id {
                Some(id) => Message::assistant_with_tools(
                    text,
                    vec![ToolCallRequest {
                        id: id.clone(),
                        name: request.kind.as_str().to_string(),
                        arguments: request.parameters.clone(),
                    }],
                ),
                None => Message::assistant(text),
            };
            self.conversation.push(assistant);

            self.act(request, events).await?;
        }

        Err(Error::MaxIterations)
    }

    /// Acting → Observing for one request.
    async fn act(&mut self, request: ActionRequest, events: &EventSink) -> Result<()> {
        self.transition(SessionState::Acting);
        emit(
            events,
            AgentEvent::ToolCall {
                kind: request.kind,
                parameters: request.parameters.clone(),
            },
        );

        let result = self.dispatcher.dispatch(&request).await?;

        self.transition(SessionState::Observing);
        if let Some((query, answer, results)) = search_hits(&result) {
            emit(events, AgentEvent::SearchResult { query, answer, results });
        }
        emit(
            events,
            AgentEvent::ToolResult {
                kind: result.kind,
                success: result.success,
                payload: result.payload.clone(),
                error: result.error,
            },
        );

        let call_id = request
            .call_id
            .clone()
            .unwrap_or_else(|| format!("action_{}", self.conversation.history().len()));
        self.conversation.push(Message::tool_result(
            call_id,
            result.content(),
            json!({
                "kind": result.kind,
                "success": result.success,
                "error": result.error,
            }),
        ));

        if !self.guard.observe(&request, &result) {
            return Err(Error::LoopDetected {
                repeats: self.guard.repeat_count(),
            });
        }
        Ok(())
    }

    /// Give every tool call still waiting for a result a failed one, so the
    /// next turn starts from a well-formed history.
    fn close_unanswered_calls(&mut self, reason: &str) {
        let pending: Vec<(String, String)> = unanswered_calls(self.conversation.history())
            .into_iter()
            .map(|tc| (tc.id.clone(), tc.name.clone()))
            .collect();

        for (call_id, name) in pending {
            debug!(session = %self.id, call = %call_id, "Closing unanswered tool call");
            self.conversation.push(Message::tool_result(
                call_id,
                format!("{} {}: {}", name, ActionError::Failed, reason),
                json!({
                    "kind": name,
                    "success": false,
                    "error": ActionError::Failed,
                }),
            ));
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(session = %self.id, from = %self.state, to = %next, "Transition");
        self.state = next;
    }
}

fn emit(events: &EventSink, event: AgentEvent) {
    if events.send(event).is_err() {
        debug!("Event receiver dropped");
    }
}
