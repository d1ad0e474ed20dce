//! Agent module: core agent logic.
//!
//! This module contains:
//! - Message types and the token estimator
//! - LLM client trait, implementations and model catalog
//! - Context manager with archival
//! - Action parsing, search trigger, tool dispatcher and anti-loop guard
//! - The per-connection agent session and the session registry
//!
//! # Adding a New LLM Provider
//!
//! See [`llm::ProviderRegistry`] for instructions.

mod action;
mod context;
mod dispatcher;
mod events;
mod guard;
mod message;
mod registry;
mod session;
pub mod tokens;
pub mod trigger;

// LLM providers in submodule
pub mod llm;

// Re-exports for convenience
pub use action::{parse_action, ActionError, ActionKind, ActionRequest, ActionResult};
pub use context::{system_prompt, ArchivedRange, ContextManager, ConversationState};
pub use dispatcher::ToolDispatcher;
pub use events::{AgentEvent, EventSink, TurnStatus};
pub use guard::LoopGuard;
pub use llm::{GenerationConfig, LlmClient, LlmResponse, ModelSpec, ProviderRegistry, Usage};
pub use message::{Message, Response, Role, ToolCallRequest};
pub use registry::{ConnectionId, SessionHandle, SessionRegistry};
pub use session::{AgentSession, SessionFactory, SessionSettings, SessionState};

#[cfg(test)]
pub(crate) use registry::test_registry;
