//! Session registry - connection id to agent session.
//!
//! The only process-wide mutable state. Inserts and removals happen under
//! one lock, so a connection can never end up with two sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use super::session::{AgentSession, SessionFactory};

/// Identity of one client connection.
pub type ConnectionId = String;

/// Shared handle to a session. The inner lock serialises turns.
pub type SessionHandle = Arc<tokio::sync::Mutex<AgentSession>>;

pub struct SessionRegistry {
    factory: SessionFactory,
    sessions: Mutex<HashMap<ConnectionId, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new(factory: SessionFactory) -> Self {
        Self {
            factory,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn factory(&self) -> &SessionFactory {
        &self.factory
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectionId, SessionHandle>> {
        // Every critical section leaves the map consistent; poisoning is ignored.
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Session for `id`, created on first use.
    pub fn get_or_create(&self, id: &str) -> SessionHandle {
        let mut sessions = self.lock();
        if let Some(handle) = sessions.get(id) {
            return handle.clone();
        }

        let handle = Arc::new(tokio::sync::Mutex::new(self.factory.create(id)));
        sessions.insert(id.to_string(), handle.clone());
        info!(connection = id, active = sessions.len(), "Session created");
        handle
    }

    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.lock().get(id).cloned()
    }

    /// Drop the session for `id`. Returns whether one existed.
    pub fn remove(&self, id: &str) -> bool {
        let mut sessions = self.lock();
        let removed = sessions.remove(id).is_some();
        if removed {
            info!(connection = id, active = sessions.len(), "Session removed");
        } else {
            debug!(connection = id, "No session to remove");
        }
        removed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registry over fakes, for tests that need a whole session stack.
#[cfg(test)]
pub(crate) fn test_registry(
    workspace: &std::path::Path,
    llm: Arc<dyn super::llm::LlmClient>,
) -> SessionRegistry {
    use super::dispatcher::ToolDispatcher;
    use super::llm::{models, GenerationConfig};
    use super::session::SessionSettings;
    use crate::config::GuardConfig;
    use crate::memory::InMemoryArchiveStore;
    use crate::tools::{FileOps, Terminal};
    use std::time::Duration;

    let dispatcher = ToolDispatcher::new(
        None,
        FileOps::new(workspace),
        Terminal::new(workspace, Duration::from_secs(5)),
        Duration::from_secs(1),
    );
    let settings = SessionSettings {
        generation: GenerationConfig {
            temperature: 0.0,
            max_tokens: 128,
            model_id: "fake-model".to_string(),
        },
        model: models::resolve_or_custom("fake-model", "fake"),
        token_budget: 16_384,
        max_iterations: 5,
        llm_timeout: Duration::from_secs(5),
        guard: GuardConfig::default(),
        system_prompt: "Test".to_string(),
    };
    SessionRegistry::new(SessionFactory::new(
        llm,
        Arc::new(dispatcher),
        Arc::new(InMemoryArchiveStore::new()),
        settings,
    ))
}
