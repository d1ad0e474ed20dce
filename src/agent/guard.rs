//! Anti-loop guard.
//!
//! Fingerprints every (action, result) pair of a turn and stops the turn once
//! the same fingerprint has been seen `max_repeats` times in a row.

use std::collections::VecDeque;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::GuardConfig;

use super::action::{ActionRequest, ActionResult};

/// Per-session loop state.
#[derive(Debug, Clone)]
pub struct LoopGuard {
    recent: VecDeque<String>,
    window: usize,
    repeat_count: usize,
    max_repeats: usize,
}

impl LoopGuard {
    pub fn new(max_repeats: usize, window: usize) -> Self {
        let max_repeats = max_repeats.max(1);
        // The ring has to be able to hold a full run.
        let window = window.max(max_repeats);
        Self {
            recent: VecDeque::with_capacity(window),
            window,
            repeat_count: 0,
            max_repeats,
        }
    }

    pub fn from_config(config: &GuardConfig) -> Self {
        Self::new(config.max_repeats, config.window)
    }

    /// Record an observation. Returns `false` when the turn must stop.
    pub fn observe(&mut self, request: &ActionRequest, result: &ActionResult) -> bool {
        let signature = fingerprint(request, result);

        if self.recent.back() == Some(&signature) {
            self.repeat_count += 1;
        } else {
            self.repeat_count = 1;
        }

        if self.recent.len() == self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(signature);

        if self.repeat_count >= self.max_repeats {
            warn!(
                kind = %request.kind,
                repeats = self.repeat_count,
                "Loop detected: identical action repeated"
            );
            return false;
        }
        true
    }

    /// Length of the trailing run of identical fingerprints.
    pub fn repeat_count(&self) -> usize {
        self.repeat_count
    }

    pub fn max_repeats(&self) -> usize {
        self.max_repeats
    }

    /// Forget everything; called at the start of each turn.
    pub fn reset(&mut self) {
        self.recent.clear();
        self.repeat_count = 0;
    }
}

/// Stable fingerprint of (kind, normalized parameters, success).
pub fn fingerprint(request: &ActionRequest, result: &ActionResult) -> String {
    let normalized = normalize(&request.parameters);
    let mut hasher = Sha256::new();
    hasher.update(request.kind.as_str().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(normalized.to_string().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(if result.success { b"ok" as &[u8] } else { b"err" });
    format!("{:x}", hasher.finalize())
}

/// Case, surrounding and repeated whitespace do not make an action new.
fn normalize(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(
            s.split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.trim().to_lowercase(), normalize(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::action::{ActionError, ActionKind};
    use serde_json::json;

    fn failed_search(query: &str) -> (ActionRequest, ActionResult) {
        (
            ActionRequest::search(query),
            ActionResult::failed(ActionKind::Search, ActionError::SearchUnavailable, "down"),
        )
    }

    #[test]
    fn test_stops_on_exactly_the_max_repeats_call() {
        for max_repeats in 1..=6 {
            let mut guard = LoopGuard::new(max_repeats, 5);
            let (req, res) = failed_search("anime 2025");

            for call in 1..max_repeats {
                assert!(guard.observe(&req, &res), "stopped early on call {call}");
            }
            assert!(!guard.observe(&req, &res), "did not stop on call {max_repeats}");
        }
    }

    #[test]
    fn test_distinct_actions_reset_the_run() {
        let mut guard = LoopGuard::new(3, 5);
        let (a, ra) = failed_search("one");
        let (b, rb) = failed_search("two");

        assert!(guard.observe(&a, &ra));
        assert!(guard.observe(&a, &ra));
        assert!(guard.observe(&b, &rb));
        assert_eq!(guard.repeat_count(), 1);
        assert!(guard.observe(&a, &ra));
        assert!(guard.observe(&a, &ra));
        assert!(!guard.observe(&a, &ra));
    }

    #[test]
    fn test_normalized_parameters_match() {
        let (a, res) = failed_search("  Latest   Anime ");
        let (b, _) = failed_search("latest anime");
        assert_eq!(fingerprint(&a, &res), fingerprint(&b, &res));
    }

    #[test]
    fn test_success_is_part_of_fingerprint() {
        let req = ActionRequest::new(ActionKind::TerminalOp, json!({"command": "ls"}));
        let ok = ActionResult::ok(ActionKind::TerminalOp, json!({"output": ""}));
        let err = ActionResult::failed(ActionKind::TerminalOp, ActionError::Failed, "exit 1");
        assert_ne!(fingerprint(&req, &ok), fingerprint(&req, &err));
    }

    #[test]
    fn test_reset() {
        let mut guard = LoopGuard::new(2, 5);
        let (req, res) = failed_search("q");
        assert!(guard.observe(&req, &res));
        guard.reset();
        assert!(guard.observe(&req, &res));
        assert!(!guard.observe(&req, &res));
    }

    #[test]
    fn test_window_never_smaller_than_run() {
        let mut guard = LoopGuard::new(4, 2);
        let (req, res) = failed_search("q");
        for _ in 0..3 {
            assert!(guard.observe(&req, &res));
        }
        assert!(!guard.observe(&req, &res));
    }
}
