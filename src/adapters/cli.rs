//! CLI adapter: interactive and single-message command line interface.
//!
//! Drives one [`AgentSession`] from the terminal and prints its event trace
//! as the turn runs.

use std::io::{self, Write};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex, Notify};

use crate::agent::{AgentSession, Response};
use crate::ui;
use crate::Result;

use super::Channel;

/// CLI channel for a local agent session.
pub struct CliChannel {
    session: Mutex<AgentSession>,
    stopped: Notify,
}

impl CliChannel {
    pub fn new(session: AgentSession) -> Self {
        Self {
            session: Mutex::new(session),
            stopped: Notify::new(),
        }
    }

    /// Run a single turn, printing events as they arrive.
    pub async fn run_once(&self, message: &str) -> Result<Response> {
        let mut session = self.session.lock().await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                ui::print_event(&event);
            }
        });

        let result = session.run_turn(message, &[], &tx).await;
        drop(tx);
        let _ = printer.await;
        result
    }

    /// Messages currently in the live conversation.
    pub async fn history_len(&self) -> usize {
        self.session.lock().await.conversation().history().len()
    }
}

impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            print!("\n> ");
            io::stdout().flush()?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = self.stopped.notified() => break,
            };
            // EOF
            let Some(line) = line else {
                break;
            };

            let input = line.trim();
            if input.is_empty() {
                continue;
            }

            if matches!(input.to_lowercase().as_str(), "exit" | "quit" | "q") {
                println!("Goodbye! 👋");
                break;
            }

            // Failures were already printed from the event stream.
            if let Ok(response) = self.run_once(input).await {
                println!("\n{}", response.content);
            }
        }

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stopped.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::FakeLlmClient;
    use crate::agent::test_registry;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn channel(tmp: &TempDir, llm: FakeLlmClient) -> CliChannel {
        let registry = test_registry(tmp.path(), Arc::new(llm));
        CliChannel::new(registry.factory().create("cli"))
    }

    #[tokio::test]
    async fn test_run_once() {
        let tmp = TempDir::new().unwrap();
        let cli = channel(&tmp, FakeLlmClient::new(vec!["Hello from the agent", "Again"]));

        let before = cli.history_len().await;
        let response = cli.run_once("hi").await.unwrap();
        assert_eq!(response.content, "Hello from the agent");
        assert_eq!(cli.history_len().await, before + 2);

        let response = cli.run_once("and again").await.unwrap();
        assert_eq!(response.content, "Again");
        assert_eq!(cli.name(), "cli");
    }

    #[tokio::test]
    async fn test_stop_before_start_returns() {
        let tmp = TempDir::new().unwrap();
        let cli = channel(&tmp, FakeLlmClient::new(vec![]));

        cli.stop().await.unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), cli.start()).await;
        assert!(result.unwrap().is_ok());
    }
}
