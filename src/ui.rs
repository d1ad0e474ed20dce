use colored::*;
use terminal_size::{Width, Height, terminal_size};

use crate::agent::{AgentEvent, TurnStatus};

pub fn print_header(model: &str, provider: &str) {
    let (width, _) = terminal_size().unwrap_or((Width(80), Height(24)));
    let width = width.0 as usize;

    let line = "─".repeat(width);
    println!("{}", line.black().bold());

    let logo = "💬";
    let name = "Parley".yellow().bold();
    let version = format!("v{}", env!("CARGO_PKG_VERSION")).black().bold();

    println!("  {} {} {}", logo, name, version);

    let info = format!("  {}  •  {}", model, provider).cyan();
    println!("{}", info);

    if let Ok(path) = std::env::current_dir() {
        let path_str = path.to_string_lossy().black().bold();
        println!("  {}", path_str);
    }

    println!("{}", line.black().bold());
}

pub fn print_step(msg: &str) {
    println!("  {} {}", "•".green(), msg);
}

pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green().bold(), msg.green());
}

pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠️ ".yellow().bold(), msg.yellow());
}

pub fn print_error(msg: &str) {
    println!("  {} {}", "❌".red().bold(), msg.red());
}

pub fn print_thinking(msg: &str) {
    println!("  {} {}...", "∴".magenta(), msg);
}

/// Trace line for one session event. The final answer is printed by the caller.
pub fn print_event(event: &AgentEvent) {
    match event {
        AgentEvent::Thinking { iteration } => print_thinking(&format!("Thinking ({})", iteration)),
        AgentEvent::ToolCall { .. } | AgentEvent::SearchResult { .. } => {
            if let Some(line) = event_summary(event) {
                print_step(&line);
            }
        }
        AgentEvent::ToolResult { success: true, .. } => {
            if let Some(line) = event_summary(event) {
                print_success(&line);
            }
        }
        AgentEvent::ToolResult { success: false, .. } => {
            if let Some(line) = event_summary(event) {
                print_warning(&line);
            }
        }
        AgentEvent::Error { .. } => {
            if let Some(line) = event_summary(event) {
                print_error(&line);
            }
        }
        AgentEvent::Done { status, .. } if *status != TurnStatus::Completed => {
            if let Some(line) = event_summary(event) {
                print_warning(&line);
            }
        }
        AgentEvent::AssistantDelta { .. } | AgentEvent::Done { .. } => {}
    }
}

/// Plain-text summary of an event, without styling.
pub fn event_summary(event: &AgentEvent) -> Option<String> {
    let line = match event {
        AgentEvent::Thinking { iteration } => format!("Thinking ({})", iteration),
        AgentEvent::ToolCall { kind, parameters } => {
            let mut params = parameters.to_string();
            if params.len() > 80 {
                let cut = (0..=77).rev().find(|i| params.is_char_boundary(*i)).unwrap_or(0);
                params.truncate(cut);
                params.push_str("...");
            }
            format!("{} {}", kind, params)
        }
        AgentEvent::ToolResult { kind, success: true, .. } => format!("{} done", kind),
        AgentEvent::ToolResult { kind, error, .. } => match error {
            Some(error) => format!("{} failed: {:?}", kind, error),
            None => format!("{} failed", kind),
        },
        AgentEvent::SearchResult { query, results, .. } => {
            format!("{} results for \"{}\"", results.len(), query)
        }
        AgentEvent::Error { code, message } => format!("{}: {}", code, message),
        AgentEvent::Done { status, iterations, usage } => {
            format!("{:?} after {} iterations ({} tokens)", status, iterations, usage.total_tokens)
        }
        AgentEvent::AssistantDelta { .. } => return None,
    };
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ActionError, ActionKind, Usage};
    use serde_json::json;

    #[test]
    fn test_event_summary() {
        let call = AgentEvent::ToolCall {
            kind: ActionKind::Search,
            parameters: json!({"query": "anime"}),
        };
        assert_eq!(event_summary(&call).unwrap(), r#"search {"query":"anime"}"#);

        let failed = AgentEvent::ToolResult {
            kind: ActionKind::Search,
            success: false,
            payload: json!({}),
            error: Some(ActionError::SearchUnavailable),
        };
        assert_eq!(event_summary(&failed).unwrap(), "search failed: SearchUnavailable");

        let done = AgentEvent::Done {
            status: TurnStatus::LoopDetected,
            iterations: 3,
            usage: Usage::default(),
        };
        assert_eq!(event_summary(&done).unwrap(), "LoopDetected after 3 iterations (0 tokens)");

        let delta = AgentEvent::AssistantDelta { content: "hi".into() };
        assert!(event_summary(&delta).is_none());
    }

    #[test]
    fn test_long_parameters_are_shortened() {
        let call = AgentEvent::ToolCall {
            kind: ActionKind::TerminalOp,
            parameters: json!({"command": "é".repeat(100)}),
        };
        let line = event_summary(&call).unwrap();
        assert!(line.ends_with("..."));
        assert!(line.chars().count() < 100);
    }
}
