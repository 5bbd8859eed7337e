//! Interactive master shell.
//!
//! Runs on its own OS thread, reads commands from stdin and talks to the
//! running master only through its command queue and registry handle.

use crate::table::Table;
use crate::ui;
use std::io::{self, BufRead, Write};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use topicmesh_core::{MasterCommand, Registry};
use tracing::warn;

const HELP: &str = "\
Commands:
  list_nodes                 Show registered nodes
  list_topics                Show topics with their publishers and subscribers
  publish <topic> <json>     Relay a message to the topic's subscribers
  help                       Show this help
  exit                       Stop the master";

const PUBLISH_EXAMPLE: &str = r#"publish test_topic {"message": "hello"}"#;

#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    ListNodes,
    ListTopics,
    Publish {
        topic: String,
        data: serde_json::Value,
    },
    Help,
    Exit,
    /// Blank line.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Unknown command: {0} (try `help`)")]
    Unknown(String),
    #[error("Usage: publish <topic> <json>")]
    PublishUsage,
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
}

/// Parse one input line.
pub fn parse(line: &str) -> Result<ShellCommand, ParseError> {
    let line = line.trim();
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    match command {
        "" => Ok(ShellCommand::Empty),
        "list_nodes" => Ok(ShellCommand::ListNodes),
        "list_topics" => Ok(ShellCommand::ListTopics),
        "help" => Ok(ShellCommand::Help),
        "exit" | "quit" => Ok(ShellCommand::Exit),
        "publish" => {
            let (topic, json) = rest
                .split_once(char::is_whitespace)
                .ok_or(ParseError::PublishUsage)?;
            let data = serde_json::from_str(json.trim())
                .map_err(|e| ParseError::InvalidJson(e.to_string()))?;
            Ok(ShellCommand::Publish {
                topic: topic.to_string(),
                data,
            })
        }
        other => Err(ParseError::Unknown(other.to_string())),
    }
}

/// Start the shell thread. The returned receiver resolves when the shell
/// exits (on `exit` or end of input).
pub fn spawn(
    registry: Registry,
    commands: mpsc::Sender<MasterCommand>,
) -> Option<oneshot::Receiver<()>> {
    let (done_tx, done_rx) = oneshot::channel();
    let spawned = std::thread::Builder::new()
        .name("master-shell".to_string())
        .spawn(move || {
            run(&registry, &commands);
            let _ = done_tx.send(());
        });
    match spawned {
        Ok(_) => Some(done_rx),
        Err(e) => {
            warn!(error = %e, "could not start master shell");
            None
        }
    }
}

fn run(registry: &Registry, commands: &mpsc::Sender<MasterCommand>) {
    println!("{HELP}");
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("master> ");
        let _ = io::stdout().flush();
        let line = match lines.next() {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                warn!(error = %e, "failed to read shell input");
                break;
            }
            None => break,
        };

        match parse(&line) {
            Ok(ShellCommand::Empty) => {}
            Ok(ShellCommand::ListNodes) => print_nodes(registry),
            Ok(ShellCommand::ListTopics) => print_topics(registry),
            Ok(ShellCommand::Publish { topic, data }) => {
                let command = MasterCommand::Publish {
                    topic: topic.clone(),
                    data,
                };
                if commands.blocking_send(command).is_err() {
                    ui::error("Master is no longer running");
                    break;
                }
                ui::success(&format!("Queued message for '{topic}'"));
            }
            Ok(ShellCommand::Help) => println!("{HELP}"),
            Ok(ShellCommand::Exit) => break,
            Err(e @ ParseError::InvalidJson(_)) => {
                ui::error_with_fix(&e.to_string(), PUBLISH_EXAMPLE);
            }
            Err(e) => ui::error(&e.to_string()),
        }
    }
}

fn print_nodes(registry: &Registry) {
    let nodes = registry.nodes();
    if nodes.is_empty() {
        ui::hint("no nodes registered");
        return;
    }
    let mut table = Table::new(&["Node", "Address", "Registered"]);
    for node in &nodes {
        table.add_row([
            node.name.clone(),
            node.address.to_string(),
            node.registered_at.format("%H:%M:%S").to_string(),
        ]);
    }
    table.print();
}

fn print_topics(registry: &Registry) {
    let topics = registry.topics();
    if topics.is_empty() {
        ui::hint("no topics yet");
        return;
    }
    let mut table = Table::new(&["Topic", "Publishers", "Subscribers"]);
    for topic in &topics {
        table.add_row([
            topic.topic.clone(),
            topic.publishers.join(", "),
            topic.subscribers.join(", "),
        ]);
    }
    table.print();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse("list_nodes"), Ok(ShellCommand::ListNodes));
        assert_eq!(parse("  list_topics  "), Ok(ShellCommand::ListTopics));
        assert_eq!(parse("help"), Ok(ShellCommand::Help));
        assert_eq!(parse("exit"), Ok(ShellCommand::Exit));
        assert_eq!(parse(""), Ok(ShellCommand::Empty));
    }

    #[test]
    fn test_publish_keeps_json_whitespace() {
        let parsed = parse(r#"publish test_topic {"message": "hello world", "n": [1, 2]}"#);
        assert_eq!(
            parsed,
            Ok(ShellCommand::Publish {
                topic: "test_topic".to_string(),
                data: json!({"message": "hello world", "n": [1, 2]}),
            })
        );
    }

    #[test]
    fn test_publish_scalar_json() {
        assert_eq!(
            parse("publish count 42"),
            Ok(ShellCommand::Publish {
                topic: "count".to_string(),
                data: json!(42),
            })
        );
    }

    #[test]
    fn test_publish_errors() {
        assert_eq!(parse("publish"), Err(ParseError::PublishUsage));
        assert_eq!(parse("publish only_topic"), Err(ParseError::PublishUsage));
        assert!(matches!(
            parse("publish t {not json}"),
            Err(ParseError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            parse("shutdown now"),
            Err(ParseError::Unknown("shutdown".to_string()))
        );
    }
}
