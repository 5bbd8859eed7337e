//! `topicmesh node`

use super::{interrupted, start_node, CommandError};
use crate::cli::NodeEndpoints;
use crate::ui;
use colored::Colorize;
use serde_json::json;
use std::time::Duration;
use topicmesh_types::config::MeshConfig;
use topicmesh_types::Message;
use tracing::{debug, warn};

pub struct NodeOptions {
    pub name: String,
    pub endpoints: NodeEndpoints,
    pub pub_topic: Option<String>,
    pub sub_topic: Option<String>,
    pub interval_secs: f64,
}

pub async fn run(config: &MeshConfig, options: NodeOptions) -> Result<(), CommandError> {
    if options.pub_topic.is_none() && options.sub_topic.is_none() {
        return Err(CommandError::Invalid(
            "nothing to do: pass --pub-topic and/or --sub-topic".to_string(),
        ));
    }
    if !(options.interval_secs.is_finite() && options.interval_secs > 0.0) {
        return Err(CommandError::Invalid(format!(
            "--interval-secs must be positive, got {}",
            options.interval_secs
        )));
    }

    let node = start_node(&options.name, config, &options.endpoints).await?;

    if let Some(topic) = &options.sub_topic {
        node.subscribe(topic, |message| {
            print_message(&message);
            Ok(())
        })
        .await?;
        ui::kv("Subscribed", topic);
    }

    if let Some(topic) = options.pub_topic.clone() {
        ui::kv("Publishing", &topic);
        let publisher = node.clone();
        let period = Duration::from_secs_f64(options.interval_secs);
        node.spawn_task(async move {
            let mut ticker = tokio::time::interval(period);
            for (count, data) in numbered_messages().enumerate() {
                ticker.tick().await;
                match publisher.publish(&topic, data).await {
                    Ok(delivery) => debug!(%topic, count, ?delivery, "published"),
                    Err(e) => warn!(%topic, error = %e, "publish failed"),
                }
            }
        });
    }

    ui::hint("press Ctrl+C to stop");
    interrupted().await;
    node.stop().await;
    Ok(())
}

/// `"Message 0"`, `"Message 1"`, ...
fn numbered_messages() -> impl Iterator<Item = serde_json::Value> {
    (0u64..).map(|n| json!(format!("Message {n}")))
}

fn print_message(message: &Message) {
    let time = message
        .sent_at()
        .map(|t| t.format("%H:%M:%S%.3f").to_string())
        .unwrap_or_default();
    println!(
        "  {} {} {} {}",
        time.dimmed(),
        message.topic.bright_cyan(),
        message.source_node.as_deref().unwrap_or("?").bold(),
        message.data
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbered_messages_start_at_zero() {
        let first: Vec<_> = numbered_messages().take(3).collect();
        assert_eq!(
            first,
            vec![json!("Message 0"), json!("Message 1"), json!("Message 2")]
        );
    }
}
