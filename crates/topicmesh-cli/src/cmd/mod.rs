//! Subcommand implementations.

pub mod arm;
pub mod master;
pub mod node;

use crate::cli::NodeEndpoints;
use thiserror::Error;
use topicmesh_core::{MasterError, Node, NodeError};
use topicmesh_types::config::MeshConfig;

/// A subcommand failed; printed by `main` before exiting non-zero.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Master failed: {0}")]
    Master(#[from] MasterError),
    #[error("Node failed: {0}")]
    Node(#[from] NodeError),
    #[error("{0}")]
    Invalid(String),
}

impl CommandError {
    /// Suggested next step for the user.
    pub fn fix(&self) -> &'static str {
        match self {
            Self::Master(_) => "Is another master already listening on that address? Try --listen",
            Self::Node(NodeError::Wire(_)) | Self::Node(NodeError::RegistrationTimeout(_)) => {
                "Is the master running? Start it with: topicmesh master"
            }
            Self::Node(NodeError::ReservedTopic(_)) => "Topics starting with `__` are reserved",
            Self::Node(_) => "Check the node and master logs (RUST_LOG=debug)",
            Self::Invalid(_) => "See `topicmesh --help`",
        }
    }
}

/// Start a node using config values overridden by command-line flags.
pub(crate) async fn start_node(
    name: &str,
    config: &MeshConfig,
    endpoints: &NodeEndpoints,
) -> Result<Node, CommandError> {
    let mut node_config = config.node.clone();
    if let Some(listen) = &endpoints.listen {
        node_config.listen_addr = listen.clone();
    }
    if let Some(master) = &endpoints.master {
        node_config.master_addr = master.clone();
    }
    let node = Node::start(name, node_config, config.transport.clone()).await?;
    crate::ui::section(&format!("node '{}'", node.name()));
    crate::ui::kv("Listening", &node.local_addr().to_string());
    crate::ui::kv("Master", &node.master_addr().to_string());
    Ok(node)
}

/// Resolve when Ctrl+C is pressed.
pub(crate) async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl+C, running until killed");
        std::future::pending::<()>().await;
    }
}
