//! Error types for the registry, master and node.

use std::time::Duration;
use thiserror::Error;
use topicmesh_types::Address;
use topicmesh_wire::WireError;

/// Registry lookups.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A topic registration named a node that never registered.
    #[error("Unknown node: {0}")]
    UnknownNode(String),
}

/// Errors returned by [`crate::Node`] operations.
#[derive(Error, Debug)]
pub enum NodeError {
    /// Transport failure (bind, connect).
    #[error(transparent)]
    Wire(#[from] WireError),

    /// The registration message could not be sent.
    #[error("Failed to register with master at {master}: {reason}")]
    Registration { master: Address, reason: String },

    /// The master did not confirm in time.
    #[error("No registration confirmation within {0:?}")]
    RegistrationTimeout(Duration),

    /// The publisher registration for a topic could not be sent.
    #[error("Failed to register as publisher of '{topic}'")]
    PublisherRegistration { topic: String },

    /// The subscriber registration for a topic could not be sent.
    #[error("Failed to subscribe to '{topic}': {reason}")]
    Subscription { topic: String, reason: String },

    /// Application code tried to use a `__`-prefixed topic.
    #[error("Topic '{0}' is reserved for control messages")]
    ReservedTopic(String),
}

/// Errors returned by [`crate::Master`] operations.
#[derive(Error, Debug)]
pub enum MasterError {
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Alias for node results.
pub type NodeResult<T> = Result<T, NodeError>;
