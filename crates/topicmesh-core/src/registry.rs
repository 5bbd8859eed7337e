//! Topology registry — the master's view of nodes and topics.
//!
//! The [`Registry`] records every registered node's listening address and, per
//! topic, the ordered list of publishers and subscribers. Entries live for the
//! lifetime of the registry; nothing is removed when a node goes away.

use crate::error::RegistryError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use topicmesh_types::Address;

/// A node participating in a topic, with the address it listens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub node_name: String,
    pub address: Address,
}

/// A registered node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEntry {
    pub name: String,
    pub address: Address,
    /// When the node last registered.
    pub registered_at: DateTime<Utc>,
}

/// Publishers and subscribers of one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSummary {
    pub topic: String,
    pub publishers: Vec<String>,
    pub subscribers: Vec<String>,
}

#[derive(Debug, Default)]
struct Topology {
    nodes: BTreeMap<String, NodeEntry>,
    publishers: BTreeMap<String, Vec<Endpoint>>,
    subscribers: BTreeMap<String, Vec<Endpoint>>,
}

impl Topology {
    fn endpoint(&self, node_name: &str) -> Result<Endpoint, RegistryError> {
        self.nodes
            .get(node_name)
            .map(|entry| Endpoint {
                node_name: entry.name.clone(),
                address: entry.address.clone(),
            })
            .ok_or_else(|| RegistryError::UnknownNode(node_name.to_string()))
    }
}

/// Thread-safe handle to a topology. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    topology: Arc<RwLock<Topology>>,
}

impl Registry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, or overwrite the address of one with the same name.
    pub fn register_node(&self, name: &str, address: Address) {
        let mut topology = self.topology.write().unwrap_or_else(|e| e.into_inner());
        topology.nodes.insert(
            name.to_string(),
            NodeEntry {
                name: name.to_string(),
                address,
                registered_at: Utc::now(),
            },
        );
    }

    /// Address of a registered node.
    pub fn node_address(&self, name: &str) -> Option<Address> {
        let topology = self.topology.read().unwrap_or_else(|e| e.into_inner());
        topology.nodes.get(name).map(|n| n.address.clone())
    }

    /// Append `node_name` to the publishers of `topic`.
    ///
    /// The node's address is taken from its registration.
    pub fn add_publisher(&self, topic: &str, node_name: &str) -> Result<Endpoint, RegistryError> {
        let mut topology = self.topology.write().unwrap_or_else(|e| e.into_inner());
        let endpoint = topology.endpoint(node_name)?;
        topology
            .publishers
            .entry(topic.to_string())
            .or_default()
            .push(endpoint.clone());
        Ok(endpoint)
    }

    /// Append `node_name` to the subscribers of `topic` and return the
    /// publishers that existed just before.
    ///
    /// Snapshot and append happen under one lock, so a publisher registering
    /// concurrently is either in the snapshot or sees this subscriber later,
    /// never both and never neither.
    pub fn add_subscriber(
        &self,
        topic: &str,
        node_name: &str,
    ) -> Result<Vec<Endpoint>, RegistryError> {
        let mut topology = self.topology.write().unwrap_or_else(|e| e.into_inner());
        let endpoint = topology.endpoint(node_name)?;
        let snapshot = topology
            .publishers
            .get(topic)
            .cloned()
            .unwrap_or_default();
        topology
            .subscribers
            .entry(topic.to_string())
            .or_default()
            .push(endpoint);
        Ok(snapshot)
    }

    /// Publishers of a topic in registration order.
    pub fn publishers_of(&self, topic: &str) -> Vec<Endpoint> {
        let topology = self.topology.read().unwrap_or_else(|e| e.into_inner());
        topology.publishers.get(topic).cloned().unwrap_or_default()
    }

    /// Subscribers of a topic in registration order.
    pub fn subscribers_of(&self, topic: &str) -> Vec<Endpoint> {
        let topology = self.topology.read().unwrap_or_else(|e| e.into_inner());
        topology.subscribers.get(topic).cloned().unwrap_or_default()
    }

    /// All registered nodes, sorted by name.
    pub fn nodes(&self) -> Vec<NodeEntry> {
        let topology = self.topology.read().unwrap_or_else(|e| e.into_inner());
        topology.nodes.values().cloned().collect()
    }

    /// Every topic with at least one publisher or subscriber, sorted by name.
    pub fn topics(&self) -> Vec<TopicSummary> {
        let topology = self.topology.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<&String> = topology
            .publishers
            .keys()
            .chain(topology.subscribers.keys())
            .collect();
        names.sort();
        names.dedup();

        let names_of = |list: Option<&Vec<Endpoint>>| -> Vec<String> {
            list.map(|eps| eps.iter().map(|e| e.node_name.clone()).collect())
                .unwrap_or_default()
        };
        names
            .into_iter()
            .map(|topic| TopicSummary {
                topic: topic.clone(),
                publishers: names_of(topology.publishers.get(topic)),
                subscribers: names_of(topology.subscribers.get(topic)),
            })
            .collect()
    }

    /// Number of registered nodes.
    pub fn node_count(&self) -> usize {
        let topology = self.topology.read().unwrap_or_else(|e| e.into_inner());
        topology.nodes.len()
    }
}
