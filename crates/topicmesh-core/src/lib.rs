//! topicmesh core — topology registry, master and node.
//!
//! ## Architecture
//!
//! - **Registry**: the master's record of nodes and of each topic's
//!   publishers and subscribers
//! - **Master**: handles registrations, discloses publishers to new
//!   subscribers and relays every application message
//! - **Node**: publishes and subscribes, keeping direct connections to the
//!   peers it discovered through the master
//! - **handoff**: bounded, drop-on-full queue from callbacks to a consumer
//!   thread

pub mod config;
pub mod error;
pub mod handoff;
pub mod master;
pub mod node;
pub mod registry;

pub use error::{MasterError, NodeError, NodeResult, RegistryError};
pub use handoff::{handoff, HandoffQueue, HandoffReceiver};
pub use master::{Master, MasterCommand};
pub use node::{Callback, Delivery, Node};
pub use registry::{Endpoint, NodeEntry, Registry, TopicSummary};
