//! Core types for the topicmesh publish/subscribe middleware.
//!
//! This crate defines the value types shared by the wire layer, the master and
//! the nodes: addresses, messages, control payloads, configuration and the
//! error types that cross crate boundaries. It contains no business logic.

pub mod address;
pub mod config;
pub mod control;
pub mod error;
pub mod message;

pub use address::{Address, AddressError};
pub use control::{Control, ControlError, ControlTopic};
pub use error::HandlerError;
pub use message::Message;
