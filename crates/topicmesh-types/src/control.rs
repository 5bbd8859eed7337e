//! Control messages exchanged between nodes and the master.
//!
//! Control messages travel as ordinary [`Message`]s whose topic is one of the
//! reserved names below. They are decoded once into the [`Control`] enum so
//! that handlers dispatch with a single `match` instead of comparing strings.

use crate::address::Address;
use crate::message::Message;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Prefix reserved for control topics.
pub const CONTROL_PREFIX: &str = "__";

/// Node name the master uses as `source_node`.
pub const MASTER_NAME: &str = "master";

/// The known control topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlTopic {
    Registration,
    RegistrationConfirm,
    PublisherRegistration,
    SubscriberRegistration,
    PublisherInfo,
    Subscribe,
}

impl ControlTopic {
    /// All control topics.
    pub const ALL: [ControlTopic; 6] = [
        ControlTopic::Registration,
        ControlTopic::RegistrationConfirm,
        ControlTopic::PublisherRegistration,
        ControlTopic::SubscriberRegistration,
        ControlTopic::PublisherInfo,
        ControlTopic::Subscribe,
    ];

    /// Wire name of the topic.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Registration => "__registration__",
            Self::RegistrationConfirm => "__registration_confirm__",
            Self::PublisherRegistration => "__publisher_registration__",
            Self::SubscriberRegistration => "__subscriber_registration__",
            Self::PublisherInfo => "__publisher_info__",
            Self::Subscribe => "__subscribe__",
        }
    }

    /// Look up a control topic by wire name.
    pub fn from_topic(topic: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == topic)
    }
}

impl fmt::Display for ControlTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A control topic whose payload did not match its schema.
#[derive(Debug, Error)]
#[error("Malformed {topic} payload: {source}")]
pub struct ControlError {
    pub topic: ControlTopic,
    #[source]
    pub source: serde_json::Error,
}

/// `__registration__`: a node announces itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRegistration {
    pub node_name: String,
    pub address: Address,
}

/// `__registration_confirm__`: the master acknowledges a registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationConfirm {
    pub status: String,
}

impl RegistrationConfirm {
    pub fn confirmed() -> Self {
        Self {
            status: "confirmed".to_string(),
        }
    }
}

/// `__publisher_registration__` and `__subscriber_registration__`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicRegistration {
    pub node_name: String,
    pub topic: String,
}

/// `__publisher_info__`: the master discloses a publisher to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherInfo {
    pub publisher_name: String,
    pub publisher_address: Address,
    pub topic: String,
}

/// `__subscribe__`: a subscriber asks a publisher for direct delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub topic: String,
    pub subscriber: String,
}

/// A decoded control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    Registration(NodeRegistration),
    RegistrationConfirm(RegistrationConfirm),
    PublisherRegistration(TopicRegistration),
    SubscriberRegistration(TopicRegistration),
    PublisherInfo(PublisherInfo),
    Subscribe(SubscribeRequest),
}

impl Control {
    /// The control topic of this variant.
    pub fn topic(&self) -> ControlTopic {
        match self {
            Self::Registration(_) => ControlTopic::Registration,
            Self::RegistrationConfirm(_) => ControlTopic::RegistrationConfirm,
            Self::PublisherRegistration(_) => ControlTopic::PublisherRegistration,
            Self::SubscriberRegistration(_) => ControlTopic::SubscriberRegistration,
            Self::PublisherInfo(_) => ControlTopic::PublisherInfo,
            Self::Subscribe(_) => ControlTopic::Subscribe,
        }
    }

    /// Decode a message as a control message.
    ///
    /// `Ok(None)` means the topic is not a known control topic.
    pub fn from_message(message: &Message) -> Result<Option<Self>, ControlError> {
        let Some(topic) = ControlTopic::from_topic(&message.topic) else {
            return Ok(None);
        };
        let data = &message.data;
        let control = match topic {
            ControlTopic::Registration => Self::Registration(payload(topic, data)?),
            ControlTopic::RegistrationConfirm => {
                Self::RegistrationConfirm(payload(topic, data)?)
            }
            ControlTopic::PublisherRegistration => {
                Self::PublisherRegistration(payload(topic, data)?)
            }
            ControlTopic::SubscriberRegistration => {
                Self::SubscriberRegistration(payload(topic, data)?)
            }
            ControlTopic::PublisherInfo => Self::PublisherInfo(payload(topic, data)?),
            ControlTopic::Subscribe => Self::Subscribe(payload(topic, data)?),
        };
        Ok(Some(control))
    }

    /// Wrap this control payload in a message sent by `source_node`.
    pub fn into_message(self, source_node: &str) -> Message {
        let topic = self.topic();
        let data = match self {
            Self::Registration(p) => serde_json::to_value(p),
            Self::RegistrationConfirm(p) => serde_json::to_value(p),
            Self::PublisherRegistration(p) | Self::SubscriberRegistration(p) => {
                serde_json::to_value(p)
            }
            Self::PublisherInfo(p) => serde_json::to_value(p),
            Self::Subscribe(p) => serde_json::to_value(p),
        }
        // Plain structs of strings always serialize.
        .unwrap_or(serde_json::Value::Null);
        Message::new(topic.as_str(), data).with_source(source_node)
    }
}

fn payload<T: DeserializeOwned>(
    topic: ControlTopic,
    data: &serde_json::Value,
) -> Result<T, ControlError> {
    T::deserialize(data).map_err(|source| ControlError { topic, source })
}
