//! Node — a participant that publishes and subscribes to topics.
//!
//! A node listens on its own address, registers with the master and then
//! talks on two paths at once:
//!
//! - **relay**: every published message goes to the master, which forwards it
//!   to all registered subscribers;
//! - **direct**: when the master discloses a publisher, the subscribing node
//!   connects to it and sends `__subscribe__`. The publisher then also writes
//!   each message straight onto that connection.
//!
//! A subscriber reached by both paths sees a message twice. Delivery is
//! at-least-once and nothing deduplicates by `message_id`.

use crate::error::{NodeError, NodeResult};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use topicmesh_types::config::{NodeConfig, TransportConfig};
use topicmesh_types::control::{
    NodeRegistration, PublisherInfo, SubscribeRequest, TopicRegistration,
};
use topicmesh_types::message::is_reserved_topic;
use topicmesh_types::{Address, Control, HandlerError, Message};
use topicmesh_wire::{Connection, FrameHandler, Transport};
use tracing::{debug, info, warn};

/// Application callback for one topic.
pub type Callback = Arc<dyn Fn(Message) -> Result<(), HandlerError> + Send + Sync>;

/// Where a published message went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Delivery {
    /// Whether the master accepted the message for relaying.
    pub relayed: bool,
    /// Number of direct subscribers the message was written to.
    pub direct: usize,
}

/// topic -> peer name -> connection.
type ConnectionTable = DashMap<String, BTreeMap<String, Connection>>;

struct NodeState {
    name: String,
    config: NodeConfig,
    subscribers: DashMap<String, Callback>,
    publishers: DashSet<String>,
    /// Filled by inbound `__subscribe__`, keyed by subscriber name.
    publisher_connections: ConnectionTable,
    /// Filled on publisher disclosure, keyed by publisher name.
    subscriber_connections: ConnectionTable,
    registered: watch::Sender<bool>,
}

impl NodeState {
    fn record(table: &ConnectionTable, topic: &str, peer: &str, conn: Connection) {
        table
            .entry(topic.to_string())
            .or_default()
            .insert(peer.to_string(), conn);
    }

    fn peers(table: &ConnectionTable, topic: &str) -> Vec<(String, Connection)> {
        table
            .get(topic)
            .map(|peers| {
                peers
                    .iter()
                    .map(|(name, conn)| (name.clone(), conn.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

struct NodeHandler {
    state: Arc<NodeState>,
}

#[async_trait]
impl FrameHandler for NodeHandler {
    async fn on_message(
        &self,
        transport: &Transport,
        message: Message,
        origin: Connection,
    ) -> Result<(), HandlerError> {
        let control = message
            .control()
            .map_err(|e| HandlerError::new(e.to_string()))?;

        match control {
            Some(Control::Subscribe(request)) => {
                self.on_subscribe(request, origin);
                Ok(())
            }
            Some(Control::PublisherInfo(info)) => self.on_publisher_info(transport, info).await,
            Some(Control::RegistrationConfirm(confirm)) => {
                debug!(node = %self.state.name, status = %confirm.status, "registration confirmed");
                self.state.registered.send_replace(true);
                Ok(())
            }
            Some(other) => {
                debug!(node = %self.state.name, topic = %other.topic(), "ignoring control message");
                Ok(())
            }
            None if message.is_reserved() => {
                debug!(node = %self.state.name, topic = %message.topic, "ignoring unknown control topic");
                Ok(())
            }
            None => self.deliver(message),
        }
    }
}

impl NodeHandler {
    fn on_subscribe(&self, request: SubscribeRequest, origin: Connection) {
        info!(
            node = %self.state.name,
            topic = %request.topic,
            subscriber = %request.subscriber,
            "direct subscriber attached"
        );
        NodeState::record(
            &self.state.publisher_connections,
            &request.topic,
            &request.subscriber,
            origin,
        );
    }

    async fn on_publisher_info(
        &self,
        transport: &Transport,
        info: PublisherInfo,
    ) -> Result<(), HandlerError> {
        let conn = transport
            .connection_to(&info.publisher_address)
            .await
            .map_err(|e| {
                HandlerError::new(format!(
                    "cannot reach publisher '{}' of '{}': {e}",
                    info.publisher_name, info.topic
                ))
            })?;
        NodeState::record(
            &self.state.subscriber_connections,
            &info.topic,
            &info.publisher_name,
            conn.clone(),
        );

        let request = Control::Subscribe(SubscribeRequest {
            topic: info.topic.clone(),
            subscriber: self.state.name.clone(),
        })
        .into_message(&self.state.name);
        if !transport.send(&request, &conn).await {
            return Err(HandlerError::new(format!(
                "could not send subscribe request to '{}'",
                info.publisher_name
            )));
        }
        info!(
            node = %self.state.name,
            topic = %info.topic,
            publisher = %info.publisher_name,
            address = %info.publisher_address,
            "connected to publisher"
        );
        Ok(())
    }

    fn deliver(&self, message: Message) -> Result<(), HandlerError> {
        let callback = self
            .state
            .subscribers
            .get(&message.topic)
            .map(|entry| Arc::clone(entry.value()));
        match callback {
            Some(callback) => callback(message),
            None => {
                debug!(node = %self.state.name, topic = %message.topic, "no callback for topic");
                Ok(())
            }
        }
    }
}

/// A running node. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Node {
    state: Arc<NodeState>,
    transport: Transport,
    local_addr: Address,
}

impl Node {
    /// Start listening without contacting the master.
    pub async fn bind(
        name: impl Into<String>,
        config: NodeConfig,
        transport_config: TransportConfig,
    ) -> NodeResult<Self> {
        let (registered, _) = watch::channel(false);
        let state = Arc::new(NodeState {
            name: name.into(),
            config,
            subscribers: DashMap::new(),
            publishers: DashSet::new(),
            publisher_connections: DashMap::new(),
            subscriber_connections: DashMap::new(),
            registered,
        });
        let transport = Transport::new(
            transport_config,
            Arc::new(NodeHandler {
                state: Arc::clone(&state),
            }),
        );
        let local_addr = transport.listen(&state.config.listen_addr).await?;
        info!(node = %state.name, address = %local_addr, "node listening");

        Ok(Self {
            state,
            transport,
            local_addr,
        })
    }

    /// Bind, connect to the master and register.
    ///
    /// Fails fast if the master cannot be reached after the configured
    /// connect attempts.
    pub async fn start(
        name: impl Into<String>,
        config: NodeConfig,
        transport_config: TransportConfig,
    ) -> NodeResult<Self> {
        let node = Self::bind(name, config, transport_config).await?;
        if let Err(e) = node.join_master().await {
            node.stop().await;
            return Err(e);
        }
        Ok(node)
    }

    async fn join_master(&self) -> NodeResult<()> {
        self.transport.connect(self.master_addr()).await?;
        self.register_with_master().await
    }

    /// Announce this node to the master and wait for the confirmation.
    pub async fn register_with_master(&self) -> NodeResult<()> {
        let master = self.master_addr().clone();
        let registration = Control::Registration(NodeRegistration {
            node_name: self.state.name.clone(),
            address: self.local_addr.clone(),
        })
        .into_message(&self.state.name);

        let mut confirmed = self.state.registered.subscribe();
        if let Err(e) = self.transport.try_send(&registration, &master).await {
            return Err(NodeError::Registration {
                master,
                reason: e.to_string(),
            });
        }

        let timeout = self.state.config.registration_timeout();
        let outcome = tokio::time::timeout(timeout, confirmed.wait_for(|done| *done))
            .await
            .map(|waited| waited.map(|_| ()));
        match outcome {
            Ok(Ok(())) => {
                info!(node = %self.state.name, %master, "registered with master");
                Ok(())
            }
            Ok(Err(_)) => Err(NodeError::Registration {
                master,
                reason: "node shut down while waiting for confirmation".to_string(),
            }),
            Err(_) => {
                warn!(node = %self.state.name, %master, ?timeout, "registration not confirmed");
                Err(NodeError::RegistrationTimeout(timeout))
            }
        }
    }

    /// Publish `data` on `topic` through the master and to every direct
    /// subscriber.
    ///
    /// The first publish on a topic registers this node as its publisher.
    pub async fn publish(&self, topic: &str, data: serde_json::Value) -> NodeResult<Delivery> {
        reject_reserved(topic)?;
        let master = self.master_addr();

        if !self.state.publishers.contains(topic) {
            let registration = Control::PublisherRegistration(TopicRegistration {
                node_name: self.state.name.clone(),
                topic: topic.to_string(),
            })
            .into_message(&self.state.name);
            if !self.transport.send(&registration, master).await {
                return Err(NodeError::PublisherRegistration {
                    topic: topic.to_string(),
                });
            }
            self.state.publishers.insert(topic.to_string());
            info!(node = %self.state.name, %topic, "registered as publisher");
        }

        let message = Message::new(topic, data).with_source(&self.state.name);
        let relayed = self.transport.send(&message, master).await;

        let mut direct = 0;
        for (subscriber, conn) in NodeState::peers(&self.state.publisher_connections, topic) {
            if self.transport.send(&message, &conn).await {
                direct += 1;
            } else {
                warn!(node = %self.state.name, %topic, %subscriber, "direct delivery failed");
            }
        }
        debug!(node = %self.state.name, %topic, relayed, direct, "published");

        Ok(Delivery { relayed, direct })
    }

    /// Deliver messages on `topic` to `callback` and register as subscriber.
    ///
    /// Replaces any previous callback for the topic. Direct connections are
    /// opened later, as the master discloses publishers.
    pub async fn subscribe<F>(&self, topic: &str, callback: F) -> NodeResult<()>
    where
        F: Fn(Message) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        reject_reserved(topic)?;
        self.state
            .subscribers
            .insert(topic.to_string(), Arc::new(callback));

        let registration = Control::SubscriberRegistration(TopicRegistration {
            node_name: self.state.name.clone(),
            topic: topic.to_string(),
        })
        .into_message(&self.state.name);
        if let Err(e) = self
            .transport
            .try_send(&registration, self.master_addr())
            .await
        {
            self.state.subscribers.remove(topic);
            return Err(NodeError::Subscription {
                topic: topic.to_string(),
                reason: e.to_string(),
            });
        }
        info!(node = %self.state.name, %topic, "subscribed");
        Ok(())
    }

    /// Run a background activity in this node's task group. It is cancelled
    /// by [`Node::stop`].
    pub fn spawn_task<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.transport.spawn(task);
    }

    /// Names of subscribers attached directly to this node for `topic`.
    pub fn direct_subscribers(&self, topic: &str) -> Vec<String> {
        NodeState::peers(&self.state.publisher_connections, topic)
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    /// Names of publishers this node connected to directly for `topic`.
    pub fn direct_publishers(&self, topic: &str) -> Vec<String> {
        NodeState::peers(&self.state.subscriber_connections, topic)
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    /// Whether the master confirmed a registration.
    pub fn is_registered(&self) -> bool {
        *self.state.registered.borrow()
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// The resolved listening address.
    pub fn local_addr(&self) -> &Address {
        &self.local_addr
    }

    pub fn master_addr(&self) -> &Address {
        &self.state.config.master_addr
    }

    /// Close every connection and cancel every task. Idempotent.
    pub async fn stop(&self) {
        info!(node = %self.state.name, "stopping node");
        self.transport.stop().await;
    }
}

fn reject_reserved(topic: &str) -> NodeResult<()> {
    if is_reserved_topic(topic) {
        return Err(NodeError::ReservedTopic(topic.to_string()));
    }
    Ok(())
}
