//! Master — the topology directory and fallback relay.
//!
//! The master accepts node connections and dispatches every inbound message:
//!
//! | Topic | Effect |
//! |---|---|
//! | `__registration__` | record the node, confirm to its address |
//! | `__publisher_registration__` | append the node to the topic's publishers |
//! | `__subscriber_registration__` | append the node to the topic's subscribers and disclose every existing publisher |
//! | anything else | relay unchanged to every registered subscriber of the topic |
//!
//! Registrations from nodes that never announced themselves are logged and
//! dropped. Nothing a node sends can stop the master.

use crate::error::MasterError;
use crate::registry::Registry;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use topicmesh_types::config::{MasterConfig, TransportConfig};
use topicmesh_types::control::{
    NodeRegistration, PublisherInfo, RegistrationConfirm, TopicRegistration, MASTER_NAME,
};
use topicmesh_types::{Address, Control, HandlerError, Message};
use topicmesh_wire::{Connection, FrameHandler, Transport, WeakTransport};
use tracing::{debug, info, warn};

/// Capacity of the admin command queue.
const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Requests from outside the runtime (e.g. the interactive shell).
#[derive(Debug, Clone, PartialEq)]
pub enum MasterCommand {
    /// Relay a message with `source_node = "master"`.
    Publish {
        topic: String,
        data: serde_json::Value,
    },
}

struct MasterHandler {
    registry: Registry,
}

#[async_trait]
impl FrameHandler for MasterHandler {
    async fn on_message(
        &self,
        transport: &Transport,
        message: Message,
        _origin: Connection,
    ) -> Result<(), HandlerError> {
        let control = message
            .control()
            .map_err(|e| HandlerError::new(e.to_string()))?;

        match control {
            Some(Control::Registration(registration)) => {
                self.on_registration(transport, registration).await;
            }
            Some(Control::PublisherRegistration(registration)) => {
                self.on_publisher_registration(registration);
            }
            Some(Control::SubscriberRegistration(registration)) => {
                self.on_subscriber_registration(transport, registration)
                    .await;
            }
            _ => {
                relay(transport, &self.registry, &message).await;
            }
        }
        Ok(())
    }
}

impl MasterHandler {
    async fn on_registration(&self, transport: &Transport, registration: NodeRegistration) {
        let NodeRegistration { node_name, address } = registration;
        self.registry.register_node(&node_name, address.clone());
        info!(node = %node_name, %address, "node registered");

        let confirm =
            Control::RegistrationConfirm(RegistrationConfirm::confirmed()).into_message(MASTER_NAME);
        if !transport.send(&confirm, &address).await {
            warn!(node = %node_name, %address, "could not confirm registration");
        }
    }

    fn on_publisher_registration(&self, registration: TopicRegistration) {
        match self
            .registry
            .add_publisher(&registration.topic, &registration.node_name)
        {
            Ok(endpoint) => info!(
                node = %endpoint.node_name,
                topic = %registration.topic,
                "publisher registered"
            ),
            Err(e) => warn!(
                topic = %registration.topic,
                error = %e,
                "dropping publisher registration"
            ),
        }
    }

    async fn on_subscriber_registration(
        &self,
        transport: &Transport,
        registration: TopicRegistration,
    ) {
        let TopicRegistration { node_name, topic } = registration;
        let publishers = match self.registry.add_subscriber(&topic, &node_name) {
            Ok(publishers) => publishers,
            Err(e) => {
                warn!(%topic, error = %e, "dropping subscriber registration");
                return;
            }
        };
        info!(
            node = %node_name,
            %topic,
            publishers = publishers.len(),
            "subscriber registered"
        );

        let Some(subscriber_addr) = self.registry.node_address(&node_name) else {
            return;
        };
        for publisher in publishers {
            let disclosure = Control::PublisherInfo(PublisherInfo {
                publisher_name: publisher.node_name,
                publisher_address: publisher.address,
                topic: topic.clone(),
            })
            .into_message(MASTER_NAME);
            transport.send(&disclosure, &subscriber_addr).await;
        }
    }
}

/// Send `message` to every registered subscriber of its topic, one after the
/// other. Returns how many sends succeeded.
async fn relay(transport: &Transport, registry: &Registry, message: &Message) -> usize {
    let subscribers = registry.subscribers_of(&message.topic);
    if subscribers.is_empty() {
        debug!(topic = %message.topic, "no subscribers to relay to");
        return 0;
    }

    let mut delivered = 0;
    for subscriber in &subscribers {
        if transport.send(message, &subscriber.address).await {
            delivered += 1;
        }
    }
    debug!(
        topic = %message.topic,
        delivered,
        subscribers = subscribers.len(),
        "relayed message"
    );
    delivered
}

async fn drain_commands(
    mut commands: mpsc::Receiver<MasterCommand>,
    transport: WeakTransport,
    registry: Registry,
) {
    while let Some(command) = commands.recv().await {
        let Some(transport) = transport.upgrade() else {
            break;
        };
        match command {
            MasterCommand::Publish { topic, data } => {
                let message = Message::new(topic, data).with_source(MASTER_NAME);
                let delivered = relay(&transport, &registry, &message).await;
                info!(topic = %message.topic, delivered, "published from master");
            }
        }
    }
}

struct MasterInner {
    transport: Transport,
    registry: Registry,
    commands: mpsc::Sender<MasterCommand>,
    local_addr: Address,
}

/// A running master. Cheap to clone.
#[derive(Clone)]
pub struct Master {
    inner: Arc<MasterInner>,
}

impl Master {
    /// Bind the listener and start serving.
    pub async fn start(
        config: &MasterConfig,
        transport_config: TransportConfig,
    ) -> Result<Self, MasterError> {
        let registry = Registry::new();
        let handler = Arc::new(MasterHandler {
            registry: registry.clone(),
        });
        let transport = Transport::new(transport_config, handler);
        let local_addr = transport.listen(&config.listen_addr).await?;

        let (commands, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        transport.spawn(drain_commands(rx, transport.downgrade(), registry.clone()));

        info!(address = %local_addr, "master started");
        Ok(Self {
            inner: Arc::new(MasterInner {
                transport,
                registry,
                commands,
                local_addr,
            }),
        })
    }

    /// The resolved listening address.
    pub fn local_addr(&self) -> &Address {
        &self.inner.local_addr
    }

    /// The topology. Clones share state with the running master.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Relay a message to the topic's subscribers as `"master"`.
    ///
    /// Returns how many subscribers it was delivered to.
    pub async fn publish(&self, topic: &str, data: serde_json::Value) -> usize {
        let message = Message::new(topic, data).with_source(MASTER_NAME);
        relay(&self.inner.transport, &self.inner.registry, &message).await
    }

    /// Queue for commands from other threads; use `blocking_send` outside the
    /// runtime.
    pub fn commands(&self) -> mpsc::Sender<MasterCommand> {
        self.inner.commands.clone()
    }

    /// Stop serving. Idempotent.
    pub async fn stop(&self) {
        info!(address = %self.inner.local_addr, "stopping master");
        self.inner.transport.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedSender;

    struct Forward(UnboundedSender<Message>);

    #[async_trait]
    impl FrameHandler for Forward {
        async fn on_message(
            &self,
            _transport: &Transport,
            message: Message,
            _origin: Connection,
        ) -> Result<(), HandlerError> {
            let _ = self.0.send(message);
            Ok(())
        }
    }

    async fn start_master() -> Master {
        let config = MasterConfig {
            listen_addr: Address::new("127.0.0.1", 0),
        };
        Master::start(&config, TransportConfig::default())
            .await
            .unwrap()
    }

    /// A bare listening transport standing in for a node.
    async fn fake_node() -> (Transport, Address, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Transport::new(TransportConfig::default(), Arc::new(Forward(tx)));
        let addr = transport
            .listen(&Address::new("127.0.0.1", 0))
            .await
            .unwrap();
        (transport, addr, rx)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<Message>) -> Message {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .expect("closed")
    }

    #[tokio::test]
    async fn test_registration_is_confirmed() {
        let master = start_master().await;
        let (node, addr, mut rx) = fake_node().await;

        let registration = Control::Registration(NodeRegistration {
            node_name: "sensor".to_string(),
            address: addr.clone(),
        })
        .into_message("sensor");
        assert!(node.send(&registration, master.local_addr()).await);

        let confirm = recv(&mut rx).await;
        assert_eq!(
            confirm.control().unwrap(),
            Some(Control::RegistrationConfirm(RegistrationConfirm::confirmed()))
        );
        assert_eq!(confirm.source_node.as_deref(), Some(MASTER_NAME));
        assert_eq!(master.registry().node_address("sensor"), Some(addr));

        node.stop().await;
        master.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_publisher_is_dropped() {
        let master = start_master().await;
        let (node, _addr, _rx) = fake_node().await;

        let registration = Control::PublisherRegistration(TopicRegistration {
            node_name: "ghost".to_string(),
            topic: "temp".to_string(),
        })
        .into_message("ghost");
        assert!(node.send(&registration, master.local_addr()).await);
        // Follow with a relay on the same connection; once it is processed
        // the registration before it has been handled too.
        assert!(
            node.send(&Message::new("temp", json!(1)), master.local_addr())
                .await
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(master.registry().publishers_of("temp").is_empty());
        node.stop().await;
        master.stop().await;
    }

    #[tokio::test]
    async fn test_publish_relays_as_master() {
        let master = start_master().await;
        let (node, addr, mut rx) = fake_node().await;
        master.registry().register_node("viewer", addr);
        master.registry().add_subscriber("alerts", "viewer").unwrap();

        assert_eq!(master.publish("alerts", json!({"level": "high"})).await, 1);
        let msg = recv(&mut rx).await;
        assert_eq!(msg.topic, "alerts");
        assert_eq!(msg.source_node.as_deref(), Some("master"));

        // Same thing through the command queue.
        master
            .commands()
            .send(MasterCommand::Publish {
                topic: "alerts".to_string(),
                data: json!("queued"),
            })
            .await
            .unwrap();
        assert_eq!(recv(&mut rx).await.data, json!("queued"));

        assert_eq!(master.publish("nobody-listens", json!(null)).await, 0);
        node.stop().await;
        master.stop().await;
    }
}
