//! Shared fixtures for the loopback integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use topicmesh_core::{Master, Node};
use topicmesh_types::config::{MasterConfig, NodeConfig, TransportConfig};
use topicmesh_types::{Address, HandlerError, Message};
use topicmesh_wire::{Connection, FrameHandler, Transport};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn loopback() -> Address {
    Address::new("127.0.0.1", 0)
}

pub fn transport_config() -> TransportConfig {
    TransportConfig {
        connect_attempts: 3,
        connect_retry_delay_ms: 50,
        ..TransportConfig::default()
    }
}

/// Route logs to the test harness; `RUST_LOG=debug` shows the traffic.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn start_master() -> Master {
    init_tracing();
    let config = MasterConfig {
        listen_addr: loopback(),
    };
    Master::start(&config, transport_config())
        .await
        .expect("master should bind")
}

pub fn node_config(master: &Address) -> NodeConfig {
    NodeConfig {
        listen_addr: loopback(),
        master_addr: master.clone(),
        registration_timeout_ms: 5_000,
    }
}

pub async fn start_node(name: &str, master: &Master) -> Node {
    Node::start(name, node_config(master.local_addr()), transport_config())
        .await
        .expect("node should register")
}

/// Subscribe and forward every delivered message into a channel.
pub async fn subscribe_channel(node: &Node, topic: &str) -> mpsc::UnboundedReceiver<Message> {
    let (tx, rx) = mpsc::unbounded_channel();
    node.subscribe(topic, move |msg| {
        tx.send(msg)
            .map_err(|_| HandlerError::from("test receiver dropped"))
    })
    .await
    .expect("subscribe should succeed");
    rx
}

pub async fn recv(rx: &mut mpsc::UnboundedReceiver<Message>) -> Message {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("channel closed")
}

/// `true` if nothing arrives within `window`.
pub async fn stays_quiet(rx: &mut mpsc::UnboundedReceiver<Message>, window: Duration) -> bool {
    tokio::time::timeout(window, rx.recv()).await.is_err()
}

/// Poll `condition` until it holds or [`WAIT`] elapses.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {WAIT:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ---------------------------------------------------------------------------
// Raw peer: a bare transport that records every message it receives
// ---------------------------------------------------------------------------

struct Record(mpsc::UnboundedSender<Message>);

#[async_trait]
impl FrameHandler for Record {
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

/// A listening transport that speaks the protocol by hand.
pub struct RawPeer {
    pub transport: Transport,
    pub address: Address,
    pub inbox: mpsc::UnboundedReceiver<Message>,
}

impl RawPeer {
    pub async fn listen() -> Self {
        let (tx, inbox) = mpsc::unbounded_channel();
        let transport = Transport::new(transport_config(), Arc::new(Record(tx)));
        let address = transport
            .listen(&loopback())
            .await
            .expect("raw peer should bind");
        Self {
            transport,
            address,
            inbox,
        }
    }
}
