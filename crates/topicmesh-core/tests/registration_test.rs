//! Node registration against a real master and against a master that never
//! answers.

mod common;

use common::*;
use std::time::{Duration, Instant};
use topicmesh_core::{Node, NodeError};
use topicmesh_types::config::NodeConfig;
use topicmesh_types::ControlTopic;

#[tokio::test]
async fn test_registration_confirmed() {
    let master = start_master().await;
    let node = start_node("sensor", &master).await;

    assert!(node.is_registered());
    assert_eq!(
        master.registry().node_address("sensor").as_ref(),
        Some(node.local_addr())
    );
    assert_eq!(master.registry().node_count(), 1);

    node.stop().await;
    master.stop().await;
}

#[tokio::test]
async fn test_repeated_registration_refreshes_entry() {
    let master = start_master().await;
    let node = start_node("sensor", &master).await;
    let registered_at =
        |master: &topicmesh_core::Master| master.registry().nodes()[0].registered_at;
    let first = registered_at(&master);

    // The confirmation signal stays set, so the call returns without waiting
    // for a second confirmation; the master still records the new attempt.
    tokio::time::sleep(Duration::from_millis(5)).await;
    tokio_test::assert_ok!(node.register_with_master().await);
    assert!(node.is_registered());
    wait_until(|| registered_at(&master) > first).await;
    assert_eq!(master.registry().node_count(), 1);

    node.stop().await;
    master.stop().await;
}

#[tokio::test]
async fn test_reregistration_overwrites_address() {
    let master = start_master().await;
    let first = start_node("sensor", &master).await;
    first.stop().await;

    let second = start_node("sensor", &master).await;
    assert_eq!(
        master.registry().node_address("sensor").as_ref(),
        Some(second.local_addr())
    );
    assert_eq!(master.registry().node_count(), 1);

    second.stop().await;
    master.stop().await;
}

#[tokio::test]
async fn test_registration_times_out_without_confirmation() {
    // Accepts the registration but never confirms it.
    let mut silent_master = RawPeer::listen().await;
    let config = NodeConfig {
        registration_timeout_ms: 300,
        ..node_config(&silent_master.address)
    };

    let started = Instant::now();
    let result = Node::start("lonely", config, transport_config()).await;
    let elapsed = started.elapsed();

    match result {
        Err(NodeError::RegistrationTimeout(timeout)) => {
            assert_eq!(timeout, Duration::from_millis(300));
        }
        Err(other) => panic!("Expected RegistrationTimeout, got {other:?}"),
        Ok(_) => panic!("registration succeeded without a confirmation"),
    }
    assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");

    // The registration itself did reach the silent master.
    let registration = recv(&mut silent_master.inbox).await;
    assert_eq!(registration.topic, ControlTopic::Registration.as_str());
    assert_eq!(registration.source_node.as_deref(), Some("lonely"));

    silent_master.transport.stop().await;
}

#[tokio::test]
async fn test_start_fails_when_master_unreachable() {
    let unused = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = unused.local_addr().unwrap().port();
    drop(unused);

    let config = node_config(&topicmesh_types::Address::new("127.0.0.1", port));
    let started = Instant::now();
    let result = Node::start("orphan", config, transport_config()).await;

    match result {
        Err(NodeError::Wire(topicmesh_wire::WireError::ConnectFailed { attempts, .. })) => {
            assert_eq!(attempts, 3);
        }
        Err(other) => panic!("Expected ConnectFailed, got {other:?}"),
        Ok(_) => panic!("start succeeded without a master"),
    }
    // Three attempts, 50 ms apart.
    assert!(started.elapsed() >= Duration::from_millis(100));
}
