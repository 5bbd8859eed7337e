//! Discovery, relay and direct delivery over loopback TCP.
//!
//! Every test runs a real master and real nodes (or raw transports speaking
//! the protocol by hand) in one process.

mod common;

use common::*;
use serde_json::json;
use std::time::Duration;
use topicmesh_core::Delivery;
use topicmesh_types::control::{NodeRegistration, PublisherInfo, TopicRegistration};
use topicmesh_types::{Control, ControlTopic};

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

async fn register_raw(peer: &mut RawPeer, name: &str, master: &topicmesh_core::Master) {
    let registration = Control::Registration(NodeRegistration {
        node_name: name.to_string(),
        address: peer.address.clone(),
    })
    .into_message(name);
    assert!(peer.transport.send(&registration, master.local_addr()).await);
    let confirm = recv(&mut peer.inbox).await;
    assert_eq!(confirm.topic, ControlTopic::RegistrationConfirm.as_str());
}

#[tokio::test]
async fn test_discovery_discloses_only_existing_publishers() {
    let master = start_master().await;
    let mut early = RawPeer::listen().await;
    let mut late = RawPeer::listen().await;
    let mut subscriber = RawPeer::listen().await;
    register_raw(&mut early, "early", &master).await;
    register_raw(&mut late, "late", &master).await;
    register_raw(&mut subscriber, "viewer", &master).await;

    let announce = |name: &str| {
        Control::PublisherRegistration(TopicRegistration {
            node_name: name.to_string(),
            topic: "temp".to_string(),
        })
        .into_message(name)
    };

    assert!(
        early
            .transport
            .send(&announce("early"), master.local_addr())
            .await
    );
    wait_until(|| master.registry().publishers_of("temp").len() == 1).await;

    let subscription = Control::SubscriberRegistration(TopicRegistration {
        node_name: "viewer".to_string(),
        topic: "temp".to_string(),
    })
    .into_message("viewer");
    assert!(
        subscriber
            .transport
            .send(&subscription, master.local_addr())
            .await
    );

    let disclosure = recv(&mut subscriber.inbox).await;
    assert_eq!(
        disclosure.control().unwrap(),
        Some(Control::PublisherInfo(PublisherInfo {
            publisher_name: "early".to_string(),
            publisher_address: early.address.clone(),
            topic: "temp".to_string(),
        }))
    );

    // A publisher that registers after the subscriber is never disclosed.
    assert!(
        late.transport
            .send(&announce("late"), master.local_addr())
            .await
    );
    wait_until(|| master.registry().publishers_of("temp").len() == 2).await;
    assert!(stays_quiet(&mut subscriber.inbox, Duration::from_millis(300)).await);

    for peer in [&early, &late, &subscriber] {
        peer.transport.stop().await;
    }
    master.stop().await;
}

#[tokio::test]
async fn test_subscriber_connects_to_disclosed_publisher() {
    let master = start_master().await;
    let publisher = start_node("arm", &master).await;
    let subscriber = start_node("viewer", &master).await;

    publisher.publish("arm_state", json!({"joint1_angle": 0.0})).await.unwrap();
    wait_until(|| master.registry().publishers_of("arm_state").len() == 1).await;

    let _rx = subscribe_channel(&subscriber, "arm_state").await;
    wait_until(|| publisher.direct_subscribers("arm_state") == vec!["viewer".to_string()]).await;
    assert_eq!(subscriber.direct_publishers("arm_state"), vec!["arm".to_string()]);

    subscriber.stop().await;
    publisher.stop().await;
    master.stop().await;
}

// ---------------------------------------------------------------------------
// Relay and direct paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_relay_fans_out_to_every_subscriber() {
    let master = start_master().await;
    let mut subscribers = Vec::new();
    for name in ["s1", "s2", "s3"] {
        let node = start_node(name, &master).await;
        let rx = subscribe_channel(&node, "alerts").await;
        subscribers.push((node, rx));
    }
    wait_until(|| master.registry().subscribers_of("alerts").len() == 3).await;

    // The publisher registers after every subscriber, so only the relay path
    // exists.
    let publisher = start_node("siren", &master).await;
    let delivery = publisher.publish("alerts", json!({"level": 3})).await.unwrap();
    assert_eq!(
        delivery,
        Delivery {
            relayed: true,
            direct: 0
        }
    );

    for (_, rx) in subscribers.iter_mut() {
        let msg = recv(rx).await;
        assert_eq!(msg.data, json!({"level": 3}));
        assert_eq!(msg.source_node.as_deref(), Some("siren"));
        assert!(stays_quiet(rx, Duration::from_millis(100)).await);
    }

    publisher.stop().await;
    for (node, _) in &subscribers {
        node.stop().await;
    }
    master.stop().await;
}

#[tokio::test]
async fn test_direct_and_relay_paths_both_deliver() {
    let master = start_master().await;
    let publisher = start_node("arm", &master).await;
    publisher.publish("arm_state", json!("warmup")).await.unwrap();
    wait_until(|| master.registry().publishers_of("arm_state").len() == 1).await;

    let subscriber = start_node("viewer", &master).await;
    let mut rx = subscribe_channel(&subscriber, "arm_state").await;
    wait_until(|| !publisher.direct_subscribers("arm_state").is_empty()).await;

    let delivery = publisher
        .publish("arm_state", json!({"joint1_angle": 0.25}))
        .await
        .unwrap();
    assert_eq!(
        delivery,
        Delivery {
            relayed: true,
            direct: 1
        }
    );

    // One copy per path, both the same logical message.
    let first = recv(&mut rx).await;
    let second = recv(&mut rx).await;
    assert_eq!(first.message_id, second.message_id);
    assert_eq!(first.data, json!({"joint1_angle": 0.25}));
    assert_eq!(first, second);

    subscriber.stop().await;
    publisher.stop().await;
    master.stop().await;
}

#[tokio::test]
async fn test_callback_error_does_not_stop_delivery() {
    let master = start_master().await;
    let subscriber = start_node("picky", &master).await;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    subscriber
        .subscribe("numbers", move |msg| {
            let n = msg.data.as_i64().unwrap_or_default();
            let _ = tx.send(n);
            if n % 2 == 0 {
                Err(topicmesh_types::HandlerError::new("even numbers rejected"))
            } else {
                Ok(())
            }
        })
        .await
        .unwrap();
    wait_until(|| master.registry().subscribers_of("numbers").len() == 1).await;

    let publisher = start_node("counter", &master).await;
    for n in 1..=4 {
        publisher.publish("numbers", json!(n)).await.unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..4 {
        let n = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        seen.push(n);
    }
    assert_eq!(seen, vec![1, 2, 3, 4]);

    publisher.stop().await;
    subscriber.stop().await;
    master.stop().await;
}

// ---------------------------------------------------------------------------
// End to end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_end_to_end_temperature() {
    let master = start_master().await;
    assert_ne!(master.local_addr().port, 0);

    let a = start_node("A", &master).await;
    let b = start_node("B", &master).await;
    let mut rx = subscribe_channel(&b, "temp").await;

    // Keep publishing until B observes a message; ordering between B's
    // subscription and A's registration does not matter.
    let received = tokio::time::timeout(WAIT, async {
        loop {
            a.publish("temp", json!({"v": 42})).await.unwrap();
            if let Ok(Some(msg)) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
                return msg;
            }
        }
    })
    .await
    .expect("B never received a message");

    assert_eq!(received.topic, "temp");
    assert_eq!(received.data, json!({"v": 42}));
    assert_eq!(received.source_node.as_deref(), Some("A"));

    b.stop().await;
    a.stop().await;
    master.stop().await;
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let master = start_master().await;
    let node = start_node("n", &master).await;
    node.stop().await;
    node.stop().await;
    master.stop().await;
    master.stop().await;
}
