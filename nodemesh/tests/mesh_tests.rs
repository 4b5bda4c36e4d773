/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use nodemesh::prelude::*;
use nodemesh::subjects::{actor_subject, HEARTBEAT_SUBJECT};
use nodemesh_test::prelude::*;
use serde_json::json;
use tokio::sync::broadcast;

use crate::setup::*;

mod setup;

const SETTLE: Duration = Duration::from_secs(2);

/// Waits for the next membership event, skipping lagged notices.
async fn next_membership_event(
    events: &mut broadcast::Receiver<MembershipEvent>,
) -> anyhow::Result<MembershipEvent> {
    loop {
        match within(SETTLE, events.recv()).await? {
            Ok(event) => return Ok(event),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

#[nodemesh_test]
async fn a_connected_node_counts_itself() -> anyhow::Result<()> {
    initialize_tracing();
    let bus = test_bus("single-node");
    let mesh = connected_mesh(&bus).await?;

    assert!(mesh.is_connected());
    assert!(mesh.node_id().starts_with("node_"));

    let metrics = mesh.metrics();
    assert!(metrics.connected);
    assert_eq!(metrics.node_id, mesh.node_id());
    assert_eq!(metrics.total_nodes, 1);

    assert!(eventually(SETTLE, || mesh.metrics().heartbeats_received >= 2).await);
    let nodes = mesh.live_nodes();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].node_id, mesh.node_id());

    mesh.disconnect().await?;
    Ok(())
}

#[nodemesh_test]
async fn connect_is_idempotent() -> anyhow::Result<()> {
    initialize_tracing();
    let bus = test_bus("idempotent");
    let mesh = connected_mesh(&bus).await?;
    let node_id = mesh.node_id().to_string();

    mesh.connect().await?;
    mesh.connect().await?;
    assert_eq!(mesh.node_id(), node_id);

    // 50 ms heartbeats over 500 ms: about 11 from a single producer, about 22 if doubled.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let sent = mesh.metrics().heartbeats_sent;
    assert!((5..=15).contains(&sent), "unexpected heartbeat count {sent}");

    mesh.disconnect().await?;
    Ok(())
}

#[nodemesh_test]
async fn operations_before_connect_are_refused() -> anyhow::Result<()> {
    initialize_tracing();
    let bus = test_bus("not-connected");
    let mesh = Mesh::new(test_config(bus.endpoint()), Arc::new(bus.transport()))?;

    assert!(!mesh.is_connected());
    let message = MeshMessage::new("echo-actor", "test", json!({}));
    assert_eq!(mesh.route_message(&message).await.unwrap_err(), MeshError::NotConnected);
    assert_eq!(
        mesh.broadcast("announce", json!({})).await.unwrap_err(),
        MeshError::NotConnected
    );
    assert!(mesh.subscribe("anything").await.is_err());

    // Disconnecting a node that never connected is harmless.
    mesh.disconnect().await?;
    Ok(())
}

#[nodemesh_test]
async fn unreachable_transport_fails_to_connect() -> anyhow::Result<()> {
    initialize_tracing();
    let bus = test_bus("unreachable");
    let mut config = test_config(bus.endpoint());
    config.transport.endpoint = "memory://nowhere".to_string();
    let mesh = Mesh::new(config, Arc::new(bus.transport()))?;

    assert!(matches!(mesh.connect().await, Err(MeshError::Connection(_))));
    assert!(!mesh.is_connected());

    let bus = test_bus("closed");
    bus.shutdown();
    let mesh = Mesh::new(test_config(bus.endpoint()), Arc::new(bus.transport()))?;
    assert!(matches!(mesh.connect().await, Err(MeshError::Connection(_))));
    Ok(())
}

#[nodemesh_test]
async fn invalid_config_is_rejected() -> anyhow::Result<()> {
    initialize_tracing();
    let bus = test_bus("invalid-config");
    let mut config = test_config(bus.endpoint());
    config.timeouts.node_timeout_ms = config.timeouts.heartbeat_interval_ms;

    let result = Mesh::new(config, Arc::new(bus.transport()));
    assert!(matches!(result, Err(MeshError::InvalidConfig(_))));
    Ok(())
}

#[nodemesh_test]
async fn peers_discover_each_other_and_expire() -> anyhow::Result<()> {
    initialize_tracing();
    let bus = test_bus("membership");
    let first = Mesh::new(test_config(bus.endpoint()), Arc::new(bus.transport()))?;
    let mut events = first.membership_events();
    first.connect().await?;
    let second = connected_mesh(&bus).await?;

    assert_eq!(
        next_membership_event(&mut events).await?,
        MembershipEvent::NodeJoined(second.node_id().to_string())
    );
    assert!(eventually(SETTLE, || first.metrics().total_nodes == 2).await);
    assert!(eventually(SETTLE, || second.metrics().total_nodes == 2).await);

    let record = first
        .node_record(second.node_id())
        .expect("peer should be recorded");
    assert!(record.last_seen >= record.first_seen);
    assert!(record.last_seen_epoch_ms > 0);

    second.disconnect().await?;

    // Silent for longer than node_timeout: dropped from counts, then evicted.
    assert_eq!(
        next_membership_event(&mut events).await?,
        MembershipEvent::NodeLeft(second.node_id().to_string())
    );
    assert_eq!(first.metrics().total_nodes, 1);
    assert!(first.node_record(second.node_id()).is_none());

    first.disconnect().await?;
    Ok(())
}

#[nodemesh_test]
async fn disconnect_stops_heartbeats_and_forgets_peers() -> anyhow::Result<()> {
    initialize_tracing();
    let bus = test_bus("disconnect");
    let mesh = connected_mesh(&bus).await?;
    let observer = connected_mesh(&bus).await?;
    assert!(eventually(SETTLE, || mesh.metrics().total_nodes == 2).await);

    mesh.disconnect().await?;
    assert!(!mesh.is_connected());
    let metrics = mesh.metrics();
    assert!(!metrics.connected);
    assert_eq!(metrics.total_nodes, 0);
    assert!(mesh.live_nodes().is_empty());

    let sent = mesh.metrics().heartbeats_sent;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(mesh.metrics().heartbeats_sent, sent);

    // A second disconnect does nothing; a later connect resumes.
    mesh.disconnect().await?;
    mesh.connect().await?;
    assert!(mesh.is_connected());
    assert!(eventually(SETTLE, || mesh.metrics().total_nodes == 2).await);

    mesh.disconnect().await?;
    observer.disconnect().await?;
    Ok(())
}

#[nodemesh_test]
async fn transport_loss_is_reported() -> anyhow::Result<()> {
    initialize_tracing();
    let bus = test_bus("transport-loss");
    let transport = Arc::new(bus.transport());
    let mesh = Mesh::new(test_config(bus.endpoint()), transport.clone())?;
    mesh.connect().await?;
    assert!(mesh.is_connected());

    transport.sever();
    assert!(!mesh.is_connected());
    let message = MeshMessage::new("echo-actor", "test", json!({}));
    assert!(matches!(
        mesh.route_message(&message).await,
        Err(MeshError::Connection(_))
    ));

    // Reconnecting is the embedder's call.
    mesh.connect().await?;
    assert!(mesh.is_connected());
    mesh.route_message(&message).await?;

    mesh.disconnect().await?;
    Ok(())
}

#[nodemesh_test]
async fn routed_messages_land_on_the_actor_subject() -> anyhow::Result<()> {
    initialize_tracing();
    let bus = test_bus("routing");
    let mesh = connected_mesh(&bus).await?;
    let mut inbox = mesh.subscribe(&actor_subject("echo-actor")).await?;

    let message = MeshMessage::new("echo-actor", "test", json!({"message": "hello"}))
        .with_reply_to("_reply.somewhere")
        .with_correlation_id("corr-1");
    mesh.route_message(&message).await?;

    let bytes = within(SETTLE, inbox.next()).await?.expect("subscription open");
    assert_eq!(MeshMessage::decode(&bytes)?, message);
    assert_eq!(mesh.metrics().messages_routed, 1);

    mesh.disconnect().await?;
    Ok(())
}

#[nodemesh_test]
async fn heartbeats_use_the_shared_envelope() -> anyhow::Result<()> {
    initialize_tracing();
    let bus = test_bus("heartbeat-format");
    let listener = bus.transport();
    listener.connect(bus.endpoint()).await?;
    let mut heartbeats = listener.subscribe(HEARTBEAT_SUBJECT).await?;

    let mesh = connected_mesh(&bus).await?;
    let bytes = within(SETTLE, heartbeats.next()).await?.expect("subscription open");
    let heartbeat: serde_json::Value = serde_json::from_slice(&bytes)?;

    assert_eq!(heartbeat["type"], "heartbeat");
    assert_eq!(heartbeat["actorId"], "");
    assert_eq!(heartbeat["payload"]["nodeId"], mesh.node_id());
    assert!(heartbeat["timestamp"].as_u64().is_some());

    mesh.disconnect().await?;
    listener.drain().await?;
    Ok(())
}

#[nodemesh_test]
async fn broadcasts_are_tagged_with_their_origin() -> anyhow::Result<()> {
    initialize_tracing();
    let bus = test_bus("broadcast-origin");
    let mesh = connected_mesh(&bus).await?;
    let mut broadcasts = mesh.subscribe(nodemesh::subjects::BROADCAST_SUBJECT).await?;

    let id = mesh.broadcast("deploy", json!({"version": 2})).await?;
    let bytes = within(SETTLE, broadcasts.next()).await?.expect("subscription open");
    let message = MeshMessage::decode(&bytes)?;

    assert_eq!(message.id, id);
    assert!(message.is_broadcast());
    assert_eq!(message.message_type, "deploy");
    assert_eq!(message.source_node_id.as_deref(), Some(mesh.node_id()));
    assert_eq!(mesh.metrics().broadcasts_sent, 1);

    mesh.disconnect().await?;
    Ok(())
}
