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

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use static_assertions::assert_impl_all;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, trace, warn};

use crate::common::metrics::{bump, read, MeshStats};
use crate::common::node_table::{NodeRecord, NodeTable};
use crate::common::{new_id, MeshConfig, MeshMetrics, Payload};
use crate::message::subjects::{actor_subject, BROADCAST_SUBJECT, HEARTBEAT_SUBJECT, HEARTBEAT_TYPE};
use crate::message::{MeshError, MeshMessage};
use crate::traits::{Subscription, Transport};

/// A change in mesh membership observed by this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    /// The first heartbeat from a peer arrived.
    NodeJoined(String),
    /// A peer stayed silent longer than the node timeout and was evicted.
    NodeLeft(String),
}

/// One node's membership and messaging layer over a publish/subscribe transport.
///
/// A `Mesh` owns the node identity, the membership table and the connection
/// session. While connected it publishes a heartbeat every
/// `heartbeat_interval`, records heartbeats from peers, and periodically
/// evicts peers that have been silent longer than `node_timeout`.
///
/// `Mesh` is a cheap handle: clones share the same node. Background tasks run
/// until [`disconnect`](Self::disconnect) is called.
///
/// # Example
///
/// ```rust,ignore
/// let bus = LocalBus::new("memory://mesh");
/// let mut config = MeshConfig::default();
/// config.transport.endpoint = bus.endpoint().to_string();
///
/// let mesh = Mesh::new(config, Arc::new(bus.transport()))?;
/// mesh.connect().await?;
/// mesh.broadcast("deploy", serde_json::json!({"version": 2})).await?;
/// mesh.disconnect().await?;
/// ```
#[derive(Debug, Clone)]
pub struct Mesh(pub(crate) Arc<MeshInner>);

assert_impl_all!(Mesh: Send, Sync, Clone);

#[derive(Debug)]
pub(crate) struct MeshInner {
    node_id: String,
    config: MeshConfig,
    transport: Arc<dyn Transport>,
    nodes: NodeTable,
    session: Mutex<Option<MeshSession>>,
    /// Mirrors `session.is_some()` for synchronous readers.
    active: AtomicBool,
    stats: MeshStats,
    membership: broadcast::Sender<MembershipEvent>,
    /// Bumped by every successful connect. Subscriptions taken under an older
    /// generation belong to a dead connection.
    generation: watch::Sender<u64>,
}

/// Background work belonging to one connection.
#[derive(Debug)]
struct MeshSession {
    cancellation_token: CancellationToken,
    tracker: TaskTracker,
}

impl MeshSession {
    fn new() -> Self {
        Self {
            cancellation_token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    async fn stop(self) {
        self.cancellation_token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

impl Mesh {
    /// Creates a disconnected mesh node with a freshly generated node id.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::InvalidConfig`] if `config` fails validation.
    pub fn new(config: MeshConfig, transport: Arc<dyn Transport>) -> Result<Self, MeshError> {
        config.validate()?;
        let node_id = new_id("node");
        let (membership, _) = broadcast::channel(config.limits.event_buffer);
        debug!(node_id = %node_id, "Created mesh node");
        Ok(Self(Arc::new(MeshInner {
            nodes: NodeTable::new(node_id.clone(), config.node_timeout()),
            node_id,
            config,
            transport,
            session: Mutex::new(None),
            active: AtomicBool::new(false),
            stats: MeshStats::default(),
            membership,
            generation: watch::channel(0).0,
        })))
    }

    /// This node's id. Stable for the lifetime of the instance.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.0.node_id
    }

    /// The configuration this mesh was built with.
    #[must_use]
    pub fn config(&self) -> &MeshConfig {
        &self.0.config
    }

    /// Connects the transport and starts heartbeating, heartbeat consumption and the stale-peer sweep.
    ///
    /// Calling this while connected does nothing. If the transport dropped
    /// since the last connect, the stale session is torn down and a new one
    /// is established.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Connection`] if the transport cannot be reached,
    /// or the transport's error if subscribing to heartbeats fails.
    #[instrument(skip(self), fields(node_id = %self.0.node_id))]
    pub async fn connect(&self) -> Result<(), MeshError> {
        let mut session = self.0.session.lock().await;
        if let Some(existing) = session.take() {
            if self.0.transport.is_connected() {
                trace!("Mesh already connected");
                *session = Some(existing);
                return Ok(());
            }
            warn!("Transport connection was lost; replacing stale session");
            self.0.active.store(false, Ordering::SeqCst);
            existing.stop().await;
        }

        let endpoint = &self.0.config.transport.endpoint;
        self.0
            .transport
            .connect(endpoint)
            .await
            .map_err(|e| match e {
                MeshError::Connection(_) => e,
                other => MeshError::Connection(other.to_string()),
            })?;

        let heartbeats = match self.0.transport.subscribe(HEARTBEAT_SUBJECT).await {
            Ok(subscription) => subscription,
            Err(e) => {
                if let Err(drain_error) = self.0.transport.drain().await {
                    warn!("Failed to close transport after subscribe error: {}", drain_error);
                }
                return Err(e);
            }
        };

        self.0.nodes.observe(&self.0.node_id, Instant::now());

        let new_session = MeshSession::new();
        let token = &new_session.cancellation_token;
        new_session
            .tracker
            .spawn(consume_heartbeats(self.0.clone(), heartbeats, token.clone()));
        new_session
            .tracker
            .spawn(produce_heartbeats(self.0.clone(), token.clone()));
        new_session
            .tracker
            .spawn(sweep_stale_nodes(self.0.clone(), token.clone()));

        self.0.active.store(true, Ordering::SeqCst);
        *session = Some(new_session);
        self.0.generation.send_modify(|generation| *generation += 1);
        info!(endpoint = %endpoint, generation = *self.0.generation.borrow(), "Mesh connected");
        Ok(())
    }

    /// Stops background tasks, forgets peers and drains the transport.
    ///
    /// Does nothing when not connected.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if draining fails.
    #[instrument(skip(self), fields(node_id = %self.0.node_id))]
    pub async fn disconnect(&self) -> Result<(), MeshError> {
        let Some(session) = self.0.session.lock().await.take() else {
            trace!("Mesh not connected; nothing to disconnect");
            return Ok(());
        };
        self.0.active.store(false, Ordering::SeqCst);
        session.stop().await;
        self.0.nodes.clear();
        self.0.transport.drain().await?;
        info!("Mesh disconnected");
        Ok(())
    }

    /// Returns `true` while a session is active and the transport reports a live connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.0.active.load(Ordering::SeqCst) && self.0.transport.is_connected()
    }

    /// Counts successful connects; zero before the first one.
    pub(crate) fn session_generation(&self) -> u64 {
        *self.0.generation.borrow()
    }

    /// Notified after every successful connect, including reconnects.
    pub(crate) fn session_changes(&self) -> watch::Receiver<u64> {
        self.0.generation.subscribe()
    }

    fn ensure_connected(&self) -> Result<(), MeshError> {
        if !self.0.active.load(Ordering::SeqCst) {
            return Err(MeshError::NotConnected);
        }
        if !self.0.transport.is_connected() {
            return Err(MeshError::Connection("transport connection lost".into()));
        }
        Ok(())
    }

    /// Publishes `message` on the subject of its `actor_id`.
    ///
    /// Delivery is not guaranteed; callers needing acknowledgement layer
    /// request/reply on top.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::NotConnected`] before [`connect`](Self::connect),
    /// [`MeshError::Connection`] after the transport was lost, or a codec or
    /// transport error from the publish itself.
    pub async fn route_message(&self, message: &MeshMessage) -> Result<(), MeshError> {
        self.ensure_connected()?;
        let bytes = message.encode()?;
        self.0
            .transport
            .publish(&actor_subject(&message.actor_id), bytes)
            .await?;
        bump(&self.0.stats.messages_routed);
        trace!(message_id = %message.id, actor_id = %message.actor_id, "Routed message");
        Ok(())
    }

    /// Publishes a broadcast envelope tagged `event_type` to every node. Returns its message id.
    ///
    /// The substrate delivers it to every subscriber, including this node.
    ///
    /// # Errors
    ///
    /// Same conditions as [`route_message`](Self::route_message).
    pub async fn broadcast(
        &self,
        event_type: impl Into<String>,
        payload: Payload,
    ) -> Result<String, MeshError> {
        self.ensure_connected()?;
        let message = MeshMessage::broadcast(event_type, payload).with_source_node(&self.0.node_id);
        self.0
            .transport
            .publish(BROADCAST_SUBJECT, message.encode()?)
            .await?;
        bump(&self.0.stats.broadcasts_sent);
        trace!(message_id = %message.id, event_type = %message.message_type, "Broadcast published");
        Ok(message.id)
    }

    /// Subscribes to a raw subject through this node's connection.
    ///
    /// # Errors
    ///
    /// Same connection conditions as [`route_message`](Self::route_message).
    pub async fn subscribe(&self, subject: &str) -> Result<Subscription, MeshError> {
        self.ensure_connected()?;
        self.0.transport.subscribe(subject).await
    }

    /// Live members of the mesh, this node included, ordered by node id.
    #[must_use]
    pub fn live_nodes(&self) -> Vec<NodeRecord> {
        self.0.nodes.live_nodes(Instant::now())
    }

    /// The membership record for `node_id`, live or not yet swept.
    #[must_use]
    pub fn node_record(&self, node_id: &str) -> Option<NodeRecord> {
        self.0.nodes.get(node_id)
    }

    /// Receives future [`MembershipEvent`]s.
    #[must_use]
    pub fn membership_events(&self) -> broadcast::Receiver<MembershipEvent> {
        self.0.membership.subscribe()
    }

    /// Point-in-time metrics. `total_nodes` counts only live members.
    #[must_use]
    pub fn metrics(&self) -> MeshMetrics {
        let stats = &self.0.stats;
        MeshMetrics {
            node_id: self.0.node_id.clone(),
            connected: self.is_connected(),
            total_nodes: self.0.nodes.live_count(Instant::now()),
            messages_routed: read(&stats.messages_routed),
            broadcasts_sent: read(&stats.broadcasts_sent),
            heartbeats_sent: read(&stats.heartbeats_sent),
            heartbeats_received: read(&stats.heartbeats_received),
        }
    }
}

/// Extracts the announcing node from a heartbeat envelope.
fn heartbeat_origin(message: &MeshMessage) -> Option<String> {
    if message.message_type != HEARTBEAT_TYPE {
        return None;
    }
    message
        .payload
        .get("nodeId")
        .and_then(Payload::as_str)
        .map(str::to_string)
        .or_else(|| message.source_node_id.clone())
}

async fn produce_heartbeats(inner: Arc<MeshInner>, token: CancellationToken) {
    let mut ticker = tokio::time::interval(inner.config.heartbeat_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                let heartbeat = MeshMessage::new(
                    String::new(),
                    HEARTBEAT_TYPE,
                    json!({ "nodeId": inner.node_id }),
                )
                .with_source_node(&inner.node_id);
                let published = match heartbeat.encode() {
                    Ok(bytes) => inner.transport.publish(HEARTBEAT_SUBJECT, bytes).await,
                    Err(e) => Err(e),
                };
                match published {
                    Ok(()) => bump(&inner.stats.heartbeats_sent),
                    Err(e) => warn!(node_id = %inner.node_id, "Failed to publish heartbeat: {}", e),
                }
            }
        }
    }
    trace!(node_id = %inner.node_id, "Heartbeat producer stopped");
}

async fn consume_heartbeats(inner: Arc<MeshInner>, mut heartbeats: Subscription, token: CancellationToken) {
    loop {
        let bytes = tokio::select! {
            () = token.cancelled() => break,
            next = heartbeats.next() => match next {
                Some(bytes) => bytes,
                None => {
                    warn!(node_id = %inner.node_id, "Heartbeat subscription ended");
                    break;
                }
            },
        };
        let origin = match MeshMessage::decode(&bytes) {
            Ok(message) => heartbeat_origin(&message),
            Err(e) => {
                debug!("Discarding undecodable heartbeat: {}", e);
                continue;
            }
        };
        let Some(origin) = origin else {
            debug!("Discarding heartbeat without a node id");
            continue;
        };
        bump(&inner.stats.heartbeats_received);
        if inner.nodes.observe(&origin, Instant::now()) && origin != inner.node_id {
            info!(node_id = %inner.node_id, peer = %origin, "Node joined");
            // No receivers is fine: nobody is watching membership.
            let _ = inner.membership.send(MembershipEvent::NodeJoined(origin));
        }
    }
    trace!(node_id = %inner.node_id, "Heartbeat consumer stopped");
}

async fn sweep_stale_nodes(inner: Arc<MeshInner>, token: CancellationToken) {
    let mut ticker = tokio::time::interval(inner.config.sweep_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                for peer in inner.nodes.sweep(Instant::now()) {
                    info!(node_id = %inner.node_id, peer = %peer, "Node timed out");
                    let _ = inner.membership.send(MembershipEvent::NodeLeft(peer));
                }
            }
        }
    }
    trace!(node_id = %inner.node_id, "Stale node sweep stopped");
}
