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
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use static_assertions::assert_impl_all;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::actor::{run_mailbox, ActorDefinition, ActorInstance, ActorState};
use crate::common::metrics::{bump, read, SchedulerStats};
use crate::common::pending_replies::PendingReplies;
use crate::common::{new_id, Mesh, MessageErrorCallback, Payload, ReplyWaiter, SchedulerMetrics};
use crate::message::subjects::{actor_subject, reply_inbox, BROADCAST_SUBJECT};
use crate::message::{ActorMessage, MeshError, MeshMessage, MessageErrorEvent, SchedulerError, SendOptions};
use crate::traits::Subscription;

/// Hosts actors on one mesh node.
///
/// The scheduler subscribes each registered actor to its mesh subject, queues
/// inbound envelopes in a bounded per-actor mailbox and runs the actor's
/// handler over that mailbox one message at a time. Different actors run
/// concurrently. It also fans broadcasts out to every local actor and
/// correlates replies with the requests waiting for them.
///
/// The scheduler borrows the [`Mesh`] for transport operations only; the
/// embedder connects the mesh before registering actors and disconnects it
/// after [`shutdown`](Self::shutdown).
///
/// # Example
///
/// ```rust,ignore
/// let scheduler = ActorScheduler::new(&mesh);
/// scheduler
///     .register_actor(ActorDefinition::new("echo-actor", "echo", |m: ActorMessage| async move {
///         Ok(serde_json::json!({ "echo": m.payload }))
///     }))
///     .await?;
///
/// let reply = scheduler
///     .request("echo-actor", "test", json!({"message": "hello"}), Duration::from_secs(5))
///     .await?;
/// assert_eq!(reply, json!({"echo": {"message": "hello"}}));
/// ```
#[derive(Debug, Clone)]
pub struct ActorScheduler(Arc<SchedulerInner>);

assert_impl_all!(ActorScheduler: Send, Sync, Clone);

/// Registry entry for one hosted actor.
#[derive(Debug)]
struct ActorSlot {
    instance: ActorInstance,
    mailbox: mpsc::Sender<ActorMessage>,
    /// Stops the reader of the actor's subject. Replaced on resubscribe.
    subscription: Mutex<CancellationToken>,
}

/// The scheduler's view of the mesh connection its readers were started on.
#[derive(Debug)]
struct IntakeState {
    /// Mesh session generation the current readers belong to; zero before the first start.
    generation: u64,
    /// Parent of the readers for that generation.
    readers: CancellationToken,
    watching: bool,
}

pub(crate) struct SchedulerInner {
    pub(crate) mesh: Mesh,
    reply_inbox: String,
    mailbox_capacity: usize,
    deliver_own_broadcasts: bool,
    shutdown_grace: Duration,
    reply_timeout: Duration,
    registry: DashMap<String, ActorSlot>,
    pending: PendingReplies,
    stats: SchedulerStats,
    errors: broadcast::Sender<MessageErrorEvent>,
    error_callbacks: RwLock<Vec<MessageErrorCallback>>,
    intake: tokio::sync::Mutex<IntakeState>,
    accepting: AtomicBool,
    /// Parent of every subscription reader.
    subscriptions: CancellationToken,
    /// Force-stops mailboxes once the shutdown grace period is exhausted.
    halt: CancellationToken,
    tracker: TaskTracker,
}

impl std::fmt::Debug for SchedulerInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerInner")
            .field("node_id", &self.mesh.node_id())
            .field("actors", &self.registry.len())
            .field("pending_replies", &self.pending.len())
            .field("accepting", &self.accepting.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SchedulerInner {
    pub(crate) fn halt_token(&self) -> CancellationToken {
        self.halt.clone()
    }

    pub(crate) fn record_success(&self, actor: &ActorInstance) {
        actor.record_success();
        bump(&self.stats.messages_processed);
    }

    pub(crate) fn report_failure(&self, actor: &ActorInstance, event: MessageErrorEvent) {
        actor.record_failure();
        bump(&self.stats.messages_failed);
        error!(
            actor_id = %actor.id(),
            message_id = %event.message.id,
            message_type = %event.message.message_type,
            "Actor handler failed: {}", event.error
        );
        let callbacks = self.error_callbacks.read().clone();
        for callback in &callbacks {
            callback(&event);
        }
        // Nobody subscribed is fine; callbacks may be the only observers.
        let _ = self.errors.send(event);
    }

    /// Entry point for every envelope read from a subscription.
    fn intake(&self, bytes: &[u8]) {
        let message = match MeshMessage::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!(node_id = %self.mesh.node_id(), "Dropping undecodable envelope: {}", e);
                return;
            }
        };

        if message.is_reply() {
            if let Some(correlation_id) = message.correlation_id.as_deref() {
                if self.pending.settle(correlation_id, message.payload.clone()) {
                    trace!(correlation_id, "Settled pending reply");
                    return;
                }
            }
            match self.registry.get(&message.actor_id) {
                Some(slot) => self.enqueue(&slot, message),
                None => debug!(
                    correlation_id = ?message.correlation_id,
                    "Dropping reply nobody is waiting for"
                ),
            }
            return;
        }

        if message.is_broadcast() {
            if !self.deliver_own_broadcasts
                && message.source_node_id.as_deref() == Some(self.mesh.node_id())
            {
                trace!(message_id = %message.id, "Skipping own broadcast");
                return;
            }
            for slot in self.registry.iter() {
                self.enqueue(&slot, message.clone());
            }
            return;
        }

        match self.registry.get(&message.actor_id) {
            Some(slot) => self.enqueue(&slot, message),
            None => debug!(actor_id = %message.actor_id, "No local actor for message; dropped"),
        }
    }

    fn enqueue(&self, slot: &ActorSlot, message: ActorMessage) {
        match slot.mailbox.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(message)) => {
                bump(&self.stats.messages_dropped);
                warn!(
                    actor_id = %slot.instance.id(),
                    message_id = %message.id,
                    "Mailbox full; message dropped"
                );
            }
            Err(TrySendError::Closed(message)) => {
                bump(&self.stats.messages_dropped);
                debug!(
                    actor_id = %slot.instance.id(),
                    message_id = %message.id,
                    "Mailbox closed; message dropped"
                );
            }
        }
    }
}

impl ActorScheduler {
    /// Creates a scheduler on `mesh`, taking mailbox and broadcast settings from its configuration.
    #[must_use]
    pub fn new(mesh: &Mesh) -> Self {
        let config = mesh.config();
        let (errors, _) = broadcast::channel(config.limits.event_buffer);
        Self(Arc::new(SchedulerInner {
            reply_inbox: reply_inbox(mesh.node_id()),
            mailbox_capacity: config.limits.mailbox_capacity,
            deliver_own_broadcasts: config.behavior.deliver_own_broadcasts,
            shutdown_grace: config.shutdown_grace(),
            reply_timeout: config.reply_timeout(),
            mesh: mesh.clone(),
            registry: DashMap::new(),
            pending: PendingReplies::default(),
            stats: SchedulerStats::default(),
            errors,
            error_callbacks: RwLock::new(Vec::new()),
            intake: tokio::sync::Mutex::new(IntakeState {
                generation: 0,
                readers: CancellationToken::new(),
                watching: false,
            }),
            accepting: AtomicBool::new(true),
            subscriptions: CancellationToken::new(),
            halt: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }))
    }

    /// The mesh this scheduler runs on.
    #[must_use]
    pub fn mesh(&self) -> &Mesh {
        &self.0.mesh
    }

    /// The address replies to this scheduler's requests are sent to.
    #[must_use]
    pub fn reply_inbox(&self) -> &str {
        &self.0.reply_inbox
    }

    fn ensure_accepting(&self) -> Result<(), SchedulerError> {
        if self.0.accepting.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SchedulerError::ShutDown)
        }
    }

    /// Makes sure the intake readers run on the mesh's current connection.
    async fn ensure_intake(&self) -> Result<(), MeshError> {
        let mut intake = self.0.intake.lock().await;
        self.refresh_intake(&mut intake).await
    }

    /// Starts the broadcast, reply-inbox and per-actor readers, replacing the
    /// previous set when the mesh has reconnected since they were started.
    async fn refresh_intake(&self, intake: &mut IntakeState) -> Result<(), MeshError> {
        let generation = self.0.mesh.session_generation();
        if intake.generation == generation && self.0.mesh.is_connected() {
            return Ok(());
        }

        let broadcasts = self.0.mesh.subscribe(BROADCAST_SUBJECT).await?;
        let replies = self.0.mesh.subscribe(&actor_subject(&self.0.reply_inbox)).await?;
        let actor_ids: Vec<String> = self.0.registry.iter().map(|slot| slot.key().clone()).collect();
        let mut actor_subscriptions = Vec::with_capacity(actor_ids.len());
        for id in actor_ids {
            let subscription = self.0.mesh.subscribe(&actor_subject(&id)).await?;
            actor_subscriptions.push((id, subscription));
        }

        intake.readers.cancel();
        let readers = self.0.subscriptions.child_token();
        self.spawn_reader(broadcasts, readers.clone(), BROADCAST_SUBJECT.to_string());
        self.spawn_reader(replies, readers.clone(), self.0.reply_inbox.clone());
        for (id, subscription) in actor_subscriptions {
            // Deregistered while we were subscribing.
            let Some(slot) = self.0.registry.get(&id) else {
                continue;
            };
            let reader = readers.child_token();
            *slot.subscription.lock() = reader.clone();
            drop(slot);
            self.spawn_reader(subscription, reader, actor_subject(&id));
        }

        if intake.generation == 0 {
            debug!(node_id = %self.0.mesh.node_id(), generation, "Scheduler intake started");
        } else {
            info!(node_id = %self.0.mesh.node_id(), generation, "Scheduler intake resubscribed");
        }
        intake.generation = generation;
        intake.readers = readers;
        if !intake.watching {
            intake.watching = true;
            self.watch_reconnects(generation);
        }
        Ok(())
    }

    /// Resubscribes whenever the mesh reconnects, so a node that only
    /// receives keeps getting its messages.
    fn watch_reconnects(&self, started_on: u64) {
        let scheduler = self.clone();
        let mut changes = self.0.mesh.session_changes();
        let token = self.0.subscriptions.clone();
        self.0.tracker.spawn(async move {
            // A reconnect may have landed before the watcher subscribed.
            let mut missed = *changes.borrow_and_update() != started_on;
            loop {
                if !missed {
                    tokio::select! {
                        () = token.cancelled() => break,
                        changed = changes.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
                missed = false;
                if let Err(e) = scheduler.ensure_intake().await {
                    warn!(
                        node_id = %scheduler.0.mesh.node_id(),
                        "Failed to resubscribe after reconnect: {}", e
                    );
                }
            }
            trace!("Reconnect watcher stopped");
        });
    }

    fn spawn_reader(&self, mut subscription: Subscription, token: CancellationToken, label: String) {
        let inner = self.0.clone();
        self.0.tracker.spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    next = subscription.next() => match next {
                        Some(bytes) => inner.intake(&bytes),
                        None => {
                            debug!(subscription = %label, "Subscription ended");
                            break;
                        }
                    },
                }
            }
            trace!(subscription = %label, "Subscription reader stopped");
        });
    }

    /// Hosts a new actor and returns its id.
    ///
    /// The actor starts idle and receives messages addressed to its id as
    /// well as every broadcast.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::DuplicateActor`] if the id is taken,
    /// [`SchedulerError::ShutDown`] after [`shutdown`](Self::shutdown), and
    /// [`SchedulerError::Mesh`] if the mesh is not connected.
    #[instrument(skip(self, definition), fields(actor_id = %definition.id))]
    pub async fn register_actor(&self, definition: ActorDefinition) -> Result<String, SchedulerError> {
        self.ensure_accepting()?;
        if self.0.registry.contains_key(&definition.id) {
            return Err(SchedulerError::DuplicateActor(definition.id));
        }
        let mut intake = self.0.intake.lock().await;
        self.refresh_intake(&mut intake).await?;
        let subscription = self.0.mesh.subscribe(&actor_subject(&definition.id)).await?;

        let ActorDefinition {
            id,
            actor_type,
            handler,
        } = definition;
        let instance = ActorInstance::new(id.clone(), actor_type);
        let (mailbox, inbox) = mpsc::channel(self.0.mailbox_capacity);
        let reader = intake.readers.child_token();

        match self.0.registry.entry(id.clone()) {
            Entry::Occupied(_) => return Err(SchedulerError::DuplicateActor(id)),
            Entry::Vacant(vacant) => {
                vacant.insert(ActorSlot {
                    instance: instance.clone(),
                    mailbox,
                    subscription: Mutex::new(reader.clone()),
                });
            }
        }
        if !self.0.accepting.load(Ordering::SeqCst) {
            // Lost a race with shutdown.
            self.0.registry.remove(&id);
            return Err(SchedulerError::ShutDown);
        }

        info!(actor_type = %instance.actor_type(), "Actor registered");
        self.0
            .tracker
            .spawn(run_mailbox(self.0.clone(), instance, handler, inbox));
        self.spawn_reader(subscription, reader, actor_subject(&id));
        Ok(id)
    }

    /// Removes an actor. Messages already in its mailbox are still processed.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::ActorNotFound`] if no actor has this id.
    pub fn deregister_actor(&self, actor_id: &str) -> Result<(), SchedulerError> {
        let (_, slot) = self
            .0
            .registry
            .remove(actor_id)
            .ok_or_else(|| SchedulerError::ActorNotFound(actor_id.to_string()))?;
        slot.subscription.lock().cancel();
        info!(actor_id, "Actor deregistered");
        Ok(())
    }

    /// A live view of a registered actor.
    #[must_use]
    pub fn get_actor(&self, actor_id: &str) -> Option<ActorInstance> {
        self.0.registry.get(actor_id).map(|slot| slot.instance.clone())
    }

    /// Ids of every registered actor, sorted.
    #[must_use]
    pub fn actor_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.0.registry.iter().map(|slot| slot.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Sends a message to `actor_id` anywhere on the mesh and returns its message id.
    ///
    /// Unknown targets are fire-and-forget unless `options` asks for local validation.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::ActorNotFound`] when validation is requested and the
    /// actor is not local, [`SchedulerError::ShutDown`] after shutdown, and
    /// [`SchedulerError::Mesh`] when routing fails.
    pub async fn send_message(
        &self,
        actor_id: &str,
        message_type: impl Into<String>,
        payload: Payload,
        options: SendOptions,
    ) -> Result<String, SchedulerError> {
        self.ensure_accepting()?;
        if options.validate_local && !self.0.registry.contains_key(actor_id) {
            return Err(SchedulerError::ActorNotFound(actor_id.to_string()));
        }
        self.ensure_intake().await?;

        let mut message = MeshMessage::new(actor_id, message_type, payload)
            .with_source_node(self.0.mesh.node_id());
        if let Some(reply_to) = options.reply_to {
            message = message.with_reply_to(reply_to);
        }
        if let Some(correlation_id) = options.correlation_id {
            message = message.with_correlation_id(correlation_id);
        }
        self.0.mesh.route_message(&message).await?;
        trace!(actor_id, message_id = %message.id, "Message sent");
        Ok(message.id)
    }

    /// Broadcasts to every actor on every node and returns the message id.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::ShutDown`] after shutdown, or [`SchedulerError::Mesh`] when publishing fails.
    pub async fn broadcast(
        &self,
        event_type: impl Into<String>,
        payload: Payload,
    ) -> Result<String, SchedulerError> {
        self.ensure_accepting()?;
        self.ensure_intake().await?;
        Ok(self.0.mesh.broadcast(event_type, payload).await?)
    }

    /// Registers interest in a reply bearing `correlation_id`.
    ///
    /// Registration happens immediately, so the waiter can be created before
    /// the request goes out and no early reply is lost. The `timeout` counts
    /// from this call.
    #[must_use]
    pub fn wait_for_reply(&self, correlation_id: impl Into<String>, timeout: Duration) -> ReplyWaiter {
        self.0.pending.register(correlation_id, timeout)
    }

    /// Sends a message that expects an answer and waits for it.
    ///
    /// `timeout` falls back to the configured `reply_timeout_ms` when `None`.
    ///
    /// # Errors
    ///
    /// Any error of [`send_message`](Self::send_message), plus
    /// [`SchedulerError::ReplyTimeout`] when no reply arrives in time.
    pub async fn request(
        &self,
        actor_id: &str,
        message_type: impl Into<String>,
        payload: Payload,
        timeout: impl Into<Option<Duration>>,
    ) -> Result<Payload, SchedulerError> {
        let timeout = timeout.into().unwrap_or(self.0.reply_timeout);
        let correlation_id = new_id("corr");
        let waiter = self.wait_for_reply(correlation_id.clone(), timeout);
        let options = SendOptions::new()
            .reply_to(self.0.reply_inbox.clone())
            .correlation_id(correlation_id);
        self.send_message(actor_id, message_type, payload, options)
            .await?;
        waiter.await
    }

    /// Receives every future [`MessageErrorEvent`].
    #[must_use]
    pub fn message_errors(&self) -> broadcast::Receiver<MessageErrorEvent> {
        self.0.errors.subscribe()
    }

    /// Calls `callback` synchronously for every handler failure.
    pub fn on_message_error<F>(&self, callback: F)
    where
        F: Fn(&MessageErrorEvent) + Send + Sync + 'static,
    {
        self.0.error_callbacks.write().push(Arc::new(callback));
    }

    /// Point-in-time scheduler metrics.
    #[must_use]
    pub fn metrics(&self) -> SchedulerMetrics {
        let mut metrics = SchedulerMetrics::default();
        for slot in self.0.registry.iter() {
            metrics.total_actors += 1;
            match slot.instance.state() {
                ActorState::Idle => metrics.idle_actors += 1,
                ActorState::Busy => metrics.busy_actors += 1,
            }
        }
        metrics.pending_replies = self.0.pending.len();
        metrics.messages_processed = read(&self.0.stats.messages_processed);
        metrics.messages_failed = read(&self.0.stats.messages_failed);
        metrics.messages_dropped = read(&self.0.stats.messages_dropped);
        metrics
    }

    /// Stops the scheduler.
    ///
    /// New registrations and sends are refused, subscriptions stop, and every
    /// mailbox is closed. Queued and in-flight messages get up to
    /// `shutdown_grace_ms` to finish before their tasks are cancelled.
    /// Outstanding reply waiters resolve with [`SchedulerError::ShutDown`].
    /// Calling this again does nothing.
    ///
    /// # Errors
    ///
    /// Currently always succeeds.
    #[instrument(skip(self), fields(node_id = %self.0.mesh.node_id()))]
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        if !self.0.accepting.swap(false, Ordering::SeqCst) {
            trace!("Scheduler already shut down");
            return Ok(());
        }
        info!(actors = self.0.registry.len(), "Scheduler shutting down");

        self.0.subscriptions.cancel();
        // Dropping the senders closes every mailbox; receivers drain what is queued.
        self.0.registry.clear();
        self.0.tracker.close();

        let grace = self.0.shutdown_grace;
        if tokio::time::timeout(grace, self.0.tracker.wait()).await.is_err() {
            warn!(
                grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                "Shutdown grace elapsed; cancelling remaining actor work"
            );
            self.0.halt.cancel();
            self.0.tracker.wait().await;
        }

        let abandoned = self.0.pending.fail_all();
        if abandoned > 0 {
            debug!(abandoned, "Abandoned pending replies");
        }
        info!("Scheduler shut down");
        Ok(())
    }
}
