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

//! An in-process publish/subscribe transport.
//!
//! A [`LocalBus`] plays the role of the broker; every [`LocalTransport`]
//! created from it is one client connection. Several meshes sharing a bus
//! behave like nodes sharing a broker, which is how single-process deployments
//! and the test suite run the mesh without external infrastructure.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::message::MeshError;
use crate::traits::{Subscription, Transport};

/// Default per-subject buffer before slow subscribers start losing messages.
const DEFAULT_SUBJECT_CAPACITY: usize = 1_024;

/// The shared broker behind a set of [`LocalTransport`] connections.
#[derive(Debug, Clone)]
pub struct LocalBus {
    inner: Arc<LocalBusInner>,
}

#[derive(Debug)]
struct LocalBusInner {
    endpoint: String,
    subjects: DashMap<String, broadcast::Sender<Vec<u8>>>,
    subject_capacity: usize,
    closed: CancellationToken,
    published: AtomicUsize,
}

impl LocalBus {
    /// Creates a bus reachable at `endpoint`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_capacity(endpoint, DEFAULT_SUBJECT_CAPACITY)
    }

    /// Creates a bus whose subjects buffer at most `subject_capacity` messages
    /// per lagging subscriber.
    #[must_use]
    pub fn with_capacity(endpoint: impl Into<String>, subject_capacity: usize) -> Self {
        Self {
            inner: Arc::new(LocalBusInner {
                endpoint: endpoint.into(),
                subjects: DashMap::new(),
                subject_capacity: subject_capacity.max(1),
                closed: CancellationToken::new(),
                published: AtomicUsize::new(0),
            }),
        }
    }

    /// The endpoint transports must connect to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Opens a new, not yet connected client of this bus.
    #[must_use]
    pub fn transport(&self) -> LocalTransport {
        LocalTransport {
            bus: self.clone(),
            connection: Mutex::new(None),
        }
    }

    /// Takes the bus down: open connections drop and new ones are refused.
    pub fn shutdown(&self) {
        debug!(endpoint = %self.inner.endpoint, "Local bus shutting down");
        self.inner.closed.cancel();
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) was called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Total number of publishes accepted by the bus.
    #[must_use]
    pub fn published_count(&self) -> usize {
        self.inner.published.load(Ordering::Relaxed)
    }

    /// Number of subjects the bus currently keeps a channel for.
    ///
    /// Subjects whose subscribers have all gone are pruned on the next
    /// publish to them or the next subscribe to any subject.
    #[must_use]
    pub fn subject_count(&self) -> usize {
        self.inner.subjects.len()
    }

    fn publish(&self, subject: &str, payload: Vec<u8>) {
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        let receivers = match self.inner.subjects.get(subject) {
            // No receivers means nobody is listening; the message is dropped.
            Some(sender) => sender.send(payload).unwrap_or(0),
            None => {
                trace!(subject, "Published on local bus with no subscribers");
                return;
            }
        };
        trace!(subject, receivers, "Published on local bus");
        if receivers == 0 {
            self.inner
                .subjects
                .remove_if(subject, |_, sender| sender.receiver_count() == 0);
        }
    }

    fn receiver(&self, subject: &str) -> broadcast::Receiver<Vec<u8>> {
        self.inner
            .subjects
            .retain(|_, sender| sender.receiver_count() > 0);
        self.inner
            .subjects
            .entry(subject.to_string())
            .or_insert_with(|| broadcast::channel(self.inner.subject_capacity).0)
            .subscribe()
    }
}

/// One client connection to a [`LocalBus`].
#[derive(Debug)]
pub struct LocalTransport {
    bus: LocalBus,
    /// Present while connected; cancelled when the connection drops.
    connection: Mutex<Option<CancellationToken>>,
}

impl LocalTransport {
    /// Simulates an abrupt connection loss: subscriptions end and
    /// [`is_connected`](Transport::is_connected) turns false, without a drain.
    pub fn sever(&self) {
        if let Some(token) = self.connection.lock().as_ref() {
            warn!(endpoint = %self.bus.endpoint(), "Local transport connection severed");
            token.cancel();
        }
    }

    fn live_token(&self) -> Result<CancellationToken, MeshError> {
        match self.connection.lock().as_ref() {
            Some(token) if !token.is_cancelled() && !self.bus.is_shut_down() => Ok(token.clone()),
            _ => Err(MeshError::NotConnected),
        }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn connect(&self, endpoint: &str) -> Result<(), MeshError> {
        if self.bus.is_shut_down() {
            return Err(MeshError::Connection(format!(
                "bus at {endpoint} is shut down"
            )));
        }
        if endpoint != self.bus.endpoint() {
            return Err(MeshError::Connection(format!(
                "no local bus listening at {endpoint}"
            )));
        }
        let mut connection = self.connection.lock();
        if connection.as_ref().is_some_and(|token| !token.is_cancelled()) {
            return Ok(());
        }
        *connection = Some(CancellationToken::new());
        debug!(endpoint, "Local transport connected");
        Ok(())
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), MeshError> {
        self.live_token()?;
        self.bus.publish(subject, payload);
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, MeshError> {
        let connection = self.live_token()?;
        let bus_closed = self.bus.inner.closed.clone();
        let receiver = self.bus.receiver(subject);
        let subject = subject.to_string();
        trace!(subject = %subject, "Subscribed on local bus");

        let stream = futures::stream::unfold(
            (receiver, connection, bus_closed, subject),
            |(mut receiver, connection, bus_closed, subject)| async move {
                loop {
                    tokio::select! {
                        () = connection.cancelled() => return None,
                        () = bus_closed.cancelled() => return None,
                        received = receiver.recv() => match received {
                            Ok(payload) => {
                                return Some((payload, (receiver, connection, bus_closed, subject)));
                            }
                            Err(RecvError::Lagged(skipped)) => {
                                warn!(subject = %subject, skipped, "Subscriber lagged; messages dropped");
                            }
                            Err(RecvError::Closed) => return None,
                        }
                    }
                }
            },
        );
        Ok(stream.boxed())
    }

    fn is_connected(&self) -> bool {
        self.live_token().is_ok()
    }

    async fn drain(&self) -> Result<(), MeshError> {
        // Publishes are handed to the bus synchronously, so there is nothing buffered to flush.
        if let Some(token) = self.connection.lock().take() {
            token.cancel();
            debug!(endpoint = %self.bus.endpoint(), "Local transport drained");
        }
        Ok(())
    }
}
