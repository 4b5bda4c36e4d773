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

use std::fmt::Debug;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::message::MeshError;

/// An active subscription: the raw payloads published on one subject.
///
/// The stream ends when the transport disconnects. Dropping it unsubscribes.
pub type Subscription = BoxStream<'static, Vec<u8>>;

/// The publish/subscribe substrate the mesh runs on.
///
/// Implementations wrap a concrete broker client (NATS, an in-process bus, ...).
/// Delivery is fire-and-forget: a publish with no subscribers is silently
/// dropped, and subscribers only see messages published after they subscribed.
/// Fan-out to multiple subscribers of the same subject is the transport's job.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Establishes the connection to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Connection`] if the endpoint cannot be reached.
    async fn connect(&self, endpoint: &str) -> Result<(), MeshError>;

    /// Publishes `payload` on `subject`.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::NotConnected`] when called without a connection, or
    /// [`MeshError::Transport`] if the broker rejects the publish.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), MeshError>;

    /// Subscribes to `subject`.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::NotConnected`] when called without a connection.
    async fn subscribe(&self, subject: &str) -> Result<Subscription, MeshError>;

    /// Reports whether the connection is currently usable.
    fn is_connected(&self) -> bool;

    /// Flushes buffered publishes and closes the connection. Closing an
    /// unconnected transport succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Transport`] if buffered data could not be flushed.
    async fn drain(&self) -> Result<(), MeshError>;
}
