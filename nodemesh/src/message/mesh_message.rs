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

use serde::{Deserialize, Serialize};

use crate::common::{new_id, now_epoch_ms, Payload};
use crate::message::subjects::REPLY_TYPE;
use crate::message::MeshError;

/// The wire envelope exchanged between nodes.
///
/// Every message on the mesh, whether addressed to an actor, broadcast to all
/// actors, or used for mesh control (heartbeats), travels in this shape.
///
/// # Wire Format
///
/// Serialized as JSON with camelCase keys. Optional fields are omitted when
/// absent:
///
/// ```json
/// {
///   "id": "msg_01h9xz7n2e5p6q8r3t1u2v3w4x",
///   "actorId": "echo-actor",
///   "type": "process",
///   "payload": { "data": "test" },
///   "timestamp": 1718000000000,
///   "replyTo": "_reply.node_01h9xz7n2e5p6q8r3t1u2v3w4y",
///   "correlationId": "corr_01h9xz7n2e5p6q8r3t1u2v3w4z"
/// }
/// ```
///
/// An empty `actorId` marks a broadcast or control envelope. `sourceNodeId` is
/// an optional extension set on broadcasts so receivers can recognise their
/// own traffic; decoders that do not know it ignore it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MeshMessage {
    /// Unique message id.
    pub id: String,
    /// Routing target. Empty for broadcast and control envelopes.
    pub actor_id: String,
    /// Application-defined tag.
    #[serde(rename = "type")]
    pub message_type: String,
    /// Opaque structured payload.
    #[serde(default)]
    pub payload: Payload,
    /// Creation time in epoch milliseconds.
    pub timestamp: u64,
    /// Address the reply to this message should be routed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Token linking a reply to its request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Node that published the envelope, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_node_id: Option<String>,
}

/// The message as seen by an actor handler. Same shape as the wire envelope.
pub type ActorMessage = MeshMessage;

impl MeshMessage {
    /// Creates an envelope addressed to `actor_id` with a fresh id and the current timestamp.
    #[must_use]
    pub fn new(
        actor_id: impl Into<String>,
        message_type: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            id: new_id("msg"),
            actor_id: actor_id.into(),
            message_type: message_type.into(),
            payload,
            timestamp: now_epoch_ms(),
            reply_to: None,
            correlation_id: None,
            source_node_id: None,
        }
    }

    /// Creates a broadcast envelope (empty `actor_id`) tagged with `event_type`.
    #[must_use]
    pub fn broadcast(event_type: impl Into<String>, payload: Payload) -> Self {
        Self::new(String::new(), event_type, payload)
    }

    /// Sets the reply address.
    #[must_use]
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Records the publishing node.
    #[must_use]
    pub fn with_source_node(mut self, node_id: impl Into<String>) -> Self {
        self.source_node_id = Some(node_id.into());
        self
    }

    /// Returns `true` for broadcast and control envelopes.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.actor_id.is_empty()
    }

    /// Returns `true` if this envelope answers an earlier request.
    ///
    /// Replies are typed [`REPLY_TYPE`], carry a correlation id and have no
    /// reply address of their own. A plain message that merely carries a
    /// correlation id is not a reply.
    #[must_use]
    pub fn is_reply(&self) -> bool {
        self.message_type == REPLY_TYPE
            && self.correlation_id.is_some()
            && self.reply_to.is_none()
    }

    /// Builds the reply to this message carrying `payload`.
    ///
    /// Returns `None` when the message did not ask for a reply.
    #[must_use]
    pub fn reply(&self, payload: Payload) -> Option<Self> {
        let reply_to = self.reply_to.as_ref()?;
        let mut reply = Self::new(reply_to.clone(), REPLY_TYPE, payload);
        reply.correlation_id.clone_from(&self.correlation_id);
        Some(reply)
    }

    /// Serializes the envelope to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Codec`] if the payload cannot be serialized.
    pub fn encode(&self) -> Result<Vec<u8>, MeshError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses an envelope from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Codec`] if the bytes are not a valid envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, MeshError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
