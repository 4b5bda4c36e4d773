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

use std::fmt;

/// Errors raised by the mesh layer and the transports beneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshError {
    /// The transport could not be reached or the connection was lost.
    Connection(String),
    /// An operation that needs a live connection ran before [`connect`](crate::prelude::Mesh::connect).
    NotConnected,
    /// The transport accepted the connection but failed a publish or subscribe.
    Transport(String),
    /// An envelope could not be encoded or decoded.
    Codec(String),
    /// The configuration violates an invariant (for example `node_timeout <= heartbeat_interval`).
    InvalidConfig(String),
}

impl fmt::Display for MeshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "Connection error: {e}"),
            Self::NotConnected => write!(f, "Mesh is not connected"),
            Self::Transport(e) => write!(f, "Transport error: {e}"),
            Self::Codec(e) => write!(f, "Codec error: {e}"),
            Self::InvalidConfig(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for MeshError {}

impl From<serde_json::Error> for MeshError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

/// Errors returned by [`ActorScheduler`](crate::prelude::ActorScheduler) operations.
///
/// Handler failures never show up here; they are reported as
/// [`MessageErrorEvent`](crate::prelude::MessageErrorEvent)s instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The underlying mesh refused the operation.
    Mesh(MeshError),
    /// An actor with this id is already registered on this scheduler.
    DuplicateActor(String),
    /// No actor with this id is registered on this scheduler.
    ActorNotFound(String),
    /// No reply bearing the correlation id arrived before the deadline.
    ReplyTimeout {
        /// Correlation id that was being waited on.
        correlation_id: String,
        /// Timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },
    /// The scheduler has been shut down.
    ShutDown,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mesh(e) => write!(f, "{e}"),
            Self::DuplicateActor(id) => write!(f, "Actor already registered: {id}"),
            Self::ActorNotFound(id) => write!(f, "Actor not found: {id}"),
            Self::ReplyTimeout {
                correlation_id,
                timeout_ms,
            } => write!(
                f,
                "No reply for correlation id {correlation_id} within {timeout_ms} ms"
            ),
            Self::ShutDown => write!(f, "Scheduler has been shut down"),
        }
    }
}

impl std::error::Error for SchedulerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Mesh(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MeshError> for SchedulerError {
    fn from(err: MeshError) -> Self {
        Self::Mesh(err)
    }
}
