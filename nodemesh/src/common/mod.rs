//! Shared runtime components of the mesh.
//!
//! *   [`Mesh`]: node identity, membership and message routing over a [`Transport`](crate::traits::Transport).
//! *   [`ActorScheduler`]: hosts actors on a mesh node.
//! *   [`MeshConfig`]: configuration loaded from XDG directories or built in code.
//! *   [`LocalBus`] / [`LocalTransport`]: an in-process transport.
//!
//! Internal submodules hold the membership table, pending replies and counters.

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

// --- Public Re-exports ---
pub use config::{BehaviorConfig, LimitsConfig, MeshConfig, TimeoutConfig, TransportConfig};
pub use local_transport::{LocalBus, LocalTransport};
pub use mesh::{MembershipEvent, Mesh};
pub use metrics::{MeshMetrics, SchedulerMetrics};
pub use node_table::NodeRecord;
pub use pending_replies::ReplyWaiter;
pub use scheduler::ActorScheduler;

pub use types::*;

// --- Submodules ---

/// Shared type aliases and id helpers.
mod types;

/// Configuration and its loaders.
mod config;
/// The in-process bus transport.
mod local_transport;
/// The `Mesh` node handle.
mod mesh;
/// Metrics snapshots and counters.
pub(crate) mod metrics;
/// Membership bookkeeping.
pub(crate) mod node_table;
/// Correlation of replies with waiting requests.
pub(crate) mod pending_replies;
/// The actor scheduler.
pub(crate) mod scheduler;
