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

//! Point-in-time metrics snapshots and the counters behind them.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of a mesh node, recomputed on every query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshMetrics {
    /// This node's id.
    pub node_id: String,
    /// Whether the transport connection is up.
    pub connected: bool,
    /// Live members of the mesh, this node included.
    pub total_nodes: usize,
    /// Point-to-point envelopes published.
    pub messages_routed: u64,
    /// Broadcast envelopes published.
    pub broadcasts_sent: u64,
    /// Heartbeats published by this node.
    pub heartbeats_sent: u64,
    /// Heartbeats received from any node, this one included.
    pub heartbeats_received: u64,
}

/// Snapshot of an actor scheduler, recomputed on every query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerMetrics {
    /// Registered actors.
    pub total_actors: usize,
    /// Actors waiting for work.
    pub idle_actors: usize,
    /// Actors currently running a handler.
    pub busy_actors: usize,
    /// Outstanding `wait_for_reply` registrations.
    pub pending_replies: usize,
    /// Handler invocations that settled successfully.
    pub messages_processed: u64,
    /// Handler invocations that failed or panicked.
    pub messages_failed: u64,
    /// Messages discarded because a mailbox was full or closed.
    pub messages_dropped: u64,
}

/// Monotonic counters kept by a mesh.
#[derive(Debug, Default)]
pub(crate) struct MeshStats {
    pub(crate) messages_routed: AtomicU64,
    pub(crate) broadcasts_sent: AtomicU64,
    pub(crate) heartbeats_sent: AtomicU64,
    pub(crate) heartbeats_received: AtomicU64,
}

/// Monotonic counters kept by a scheduler.
#[derive(Debug, Default)]
pub(crate) struct SchedulerStats {
    pub(crate) messages_processed: AtomicU64,
    pub(crate) messages_failed: AtomicU64,
    pub(crate) messages_dropped: AtomicU64,
}

/// Relaxed increment; counters are only ever read as approximate snapshots.
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Relaxed read of a counter.
pub(crate) fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}
