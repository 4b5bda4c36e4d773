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

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::trace;

use crate::common::now_epoch_ms;

/// What a node knows about one member of the mesh (itself included).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    /// The member's node id.
    pub node_id: String,
    /// When the first heartbeat from the member was observed.
    pub first_seen: Instant,
    /// When the latest heartbeat from the member was observed.
    pub last_seen: Instant,
    /// Wall-clock time of the latest heartbeat, in epoch milliseconds.
    pub last_seen_epoch_ms: u64,
}

impl NodeRecord {
    fn new(node_id: String, now: Instant) -> Self {
        Self {
            node_id,
            first_seen: now,
            last_seen: now,
            last_seen_epoch_ms: now_epoch_ms(),
        }
    }

    /// Returns `true` if the member was heard from within `node_timeout` of `now`.
    #[must_use]
    pub fn is_live_at(&self, now: Instant, node_timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) <= node_timeout
    }
}

/// The membership table owned by a [`Mesh`](crate::prelude::Mesh).
///
/// Liveness is always evaluated against an explicit `now` so the sweep and
/// metrics agree on a single instant.
#[derive(Debug)]
pub(crate) struct NodeTable {
    self_id: String,
    node_timeout: Duration,
    records: DashMap<String, NodeRecord>,
}

impl NodeTable {
    pub(crate) fn new(self_id: impl Into<String>, node_timeout: Duration) -> Self {
        Self {
            self_id: self_id.into(),
            node_timeout,
            records: DashMap::new(),
        }
    }

    /// Records a heartbeat from `node_id`. Returns `true` if the node was not known before.
    pub(crate) fn observe(&self, node_id: &str, now: Instant) -> bool {
        if let Some(mut record) = self.records.get_mut(node_id) {
            record.last_seen = now;
            record.last_seen_epoch_ms = now_epoch_ms();
            return false;
        }
        self.records
            .insert(node_id.to_string(), NodeRecord::new(node_id.to_string(), now));
        trace!(node_id, "New node record");
        true
    }

    /// Self is live whenever it is present; peers only within the timeout window.
    fn is_live(&self, record: &NodeRecord, now: Instant) -> bool {
        record.node_id == self.self_id || record.is_live_at(now, self.node_timeout)
    }

    pub(crate) fn live_count(&self, now: Instant) -> usize {
        self.records
            .iter()
            .filter(|entry| self.is_live(entry.value(), now))
            .count()
    }

    pub(crate) fn live_nodes(&self, now: Instant) -> Vec<NodeRecord> {
        let mut nodes: Vec<NodeRecord> = self
            .records
            .iter()
            .filter(|entry| self.is_live(entry.value(), now))
            .map(|entry| entry.value().clone())
            .collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    pub(crate) fn get(&self, node_id: &str) -> Option<NodeRecord> {
        self.records.get(node_id).map(|entry| entry.value().clone())
    }

    /// Evicts every expired peer and returns their ids. Self is never evicted.
    pub(crate) fn sweep(&self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .records
            .iter()
            .filter(|entry| !self.is_live(entry.value(), now))
            .map(|entry| entry.key().clone())
            .collect();
        // Re-check under the entry lock: a heartbeat may have refreshed the record meanwhile.
        expired
            .into_iter()
            .filter(|node_id| {
                self.records
                    .remove_if(node_id, |_, record| !self.is_live(record, now))
                    .is_some()
            })
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.records.clear();
    }
}
