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

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::common::now_epoch_ms;

/// Whether an actor is running its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorState {
    /// Waiting for the next message.
    Idle,
    /// Processing a message.
    Busy,
}

/// A registered actor as seen from outside its mailbox.
///
/// Clones share the same live state; a handle obtained before
/// deregistration keeps reporting the counters it had at that point.
#[derive(Debug, Clone)]
pub struct ActorInstance(Arc<ActorCore>);

#[derive(Debug)]
struct ActorCore {
    id: String,
    actor_type: String,
    registered_at_ms: u64,
    busy: AtomicBool,
    processed: AtomicU64,
    failed: AtomicU64,
}

impl ActorInstance {
    pub(crate) fn new(id: impl Into<String>, actor_type: impl Into<String>) -> Self {
        Self(Arc::new(ActorCore {
            id: id.into(),
            actor_type: actor_type.into(),
            registered_at_ms: now_epoch_ms(),
            busy: AtomicBool::new(false),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }))
    }

    /// The actor's id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.0.id
    }

    /// The actor's free-form type.
    #[must_use]
    pub fn actor_type(&self) -> &str {
        &self.0.actor_type
    }

    /// Registration time in epoch milliseconds.
    #[must_use]
    pub fn registered_at_ms(&self) -> u64 {
        self.0.registered_at_ms
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ActorState {
        if self.0.busy.load(Ordering::Acquire) {
            ActorState::Busy
        } else {
            ActorState::Idle
        }
    }

    /// Messages whose handler completed successfully.
    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.0.processed.load(Ordering::Relaxed)
    }

    /// Messages whose handler failed or panicked.
    #[must_use]
    pub fn messages_failed(&self) -> u64 {
        self.0.failed.load(Ordering::Relaxed)
    }

    pub(crate) fn set_state(&self, state: ActorState) {
        self.0
            .busy
            .store(state == ActorState::Busy, Ordering::Release);
    }

    pub(crate) fn record_success(&self) {
        self.0.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.0.failed.fetch_add(1, Ordering::Relaxed);
    }
}
