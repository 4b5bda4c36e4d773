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

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{trace, warn};

use crate::common::Payload;
use crate::message::SchedulerError;

#[derive(Debug)]
struct PendingEntry {
    ticket: u64,
    sender: oneshot::Sender<Payload>,
}

/// Correlation ids awaiting a reply, each settled at most once.
#[derive(Debug, Default)]
pub(crate) struct PendingReplies {
    entries: Arc<DashMap<String, PendingEntry>>,
    next_ticket: AtomicU64,
}

impl PendingReplies {
    /// Registers `correlation_id` now; the returned waiter starts its deadline immediately.
    pub(crate) fn register(&self, correlation_id: impl Into<String>, timeout: Duration) -> ReplyWaiter {
        let correlation_id = correlation_id.into();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        if self
            .entries
            .insert(correlation_id.clone(), PendingEntry { ticket, sender })
            .is_some()
        {
            warn!(correlation_id = %correlation_id, "Replaced an existing reply waiter");
        }
        ReplyWaiter {
            correlation_id,
            ticket,
            timeout,
            deadline: Instant::now().checked_add(timeout),
            receiver,
            entries: self.entries.clone(),
        }
    }

    /// Hands `payload` to the waiter for `correlation_id`.
    ///
    /// Returns `false` when nothing is waiting: unknown id, already settled,
    /// or the waiter timed out or was dropped.
    pub(crate) fn settle(&self, correlation_id: &str, payload: Payload) -> bool {
        match self.entries.remove(correlation_id) {
            Some((_, entry)) => entry.sender.send(payload).is_ok(),
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Abandons every outstanding waiter; each observes [`SchedulerError::ShutDown`].
    pub(crate) fn fail_all(&self) -> usize {
        let abandoned = self.entries.len();
        self.entries.clear();
        abandoned
    }
}

/// A registered, not yet settled reply.
///
/// Await it (directly, or through [`wait`](Self::wait)) to receive the reply
/// payload. The deadline counts from registration, not from the first poll.
/// A timeout too large to represent as an instant (such as [`Duration::MAX`])
/// waits without a deadline. Dropping the waiter unregisters its correlation id, so a reply arriving
/// afterwards is ignored.
#[derive(Debug)]
pub struct ReplyWaiter {
    correlation_id: String,
    ticket: u64,
    timeout: Duration,
    /// `None` when the timeout overflows the clock.
    deadline: Option<Instant>,
    receiver: oneshot::Receiver<Payload>,
    entries: Arc<DashMap<String, PendingEntry>>,
}

impl ReplyWaiter {
    /// The correlation id this waiter settles on.
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Waits for the reply payload.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::ReplyTimeout`] when the deadline passes first, or
    /// [`SchedulerError::ShutDown`] if the scheduler shut down while waiting.
    pub async fn wait(mut self) -> Result<Payload, SchedulerError> {
        let received = match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, &mut self.receiver).await,
            None => Ok((&mut self.receiver).await),
        };
        match received {
            Ok(Ok(payload)) => {
                trace!(correlation_id = %self.correlation_id, "Reply received");
                Ok(payload)
            }
            Ok(Err(_)) => Err(SchedulerError::ShutDown),
            Err(_) => Err(SchedulerError::ReplyTimeout {
                correlation_id: self.correlation_id.clone(),
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

impl IntoFuture for ReplyWaiter {
    type Output = Result<Payload, SchedulerError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

impl Drop for ReplyWaiter {
    fn drop(&mut self) {
        let ticket = self.ticket;
        self.entries
            .remove_if(&self.correlation_id, |_, entry| entry.ticket == ticket);
    }
}
