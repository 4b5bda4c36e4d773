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

//! The per-actor processing loop.
//!
//! Each registered actor owns exactly one of these loops, which is what keeps
//! its handler invocations strictly serial while different actors run in
//! parallel.

use std::any::Any;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::actor::{ActorInstance, ActorState};
use crate::common::scheduler::SchedulerInner;
use crate::common::ActorHandler;
use crate::message::{ActorMessage, MessageErrorEvent};

/// Runs `actor`'s handler over its mailbox until the mailbox closes and drains,
/// or the scheduler halts.
pub(crate) async fn run_mailbox(
    scheduler: Arc<SchedulerInner>,
    actor: ActorInstance,
    handler: ActorHandler,
    mut inbox: mpsc::Receiver<ActorMessage>,
) {
    let halt = scheduler.halt_token();
    loop {
        let message = tokio::select! {
            biased;
            () = halt.cancelled() => break,
            next = inbox.recv() => match next {
                Some(message) => message,
                None => break,
            },
        };

        actor.set_state(ActorState::Busy);
        trace!(actor_id = %actor.id(), message_id = %message.id, "Dispatching message");

        // A separate task turns a panicking handler into a JoinError.
        let invocation = tokio::spawn(handler(message.clone()));
        let abort = invocation.abort_handle();
        let outcome = tokio::select! {
            () = halt.cancelled() => {
                abort.abort();
                actor.set_state(ActorState::Idle);
                warn!(actor_id = %actor.id(), message_id = %message.id, "Handler cancelled by scheduler halt");
                break;
            }
            outcome = invocation => outcome,
        };
        actor.set_state(ActorState::Idle);

        match outcome {
            Ok(Ok(result)) => {
                scheduler.record_success(&actor);
                if let Some(reply) = message.reply(result) {
                    if let Err(e) = scheduler.mesh.route_message(&reply).await {
                        warn!(
                            actor_id = %actor.id(),
                            reply_to = %reply.actor_id,
                            "Failed to route reply: {}", e
                        );
                    }
                }
            }
            Ok(Err(e)) => {
                scheduler.report_failure(&actor, MessageErrorEvent::new(message, e.to_string()));
            }
            Err(join_error) => {
                let error = if join_error.is_panic() {
                    panic_description(join_error.into_panic().as_ref())
                } else {
                    "handler was cancelled".to_string()
                };
                scheduler.report_failure(&actor, MessageErrorEvent::new(message, error));
            }
        }
    }
    trace!(actor_id = %actor.id(), "Mailbox closed");
}

fn panic_description(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    format!("handler panicked: {detail}")
}
