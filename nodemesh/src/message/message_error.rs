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

use derive_new::new;

use crate::message::ActorMessage;

/// Emitted when an actor handler fails (returns an error or panics).
///
/// The failure is local and non-fatal: the actor returns to idle and keeps
/// processing its mailbox, and no reply is sent for the failed message.
#[derive(new, Clone, Debug)]
pub struct MessageErrorEvent {
    /// The message whose handler failed.
    pub message: ActorMessage,
    /// Display form of the failure.
    pub error: String,
}

impl MessageErrorEvent {
    /// Id of the actor whose handler failed.
    #[must_use]
    pub fn actor_id(&self) -> &str {
        &self.message.actor_id
    }
}
