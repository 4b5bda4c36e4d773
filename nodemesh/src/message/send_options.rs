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

/// Optional settings for [`ActorScheduler::send_message`](crate::prelude::ActorScheduler::send_message).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Address the handler's result should be routed back to.
    pub reply_to: Option<String>,
    /// Token the reply will carry.
    pub correlation_id: Option<String>,
    /// Fail with `ActorNotFound` unless the target is registered on this scheduler.
    pub validate_local: bool,
}

impl SendOptions {
    /// Options with nothing set: fire-and-forget, no reply.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a reply to `reply_to`.
    #[must_use]
    pub fn reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Sets the correlation id the reply will carry.
    #[must_use]
    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Checks the local registry before sending.
    #[must_use]
    pub const fn validate_local(mut self) -> Self {
        self.validate_local = true;
        self
    }
}
