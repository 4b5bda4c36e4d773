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
use std::future::Future;
use std::sync::Arc;

use crate::common::{ActorHandler, Payload};
use crate::message::ActorMessage;

/// What [`ActorScheduler::register_actor`](crate::prelude::ActorScheduler::register_actor) needs to host an actor.
///
/// The handler is called once per message, never concurrently with itself.
/// Returning `Ok(payload)` settles the message (and answers it when the
/// sender asked for a reply); returning an error emits a
/// [`MessageErrorEvent`](crate::prelude::MessageErrorEvent).
///
/// ```rust,ignore
/// let echo = ActorDefinition::new("echo-actor", "echo", |message: ActorMessage| async move {
///     Ok(serde_json::json!({ "echo": message.payload }))
/// });
/// ```
#[derive(Clone)]
pub struct ActorDefinition {
    /// Unique id within the scheduler; also the actor's mesh address.
    pub id: String,
    /// Free-form classification. Not used for routing.
    pub actor_type: String,
    pub(crate) handler: ActorHandler,
}

impl ActorDefinition {
    /// Wraps an async closure as an actor handler.
    pub fn new<F, Fut>(id: impl Into<String>, actor_type: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ActorMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Payload>> + Send + 'static,
    {
        let handler: ActorHandler = Arc::new(move |message| Box::pin(handler(message)));
        Self::from_handler(id, actor_type, handler)
    }

    /// Uses an already type-erased handler, for example one shared by several actors.
    pub fn from_handler(
        id: impl Into<String>,
        actor_type: impl Into<String>,
        handler: ActorHandler,
    ) -> Self {
        Self {
            id: id.into(),
            actor_type: actor_type.into(),
            handler,
        }
    }
}

impl fmt::Debug for ActorDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorDefinition")
            .field("id", &self.id)
            .field("actor_type", &self.actor_type)
            .finish_non_exhaustive()
    }
}
