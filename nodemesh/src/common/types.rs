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

//! Defines common type aliases and small helpers used across `nodemesh`.
//!
//! Handler signatures, payload representation and id/timestamp generation live
//! here so the mesh and scheduler modules share one definition of each.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use mti::prelude::*;

use crate::message::{ActorMessage, MessageErrorEvent};

/// Opaque structured payload carried by every envelope.
///
/// A tagged union over null, booleans, numbers, strings, arrays and maps, so
/// embedders can send arbitrary shapes while the envelope stays typed.
pub type Payload = serde_json::Value;

/// Boxed future returned by actor handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<Payload>> + Send + 'static>>;

/// Type-erased actor handler: consumes one message and settles with a payload or an error.
pub type ActorHandler = Arc<dyn Fn(ActorMessage) -> HandlerFuture + Send + Sync + 'static>;

/// Observer invoked for every `message-error` event.
pub type MessageErrorCallback = Arc<dyn Fn(&MessageErrorEvent) + Send + Sync + 'static>;

/// Generates a unique, time-ordered id of the form `<prefix>_<uuid v7>`.
pub(crate) fn new_id(prefix: &str) -> String {
    prefix.create_type_id::<V7>().to_string()
}

/// Current wall-clock time in epoch milliseconds.
pub(crate) fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}
