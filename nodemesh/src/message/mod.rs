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

//! Wire envelope, subject scheme, error types and handler-facing events.

pub use errors::{MeshError, SchedulerError};
pub use mesh_message::{ActorMessage, MeshMessage};
pub use message_error::MessageErrorEvent;
pub use send_options::SendOptions;

/// Error taxonomy for the mesh and scheduler.
mod errors;
/// The `MeshMessage` wire envelope and its codec.
mod mesh_message;
/// The `message-error` event.
mod message_error;
/// Options accepted by `send_message`.
mod send_options;
/// Subject names and address helpers.
pub mod subjects;
