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

#![forbid(unsafe_code)]
#![forbid(missing_docs)]

//! # Nodemesh
//!
//! A lightweight cluster fabric: nodes discover each other by heartbeat over a
//! publish/subscribe transport, and each node can host actors that exchange
//! messages with actors anywhere on the mesh.
//!
//! ## Key Concepts
//!
//! - **Mesh (`Mesh`)**: one node's membership and routing layer. It announces
//!   itself periodically on `mesh.heartbeat`, tracks the peers it hears from,
//!   and evicts peers that go quiet for longer than the node timeout.
//! - **Scheduler (`ActorScheduler`)**: hosts actors. Every actor has a bounded
//!   mailbox and handles one message at a time; different actors run
//!   concurrently.
//! - **Messaging**: `MeshMessage` is the JSON wire envelope. Actors are
//!   addressed on `mesh.actor.<id>`, broadcasts travel on `mesh.broadcast`, and
//!   request/reply is correlated through a per-node reply inbox.
//! - **Transports (`Transport`)**: the pluggable substrate. `LocalBus` provides an
//!   in-process implementation for single-process deployments and tests.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use nodemesh::prelude::*;
//! use serde_json::json;
//!
//! let bus = LocalBus::new("memory://demo");
//! let mut config = MeshConfig::default();
//! config.transport.endpoint = bus.endpoint().to_string();
//!
//! let mesh = Mesh::new(config, Arc::new(bus.transport()))?;
//! mesh.connect().await?;
//!
//! let scheduler = ActorScheduler::new(&mesh);
//! scheduler
//!     .register_actor(ActorDefinition::new("echo-actor", "echo", |m: ActorMessage| async move {
//!         Ok(json!({ "echo": m.payload }))
//!     }))
//!     .await?;
//!
//! let reply = scheduler
//!     .request("echo-actor", "test", json!({"message": "hello"}), Duration::from_secs(5))
//!     .await?;
//!
//! scheduler.shutdown().await?;
//! mesh.disconnect().await?;
//! ```

/// Mesh, scheduler, configuration and transports.
pub(crate) mod common;

/// Actor definitions and per-actor state.
pub(crate) mod actor;

/// The wire envelope, subjects and error types.
pub(crate) mod message;

/// The transport abstraction.
pub(crate) mod traits;

/// Subject names and address helpers shared by every node.
pub mod subjects {
    pub use crate::message::subjects::*;
}

/// A prelude module for conveniently importing the most commonly used items.
///
/// # Re-exports
///
/// ## External Crates
/// *   [`async_trait::async_trait`]: needed to implement [`Transport`](crate::traits::Transport).
///
/// ## Core Types
/// *   [`crate::common::Mesh`] and [`crate::common::MembershipEvent`]
/// *   [`crate::common::ActorScheduler`] and [`crate::common::ReplyWaiter`]
/// *   [`crate::actor::ActorDefinition`], [`crate::actor::ActorInstance`], [`crate::actor::ActorState`]
/// *   [`crate::message::MeshMessage`] / [`crate::message::ActorMessage`], [`crate::message::SendOptions`]
/// *   [`crate::message::MessageErrorEvent`], [`crate::message::MeshError`], [`crate::message::SchedulerError`]
/// *   [`crate::common::MeshConfig`] and its sections
/// *   [`crate::common::LocalBus`], [`crate::common::LocalTransport`], [`crate::traits::Transport`]
pub mod prelude {
    pub use async_trait::async_trait;

    pub use crate::actor::{ActorDefinition, ActorInstance, ActorState};
    pub use crate::common::{
        ActorHandler, ActorScheduler, BehaviorConfig, HandlerFuture, LimitsConfig, LocalBus,
        LocalTransport, MembershipEvent, Mesh, MeshConfig, MeshMetrics, MessageErrorCallback,
        NodeRecord, Payload, ReplyWaiter, SchedulerMetrics, TimeoutConfig, TransportConfig,
    };
    pub use crate::message::{
        ActorMessage, MeshError, MeshMessage, MessageErrorEvent, SchedulerError, SendOptions,
    };
    pub use crate::traits::{Subscription, Transport};
}
