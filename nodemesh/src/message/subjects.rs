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

//! Subject naming shared by every node on the mesh.
//!
//! These names are part of the wire contract: nodes built from other
//! implementations must agree on them to interoperate.

/// Subject every node publishes its heartbeat on and listens to for peers.
pub const HEARTBEAT_SUBJECT: &str = "mesh.heartbeat";

/// Subject for fan-out messages delivered to every actor on every node.
pub const BROADCAST_SUBJECT: &str = "mesh.broadcast";

/// Prefix of per-actor subjects; the actor id follows it verbatim.
pub const ACTOR_SUBJECT_PREFIX: &str = "mesh.actor.";

/// `type` of heartbeat envelopes.
pub const HEARTBEAT_TYPE: &str = "heartbeat";

/// `type` of reply envelopes produced by the scheduler.
pub const REPLY_TYPE: &str = "reply";

/// Returns the subject messages for `actor_id` are published on.
#[must_use]
pub fn actor_subject(actor_id: &str) -> String {
    format!("{ACTOR_SUBJECT_PREFIX}{actor_id}")
}

/// Returns the reply address a node's scheduler listens on.
#[must_use]
pub fn reply_inbox(node_id: &str) -> String {
    format!("_reply.{node_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_subjects_are_derived_from_the_id() {
        assert_eq!(actor_subject("echo-actor"), "mesh.actor.echo-actor");
        assert_eq!(
            actor_subject(&reply_inbox("node_1")),
            "mesh.actor._reply.node_1"
        );
    }
}
