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

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::message::MeshError;

/// Configuration shared by a [`Mesh`](crate::prelude::Mesh) and the schedulers built on it.
///
/// Loaded from TOML in XDG-compliant directories, or built in code. Every
/// section falls back to its defaults when omitted:
///
/// ```toml
/// [transport]
/// endpoint = "nats://127.0.0.1:4222"
///
/// [timeouts]
/// heartbeat_interval_ms = 1000
/// node_timeout_ms = 5000
/// reply_timeout_ms = 30000
/// shutdown_grace_ms = 10000
///
/// [limits]
/// mailbox_capacity = 255
/// event_buffer = 256
///
/// [behavior]
/// deliver_own_broadcasts = true
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MeshConfig {
    /// Transport endpoint configuration.
    pub transport: TransportConfig,
    /// Timer and timeout configuration.
    pub timeouts: TimeoutConfig,
    /// Capacity configuration.
    pub limits: LimitsConfig,
    /// Behavioral switches.
    pub behavior: BehaviorConfig,
}

/// Where the transport connects to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TransportConfig {
    /// Broker endpoint handed to [`Transport::connect`](crate::traits::Transport::connect).
    pub endpoint: String,
}

/// Timer-related configuration values, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// How often a node announces itself on the heartbeat subject.
    pub heartbeat_interval_ms: u64,
    /// How long a peer may stay silent before it is considered gone.
    /// Must exceed `heartbeat_interval_ms`.
    pub node_timeout_ms: u64,
    /// Reply deadline used by `request` when the caller gives none.
    pub reply_timeout_ms: u64,
    /// How long scheduler shutdown waits for in-flight handlers.
    pub shutdown_grace_ms: u64,
}

/// Capacity configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Bounded capacity of each actor's mailbox.
    pub mailbox_capacity: usize,
    /// Capacity of the error and membership event channels.
    pub event_buffer: usize,
}

/// Behavioral configuration switches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Whether a node's own broadcasts reach its local actors.
    pub deliver_own_broadcasts: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "nats://127.0.0.1:4222".to_string(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 1_000,
            node_timeout_ms: 5_000,
            reply_timeout_ms: 30_000,
            shutdown_grace_ms: 10_000,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 255,
            event_buffer: 256,
        }
    }
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            deliver_own_broadcasts: true,
        }
    }
}

impl MeshConfig {
    /// Heartbeat period as a `Duration`.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.timeouts.heartbeat_interval_ms)
    }

    /// Peer liveness window as a `Duration`.
    #[must_use]
    pub const fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.node_timeout_ms)
    }

    /// Default reply deadline as a `Duration`.
    #[must_use]
    pub const fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.reply_timeout_ms)
    }

    /// Scheduler shutdown grace period as a `Duration`.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.timeouts.shutdown_grace_ms)
    }

    /// Period of the stale-peer sweep: twice per liveness window.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        (self.node_timeout() / 2).max(Duration::from_millis(1))
    }

    /// Checks the invariants the mesh relies on.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::InvalidConfig`] if the heartbeat interval is zero,
    /// if `node_timeout_ms` does not exceed it, or if a capacity is zero.
    pub fn validate(&self) -> Result<(), MeshError> {
        let timeouts = &self.timeouts;
        if timeouts.heartbeat_interval_ms == 0 {
            return Err(MeshError::InvalidConfig(
                "heartbeat_interval_ms must be greater than zero".into(),
            ));
        }
        if timeouts.node_timeout_ms <= timeouts.heartbeat_interval_ms {
            return Err(MeshError::InvalidConfig(format!(
                "node_timeout_ms ({}) must exceed heartbeat_interval_ms ({})",
                timeouts.node_timeout_ms, timeouts.heartbeat_interval_ms
            )));
        }
        if self.limits.mailbox_capacity == 0 || self.limits.event_buffer == 0 {
            return Err(MeshError::InvalidConfig(
                "mailbox_capacity and event_buffer must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Loads configuration from XDG-compliant locations.
    ///
    /// Looks for `nodemesh/config.toml` under `$XDG_CONFIG_HOME` (then the
    /// XDG fallbacks). If no file is found, or the file is unreadable or
    /// malformed, logs the problem and returns the defaults.
    #[must_use]
    pub fn load() -> Self {
        let xdg_dirs = match xdg::BaseDirectories::with_prefix("nodemesh") {
            Ok(dirs) => dirs,
            Err(e) => {
                error!("Failed to initialize XDG directories: {}", e);
                return Self::default();
            }
        };

        match xdg_dirs.find_config_file("config.toml") {
            Some(path) => Self::load_from(&path).unwrap_or_else(|e| {
                error!("{}; using default configuration", e);
                Self::default()
            }),
            None => {
                info!("No configuration file found, using defaults");
                Self::default()
            }
        }
    }

    /// Loads configuration from an explicit TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::InvalidConfig`] if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self, MeshError> {
        info!("Loading configuration from: {}", path.display());
        let contents = std::fs::read_to_string(path).map_err(|e| {
            MeshError::InvalidConfig(format!(
                "failed to read configuration file {}: {e}",
                path.display()
            ))
        })?;
        toml::from_str::<Self>(&contents).map_err(|e| {
            MeshError::InvalidConfig(format!(
                "failed to parse configuration file {}: {e}",
                path.display()
            ))
        })
    }
}
