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

use std::fs;
use std::sync::Arc;

use nodemesh::prelude::*;
use nodemesh_test::prelude::*;
use tempfile::TempDir;

use crate::setup::*;

mod setup;

/// Only test in this binary that touches `XDG_CONFIG_HOME`.
#[nodemesh_test]
async fn load_finds_the_xdg_config_file() -> anyhow::Result<()> {
    initialize_tracing();
    let temp_dir = TempDir::new()?;
    let config_dir = temp_dir.path().join("nodemesh");
    fs::create_dir_all(&config_dir)?;
    fs::write(
        config_dir.join("config.toml"),
        r#"
            [transport]
            endpoint = "memory://from-xdg"

            [timeouts]
            heartbeat_interval_ms = 200
            node_timeout_ms = 900
        "#,
    )?;
    std::env::set_var("XDG_CONFIG_HOME", temp_dir.path());

    let config = MeshConfig::load();
    assert_eq!(config.transport.endpoint, "memory://from-xdg");
    assert_eq!(config.timeouts.heartbeat_interval_ms, 200);
    assert_eq!(config.timeouts.node_timeout_ms, 900);
    assert_eq!(config.limits, LimitsConfig::default());

    // A mesh built from the loaded file runs with it.
    let bus = LocalBus::new("memory://from-xdg");
    let mesh = Mesh::new(config, Arc::new(bus.transport()))?;
    mesh.connect().await?;
    assert!(mesh.is_connected());
    mesh.disconnect().await?;

    std::env::remove_var("XDG_CONFIG_HOME");
    temp_dir.close()?;
    Ok(())
}

#[nodemesh_test]
async fn partial_files_fall_back_to_defaults() -> anyhow::Result<()> {
    initialize_tracing();
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("mesh.toml");
    fs::write(
        &path,
        r"
            [limits]
            mailbox_capacity = 16

            [behavior]
            deliver_own_broadcasts = false
        ",
    )?;

    let config = MeshConfig::load_from(&path)?;
    assert_eq!(config.limits.mailbox_capacity, 16);
    assert_eq!(config.limits.event_buffer, LimitsConfig::default().event_buffer);
    assert!(!config.behavior.deliver_own_broadcasts);
    assert_eq!(config.timeouts, TimeoutConfig::default());
    assert_eq!(config.transport, TransportConfig::default());
    assert!(config.validate().is_ok());
    Ok(())
}

#[nodemesh_test]
async fn malformed_or_missing_files_are_errors() -> anyhow::Result<()> {
    initialize_tracing();
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("broken.toml");
    fs::write(&path, "[timeouts\nheartbeat_interval_ms = ")?;

    assert!(matches!(
        MeshConfig::load_from(&path),
        Err(MeshError::InvalidConfig(_))
    ));
    assert!(matches!(
        MeshConfig::load_from(&temp_dir.path().join("absent.toml")),
        Err(MeshError::InvalidConfig(_))
    ));
    Ok(())
}

#[nodemesh_test]
async fn loaded_files_are_still_validated() -> anyhow::Result<()> {
    initialize_tracing();
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("too-tight.toml");
    fs::write(
        &path,
        r"
            [timeouts]
            heartbeat_interval_ms = 1000
            node_timeout_ms = 500
        ",
    )?;

    let config = MeshConfig::load_from(&path)?;
    let bus = test_bus("validated");
    assert!(matches!(
        Mesh::new(config, Arc::new(bus.transport())),
        Err(MeshError::InvalidConfig(_))
    ));
    Ok(())
}
