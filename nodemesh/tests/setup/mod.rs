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
#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, Once};
use std::time::Duration;

use nodemesh::prelude::*;
use serde_json::json;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// Ensures tracing initialization happens only once across all tests.
static INIT: Once = Once::new();

/// Initializes the global tracing subscriber for tests, writing to `logs/mesh_tests.txt`.
pub fn initialize_tracing() {
    INIT.call_once(|| {
        std::fs::create_dir_all("logs").expect("could not create logs dir");

        let file_appender = RollingFileAppender::new(Rotation::NEVER, "logs", "mesh_tests.txt");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Leak the guard so the non-blocking writer outlives every test.
        Box::leak(Box::new(guard));

        let filter = EnvFilter::new("trace")
            .add_directive("nodemesh::common::mesh=debug".parse().unwrap())
            .add_directive("nodemesh::common::scheduler=trace".parse().unwrap())
            .add_directive("nodemesh::actor::mailbox=trace".parse().unwrap())
            .add_directive("tokio=info".parse().unwrap());

        let subscriber = FmtSubscriber::builder()
            .with_span_events(FmtSpan::NONE)
            .with_max_level(Level::TRACE)
            .compact()
            .with_line_number(true)
            .without_time()
            .with_env_filter(filter)
            .with_writer(non_blocking)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .expect("setting default subscriber failed");
    });
}

/// Short timings so membership tests settle in well under a second.
pub fn test_config(endpoint: &str) -> MeshConfig {
    let mut config = MeshConfig::default();
    config.transport.endpoint = endpoint.to_string();
    config.timeouts.heartbeat_interval_ms = 50;
    config.timeouts.node_timeout_ms = 250;
    config.timeouts.reply_timeout_ms = 1_000;
    config.timeouts.shutdown_grace_ms = 1_000;
    config
}

/// A fresh bus whose endpoint is unique to `name`.
pub fn test_bus(name: &str) -> LocalBus {
    LocalBus::new(format!("memory://{name}"))
}

/// A mesh node on `bus`, already connected.
pub async fn connected_mesh(bus: &LocalBus) -> anyhow::Result<Mesh> {
    connected_mesh_with(bus, test_config(bus.endpoint())).await
}

/// A mesh node on `bus` built from `config`, already connected.
pub async fn connected_mesh_with(bus: &LocalBus, config: MeshConfig) -> anyhow::Result<Mesh> {
    let mesh = Mesh::new(config, Arc::new(bus.transport()))?;
    mesh.connect().await?;
    Ok(mesh)
}

/// Polls `condition` every 10 ms until it holds or `within` elapses.
pub async fn eventually<F>(within: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Awaits `future`, failing the test if it takes longer than `within`.
pub async fn within<T>(within: Duration, future: impl Future<Output = T>) -> anyhow::Result<T> {
    tokio::time::timeout(within, future)
        .await
        .map_err(|_| anyhow::anyhow!("timed out after {within:?}"))
}

/// Answers every message with `{"echo": <payload>}`.
pub fn echo_actor(id: &str) -> ActorDefinition {
    ActorDefinition::new(id, "echo", |message: ActorMessage| async move {
        Ok(json!({ "echo": message.payload }))
    })
}
