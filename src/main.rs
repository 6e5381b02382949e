// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! btlink daemon

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use btlink::bluetooth::{frame_message, LinkService, MemoryMedium, Radio, SecurityMode};
use btlink::config::{Backend, Config};
use btlink::events::EventProcessor;
use btlink::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("btlink=info".parse().context("invalid log directive")?),
        )
        .init();

    info!("Starting btlink v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded from {}", Config::default_path().display());

    match config.transport.backend {
        Backend::Memory => run_memory_demo(config).await,
        Backend::Bluez => run_bluez(config).await,
    }
}

/// Two simulated radios on one medium: the local one listens, a bonded
/// demo peer dials in and says hello.
async fn run_memory_demo(config: Config) -> Result<()> {
    let medium = MemoryMedium::new();
    let local = medium.add_node(config.link.device_name.clone());
    let demo = medium.add_node("Firefly demo");
    medium.bond(local.address(), demo.address())?;
    info!("Memory backend: local {} demo {}", local.identity(), demo.identity());

    let (demo_service, demo_notifications) = LinkService::new(demo.clone(), config.link_options());
    tokio::spawn(async move {
        // Drain so the demo side does not buffer without bound.
        while demo_notifications.recv().await.is_ok() {}
    });

    let target = local.identity();
    let mode = config.link.default_security;
    let local_radio = local.clone();
    let demo_task = tokio::spawn(async move {
        while !local_radio.has_service(mode) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        demo_service.connect(target, mode);
        while !demo_service.is_connection_open() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        demo_service.send(&frame_message(b"hello from the demo peer")).await;
        demo_service
    });

    run(local, config, Some(demo_task)).await
}

#[cfg(feature = "bluez")]
async fn run_bluez(config: Config) -> Result<()> {
    let radio = btlink::bluetooth::BluezRadio::new(&config.link.device_name)
        .await
        .context("failed to open Bluetooth adapter")?;
    info!("BlueZ adapter ready as '{}'", config.link.device_name);
    run(Arc::new(radio), config, None::<tokio::task::JoinHandle<()>>).await
}

#[cfg(not(feature = "bluez"))]
async fn run_bluez(_config: Config) -> Result<()> {
    anyhow::bail!("btlink was built without the `bluez` feature")
}

/// Listen, mirror notifications to stdout and send each stdin line as one
/// framed message until Ctrl+C.
async fn run<R, T>(
    radio: Arc<R>,
    config: Config,
    companion: Option<tokio::task::JoinHandle<T>>,
) -> Result<()>
where
    R: Radio,
    T: Send + 'static,
{
    let state = AppState::new();
    let (service, notifications) = LinkService::new(radio, config.link_options());

    let processor = EventProcessor::new(state.clone()).with_json_echo(true);
    let events = tokio::spawn(processor.run(notifications));

    service.start_listening();

    let paired = service.paired_peers_matching(&config.link.peer_filter).await;
    for peer in &paired {
        info!("Paired peer: {}", peer);
    }
    if paired.is_empty() {
        warn!("No paired peers match '{}'", config.link.peer_filter);
    }

    info!("Ready. Type a line to send it, Ctrl+C to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => handle_line(&service, &config, &line).await,
                Ok(None) => {
                    // stdin closed; keep serving until Ctrl+C
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Shutting down...");
                    }
                    break;
                }
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    }

    service.stop();
    if let Some(companion) = companion {
        companion.abort();
    }
    drop(service);
    if tokio::time::timeout(Duration::from_secs(1), events).await.is_err() {
        warn!("Notification stream did not close in time");
    }
    Ok(())
}

async fn handle_line<R: Radio>(service: &LinkService<R>, config: &Config, line: &str) {
    let line = line.trim_end();
    match line.split_once(' ') {
        Some(("/connect", target)) => {
            let peers = service.paired_peers_matching(target).await;
            match peers.into_iter().next() {
                Some(peer) => service.connect(peer, config.link.default_security),
                None => warn!("No paired peer matches '{}'", target),
            }
        }
        Some(("/insecure", target)) => {
            let peers = service.paired_peers_matching(target).await;
            match peers.into_iter().next() {
                Some(peer) => service.connect(peer, SecurityMode::Insecure),
                None => warn!("No paired peer matches '{}'", target),
            }
        }
        _ => match line {
            "/listen" => service.start_listening(),
            "/stop" => service.stop(),
            "/scan" => {
                service.start_discovery().await;
            }
            _ => {
                if !service.send(&frame_message(line.as_bytes())).await {
                    warn!("Not sent: no open connection");
                }
            }
        },
    }
}
