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

//! Notification processing on the caller side.

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::bluetooth::{ConnectionState, Notification, Notifications, ToastKind};
use crate::state::AppState;

/// Consumes link notifications, mirrors them into [`AppState`] and
/// optionally echoes each one as a JSON line.
pub struct EventProcessor {
    state: Arc<AppState>,
    echo_json: bool,
}

impl EventProcessor {
    /// Create a new event processor.
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            echo_json: false,
        }
    }

    /// Print every notification to stdout as JSON.
    pub fn with_json_echo(mut self, enabled: bool) -> Self {
        self.echo_json = enabled;
        self
    }

    /// Process a single notification.
    pub fn process(&mut self, notification: &Notification) -> Result<()> {
        match notification {
            Notification::StateChanged { state } => {
                info!("Link state: {}", state.as_str());
                self.state.set_state(*state);
            }
            Notification::PeerConnected { name, address } => {
                info!("Connected to {} ({})", name, address);
                self.state.set_connected(name.clone(), *address);
            }
            Notification::MessageReceived { payload } => {
                info!(
                    "Message received: {} bytes: {}",
                    payload.len(),
                    String::from_utf8_lossy(payload)
                );
                self.state.set_last_message(payload.clone());
            }
            Notification::MessageSent { payload } => {
                debug!("Message sent: {} bytes", payload.len());
            }
            Notification::Toast { text, kind } => match kind {
                ToastKind::Error => {
                    error!("{}", text);
                    self.state.set_error(text.clone());
                }
                ToastKind::Info => info!("{}", text),
            },
            Notification::DiscoveryStarted => {
                info!("Discovery started");
                self.state.clear_discovered();
            }
            Notification::PeerFound { peer } => {
                info!("Found {}", peer);
                self.state.add_discovered(peer.clone());
            }
            Notification::DiscoveryFinished => {
                info!(
                    "Discovery finished, {} peers seen",
                    self.state.get_discovered().len()
                );
            }
        }

        if self.echo_json {
            println!("{}", Self::render_json(notification)?);
        }
        Ok(())
    }

    /// Serialize one notification as a single JSON line.
    pub fn render_json(notification: &Notification) -> Result<String> {
        Ok(serde_json::to_string(notification)?)
    }

    /// Process notifications until the stream closes.
    pub async fn run(mut self, notifications: Notifications) {
        while let Ok(notification) = notifications.recv().await {
            if let Err(e) = self.process(&notification) {
                error!("Error processing notification: {}", e);
            }
        }
        debug!(
            "Notification stream closed in state {}",
            self.state.get_state().as_str()
        );
    }

    pub fn is_connected(&self) -> bool {
        self.state.get_state() == ConnectionState::Connected
    }
}
