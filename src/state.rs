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

//! Caller-side view of the link, rebuilt from notifications.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::bluetooth::{ConnectionState, PeerAddress, PeerIdentity};

/// Shared application state.
#[derive(Debug)]
pub struct AppState {
    /// Last reported connection state.
    pub connection_state: RwLock<ConnectionState>,

    /// Name and address of the connected peer.
    pub connected_peer: RwLock<Option<(String, PeerAddress)>>,

    /// Last received message.
    pub last_message: RwLock<Option<Vec<u8>>>,

    /// Last error toast.
    pub last_error: RwLock<Option<String>>,

    /// Peers seen during the current discovery.
    pub discovered: RwLock<Vec<PeerIdentity>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            connection_state: RwLock::new(ConnectionState::Idle),
            connected_peer: RwLock::new(None),
            last_message: RwLock::new(None),
            last_error: RwLock::new(None),
            discovered: RwLock::new(Vec::new()),
        }
    }
}

impl AppState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.connection_state.write() = state;
        if state != ConnectionState::Connected {
            *self.connected_peer.write() = None;
        }
    }

    pub fn get_state(&self) -> ConnectionState {
        *self.connection_state.read()
    }

    pub fn set_connected(&self, name: String, address: PeerAddress) {
        *self.connected_peer.write() = Some((name, address));
    }

    pub fn get_connected_peer(&self) -> Option<(String, PeerAddress)> {
        self.connected_peer.read().clone()
    }

    pub fn set_last_message(&self, payload: Vec<u8>) {
        *self.last_message.write() = Some(payload);
    }

    pub fn get_last_message(&self) -> Option<Vec<u8>> {
        self.last_message.read().clone()
    }

    pub fn set_error(&self, text: String) {
        *self.last_error.write() = Some(text);
    }

    pub fn get_last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub fn clear_discovered(&self) {
        self.discovered.write().clear();
    }

    /// Record a discovered peer, ignoring repeats of the same address.
    pub fn add_discovered(&self, peer: PeerIdentity) {
        let mut discovered = self.discovered.write();
        if !discovered.iter().any(|p| p.address == peer.address) {
            discovered.push(peer);
        }
    }

    pub fn get_discovered(&self) -> Vec<PeerIdentity> {
        self.discovered.read().clone()
    }
}
