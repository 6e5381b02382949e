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

//! In-process radio medium.
//!
//! Nodes registered on one [`MemoryMedium`] can bond, discover each other,
//! publish service records and open duplex channels, with the same failure
//! modes a real adapter reports: disabled radio, unknown peer, missing
//! service record and unauthenticated secure dials.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::sync::Arc;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::transport::{
    Acceptor, DiscoveryStream, PeerAddress, PeerDirectory, PeerIdentity, SecurityMode, Transport,
};

/// Per-direction buffer of a simulated channel.
const CHANNEL_BUFFER: usize = 4096;

type Incoming = (DuplexStream, PeerIdentity);

struct Service {
    id: u64,
    tx: mpsc::UnboundedSender<Incoming>,
}

struct Node {
    name: String,
    enabled: bool,
    bonded: HashSet<PeerAddress>,
    services: HashMap<SecurityMode, Service>,
    discovery: Option<mpsc::UnboundedSender<PeerIdentity>>,
}

impl Node {
    fn identity(&self, address: PeerAddress) -> PeerIdentity {
        PeerIdentity::new(address, Some(self.name.clone()))
    }
}

#[derive(Default)]
struct MediumState {
    nodes: BTreeMap<PeerAddress, Node>,
    next_id: u64,
}

impl MediumState {
    fn node(&self, address: PeerAddress) -> io::Result<&Node> {
        self.nodes
            .get(&address)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no device {address}")))
    }

    fn node_mut(&mut self, address: PeerAddress) -> io::Result<&mut Node> {
        self.nodes
            .get_mut(&address)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no device {address}")))
    }

    /// Tell every node with a running discovery about `address`.
    fn announce(&mut self, address: PeerAddress) {
        let Some(identity) = self.nodes.get(&address).map(|n| n.identity(address)) else {
            return;
        };
        for (other, node) in self.nodes.iter_mut() {
            if *other == address {
                continue;
            }
            if let Some(tx) = &node.discovery {
                if tx.send(identity.clone()).is_err() {
                    node.discovery = None;
                }
            }
        }
    }
}

fn disabled() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "adapter is powered off")
}

/// Shared simulated radio space.
#[derive(Clone, Default)]
pub struct MemoryMedium {
    state: Arc<Mutex<MediumState>>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new powered-on node and return its radio.
    pub fn add_node(&self, name: impl Into<String>) -> Arc<MemoryRadio> {
        let name = name.into();
        let mut state = self.state.lock();

        let index = state.nodes.len() as u16 + 1;
        let [hi, lo] = index.to_be_bytes();
        // Locally administered unicast prefix.
        let address = PeerAddress::new([0x02, 0x00, 0x00, 0x00, hi, lo]);

        info!("Simulated radio {} registered as {}", name, address);
        state.nodes.insert(
            address,
            Node {
                name,
                enabled: true,
                bonded: HashSet::new(),
                services: HashMap::new(),
                discovery: None,
            },
        );
        state.announce(address);

        Arc::new(MemoryRadio {
            medium: self.clone(),
            address,
        })
    }

    /// Bond two nodes with each other.
    pub fn bond(&self, a: PeerAddress, b: PeerAddress) -> io::Result<()> {
        let mut state = self.state.lock();
        state.node(b)?;
        state.node_mut(a)?.bonded.insert(b);
        state.node_mut(b)?.bonded.insert(a);
        Ok(())
    }
}

/// One node on a [`MemoryMedium`].
pub struct MemoryRadio {
    medium: MemoryMedium,
    address: PeerAddress,
}

impl MemoryRadio {
    pub fn address(&self) -> PeerAddress {
        self.address
    }

    /// Identity other nodes see for this radio.
    pub fn identity(&self) -> PeerIdentity {
        let state = self.medium.state.lock();
        state
            .nodes
            .get(&self.address)
            .map(|node| node.identity(self.address))
            .unwrap_or_else(|| PeerIdentity::new(self.address, None))
    }

    /// Power the radio on or off. Powering off unbinds every service record,
    /// which fails pending accepts, and ends any running discovery.
    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.medium.state.lock();
        let Some(node) = state.nodes.get_mut(&self.address) else {
            return;
        };
        node.enabled = enabled;
        if !enabled {
            node.services.clear();
            node.discovery = None;
        }
        if enabled {
            state.announce(self.address);
        }
    }

    /// Whether a service record is currently bound for `mode`.
    pub fn has_service(&self, mode: SecurityMode) -> bool {
        let state = self.medium.state.lock();
        state
            .nodes
            .get(&self.address)
            .and_then(|node| node.services.get(&mode))
            .is_some_and(|service| !service.tx.is_closed())
    }
}

#[async_trait]
impl Transport for MemoryRadio {
    type Channel = DuplexStream;
    type Acceptor = MemoryAcceptor;

    fn is_enabled(&self) -> bool {
        let state = self.medium.state.lock();
        state.nodes.get(&self.address).is_some_and(|n| n.enabled)
    }

    async fn listen(&self, mode: SecurityMode) -> io::Result<MemoryAcceptor> {
        let mut state = self.medium.state.lock();
        state.next_id += 1;
        let id = state.next_id;

        let node = state.node_mut(self.address)?;
        if !node.enabled {
            return Err(disabled());
        }
        if node.services.get(&mode).is_some_and(|s| !s.tx.is_closed()) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{} already registered", mode.service_name()),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        node.services.insert(mode, Service { id, tx });
        debug!("{}: bound {} ({})", self.address, mode.service_name(), mode.service_uuid());

        Ok(MemoryAcceptor {
            medium: self.medium.clone(),
            address: self.address,
            mode,
            id,
            rx,
        })
    }

    async fn dial(&self, peer: &PeerIdentity, mode: SecurityMode) -> io::Result<DuplexStream> {
        let (tx, local_identity) = {
            let state = self.medium.state.lock();

            let local = state.node(self.address)?;
            if !local.enabled {
                return Err(disabled());
            }
            let local_identity = local.identity(self.address);

            let remote = state.node(peer.address)?;
            if !remote.enabled {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "host is down"));
            }
            if mode == SecurityMode::Secure && !local.bonded.contains(&peer.address) {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "authentication failed",
                ));
            }
            let service = remote.services.get(&mode).ok_or_else(|| {
                io::Error::new(io::ErrorKind::ConnectionRefused, "service discovery failed")
            })?;

            (service.tx.clone(), local_identity)
        };

        let (local_end, remote_end) = tokio::io::duplex(CHANNEL_BUFFER);
        tx.send((remote_end, local_identity)).map_err(|_| {
            io::Error::new(io::ErrorKind::ConnectionRefused, "service discovery failed")
        })?;

        debug!("{}: dialed {} ({})", self.address, peer, mode);
        Ok(local_end)
    }
}

#[async_trait]
impl PeerDirectory for MemoryRadio {
    async fn bonded_peers(&self) -> io::Result<Vec<PeerIdentity>> {
        let state = self.medium.state.lock();
        let node = state.node(self.address)?;
        if !node.enabled {
            return Err(disabled());
        }

        let mut peers: Vec<PeerIdentity> = node
            .bonded
            .iter()
            .filter_map(|addr| state.nodes.get(addr).map(|n| n.identity(*addr)))
            .collect();
        peers.sort_by_key(|p| p.address);
        Ok(peers)
    }

    async fn start_discovery(&self) -> io::Result<DiscoveryStream> {
        let mut state = self.medium.state.lock();
        let (tx, rx) = mpsc::unbounded_channel();

        for (address, node) in state.nodes.iter() {
            if *address != self.address && node.enabled {
                // The receiver is still held here, so this cannot fail.
                let _ = tx.send(node.identity(*address));
            }
        }

        let node = state.node_mut(self.address)?;
        if !node.enabled {
            return Err(disabled());
        }
        node.discovery = Some(tx);

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|peer| (peer, rx))
        });
        Ok(stream.boxed())
    }

    fn is_discovering(&self) -> bool {
        let state = self.medium.state.lock();
        state
            .nodes
            .get(&self.address)
            .and_then(|node| node.discovery.as_ref())
            .is_some_and(|tx| !tx.is_closed())
    }

    fn stop_discovery(&self) {
        let mut state = self.medium.state.lock();
        if let Some(node) = state.nodes.get_mut(&self.address) {
            if node.discovery.take().is_some() {
                debug!("{}: discovery stopped", self.address);
            }
        }
    }
}

/// Listening endpoint on a [`MemoryRadio`]. Dropping it unbinds the record.
pub struct MemoryAcceptor {
    medium: MemoryMedium,
    address: PeerAddress,
    mode: SecurityMode,
    id: u64,
    rx: mpsc::UnboundedReceiver<Incoming>,
}

#[async_trait]
impl Acceptor for MemoryAcceptor {
    type Channel = DuplexStream;

    async fn accept(&mut self) -> io::Result<(DuplexStream, PeerIdentity)> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "service record unbound"))
    }
}

impl Drop for MemoryAcceptor {
    fn drop(&mut self) {
        let mut state = self.medium.state.lock();
        if let Some(node) = state.nodes.get_mut(&self.address) {
            if node.services.get(&self.mode).is_some_and(|s| s.id == self.id) {
                node.services.remove(&self.mode);
                debug!("{}: unbound {}", self.address, self.mode.service_name());
            }
        }
    }
}
