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

//! BlueZ RFCOMM transport.
//!
//! Both directions go through RFCOMM profiles registered under the mode's
//! service UUID. Listening registers a server profile, which publishes the
//! record over SDP on a channel BlueZ assigns. Dialing registers a client
//! profile and asks BlueZ to connect it, so the remote channel is resolved
//! from the peer's record.

use async_trait::async_trait;
use bluer::rfcomm::{Profile, ProfileHandle, Role, Stream};
use bluer::{Adapter, AdapterEvent, AdapterProperty, Address, Session};
use futures::StreamExt;
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::transport::{
    Acceptor, DiscoveryStream, PeerAddress, PeerDirectory, PeerIdentity, SecurityMode, Transport,
};

fn io_err<E>(e: E) -> io::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    io::Error::new(io::ErrorKind::Other, e)
}

fn profile(mode: SecurityMode, role: Role) -> Profile {
    Profile {
        uuid: mode.service_uuid(),
        name: Some(mode.service_name().to_string()),
        role: Some(role),
        require_authentication: Some(mode == SecurityMode::Secure),
        require_authorization: Some(false),
        auto_connect: Some(false),
        ..Default::default()
    }
}

async fn identity(adapter: &Adapter, address: Address) -> PeerIdentity {
    let name = match adapter.device(address) {
        Ok(device) => device.name().await.ok().flatten(),
        Err(_) => None,
    };
    PeerIdentity::new(PeerAddress::new(address.0), name)
}

/// The default BlueZ adapter.
pub struct BluezRadio {
    session: Session,
    adapter: Adapter,
    powered: Arc<AtomicBool>,
    power_watch: JoinHandle<()>,
    discovery: Mutex<Option<JoinHandle<()>>>,
}

impl BluezRadio {
    /// Open a BlueZ session on the default adapter and advertise `name`.
    pub async fn new(name: &str) -> bluer::Result<Self> {
        info!("Initializing Bluetooth adapter...");

        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        if !adapter.is_powered().await? {
            info!("Powering on Bluetooth adapter...");
            adapter.set_powered(true).await?;
        }
        adapter.set_alias(name.to_string()).await?;
        adapter.set_discoverable(true).await?;
        adapter.set_pairable(true).await?;
        info!("Adapter {} is discoverable as '{}'", adapter.address().await?, name);

        let powered = Arc::new(AtomicBool::new(adapter.is_powered().await?));
        let events = adapter.events().await?;
        let power_watch = {
            let powered = powered.clone();
            tokio::spawn(async move {
                futures::pin_mut!(events);
                while let Some(event) = events.next().await {
                    if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(on)) = event {
                        if on {
                            info!("Bluetooth adapter powered on");
                        } else {
                            warn!("Bluetooth adapter powered off");
                        }
                        powered.store(on, Ordering::Relaxed);
                    }
                }
            })
        };

        Ok(Self {
            session,
            adapter,
            powered,
            power_watch,
            discovery: Mutex::new(None),
        })
    }
}

impl Drop for BluezRadio {
    fn drop(&mut self) {
        self.power_watch.abort();
        if let Some(task) = self.discovery.lock().take() {
            task.abort();
        }
    }
}

#[async_trait]
impl Transport for BluezRadio {
    type Channel = Stream;
    type Acceptor = BluezAcceptor;

    fn is_enabled(&self) -> bool {
        self.powered.load(Ordering::Relaxed)
    }

    async fn listen(&self, mode: SecurityMode) -> io::Result<BluezAcceptor> {
        let handle = self
            .session
            .register_profile(profile(mode, Role::Server))
            .await
            .map_err(io_err)?;
        info!(
            "RFCOMM {} service '{}' ({}) registered",
            mode,
            mode.service_name(),
            mode.service_uuid()
        );

        Ok(BluezAcceptor {
            adapter: self.adapter.clone(),
            handle,
        })
    }

    async fn dial(&self, peer: &PeerIdentity, mode: SecurityMode) -> io::Result<Stream> {
        let uuid = mode.service_uuid();
        let address = Address::new(peer.address.0);
        let device = self.adapter.device(address).map_err(io_err)?;

        // Unregistered again when the handle drops; the stream stays open.
        let mut handle = self
            .session
            .register_profile(profile(mode, Role::Client))
            .await
            .map_err(io_err)?;

        debug!("Connecting to {} service {} on {}", mode, uuid, peer);
        let connect = device.connect_profile(&uuid);
        tokio::pin!(connect);
        let mut connected = false;

        loop {
            tokio::select! {
                result = &mut connect, if !connected => {
                    result.map_err(io_err)?;
                    connected = true;
                }
                request = handle.next() => {
                    let request = request.ok_or_else(|| {
                        io::Error::new(io::ErrorKind::BrokenPipe, "profile unregistered")
                    })?;
                    if request.device() != address {
                        // Dropping the request rejects it.
                        warn!("Ignoring {} connection from {}", mode, request.device());
                        continue;
                    }
                    return request.accept().map_err(io_err);
                }
            }
        }
    }
}

#[async_trait]
impl PeerDirectory for BluezRadio {
    async fn bonded_peers(&self) -> io::Result<Vec<PeerIdentity>> {
        let mut peers = Vec::new();
        for address in self.adapter.device_addresses().await.map_err(io_err)? {
            let device = self.adapter.device(address).map_err(io_err)?;
            if device.is_paired().await.map_err(io_err)? {
                peers.push(identity(&self.adapter, address).await);
            }
        }
        Ok(peers)
    }

    async fn start_discovery(&self) -> io::Result<DiscoveryStream> {
        let events = self.adapter.discover_devices().await.map_err(io_err)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let adapter = self.adapter.clone();

        let task = tokio::spawn(async move {
            futures::pin_mut!(events);
            while let Some(event) = events.next().await {
                if let AdapterEvent::DeviceAdded(address) = event {
                    if tx.send(identity(&adapter, address).await).is_err() {
                        break;
                    }
                }
            }
        });
        if let Some(previous) = self.discovery.lock().replace(task) {
            previous.abort();
        }

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|peer| (peer, rx))
        });
        Ok(stream.boxed())
    }

    fn is_discovering(&self) -> bool {
        self.discovery
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    fn stop_discovery(&self) {
        // Dropping the event stream ends the BlueZ discovery session.
        if let Some(task) = self.discovery.lock().take() {
            task.abort();
        }
    }
}

/// Registered RFCOMM profile. Dropping it unregisters the service record.
pub struct BluezAcceptor {
    adapter: Adapter,
    handle: ProfileHandle,
}

#[async_trait]
impl Acceptor for BluezAcceptor {
    type Channel = Stream;

    async fn accept(&mut self) -> io::Result<(Stream, PeerIdentity)> {
        let request = self
            .handle
            .next()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "profile unregistered"))?;

        let address = request.device();
        let stream = request.accept().map_err(io_err)?;
        Ok((stream, identity(&self.adapter, address).await))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::constants::{INSECURE_SERVICE_UUID, SECURE_SERVICE_UUID};

    #[test]
    fn test_client_profile_resolves_by_uuid() {
        let secure = profile(SecurityMode::Secure, Role::Client);
        assert_eq!(secure.uuid, SECURE_SERVICE_UUID);
        assert_eq!(secure.require_authentication, Some(true));
        // No fixed channel: the peer's record decides.
        assert_eq!(secure.channel, None);

        let insecure = profile(SecurityMode::Insecure, Role::Client);
        assert_eq!(insecure.uuid, INSECURE_SERVICE_UUID);
        assert_eq!(insecure.require_authentication, Some(false));
        assert_eq!(insecure.channel, None);
    }

    #[test]
    fn test_server_profile_publishes_record_name() {
        let server = profile(SecurityMode::Secure, Role::Server);
        assert!(matches!(server.role, Some(Role::Server)));
        assert_eq!(server.name.as_deref(), Some("BluetoothChatSecure"));
        assert_eq!(server.auto_connect, Some(false));
    }
}
