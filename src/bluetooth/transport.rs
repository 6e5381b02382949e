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

//! Transport abstraction: peer identities, security modes and the
//! platform traits the connection manager runs on.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Serialize, Serializer};
use std::fmt;
use std::io;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use super::constants::{
    INSECURE_SERVICE_NAME, INSECURE_SERVICE_UUID, SECURE_SERVICE_NAME, SECURE_SERVICE_UUID,
};

/// 48-bit radio address, printed as `AA:BB:CC:DD:EE:FF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddress(pub [u8; 6]);

impl PeerAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for PeerAddress {
    type Err = io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || io::Error::new(io::ErrorKind::InvalidInput, format!("invalid address: {s}"));

        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(bytes))
    }
}

impl Serialize for PeerAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A remote device: stable address plus optional human-readable name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PeerIdentity {
    pub address: PeerAddress,
    pub name: Option<String>,
}

impl PeerIdentity {
    pub fn new(address: PeerAddress, name: Option<String>) -> Self {
        Self { address, name }
    }

    /// Name if known, otherwise the address.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.address.to_string())
    }

    /// Case-insensitive substring match on the name. Unnamed peers never match.
    pub fn name_contains(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.name
            .as_deref()
            .map(|name| name.to_lowercase().contains(&needle))
            .unwrap_or(false)
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

/// Secure vs. insecure channel establishment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    Secure,
    Insecure,
}

impl SecurityMode {
    pub const ALL: [SecurityMode; 2] = [SecurityMode::Secure, SecurityMode::Insecure];

    pub fn from_secure(secure: bool) -> Self {
        if secure {
            Self::Secure
        } else {
            Self::Insecure
        }
    }

    /// Socket-type label used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Secure => "Secure",
            Self::Insecure => "Insecure",
        }
    }

    /// Service record UUID both ends agree on for this mode.
    pub fn service_uuid(&self) -> Uuid {
        match self {
            Self::Secure => SECURE_SERVICE_UUID,
            Self::Insecure => INSECURE_SERVICE_UUID,
        }
    }

    /// Service record name for this mode.
    pub fn service_name(&self) -> &'static str {
        match self {
            Self::Secure => SECURE_SERVICE_NAME,
            Self::Insecure => INSECURE_SERVICE_NAME,
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stream of peers seen while discovery runs. Ends when discovery stops.
pub type DiscoveryStream = BoxStream<'static, PeerIdentity>;

/// Reliable, ordered, connection-oriented channel factory.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open duplex byte stream to one peer. Dropping it closes the channel.
    type Channel: AsyncRead + AsyncWrite + Unpin + Send + 'static;
    /// Listening endpoint bound to one service record.
    type Acceptor: Acceptor<Channel = Self::Channel>;

    /// Whether the radio is present and switched on.
    fn is_enabled(&self) -> bool;

    /// Bind a listening endpoint under the service record for `mode`.
    async fn listen(&self, mode: SecurityMode) -> io::Result<Self::Acceptor>;

    /// Open a channel to `peer`'s service record for `mode`.
    async fn dial(&self, peer: &PeerIdentity, mode: SecurityMode) -> io::Result<Self::Channel>;
}

/// Listening endpoint. Dropping it unbinds the service record.
#[async_trait]
pub trait Acceptor: Send + 'static {
    type Channel: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Wait for the next inbound channel.
    async fn accept(&mut self) -> io::Result<(Self::Channel, PeerIdentity)>;
}

/// Bonded-device enumeration and discovery.
#[async_trait]
pub trait PeerDirectory: Send + Sync + 'static {
    /// Peers already bonded with the local radio.
    async fn bonded_peers(&self) -> io::Result<Vec<PeerIdentity>>;

    /// Begin discovery.
    async fn start_discovery(&self) -> io::Result<DiscoveryStream>;

    /// Whether a discovery is currently running.
    fn is_discovering(&self) -> bool;

    /// End any running discovery. No-op when idle.
    fn stop_discovery(&self);
}

/// Everything the link service needs from the platform.
pub trait Radio: Transport + PeerDirectory {}

impl<T: Transport + PeerDirectory> Radio for T {}
