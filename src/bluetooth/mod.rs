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

//! Bluetooth communication module.
//!
//! Point-to-point serial link over an RFCOMM-like transport: dual listener,
//! dialer and data pump, coordinated by [`LinkService`].

#[cfg(feature = "bluez")]
mod bluez;
mod connection;
pub mod constants;
mod framer;
mod memory;
mod roles;
mod service;
mod transport;

#[cfg(feature = "bluez")]
pub use bluez::{BluezAcceptor, BluezRadio};
pub use connection::{
    notification_channel, ConnectionState, Notification, NotificationSink, Notifications,
    ToastKind,
};
pub use framer::{frame_message, Framer, OverflowPolicy};
pub use memory::{MemoryAcceptor, MemoryMedium, MemoryRadio};
pub use service::{LinkOptions, LinkService};
pub use transport::{
    Acceptor, DiscoveryStream, PeerAddress, PeerDirectory, PeerIdentity, Radio, SecurityMode,
    Transport,
};
