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

//! Connection state and the notification stream handed to the caller.

use serde::Serialize;
use tracing::debug;

use super::transport::{PeerAddress, PeerIdentity};

/// State of the link manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Nothing running.
    #[serde(rename = "none")]
    Idle,
    /// Listening for inbound connections.
    Listening,
    /// Dialing a peer.
    Connecting,
    /// Exchanging data with one peer.
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "none",
            Self::Listening => "listening",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

/// Toast severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastKind {
    Info,
    Error,
}

/// Events emitted by the link service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// State transition.
    StateChanged { state: ConnectionState },
    /// A data connection was established with this peer.
    PeerConnected { name: String, address: PeerAddress },
    /// One complete framed message, delimiter stripped.
    MessageReceived { payload: Vec<u8> },
    /// A buffer was written to the peer in full.
    MessageSent { payload: Vec<u8> },
    /// User-facing message.
    Toast { text: String, kind: ToastKind },
    /// Discovery began.
    DiscoveryStarted,
    /// A peer was seen during discovery.
    PeerFound { peer: PeerIdentity },
    /// Discovery ended.
    DiscoveryFinished,
}

impl Notification {
    pub fn error_toast(text: impl Into<String>) -> Self {
        Self::Toast {
            text: text.into(),
            kind: ToastKind::Error,
        }
    }

    pub fn info_toast(text: impl Into<String>) -> Self {
        Self::Toast {
            text: text.into(),
            kind: ToastKind::Info,
        }
    }
}

/// Receiving side of the notification stream.
pub type Notifications = async_channel::Receiver<Notification>;

/// Fire-and-forget sender for notifications.
#[derive(Debug, Clone)]
pub struct NotificationSink {
    tx: async_channel::Sender<Notification>,
}

impl NotificationSink {
    /// Post a notification. Never blocks; dropped if the receiver is gone.
    pub fn emit(&self, notification: Notification) {
        if self.tx.try_send(notification).is_err() {
            debug!("Notification receiver closed, dropping event");
        }
    }
}

/// Create an unbounded notification stream.
pub fn notification_channel() -> (NotificationSink, Notifications) {
    let (tx, rx) = async_channel::unbounded();
    (NotificationSink { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_json() {
        let json = serde_json::to_string(&Notification::StateChanged {
            state: ConnectionState::Connected,
        })
        .unwrap();
        assert_eq!(json, r#"{"event":"state_changed","state":"connected"}"#);

        let json = serde_json::to_string(&Notification::PeerConnected {
            name: "Firefly".to_string(),
            address: PeerAddress::new([0xAA, 0, 0, 0, 0, 1]),
        })
        .unwrap();
        assert!(json.contains(r#""address":"AA:00:00:00:00:01""#));
    }

    #[tokio::test]
    async fn test_sink_preserves_order() {
        let (sink, rx) = notification_channel();
        sink.emit(Notification::DiscoveryStarted);
        sink.emit(Notification::info_toast("hello"));
        sink.emit(Notification::DiscoveryFinished);

        assert_eq!(rx.recv().await.unwrap(), Notification::DiscoveryStarted);
        assert_eq!(rx.recv().await.unwrap(), Notification::info_toast("hello"));
        assert_eq!(rx.recv().await.unwrap(), Notification::DiscoveryFinished);
    }

    #[test]
    fn test_emit_after_receiver_dropped() {
        let (sink, rx) = notification_channel();
        drop(rx);
        sink.emit(Notification::DiscoveryStarted);
    }
}
