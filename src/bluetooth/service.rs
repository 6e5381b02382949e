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

//! Link service: the connection state machine and its public facade.
//!
//! All transitions (start, connect, connected, stop and the failure paths)
//! run under one lock that guards both the state and the role handles, so
//! the state and the active channel always change together. Role workers
//! block on I/O outside the lock and re-enter it only to report.

use futures::StreamExt;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::connection::{
    notification_channel, ConnectionState, Notification, NotificationSink, Notifications,
};
use super::constants::{framing, toast};
use super::framer::{Framer, OverflowPolicy};
use super::roles;
use super::transport::{PeerIdentity, Radio, SecurityMode};
use crate::error::LinkError;

/// Tunables for the data path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkOptions {
    /// Largest message the framer accumulates, delimiter excluded.
    pub max_message_len: usize,
    /// What to do with messages past `max_message_len`.
    pub overflow: OverflowPolicy,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            max_message_len: framing::MAX_MESSAGE_LEN,
            overflow: OverflowPolicy::default(),
        }
    }
}

/// A running role worker, tagged with the generation it was spawned under.
struct RoleHandle {
    generation: u64,
    task: JoinHandle<()>,
}

impl RoleHandle {
    /// Tear the worker down. Dropping its future closes whatever channel or
    /// listening endpoint it owns.
    fn cancel(self) {
        self.task.abort();
    }

    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    fn is(&self, generation: u64) -> bool {
        self.generation == generation
    }
}

/// The connected channel: read side owned by the data pump, write side
/// shared with `send`.
struct ActiveLink<C> {
    peer: PeerIdentity,
    mode: SecurityMode,
    pump: RoleHandle,
    writer: Arc<tokio::sync::Mutex<WriteHalf<C>>>,
}

/// Guarded state: `state == Connected` iff `link.is_some()`.
struct Machine<C> {
    state: ConnectionState,
    next_generation: u64,
    secure_listener: Option<RoleHandle>,
    insecure_listener: Option<RoleHandle>,
    dialer: Option<RoleHandle>,
    link: Option<ActiveLink<C>>,
}

impl<C> Machine<C> {
    fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
            next_generation: 0,
            secure_listener: None,
            insecure_listener: None,
            dialer: None,
            link: None,
        }
    }

    fn generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn listener(&mut self, mode: SecurityMode) -> &mut Option<RoleHandle> {
        match mode {
            SecurityMode::Secure => &mut self.secure_listener,
            SecurityMode::Insecure => &mut self.insecure_listener,
        }
    }

    fn cancel_dialer(&mut self) {
        if let Some(dialer) = self.dialer.take() {
            debug!("Cancelling dialer");
            dialer.cancel();
        }
    }

    fn cancel_link(&mut self) {
        if let Some(link) = self.link.take() {
            debug!("Closing link to {}", link.peer);
            link.pump.cancel();
        }
    }

    fn cancel_listeners(&mut self) {
        for mode in SecurityMode::ALL {
            if let Some(listener) = self.listener(mode).take() {
                debug!("Cancelling {} listener", mode);
                listener.cancel();
            }
        }
    }

    fn has_roles(&self) -> bool {
        self.secure_listener.is_some()
            || self.insecure_listener.is_some()
            || self.dialer.is_some()
            || self.link.is_some()
    }
}

/// What happened to a channel handed in by a listener.
pub(super) enum AcceptOutcome {
    /// Became the data connection.
    Promoted,
    /// Closed because the manager was not accepting.
    Discarded,
    /// Closed because the listener has been cancelled.
    Stale,
}

/// State shared between the facade and the role workers.
pub(super) struct Shared<R: Radio> {
    pub(super) radio: Arc<R>,
    machine: Mutex<Machine<R::Channel>>,
    sink: NotificationSink,
    options: LinkOptions,
    secure_endpoint: Arc<tokio::sync::Mutex<()>>,
    insecure_endpoint: Arc<tokio::sync::Mutex<()>>,
}

impl<R: Radio> Shared<R> {
    /// Held by a listener for as long as its endpoint is bound. An aborted
    /// listener releases it only once its endpoint has been dropped, so a
    /// respawned listener never races the old record.
    pub(super) fn endpoint(&self, mode: SecurityMode) -> Arc<tokio::sync::Mutex<()>> {
        match mode {
            SecurityMode::Secure => self.secure_endpoint.clone(),
            SecurityMode::Insecure => self.insecure_endpoint.clone(),
        }
    }

    fn set_state(&self, m: &mut Machine<R::Channel>, state: ConnectionState) {
        debug!("State {} -> {}", m.state.as_str(), state.as_str());
        m.state = state;
        self.sink.emit(Notification::StateChanged { state });
    }

    fn start(self: &Arc<Self>) {
        let mut m = self.machine.lock();
        self.start_locked(&mut m);
    }

    fn start_locked(self: &Arc<Self>, m: &mut Machine<R::Channel>) {
        info!("start");

        m.cancel_dialer();
        m.cancel_link();

        for mode in SecurityMode::ALL {
            let running = m.listener(mode).as_ref().is_some_and(RoleHandle::is_running);
            if !running {
                let generation = m.generation();
                let task = tokio::spawn(roles::run_listener(self.clone(), generation, mode));
                *m.listener(mode) = Some(RoleHandle { generation, task });
            }
        }

        self.set_state(m, ConnectionState::Listening);
    }

    fn connect(self: &Arc<Self>, peer: PeerIdentity, mode: SecurityMode) {
        let mut m = self.machine.lock();
        info!("connect to: {} ({})", peer, mode);

        m.cancel_dialer();
        m.cancel_link();

        let generation = m.generation();
        let task = tokio::spawn(roles::run_dialer(self.clone(), generation, peer, mode));
        m.dialer = Some(RoleHandle { generation, task });

        self.set_state(&mut m, ConnectionState::Connecting);
    }

    fn connected_locked(
        self: &Arc<Self>,
        m: &mut Machine<R::Channel>,
        channel: R::Channel,
        peer: PeerIdentity,
        mode: SecurityMode,
    ) {
        info!("connected, socket type: {}", mode);

        m.cancel_dialer();
        m.cancel_link();
        // Only one data connection at a time.
        m.cancel_listeners();

        let (reader, writer) = tokio::io::split(channel);
        let framer = Framer::with_limit(self.options.max_message_len, self.options.overflow);
        let generation = m.generation();
        let task = tokio::spawn(roles::run_data_pump(self.clone(), generation, reader, framer));

        self.sink.emit(Notification::PeerConnected {
            name: peer.display_name(),
            address: peer.address,
        });

        m.link = Some(ActiveLink {
            peer,
            mode,
            pump: RoleHandle { generation, task },
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
        });
        self.set_state(m, ConnectionState::Connected);
    }

    /// A listener produced a channel.
    pub(super) fn accepted(
        self: &Arc<Self>,
        generation: u64,
        mode: SecurityMode,
        channel: R::Channel,
        peer: PeerIdentity,
    ) -> AcceptOutcome {
        let mut m = self.machine.lock();

        let current = m.listener(mode).as_ref().is_some_and(|l| l.is(generation));
        if !current {
            warn!("{} listener was cancelled, closing socket from {}", mode, peer);
            return AcceptOutcome::Stale;
        }

        match m.state {
            ConnectionState::Listening | ConnectionState::Connecting => {
                self.connected_locked(&mut m, channel, peer, mode);
                AcceptOutcome::Promoted
            }
            ConnectionState::Idle | ConnectionState::Connected => {
                warn!("Not accepting, closing unwanted socket from {}", peer);
                drop(channel);
                AcceptOutcome::Discarded
            }
        }
    }

    /// The dialer opened its channel.
    pub(super) fn dialed(
        self: &Arc<Self>,
        generation: u64,
        channel: R::Channel,
        peer: PeerIdentity,
        mode: SecurityMode,
    ) {
        let mut m = self.machine.lock();

        if !m.dialer.as_ref().is_some_and(|d| d.is(generation)) {
            warn!("Dialer was cancelled, closing socket to {}", peer);
            return;
        }
        // The dialer is finishing on its own; detach rather than abort.
        m.dialer = None;

        self.connected_locked(&mut m, channel, peer, mode);
    }

    /// The dialer could not open its channel.
    pub(super) fn connection_failed(self: &Arc<Self>, generation: u64, source: io::Error) {
        let mut m = self.machine.lock();

        if !m.dialer.as_ref().is_some_and(|d| d.is(generation)) {
            debug!("Ignoring failure from cancelled dialer: {}", source);
            return;
        }
        m.dialer = None;

        self.reset_locked(&mut m, LinkError::ConnectFailure(source));
    }

    /// The data pump's read side failed.
    pub(super) fn connection_lost(self: &Arc<Self>, generation: u64, source: io::Error) {
        let mut m = self.machine.lock();

        if !m.link.as_ref().is_some_and(|l| l.pump.is(generation)) {
            debug!("Ignoring read failure from closed link: {}", source);
            return;
        }

        self.reset_locked(&mut m, LinkError::ConnectionLost(source));
    }

    /// A write on the current link failed.
    fn write_failed(self: &Arc<Self>, generation: u64, source: io::Error) {
        let mut m = self.machine.lock();

        if !m.link.as_ref().is_some_and(|l| l.pump.is(generation)) {
            debug!("Ignoring write failure on closed link: {}", source);
            return;
        }

        self.reset_locked(&mut m, LinkError::WriteFailure(source));
    }

    /// Report, drop to `Idle`, then resume listening.
    fn reset_locked(self: &Arc<Self>, m: &mut Machine<R::Channel>, err: LinkError) {
        error!("{:?}", err);
        if err.is_user_facing() {
            self.sink.emit(Notification::error_toast(err.to_string()));
        }

        m.cancel_link();
        self.set_state(m, ConnectionState::Idle);

        self.start_locked(m);
    }

    /// Forward a framed message if `generation` is still the live link.
    pub(super) fn deliver(&self, generation: u64, payload: Vec<u8>) -> bool {
        let m = self.machine.lock();
        match &m.link {
            Some(link) if link.pump.is(generation) => {
                self.sink.emit(Notification::MessageReceived { payload });
                true
            }
            _ => false,
        }
    }

    fn stop(&self) {
        let mut m = self.machine.lock();
        if m.state == ConnectionState::Idle && !m.has_roles() {
            debug!("stop: already stopped");
            return;
        }
        info!("stop");

        m.cancel_dialer();
        m.cancel_link();
        m.cancel_listeners();
        self.set_state(&mut m, ConnectionState::Idle);
    }

    /// Snapshot of the writer for the live link.
    fn writer(&self) -> Option<(u64, Arc<tokio::sync::Mutex<WriteHalf<R::Channel>>>)> {
        let m = self.machine.lock();
        match (&m.link, m.state) {
            (Some(link), ConnectionState::Connected) => {
                Some((link.pump.generation, link.writer.clone()))
            }
            _ => None,
        }
    }
}

/// The connection manager.
///
/// Owns the state machine and the role workers. Every failure is reported
/// through the notification stream returned by [`LinkService::new`]; no
/// method returns a transport error.
pub struct LinkService<R: Radio> {
    shared: Arc<Shared<R>>,
    discovery: Mutex<Option<JoinHandle<()>>>,
}

impl<R: Radio> LinkService<R> {
    /// Create a service over `radio`. Nothing runs until
    /// [`start_listening`](Self::start_listening) or [`connect`](Self::connect).
    pub fn new(radio: Arc<R>, options: LinkOptions) -> (Self, Notifications) {
        let (sink, notifications) = notification_channel();
        let shared = Arc::new(Shared {
            radio,
            machine: Mutex::new(Machine::new()),
            sink,
            options,
            secure_endpoint: Arc::new(tokio::sync::Mutex::new(())),
            insecure_endpoint: Arc::new(tokio::sync::Mutex::new(())),
        });

        (
            Self {
                shared,
                discovery: Mutex::new(None),
            },
            notifications,
        )
    }

    /// Whether the radio is present and enabled.
    pub fn is_enabled(&self) -> bool {
        self.shared.radio.is_enabled()
    }

    fn ensure_enabled(&self) -> bool {
        if self.is_enabled() {
            return true;
        }
        warn!("Radio unavailable");
        self.shared
            .sink
            .emit(Notification::error_toast(LinkError::TransportUnavailable.to_string()));
        false
    }

    /// Listen on both the secure and insecure service records.
    pub fn start_listening(&self) {
        if self.ensure_enabled() {
            self.shared.start();
        }
    }

    /// Dial `peer` using `mode`. Any dial or data connection in progress is
    /// dropped first.
    pub fn connect(&self, peer: PeerIdentity, mode: SecurityMode) {
        if self.ensure_enabled() {
            self.shared.connect(peer, mode);
        }
    }

    /// Write `data` to the connected peer.
    ///
    /// Returns `false` when not connected or when the write fails. A failed
    /// write closes the link and resumes listening.
    pub async fn send(&self, data: &[u8]) -> bool {
        let Some((generation, writer)) = self.shared.writer() else {
            debug!("send: {}", LinkError::NotConnected);
            return false;
        };

        let result = async {
            let mut writer = writer.lock().await;
            writer.write_all(data).await?;
            writer.flush().await
        }
        .await;

        self.finish_write(generation, data, result)
    }

    /// Write `data` in `chunk_len`-sized pieces.
    ///
    /// Same failure policy as [`send`](Self::send).
    pub async fn send_chunked(&self, data: &[u8], chunk_len: usize) -> bool {
        if chunk_len == 0 {
            warn!("send_chunked: chunk length must be positive");
            return false;
        }
        let Some((generation, writer)) = self.shared.writer() else {
            debug!("send_chunked: {}", LinkError::NotConnected);
            return false;
        };

        let result = async {
            let mut writer = writer.lock().await;
            for chunk in data.chunks(chunk_len) {
                writer.write_all(chunk).await?;
            }
            writer.flush().await
        }
        .await;

        self.finish_write(generation, data, result)
    }

    fn finish_write(&self, generation: u64, data: &[u8], result: io::Result<()>) -> bool {
        match result {
            Ok(()) => {
                debug!("Sent {} bytes: {}", data.len(), hex::encode(data));
                self.shared.sink.emit(Notification::MessageSent {
                    payload: data.to_vec(),
                });
                true
            }
            Err(e) => {
                error!("Exception during write: {}", e);
                self.shared.write_failed(generation, e);
                false
            }
        }
    }

    /// Cancel every role and go idle. A second call is a no-op.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Same as [`stop`](Self::stop).
    pub fn close_connection(&self) {
        self.stop();
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.machine.lock().state
    }

    pub fn is_connection_open(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Peer and mode of the live data connection.
    pub fn connected_peer(&self) -> Option<(PeerIdentity, SecurityMode)> {
        let m = self.shared.machine.lock();
        m.link.as_ref().map(|link| (link.peer.clone(), link.mode))
    }

    /// Bonded peers accepted by `predicate`.
    pub async fn paired_peers<F>(&self, predicate: F) -> Vec<PeerIdentity>
    where
        F: Fn(&PeerIdentity) -> bool,
    {
        if !self.ensure_enabled() {
            return Vec::new();
        }
        match self.shared.radio.bonded_peers().await {
            Ok(peers) => peers.into_iter().filter(|p| predicate(p)).collect(),
            Err(e) => {
                error!("Failed to list bonded peers: {}", e);
                Vec::new()
            }
        }
    }

    /// Bonded peers whose name contains `needle`, ignoring case.
    pub async fn paired_peers_matching(&self, needle: &str) -> Vec<PeerIdentity> {
        self.paired_peers(|peer| peer.name_contains(needle)).await
    }

    /// Start discovery, or stop it if one is already running.
    ///
    /// Returns `true` when a new discovery was started.
    pub async fn start_discovery(&self) -> bool {
        if !self.ensure_enabled() {
            return false;
        }
        if self.shared.radio.is_discovering() {
            self.stop_discovery();
            self.shared
                .sink
                .emit(Notification::info_toast(toast::DISCOVERY_STOPPED));
            return false;
        }

        let mut stream = match self.shared.radio.start_discovery().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to start discovery: {}", e);
                return false;
            }
        };

        info!("Discovery started");
        self.shared.sink.emit(Notification::DiscoveryStarted);

        let sink = self.shared.sink.clone();
        let task = tokio::spawn(async move {
            while let Some(peer) = stream.next().await {
                debug!("Discovered {}", peer);
                sink.emit(Notification::PeerFound { peer });
            }
            info!("Discovery finished");
            sink.emit(Notification::DiscoveryFinished);
        });

        if let Some(previous) = self.discovery.lock().replace(task) {
            previous.abort();
        }
        true
    }

    /// Stop a running discovery. `DiscoveryFinished` follows once the
    /// platform stream ends.
    pub fn stop_discovery(&self) {
        self.shared.radio.stop_discovery();
    }
}

impl<R: Radio> Drop for LinkService<R> {
    fn drop(&mut self) {
        self.shared.stop();
        if let Some(task) = self.discovery.lock().take() {
            task.abort();
        }
    }
}
