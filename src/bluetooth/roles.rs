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

//! Role workers: listener, dialer and data pump.
//!
//! Each worker owns its endpoint exclusively and is cancelled by aborting
//! its task, which drops (and so closes) that endpoint.

use std::sync::Arc;
use tokio::io::{AsyncReadExt, BufReader, ReadHalf};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info};

use super::framer::Framer;
use super::service::{AcceptOutcome, Shared};
use super::transport::{Acceptor, PeerIdentity, Radio, SecurityMode, Transport};
use crate::error::LinkError;

/// A bound listening endpoint. Fields drop in order, so the record is
/// unbound before the slot is released.
struct Endpoint<A> {
    acceptor: A,
    _slot: OwnedMutexGuard<()>,
}

/// Accept inbound channels on the service record for `mode` until one is
/// promoted, the endpoint fails, or the listener is cancelled.
pub(super) async fn run_listener<R: Radio>(
    shared: Arc<Shared<R>>,
    generation: u64,
    mode: SecurityMode,
) {
    info!("BEGIN listener, socket type: {}", mode);

    // Wait for a cancelled predecessor to unbind the same record.
    let slot = shared.endpoint(mode).lock_owned().await;

    let acceptor = match shared.radio.listen(mode).await {
        Ok(acceptor) => acceptor,
        Err(e) => {
            error!("Socket type {}: listen() failed: {}", mode, e);
            return;
        }
    };
    let mut endpoint = Endpoint {
        acceptor,
        _slot: slot,
    };

    loop {
        match endpoint.acceptor.accept().await {
            Ok((channel, peer)) => {
                info!("Connection from: {}", peer);
                match shared.accepted(generation, mode, channel, peer) {
                    AcceptOutcome::Promoted | AcceptOutcome::Stale => break,
                    AcceptOutcome::Discarded => continue,
                }
            }
            Err(source) => {
                error!("{}", LinkError::AcceptFailure { mode, source });
                break;
            }
        }
    }

    info!("END listener, socket type: {}", mode);
}

/// Open a channel to `peer` and hand it to the state machine.
pub(super) async fn run_dialer<R: Radio>(
    shared: Arc<Shared<R>>,
    generation: u64,
    peer: PeerIdentity,
    mode: SecurityMode,
) {
    info!("BEGIN dialer, socket type: {}", mode);

    // Discovery slows connection setup down.
    shared.radio.stop_discovery();

    match shared.radio.dial(&peer, mode).await {
        Ok(channel) => shared.dialed(generation, channel, peer, mode),
        Err(e) => shared.connection_failed(generation, e),
    }
}

/// Read the connected channel byte by byte and deliver framed messages.
pub(super) async fn run_data_pump<R: Radio>(
    shared: Arc<Shared<R>>,
    generation: u64,
    reader: ReadHalf<<R as Transport>::Channel>,
    mut framer: Framer,
) {
    info!("BEGIN data pump");

    let mut reader = BufReader::new(reader);
    loop {
        match reader.read_u8().await {
            Ok(byte) => {
                let Some(message) = framer.feed(byte) else {
                    continue;
                };
                debug!("Received {} bytes: {}", message.len(), hex::encode(&message));
                if !shared.deliver(generation, message) {
                    break;
                }
            }
            Err(e) => {
                info!("disconnected: {}", e);
                framer.reset();
                shared.connection_lost(generation, e);
                break;
            }
        }
    }
}
