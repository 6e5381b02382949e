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

//! CR-delimited message framing over a raw byte stream.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::constants::framing::{DELIMITER, MAX_MESSAGE_LEN};

/// What to do with a message that grows past the configured bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Drop the whole frame when its delimiter arrives.
    #[default]
    Discard,
    /// Deliver the first `max_len` bytes and drop the rest.
    Truncate,
}

/// Splits a byte stream into messages on [`DELIMITER`].
///
/// Holds only the bytes received since the last delimiter. The buffer is
/// bounded; see [`OverflowPolicy`] for what happens past the bound.
#[derive(Debug)]
pub struct Framer {
    buffer: Vec<u8>,
    max_len: usize,
    policy: OverflowPolicy,
    overflowed: bool,
}

impl Framer {
    /// Create a framer with the default 1024-byte bound.
    pub fn new() -> Self {
        Self::with_limit(MAX_MESSAGE_LEN, OverflowPolicy::default())
    }

    /// Create a framer with an explicit bound and overflow policy.
    pub fn with_limit(max_len: usize, policy: OverflowPolicy) -> Self {
        Self {
            buffer: Vec::with_capacity(max_len.min(MAX_MESSAGE_LEN)),
            max_len,
            policy,
            overflowed: false,
        }
    }

    /// Feed one byte.
    ///
    /// Returns `Some(message)` when `byte` is the delimiter, with the
    /// accumulated bytes (delimiter excluded). Otherwise returns `None`.
    pub fn feed(&mut self, byte: u8) -> Option<Vec<u8>> {
        if byte != DELIMITER {
            if self.buffer.len() < self.max_len {
                self.buffer.push(byte);
            } else if !self.overflowed {
                warn!(
                    "Message exceeds {} bytes, applying {:?} policy",
                    self.max_len, self.policy
                );
                self.overflowed = true;
            }
            return None;
        }

        let overflowed = std::mem::replace(&mut self.overflowed, false);
        if overflowed && self.policy == OverflowPolicy::Discard {
            warn!("Discarding oversized message");
            self.buffer.clear();
            return None;
        }

        debug!("Framed message: {} bytes", self.buffer.len());
        Some(std::mem::take(&mut self.buffer))
    }

    /// Drop any partially accumulated message.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.overflowed = false;
    }

    /// Number of bytes accumulated since the last delimiter.
    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the in-progress message has hit the bound.
    pub fn is_overflowed(&self) -> bool {
        self.overflowed
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

/// Append the delimiter to a payload, producing one wire frame.
pub fn frame_message(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.extend_from_slice(payload);
    frame.push(DELIMITER);
    frame
}
