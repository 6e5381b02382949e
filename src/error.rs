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

//! Error types for the link manager.
//!
//! Role workers never hand these to the caller directly; they are turned
//! into state transitions and toasts. The `Display` text of each variant is
//! the toast text.

use thiserror::Error;

use crate::bluetooth::constants::toast;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("{}", toast::TRANSPORT_UNAVAILABLE)]
    TransportUnavailable,

    #[error("accept() failed on {mode} listener: {source}")]
    AcceptFailure {
        mode: crate::bluetooth::SecurityMode,
        #[source]
        source: std::io::Error,
    },

    #[error("{}", toast::CONNECT_FAILED)]
    ConnectFailure(#[source] std::io::Error),

    #[error("{}", toast::CONNECTION_LOST)]
    ConnectionLost(#[source] std::io::Error),

    #[error("{}", toast::WRITE_FAILED)]
    WriteFailure(#[source] std::io::Error),

    #[error("No device connected")]
    NotConnected,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Whether the error should be shown to the user as an error toast.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::TransportUnavailable
                | Self::ConnectFailure(_)
                | Self::ConnectionLost(_)
                | Self::WriteFailure(_)
        )
    }
}

impl From<toml::de::Error> for LinkError {
    fn from(e: toml::de::Error) -> Self {
        LinkError::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for LinkError {
    fn from(e: toml::ser::Error) -> Self {
        LinkError::Config(e.to_string())
    }
}
