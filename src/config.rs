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

//! Configuration module.
//!
//! Handles loading and saving link settings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::bluetooth::constants::framing::MAX_MESSAGE_LEN;
use crate::bluetooth::{LinkOptions, OverflowPolicy, SecurityMode};
use crate::error::LinkError;

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Link settings.
    pub link: LinkConfig,

    /// Framing settings.
    pub framing: FramingConfig,

    /// Transport backend.
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Name the local radio advertises.
    pub device_name: String,

    /// Case-insensitive substring bonded peers must contain to be listed.
    pub peer_filter: String,

    /// Security mode used when the caller does not pick one.
    pub default_security: SecurityMode,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device_name: "btlink".to_string(),
            peer_filter: "firefly".to_string(),
            default_security: SecurityMode::Secure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramingConfig {
    /// Largest message accepted, delimiter excluded.
    pub max_message_len: usize,

    /// "discard" or "truncate".
    pub overflow: OverflowPolicy,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            max_message_len: MAX_MESSAGE_LEN,
            overflow: OverflowPolicy::Discard,
        }
    }
}

impl From<&FramingConfig> for LinkOptions {
    fn from(framing: &FramingConfig) -> Self {
        LinkOptions {
            max_message_len: framing.max_message_len,
            overflow: framing.overflow,
        }
    }
}

/// Which radio implementation the daemon runs on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process simulated radio.
    #[default]
    Memory,
    /// BlueZ over D-Bus (requires the `bluez` feature).
    Bluez,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub backend: Backend,
}

impl Config {
    /// Default location: `<config dir>/btlink/config.toml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("btlink")
            .join("config.toml")
    }

    /// Load configuration from the default location or create it.
    pub fn load() -> Result<Self, LinkError> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from `path`, writing defaults there if missing.
    pub fn load_from(path: &Path) -> Result<Self, LinkError> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            let config = Self::default();
            config.save_to(path)?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), LinkError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<(), LinkError> {
        if self.framing.max_message_len == 0 {
            return Err(LinkError::Config(
                "framing.max_message_len must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn link_options(&self) -> LinkOptions {
        LinkOptions::from(&self.framing)
    }
}
