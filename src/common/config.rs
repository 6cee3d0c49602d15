/*
 * Copyright (c) 2025. The curator-connect authors
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Connector configuration.
//!
//! Every tunable has a default, so `ConnectorConfig::default()` yields a
//! working local setup. `load()` layers an optional TOML file from the XDG
//! config path on top; a missing or unreadable file falls back to the
//! defaults with a log line, never an error.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::common::topology::DEFAULT_EXCHANGE;
use crate::message::{Broker, DeliveryChannel};

/// Name of the config file searched for under the XDG config directories.
const CONFIG_FILE: &str = "config.toml";

/// XDG prefix the config file lives under.
const CONFIG_PREFIX: &str = "curator-connect";

fn default_curator_channel() -> DeliveryChannel {
    DeliveryChannel::new()
        .with_exchange(DEFAULT_EXCHANGE)
        .with_queue("curator.requests")
        .with_routing_key("curator")
}

fn default_response_channel() -> DeliveryChannel {
    DeliveryChannel::new()
        .with_exchange(DEFAULT_EXCHANGE)
        .with_routing_key("curator.response")
}

/// Everything a [`CuratorConnector`](crate::common::connector::CuratorConnector)
/// needs to reach its curator.
///
/// `broker` is the default endpoint; either channel may override it to split
/// request and response traffic across brokers. The curator channel describes
/// where requests go (its routing key is the base the `.enrichment` /
/// `.disconnect` suffixes attach to); the response channel describes where
/// answers come back (its queue is usually left unset for a broker-assigned
/// name).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ConnectorConfig {
    /// Default broker endpoint.
    #[serde(default)]
    pub broker: Broker,

    /// Where enrichment requests are published.
    #[serde(default = "default_curator_channel")]
    pub curator: DeliveryChannel,

    /// Where curator responses are consumed.
    #[serde(default = "default_response_channel")]
    pub response: DeliveryChannel,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            broker: Broker::default(),
            curator: default_curator_channel(),
            response: default_response_channel(),
        }
    }
}

impl ConnectorConfig {
    /// Loads `curator-connect/config.toml` from the XDG config path, falling
    /// back to the defaults when the file is absent or unreadable.
    #[must_use]
    pub fn load() -> Self {
        let Some(path) = Self::locate() else {
            debug!("no config file found; using defaults");
            return Self::default();
        };
        match Self::from_file(&path) {
            Ok(config) => {
                info!(path = %path.display(), "configuration loaded");
                config
            }
            Err(error) => {
                warn!(
                    path = %path.display(),
                    error = %error,
                    "configuration unreadable; using defaults"
                );
                Self::default()
            }
        }
    }

    /// Reads and parses a specific config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    fn locate() -> Option<PathBuf> {
        xdg::BaseDirectories::with_prefix(CONFIG_PREFIX)
            .ok()?
            .find_config_file(CONFIG_FILE)
    }

    /// Sets the default broker endpoint.
    #[must_use]
    pub fn with_broker(mut self, broker: Broker) -> Self {
        self.broker = broker;
        self
    }

    /// Replaces the curator-facing channel.
    #[must_use]
    pub fn with_curator_channel(mut self, channel: DeliveryChannel) -> Self {
        self.curator = channel;
        self
    }

    /// Replaces the response-facing channel.
    #[must_use]
    pub fn with_response_channel(mut self, channel: DeliveryChannel) -> Self {
        self.response = channel;
        self
    }

    /// Sets the base routing key requests are published under.
    #[must_use]
    pub fn with_request_key(mut self, key: impl Into<String>) -> Self {
        self.curator.routing_key = Some(key.into());
        self
    }

    /// Sets the base routing key responses are expected on.
    #[must_use]
    pub fn with_response_key(mut self, key: impl Into<String>) -> Self {
        self.response.routing_key = Some(key.into());
        self
    }
}

/// Why a config file could not be used.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Read(std::io::Error),
    /// The file is not valid TOML for [`ConnectorConfig`].
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(e) => write!(f, "Reading config file failed: {e}"),
            Self::Parse(e) => write!(f, "Parsing config file failed: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read(e) => Some(e),
            Self::Parse(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Read(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Parse(e)
    }
}
