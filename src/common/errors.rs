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

//! The error taxonomy every public entry point reports through.

use std::fmt;
use std::time::Duration;

use crate::message::CodecError;
use crate::traits::TransportError;

/// State-error reason when an operation requires a connected connector.
pub const NOT_CONNECTED: &str = "Not connected";

/// State-error reason when `connect` is called on a connected connector.
pub const ALREADY_CONNECTED: &str = "Already connected";

/// Errors surfaced by the connector engine.
///
/// The first four variants wrap a [`TransportError`] and differ by the phase
/// the failure hit: the phase determines what was rolled back and what the
/// caller can still do, so it is part of the type, not just the message.
#[derive(Debug, Clone)]
pub enum ConnectorError {
    /// Connection bring-up failed; nothing was left open.
    Connection {
        /// What was being attempted.
        context: String,
        /// The transport failure.
        source: TransportError,
    },

    /// A channel could not be opened or operated; the owning connection was
    /// rolled back where bring-up required it.
    Channel {
        /// What was being attempted.
        context: String,
        /// The transport failure.
        source: TransportError,
    },

    /// An exchange/queue/bind declaration failed beyond recovery.
    Structural {
        /// What was being declared.
        context: String,
        /// The transport failure.
        source: TransportError,
    },

    /// A publish failed; the channel it used was discarded and the request (if
    /// any) is still pending.
    Publish {
        /// What was being published.
        context: String,
        /// The transport failure.
        source: TransportError,
    },

    /// A message could not be converted to or from its wire payload.
    Conversion {
        /// What was being converted.
        context: String,
        /// The codec failure.
        source: CodecError,
    },

    /// The operation does not fit the connector's current state.
    State {
        /// Why the operation was refused.
        reason: String,
    },

    /// A bounded wait elapsed before the future resolved.
    Timeout {
        /// How long the caller waited.
        waited: Duration,
    },
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection { context, source } => {
                write!(f, "Broker connection failed while {context}: {source}")
            }
            Self::Channel { context, source } => {
                write!(f, "Broker channel failed while {context}: {source}")
            }
            Self::Structural { context, source } => {
                write!(f, "Topology declaration failed while {context}: {source}")
            }
            Self::Publish { context, source } => {
                write!(f, "Publish failed while {context}: {source}")
            }
            Self::Conversion { context, source } => {
                write!(f, "Payload conversion failed while {context}: {source}")
            }
            Self::State { reason } => write!(f, "Connector state error: {reason}"),
            Self::Timeout { waited } => {
                write!(f, "Timed out after {}ms waiting for enrichment", waited.as_millis())
            }
        }
    }
}

impl std::error::Error for ConnectorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connection { source, .. }
            | Self::Channel { source, .. }
            | Self::Structural { source, .. }
            | Self::Publish { source, .. } => Some(source),
            Self::Conversion { source, .. } => Some(source),
            Self::State { .. } | Self::Timeout { .. } => None,
        }
    }
}

impl ConnectorError {
    /// Wraps a transport failure hit while establishing a connection.
    #[must_use]
    pub fn connection(context: impl Into<String>, source: TransportError) -> Self {
        Self::Connection {
            context: context.into(),
            source,
        }
    }

    /// Wraps a transport failure hit while opening or using a channel.
    #[must_use]
    pub fn channel(context: impl Into<String>, source: TransportError) -> Self {
        Self::Channel {
            context: context.into(),
            source,
        }
    }

    /// Wraps a transport failure hit while declaring topology.
    #[must_use]
    pub fn structural(context: impl Into<String>, source: TransportError) -> Self {
        Self::Structural {
            context: context.into(),
            source,
        }
    }

    /// Wraps a transport failure hit while publishing.
    #[must_use]
    pub fn publish(context: impl Into<String>, source: TransportError) -> Self {
        Self::Publish {
            context: context.into(),
            source,
        }
    }

    /// Wraps a codec failure.
    #[must_use]
    pub fn conversion(context: impl Into<String>, source: CodecError) -> Self {
        Self::Conversion {
            context: context.into(),
            source,
        }
    }

    /// A state error with a custom reason.
    #[must_use]
    pub fn state(reason: impl Into<String>) -> Self {
        Self::State {
            reason: reason.into(),
        }
    }

    /// The state error for operations that require a connected connector.
    #[must_use]
    pub fn not_connected() -> Self {
        Self::state(NOT_CONNECTED)
    }

    /// The state error for connecting an already-connected connector.
    #[must_use]
    pub fn already_connected() -> Self {
        Self::state(ALREADY_CONNECTED)
    }

    /// A timeout after the given wait.
    #[must_use]
    pub const fn timeout(waited: Duration) -> Self {
        Self::Timeout { waited }
    }

    /// Whether this is a state error with the given reason.
    #[must_use]
    pub fn is_state(&self, expected_reason: &str) -> bool {
        matches!(self, Self::State { reason } if reason == expected_reason)
    }
}
