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

//! The broker transport seam.
//!
//! The connector engine adds policy (locking, retry, cleanup, correlation) on
//! top of raw broker primitives it does not implement itself. These traits
//! are that boundary: any transport that can open connections and channels,
//! declare topology, publish, and consume can carry the protocol. The crate
//! ships [`MemoryTransport`](crate::memory::MemoryTransport) as the reference
//! implementation; production deployments supply an adapter over their broker
//! client of choice.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::message::Broker;

/// Message headers carried by a publication.
pub type Headers = HashMap<String, serde_json::Value>;

/// Callback invoked with the raw body of each delivery from a consumed queue.
pub type PayloadHandler = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Callback invoked with out-of-band transport notifications.
pub type EventListener = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// Out-of-band notifications a connection can emit.
///
/// These exist for observability only; no engine behavior branches on them.
#[derive(Clone, Debug)]
pub enum TransportEvent {
    /// A mandatory publication could not be routed to any queue and came back.
    Returned {
        /// Exchange the publication was sent to.
        exchange: String,
        /// Routing key the publication carried.
        routing_key: String,
        /// Transport-supplied reason.
        reason: String,
    },

    /// The transport recovered from or absorbed an internal fault.
    Fault {
        /// Transport-supplied description.
        context: String,
    },
}

/// Errors raised by transport implementations.
#[derive(Debug, Clone)]
pub enum TransportError {
    /// Connection establishment failed.
    Connect(String),

    /// A channel could not be opened or operated.
    Channel(String),

    /// An exchange/queue/bind declaration was refused.
    Structural {
        /// The conflict family, mapped from the transport's native errors.
        kind: StructuralErrorKind,
        /// Transport-supplied description.
        context: String,
    },

    /// I/O failure while publishing or consuming.
    Io(String),

    /// The connection or channel is closed.
    Closed,
}

/// Families of structural-declare conflicts, modelled on the AMQP soft errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuralErrorKind {
    /// The entity exists with different arguments.
    PreconditionFailed,
    /// The entity is exclusively held by another connection.
    ResourceLocked,
    /// The operation was refused by broker policy.
    AccessRefused,
    /// The named entity does not exist.
    NotFound,
    /// Anything the transport cannot classify further.
    Other,
}

impl fmt::Display for StructuralErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PreconditionFailed => "precondition failed",
            Self::ResourceLocked => "resource locked",
            Self::AccessRefused => "access refused",
            Self::NotFound => "not found",
            Self::Other => "unclassified",
        };
        f.write_str(name)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(detail) => write!(f, "Connection failed: {detail}"),
            Self::Channel(detail) => write!(f, "Channel failure: {detail}"),
            Self::Structural { kind, context } => {
                write!(f, "Structural conflict ({kind}): {context}")
            }
            Self::Io(detail) => write!(f, "I/O failure: {detail}"),
            Self::Closed => write!(f, "Connection or channel is closed"),
        }
    }
}

impl std::error::Error for TransportError {}

impl TransportError {
    /// Whether a structural conflict is worth one retry on a fresh channel.
    ///
    /// A refused declare poisons the channel it ran on; for the soft conflict
    /// families (`PreconditionFailed`, `ResourceLocked`) the same declare can
    /// succeed on a recreated channel once the conflicting state has drained.
    /// Everything else is final.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Structural {
                kind: StructuralErrorKind::PreconditionFailed | StructuralErrorKind::ResourceLocked,
                ..
            }
        )
    }
}

/// How an exchange routes publications to bound queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Dotted-word routing keys with `*`/`#` wildcards in binding patterns.
    Topic,
    /// Exact routing-key equality.
    Direct,
}

/// Exchange declaration options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeOptions {
    /// Routing behavior.
    pub kind: ExchangeKind,
    /// Whether the exchange survives broker restart.
    pub durable: bool,
    /// Whether the exchange is removed once the last binding is gone.
    pub auto_delete: bool,
}

impl ExchangeOptions {
    /// The options every protocol exchange is declared with: a durable,
    /// auto-delete topic exchange.
    #[must_use]
    pub const fn topic() -> Self {
        Self {
            kind: ExchangeKind::Topic,
            durable: true,
            auto_delete: true,
        }
    }
}

/// Queue declaration options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueOptions {
    /// Whether the queue survives broker restart.
    pub durable: bool,
    /// Whether the queue is restricted to the declaring connection.
    pub exclusive: bool,
    /// Whether the queue is removed once the last consumer detaches.
    pub auto_delete: bool,
    /// How long an unconsumed queue lingers before the broker drops it.
    pub expires: Option<Duration>,
}

/// One outbound publication.
#[derive(Debug, Clone)]
pub struct Publication {
    /// Whether an unroutable publication is returned to the publisher
    /// (as a [`TransportEvent::Returned`]) instead of being discarded.
    pub mandatory: bool,
    /// Header table.
    pub headers: Headers,
    /// Raw payload.
    pub body: Vec<u8>,
}

impl Publication {
    /// Creates a non-mandatory publication with no headers.
    #[must_use]
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            mandatory: false,
            headers: Headers::new(),
            body,
        }
    }

    /// Marks the publication mandatory.
    #[must_use]
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.headers.insert(key.into(), value);
        self
    }
}

/// Opens connections to broker endpoints.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Opens a connection to the given endpoint.
    async fn connect(&self, broker: &Broker) -> Result<Box<dyn BrokerConnection>, TransportError>;
}

/// One open connection to a broker endpoint.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Opens a channel on this connection.
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, TransportError>;

    /// Installs the listener for out-of-band events. Replaces any previous one.
    fn set_event_listener(&self, listener: EventListener);

    /// Whether the connection is still open.
    fn is_open(&self) -> bool;

    /// Closes the connection. Consumers registered through it stop receiving.
    async fn close(&self) -> Result<(), TransportError>;
}

/// One channel multiplexed over a connection.
///
/// A channel is *not* safe for interleaved use from concurrent callers; the
/// engine keeps each channel private to one task at a time and pools them.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declares an exchange. Redeclaring with identical options is a no-op.
    async fn declare_exchange(
        &self,
        name: &str,
        options: ExchangeOptions,
    ) -> Result<(), TransportError>;

    /// Declares a queue, returning its (possibly broker-assigned) name.
    ///
    /// `name` of `None` (or the empty string) requests a broker-assigned name.
    async fn declare_queue(
        &self,
        name: Option<&str>,
        options: QueueOptions,
    ) -> Result<String, TransportError>;

    /// Binds a queue to an exchange under a routing-key pattern.
    async fn bind_queue(
        &self,
        exchange: &str,
        queue: &str,
        routing_key: &str,
    ) -> Result<(), TransportError>;

    /// Removes a binding. Unbinding a binding that is already gone is a no-op.
    async fn unbind_queue(
        &self,
        exchange: &str,
        queue: &str,
        routing_key: &str,
    ) -> Result<(), TransportError>;

    /// Deletes a queue.
    async fn delete_queue(&self, queue: &str) -> Result<(), TransportError>;

    /// Publishes to an exchange under a routing key.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        publication: Publication,
    ) -> Result<(), TransportError>;

    /// Attaches a consumer to a queue, returning its consumer tag.
    ///
    /// Deliveries are handed to `handler` from a transport-driven task, one
    /// consumer task per queue. Multiple consumers on one queue compete for
    /// deliveries.
    async fn consume(
        &self,
        queue: &str,
        auto_ack: bool,
        handler: PayloadHandler,
    ) -> Result<String, TransportError>;

    /// Whether the channel is still open.
    fn is_open(&self) -> bool;

    /// Closes the channel.
    async fn close(&self) -> Result<(), TransportError>;
}

impl fmt::Debug for dyn BrokerChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerChannel")
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let recoverable = TransportError::Structural {
            kind: StructuralErrorKind::PreconditionFailed,
            context: "queue 'curator.requests' exists with different options".to_string(),
        };
        assert!(recoverable.is_recoverable());

        let locked = TransportError::Structural {
            kind: StructuralErrorKind::ResourceLocked,
            context: "queue is exclusively held".to_string(),
        };
        assert!(locked.is_recoverable());

        let missing = TransportError::Structural {
            kind: StructuralErrorKind::NotFound,
            context: "no such exchange".to_string(),
        };
        assert!(!missing.is_recoverable());
        assert!(!TransportError::Closed.is_recoverable());
        assert!(!TransportError::Io("broken pipe".to_string()).is_recoverable());
    }

    #[test]
    fn test_publication_builder() {
        let publication = Publication::new(b"{}".to_vec())
            .mandatory()
            .with_header("x-sequence", serde_json::json!(7));

        assert!(publication.mandatory);
        assert_eq!(
            publication.headers.get("x-sequence"),
            Some(&serde_json::json!(7))
        );
    }

    #[test]
    fn test_exchange_preset() {
        let options = ExchangeOptions::topic();
        assert_eq!(options.kind, ExchangeKind::Topic);
        assert!(options.durable);
        assert!(options.auto_delete);
    }
}
