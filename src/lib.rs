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

#![forbid(unsafe_code)]
#![warn(missing_docs)]
//! curator-connect
//!
//! A client library for asynchronous enrichment requests to a remote curator
//! over a publish/subscribe broker. The connector publishes a request, the
//! curator acknowledges it asynchronously (accepted or failed), and accepted
//! requests receive a stream of enrichment results on an independently routed
//! response queue, all correlated per request and cancellable from the client,
//! with the broker topology declared on connect.
//!
//! Applications import [`prelude`] and talk to
//! [`CuratorConnector`](prelude::CuratorConnector):
//!
//! ```ignore
//! use std::sync::Arc;
//! use curator_connect::prelude::*;
//!
//! let connector = CuratorConnector::new(
//!     ConnectorConfig::load(),
//!     Arc::new(MemoryTransport::new()),
//! );
//! connector.connect().await?;
//! let future = connector
//!     .request_enrichment(
//!         EnrichmentSpec::for_resource("urn:isbn:0451450523"),
//!         Arc::new(|result| tracing::info!(?result, "enrichment arrived")),
//!     )
//!     .await?;
//! let enrichment = future.wait().await?;
//! ```

pub(crate) mod common;
pub(crate) mod memory;
pub(crate) mod message;
/// Collaborator trait definitions: the broker transport seam and the
/// request-future capability.
pub(crate) mod traits;

/// Prelude module for convenient imports.
///
/// Re-exports the application-facing surface: the connector and its
/// configuration, the message model, the collaborator traits with their
/// reference implementations, and the `async_trait` crate transport adapters
/// need.
pub mod prelude {
    pub use async_trait;

    pub use crate::common::{
        AckState, BrokerController, ConfigError, ConfiguredEndpoint, ConnectorConfig,
        ConnectorError, CuratorConnector, Enrichment, EnrichmentFuture, EnrichmentResult, Failure,
        ResultHandler, TopologyConfigurator, TopologyRole, TracedFuture, ALREADY_CONNECTED,
        DEFAULT_EXCHANGE, DISCONNECT_SUFFIX, ENRICHMENT_SUFFIX, NOT_CONNECTED, SEQUENCE_HEADER,
    };
    pub use crate::memory::MemoryTransport;
    pub use crate::message::{
        Agent, Broker, CodecError, Constraint, DeliveryChannel, EnrichmentSpec, JsonCodec,
        Message, MessageBody, MessageClass, MessageCodec, PropertySelector, PropertyValue,
    };
    pub use crate::traits::{
        BrokerChannel, BrokerConnection, BrokerTransport, CompletionStatus, EventListener,
        ExchangeKind, ExchangeOptions, Headers, PayloadHandler, Publication, QueueOptions,
        RequestFuture, StructuralErrorKind, TransportError, TransportEvent,
    };
}
