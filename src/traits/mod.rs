//! The collaborator contracts of the connector engine.
//!
//! The engine is policy over two seams it does not implement itself: the
//! broker transport and the per-request future. These traits are those seams.
//!
//! # Key Traits
//!
//! *   [`BrokerTransport`] / [`BrokerConnection`] / [`BrokerChannel`]: raw
//!     broker primitives (connect, open channels, declare topology, publish,
//!     consume) supplied by a transport implementation.
//! *   [`RequestFuture`]: the per-request wait/cancel capability handed to the
//!     application, implemented by
//!     [`EnrichmentFuture`](crate::common::EnrichmentFuture) and its logging
//!     wrapper [`TracedFuture`](crate::common::TracedFuture).

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

// --- Public Re-exports ---
pub use request_future::{CompletionStatus, RequestFuture};
pub use transport::{
    BrokerChannel, BrokerConnection, BrokerTransport, EventListener, ExchangeKind,
    ExchangeOptions, Headers, PayloadHandler, Publication, QueueOptions, StructuralErrorKind,
    TransportError, TransportEvent,
};

// --- Submodules ---

/// Defines the [`RequestFuture`] capability trait.
mod request_future;
/// Defines the broker transport seam.
mod transport;
