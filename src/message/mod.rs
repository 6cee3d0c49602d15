//! The protocol message model and its wire codec.
//!
//! # Key Components
//!
//! *   [`Message`] / [`MessageBody`]: the envelope every protocol participant
//!     exchanges, and its request/response body variants.
//! *   [`MessageClass`]: decode expectations, the families of bodies a handler
//!     is prepared to receive.
//! *   [`MessageCodec`] / [`JsonCodec`]: the wire-format seam and the JSON
//!     reference implementation.
//! *   Value types ([`Broker`], [`DeliveryChannel`], [`Agent`], ...) shared
//!     with topology and configuration.

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
pub use codec::{CodecError, JsonCodec, MessageCodec};
pub use envelope::{Message, MessageBody, MessageClass};
pub use types::{
    Agent, Broker, Constraint, DeliveryChannel, EnrichmentSpec, PropertySelector, PropertyValue,
};

// --- Submodules ---

/// Defines the [`MessageCodec`] seam and [`JsonCodec`].
mod codec;
/// Defines [`Message`], [`MessageBody`], and [`MessageClass`].
mod envelope;
/// Defines the shared value types.
mod types;
