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

//! Conversion between protocol messages and wire payloads.
//!
//! The codec is a collaborator seam: the connector never assumes a wire format
//! beyond what [`MessageCodec`] promises. The crate ships [`JsonCodec`], a
//! UTF-8 JSON codec built on `serde_json`, as the reference implementation.

use std::fmt;

use crate::message::envelope::{Message, MessageClass};

/// Errors raised by codec implementations.
#[derive(Debug, Clone)]
pub enum CodecError {
    /// The payload could not be parsed as any protocol message.
    ///
    /// Contains the parser's description, including position context where the
    /// underlying format provides it.
    Malformed(String),

    /// A message could not be rendered to the wire format.
    Encode(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(detail) => write!(f, "Malformed payload: {detail}"),
            Self::Encode(detail) => write!(f, "Message encoding failed: {detail}"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Converts protocol messages to and from wire payloads.
///
/// # Contract
///
/// `decode` distinguishes two very different situations:
///
/// - the payload is a well-formed message of a *different* class than the
///   caller expects: `Ok(None)`. Several handlers may share one queue, each
///   decoding with its own expectation and ignoring the rest; a mismatch is
///   routine, not an error.
/// - the payload is not a well-formed message at all: `Err(CodecError)`.
///   Callers log and discard these.
pub trait MessageCodec: Send + Sync {
    /// Renders a message to its wire payload.
    fn encode(&self, message: &Message) -> Result<Vec<u8>, CodecError>;

    /// Parses a payload, returning `Ok(None)` when the message is well-formed
    /// but not of the expected class.
    fn decode(&self, payload: &[u8], expected: MessageClass)
        -> Result<Option<Message>, CodecError>;
}

/// The reference codec: UTF-8 JSON with an internally tagged body.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Creates the codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl MessageCodec for JsonCodec {
    fn encode(&self, message: &Message) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(message).map_err(|err| CodecError::Encode(err.to_string()))
    }

    fn decode(
        &self,
        payload: &[u8],
        expected: MessageClass,
    ) -> Result<Option<Message>, CodecError> {
        let message: Message =
            serde_json::from_slice(payload).map_err(|err| CodecError::Malformed(err.to_string()))?;
        if expected.matches(message.body()) {
            Ok(Some(message))
        } else {
            Ok(None)
        }
    }
}
