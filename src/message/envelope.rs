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

//! The protocol message envelope and its body variants.
//!
//! Every message carries an id, a submission timestamp, and the submitting
//! agent. Requests additionally carry a `reply_to` delivery channel; responses
//! carry the id of the request they answer (`response_to`) and a response
//! number, since one request may receive several responses over time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use static_assertions::assert_impl_all;
use uuid::Uuid;

use crate::message::types::{
    Agent, Constraint, DeliveryChannel, EnrichmentSpec, PropertySelector, PropertyValue,
};

/// A protocol message.
///
/// # Wire Format
///
/// When serialized with the reference JSON codec the body is flattened into the
/// envelope, tagged by a `type` field:
///
/// ```json
/// {
///   "id": "5e3c9a70-44b2-4c2e-9d3f-6a1e9247c3da",
///   "submitted_on": "2025-06-14T09:21:43.120Z",
///   "submitted_by": { "id": "1b6f2d8e-0c3a-4f5b-8a9d-7e6c5b4a3f2e" },
///   "type": "enrichment_request",
///   "reply_to": { "exchange_name": "amq.topic", "routing_key": "curator.response.1b6f..." },
///   "target_resource": "resource:1234",
///   "filters": [],
///   "constraints": []
/// }
/// ```
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    /// Unique message id; responses reference it as `response_to`.
    id: Uuid,

    /// Submission timestamp.
    submitted_on: DateTime<Utc>,

    /// The agent that submitted the message.
    submitted_by: Agent,

    /// Type-specific payload.
    #[serde(flatten)]
    body: MessageBody,
}

/// The type-specific payload of a [`Message`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    /// Asks the curator to enrich a target resource.
    EnrichmentRequest {
        /// Where acknowledgements and results for this request are delivered.
        reply_to: DeliveryChannel,
        /// The resource enrichment is requested for.
        target_resource: String,
        /// Property selectors narrowing the request.
        #[serde(default)]
        filters: Vec<PropertySelector>,
        /// Constraints the curator should honour.
        #[serde(default)]
        constraints: Vec<Constraint>,
    },

    /// Tells the curator this agent is going away; outstanding requests may be
    /// discarded.
    Disconnect {
        /// The departing agent's delivery channel.
        reply_to: DeliveryChannel,
    },

    /// The curator accepted a request and will answer it later.
    Accepted {
        /// Id of the request being acknowledged.
        response_to: Uuid,
        /// Ordinal of this response within the request's response stream.
        response_number: u32,
    },

    /// The curator rejected a request.
    Failure {
        /// Id of the request being acknowledged.
        response_to: Uuid,
        /// Ordinal of this response within the request's response stream.
        response_number: u32,
        /// Failure code.
        code: u32,
        /// Optional refining subcode.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subcode: Option<u32>,
        /// Human-readable reason.
        reason: String,
        /// Optional free-form detail.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },

    /// An enrichment produced for an accepted request.
    EnrichmentResponse {
        /// Id of the request this enrichment answers.
        response_to: Uuid,
        /// Ordinal of this response within the request's response stream.
        response_number: u32,
        /// The enriched resource.
        target_resource: String,
        /// Properties to add to the resource.
        #[serde(default)]
        additions: Vec<PropertyValue>,
        /// Properties to remove from the resource.
        #[serde(default)]
        removals: Vec<PropertyValue>,
    },
}

/// Message categories used by codec decode expectations.
///
/// A class either names one concrete body or a family of bodies that share a
/// delivery path; [`MessageClass::matches`] is the single source of truth for
/// membership.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageClass {
    /// Either request body (`EnrichmentRequest` or `Disconnect`).
    Request,
    /// An `EnrichmentRequest` body.
    EnrichmentRequest,
    /// A `Disconnect` body.
    Disconnect,
    /// Either acknowledgement body (`Accepted` or `Failure`).
    Acknowledgement,
    /// An `EnrichmentResponse` body.
    EnrichmentResponse,
}

impl MessageClass {
    /// Whether a body belongs to this class.
    #[must_use]
    pub fn matches(&self, body: &MessageBody) -> bool {
        match self {
            Self::Request => matches!(
                body,
                MessageBody::EnrichmentRequest { .. } | MessageBody::Disconnect { .. }
            ),
            Self::EnrichmentRequest => matches!(body, MessageBody::EnrichmentRequest { .. }),
            Self::Disconnect => matches!(body, MessageBody::Disconnect { .. }),
            Self::Acknowledgement => matches!(
                body,
                MessageBody::Accepted { .. } | MessageBody::Failure { .. }
            ),
            Self::EnrichmentResponse => matches!(body, MessageBody::EnrichmentResponse { .. }),
        }
    }
}

impl std::fmt::Display for MessageClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Request => "request",
            Self::EnrichmentRequest => "enrichment_request",
            Self::Disconnect => "disconnect",
            Self::Acknowledgement => "acknowledgement",
            Self::EnrichmentResponse => "enrichment_response",
        };
        f.write_str(name)
    }
}

impl Message {
    fn envelope(submitted_by: Agent, body: MessageBody) -> Self {
        Self {
            id: Uuid::new_v4(),
            submitted_on: Utc::now(),
            submitted_by,
            body,
        }
    }

    /// Builds an enrichment request from caller input.
    #[must_use]
    pub fn enrichment_request(
        submitted_by: Agent,
        reply_to: DeliveryChannel,
        spec: EnrichmentSpec,
    ) -> Self {
        Self::envelope(
            submitted_by,
            MessageBody::EnrichmentRequest {
                reply_to,
                target_resource: spec.target_resource,
                filters: spec.filters,
                constraints: spec.constraints,
            },
        )
    }

    /// Builds a disconnect notice.
    #[must_use]
    pub fn disconnect(submitted_by: Agent, reply_to: DeliveryChannel) -> Self {
        Self::envelope(submitted_by, MessageBody::Disconnect { reply_to })
    }

    /// Builds an accept acknowledgement for a request.
    #[must_use]
    pub fn accepted(submitted_by: Agent, response_to: Uuid, response_number: u32) -> Self {
        Self::envelope(
            submitted_by,
            MessageBody::Accepted {
                response_to,
                response_number,
            },
        )
    }

    /// Builds a failure acknowledgement for a request.
    #[must_use]
    pub fn failure(
        submitted_by: Agent,
        response_to: Uuid,
        response_number: u32,
        code: u32,
        subcode: Option<u32>,
        reason: impl Into<String>,
        detail: Option<String>,
    ) -> Self {
        Self::envelope(
            submitted_by,
            MessageBody::Failure {
                response_to,
                response_number,
                code,
                subcode,
                reason: reason.into(),
                detail,
            },
        )
    }

    /// Builds an enrichment response for an accepted request.
    #[must_use]
    pub fn enrichment_response(
        submitted_by: Agent,
        response_to: Uuid,
        response_number: u32,
        target_resource: impl Into<String>,
        additions: Vec<PropertyValue>,
        removals: Vec<PropertyValue>,
    ) -> Self {
        Self::envelope(
            submitted_by,
            MessageBody::EnrichmentResponse {
                response_to,
                response_number,
                target_resource: target_resource.into(),
                additions,
                removals,
            },
        )
    }

    /// The message id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// When the message was submitted.
    #[must_use]
    pub const fn submitted_on(&self) -> DateTime<Utc> {
        self.submitted_on
    }

    /// The agent that submitted the message.
    #[must_use]
    pub const fn submitted_by(&self) -> &Agent {
        &self.submitted_by
    }

    /// The type-specific payload.
    #[must_use]
    pub const fn body(&self) -> &MessageBody {
        &self.body
    }

    /// The id of the request this message answers, for response bodies.
    #[must_use]
    pub const fn response_to(&self) -> Option<Uuid> {
        match &self.body {
            MessageBody::Accepted { response_to, .. }
            | MessageBody::Failure { response_to, .. }
            | MessageBody::EnrichmentResponse { response_to, .. } => Some(*response_to),
            MessageBody::EnrichmentRequest { .. } | MessageBody::Disconnect { .. } => None,
        }
    }

    /// The reply channel, for request bodies.
    #[must_use]
    pub const fn reply_to(&self) -> Option<&DeliveryChannel> {
        match &self.body {
            MessageBody::EnrichmentRequest { reply_to, .. }
            | MessageBody::Disconnect { reply_to } => Some(reply_to),
            MessageBody::Accepted { .. }
            | MessageBody::Failure { .. }
            | MessageBody::EnrichmentResponse { .. } => None,
        }
    }
}

// Messages cross task boundaries inside consumer callbacks.
assert_impl_all!(Message: Send, Sync);
