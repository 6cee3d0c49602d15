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

//! The client-observable outcome of a submitted request.

use std::fmt;
use std::sync::Arc;

use derive_new::new;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::common::errors::ConnectorError;
use crate::message::PropertyValue;

/// The failure payload of a rejected request.
#[derive(new, Clone, Debug, PartialEq, Eq)]
pub struct Failure {
    code: u32,
    subcode: Option<u32>,
    reason: String,
    detail: Option<String>,
}

impl Failure {
    /// Failure code.
    #[must_use]
    pub const fn code(&self) -> u32 {
        self.code
    }

    /// Optional refining subcode.
    #[must_use]
    pub const fn subcode(&self) -> Option<u32> {
        self.subcode
    }

    /// Human-readable reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Optional free-form detail.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code {}", self.code)?;
        if let Some(subcode) = self.subcode {
            write!(f, ".{subcode}")?;
        }
        write!(f, ": {}", self.reason)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

/// Acknowledgement state of an enrichment.
///
/// `Aborted` means the request was locally given up before any answer; it is
/// the only state without a cancelled counterpart, since there is nothing left
/// to cancel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckState {
    /// The curator accepted the request; results may still arrive.
    Accepted,
    /// The curator rejected the request.
    Failed(Failure),
    /// The request was abandoned before any acknowledgement.
    Aborted,
    /// Accepted, then cancelled by the application.
    Cancelled,
    /// Rejected, then cancelled by the application.
    FailedCancelled(Failure),
}

/// The `cancel()` transition, exhaustive over every state.
fn cancelled(state: &AckState) -> AckState {
    match state {
        AckState::Accepted => AckState::Cancelled,
        AckState::Failed(failure) => AckState::FailedCancelled(failure.clone()),
        AckState::Aborted => AckState::Aborted,
        AckState::Cancelled => AckState::Cancelled,
        AckState::FailedCancelled(failure) => AckState::FailedCancelled(failure.clone()),
    }
}

struct EnrichmentInner {
    /// Id of the request this outcome answers; absent only when aborted.
    message_id: Option<Uuid>,
    state: Mutex<AckState>,
}

/// The client-observable outcome of a submitted request.
///
/// An `Enrichment` is a cheap handle: clones share the same state, so a
/// `cancel()` through any clone is observed by all. Its identity, the id of
/// the request it answers, is fixed at derivation and never changes.
#[derive(Clone)]
pub struct Enrichment {
    inner: Arc<EnrichmentInner>,
}

impl Enrichment {
    fn from_parts(message_id: Option<Uuid>, state: AckState) -> Self {
        Self {
            inner: Arc::new(EnrichmentInner {
                message_id,
                state: Mutex::new(state),
            }),
        }
    }

    /// An outcome derived from an accept acknowledgement.
    pub(crate) fn accepted(request_id: Uuid) -> Self {
        Self::from_parts(Some(request_id), AckState::Accepted)
    }

    /// An outcome derived from a failure acknowledgement.
    pub(crate) fn failed(request_id: Uuid, failure: Failure) -> Self {
        Self::from_parts(Some(request_id), AckState::Failed(failure))
    }

    /// An outcome derived from no message at all.
    pub(crate) fn aborted() -> Self {
        Self::from_parts(None, AckState::Aborted)
    }

    /// A snapshot of the current acknowledgement state.
    #[must_use]
    pub fn state(&self) -> AckState {
        self.inner.state.lock().clone()
    }

    /// Marks the enrichment cancelled, returning whether it was active before.
    ///
    /// Idempotent and monotonic: a second call finds a terminal state, maps it
    /// to itself, and returns `false`.
    pub fn cancel(&self) -> bool {
        let mut state = self.inner.state.lock();
        let was_active = matches!(*state, AckState::Accepted);
        *state = cancelled(&state);
        was_active
    }

    /// Whether results are still expected: true only while `Accepted`.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(*self.inner.state.lock(), AckState::Accepted)
    }

    /// Whether the acknowledgement was an accept (cancelled or not).
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(
            *self.inner.state.lock(),
            AckState::Accepted | AckState::Cancelled
        )
    }

    /// Whether the acknowledgement was a failure (cancelled or not).
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(
            *self.inner.state.lock(),
            AckState::Failed(_) | AckState::FailedCancelled(_)
        )
    }

    /// Whether the request was abandoned before any acknowledgement.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(*self.inner.state.lock(), AckState::Aborted)
    }

    /// Whether the application cancelled after the acknowledgement.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(
            *self.inner.state.lock(),
            AckState::Cancelled | AckState::FailedCancelled(_)
        )
    }

    /// Id of the request this outcome answers.
    ///
    /// # Errors
    ///
    /// Fails with a state error for aborted enrichments, which were derived
    /// from no message and have no identity.
    pub fn message_id(&self) -> Result<Uuid, ConnectorError> {
        self.inner
            .message_id
            .ok_or_else(|| ConnectorError::state("Aborted enrichment has no message id"))
    }

    /// The failure payload.
    ///
    /// # Errors
    ///
    /// Fails with a state error unless the enrichment is failed (either
    /// cancellation variant included).
    pub fn failure(&self) -> Result<Failure, ConnectorError> {
        match &*self.inner.state.lock() {
            AckState::Failed(failure) | AckState::FailedCancelled(failure) => Ok(failure.clone()),
            state => Err(ConnectorError::state(format!(
                "No failure recorded for {state:?} enrichment"
            ))),
        }
    }
}

impl fmt::Debug for Enrichment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Enrichment")
            .field("message_id", &self.inner.message_id)
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}

/// One result delivered for an accepted request.
#[derive(Clone, Debug, PartialEq)]
pub struct EnrichmentResult {
    /// Id of the request this result answers.
    pub request_id: Uuid,
    /// Ordinal of this result within the request's response stream.
    pub response_number: u32,
    /// The enriched resource.
    pub target_resource: String,
    /// Properties to add to the resource.
    pub additions: Vec<PropertyValue>,
    /// Properties to remove from the resource.
    pub removals: Vec<PropertyValue>,
}

/// Application callback receiving the results of an accepted request.
pub type ResultHandler = Arc<dyn Fn(EnrichmentResult) + Send + Sync>;
