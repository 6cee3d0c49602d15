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

//! The capability every per-request future offers.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::common::Enrichment;
use crate::common::ConnectorError;

/// Lifecycle of a request future.
///
/// `Done` and `Cancelled` are terminal: a future never leaves either state,
/// and a transition attempted from a terminal state reports that state back
/// unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// No acknowledgement has arrived and nobody has cancelled.
    Waiting,
    /// An acknowledgement resolved the future.
    Done,
    /// The caller (or a connector teardown) gave up on the request.
    Cancelled,
}

impl CompletionStatus {
    /// Whether this is a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }
}

/// One outstanding enrichment request, as seen by the application.
///
/// All methods may be called concurrently and repeatedly; waiting does not
/// consume the outcome, so every waiter observes the same [`Enrichment`].
#[async_trait]
pub trait RequestFuture: Send + Sync {
    /// Waits until the future is resolved and returns its Enrichment.
    async fn wait(&self) -> Result<Enrichment, ConnectorError>;

    /// Waits up to `timeout`.
    ///
    /// On expiry this fails with [`ConnectorError::Timeout`] without consuming
    /// the outcome: a completion arriving later remains observable to any
    /// subsequent `wait` call.
    async fn wait_timeout(&self, timeout: Duration) -> Result<Enrichment, ConnectorError>;

    /// Stops caring about an answer.
    ///
    /// If still waiting, this drops the request's correlation entries and
    /// resolves the future with an aborted Enrichment. Returns the status after
    /// the call: [`CompletionStatus::Cancelled`] when this call (or an earlier
    /// one) won, [`CompletionStatus::Done`] when a completion got there first.
    fn cancel(&self) -> CompletionStatus;

    /// Current lifecycle state.
    fn status(&self) -> CompletionStatus;

    /// Id of the request this future tracks.
    fn request_id(&self) -> Uuid;

    /// Whether an acknowledgement resolved the future.
    fn is_done(&self) -> bool {
        self.status() == CompletionStatus::Done
    }

    /// Whether the future was cancelled before an acknowledgement.
    fn is_cancelled(&self) -> bool {
        self.status() == CompletionStatus::Cancelled
    }

    /// Whether the future is still waiting.
    fn is_pending(&self) -> bool {
        self.status() == CompletionStatus::Waiting
    }
}
