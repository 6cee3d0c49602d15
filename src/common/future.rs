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

//! Per-request futures: the completion/cancellation state machine and its
//! logging wrapper.
//!
//! The state machine is first-writer-wins: whichever of completion and
//! cancellation transitions the core out of `Waiting` decides the terminal
//! state, and the loser observes that decision instead of overwriting it. The
//! resolved [`Enrichment`] travels through a single-slot handoff
//! (`tokio::sync::watch`), so waiting never consumes it and every waiter,
//! before or after resolution, observes the same instance.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::common::correlation::CorrelationSet;
use crate::common::enrichment::Enrichment;
use crate::common::errors::ConnectorError;
use crate::traits::{CompletionStatus, RequestFuture};

/// Shared state of one request future.
///
/// The correlation table holds one reference and every future handle another;
/// both drive transitions through the same first-writer-wins gate.
pub(crate) struct FutureCore {
    request_id: Uuid,
    state: Mutex<CompletionStatus>,
    slot: watch::Sender<Option<Enrichment>>,
    correlation: Arc<CorrelationSet>,
}

impl FutureCore {
    /// Creates a core in the `Waiting` state.
    pub fn new(request_id: Uuid, correlation: Arc<CorrelationSet>) -> Arc<Self> {
        let (slot, _) = watch::channel(None);
        Arc::new(Self {
            request_id,
            state: Mutex::new(CompletionStatus::Waiting),
            slot,
            correlation,
        })
    }

    /// Id of the request this core tracks.
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Current lifecycle state.
    pub fn status(&self) -> CompletionStatus {
        *self.state.lock()
    }

    /// Resolves the future with an acknowledgement-derived outcome.
    ///
    /// Returns the status after the call; from a terminal state this is a
    /// no-op reporting that state.
    pub fn complete(&self, enrichment: Enrichment) -> CompletionStatus {
        let mut state = self.state.lock();
        if *state != CompletionStatus::Waiting {
            return *state;
        }
        self.slot.send_replace(Some(enrichment));
        *state = CompletionStatus::Done;
        CompletionStatus::Done
    }

    /// Cancels the future, resolving it with an aborted outcome.
    ///
    /// Drops the request's correlation entries, so an acknowledgement arriving
    /// later finds nothing and is discarded. Returns the status after the
    /// call; from a terminal state this is a no-op reporting that state.
    pub fn cancel(&self) -> CompletionStatus {
        let mut state = self.state.lock();
        if *state != CompletionStatus::Waiting {
            return *state;
        }
        self.correlation.drop_request(&self.request_id);
        self.slot.send_replace(Some(Enrichment::aborted()));
        *state = CompletionStatus::Cancelled;
        CompletionStatus::Cancelled
    }

    /// Waits for the handoff slot to hold an outcome and clones it out.
    async fn await_slot(&self) -> Result<Enrichment, ConnectorError> {
        let mut receiver = self.slot.subscribe();
        let slot = receiver
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ConnectorError::state("Request future abandoned before resolution"))?;
        slot.clone()
            .ok_or_else(|| ConnectorError::state("Completion slot emptied unexpectedly"))
    }
}

/// The base request future handed out for every submitted request.
pub struct EnrichmentFuture {
    core: Arc<FutureCore>,
}

impl EnrichmentFuture {
    pub(crate) fn new(core: Arc<FutureCore>) -> Self {
        Self { core }
    }
}

#[async_trait]
impl RequestFuture for EnrichmentFuture {
    async fn wait(&self) -> Result<Enrichment, ConnectorError> {
        self.core.await_slot().await
    }

    async fn wait_timeout(&self, timeout: Duration) -> Result<Enrichment, ConnectorError> {
        match tokio::time::timeout(timeout, self.core.await_slot()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ConnectorError::timeout(timeout)),
        }
    }

    fn cancel(&self) -> CompletionStatus {
        self.core.cancel()
    }

    fn status(&self) -> CompletionStatus {
        self.core.status()
    }

    fn request_id(&self) -> Uuid {
        self.core.request_id()
    }
}

impl std::fmt::Debug for EnrichmentFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrichmentFuture")
            .field("request_id", &self.core.request_id())
            .field("status", &self.core.status())
            .finish_non_exhaustive()
    }
}

/// Wraps any [`RequestFuture`] to record wait durations and outcomes.
///
/// Pure observation: every call delegates to the wrapped future and the
/// semantics are unchanged. The timer starts when the wrapper is created,
/// which the connector does as soon as the request is published.
pub struct TracedFuture<F> {
    inner: F,
    started: Instant,
}

impl<F: RequestFuture> TracedFuture<F> {
    pub(crate) fn new(inner: F) -> Self {
        Self {
            inner,
            started: Instant::now(),
        }
    }

    /// How long this request has been outstanding.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[async_trait]
impl<F: RequestFuture> RequestFuture for TracedFuture<F> {
    async fn wait(&self) -> Result<Enrichment, ConnectorError> {
        let outcome = self.inner.wait().await;
        match &outcome {
            Ok(enrichment) => info!(
                request_id = %self.inner.request_id(),
                waited_ms = self.started.elapsed().as_millis() as u64,
                state = ?enrichment.state(),
                "enrichment resolved"
            ),
            Err(error) => warn!(
                request_id = %self.inner.request_id(),
                error = %error,
                "wait on enrichment future failed"
            ),
        }
        outcome
    }

    async fn wait_timeout(&self, timeout: Duration) -> Result<Enrichment, ConnectorError> {
        let outcome = self.inner.wait_timeout(timeout).await;
        match &outcome {
            Ok(enrichment) => info!(
                request_id = %self.inner.request_id(),
                waited_ms = self.started.elapsed().as_millis() as u64,
                state = ?enrichment.state(),
                "enrichment resolved"
            ),
            Err(ConnectorError::Timeout { .. }) => debug!(
                request_id = %self.inner.request_id(),
                timeout_ms = timeout.as_millis() as u64,
                "enrichment still outstanding after bounded wait"
            ),
            Err(error) => warn!(
                request_id = %self.inner.request_id(),
                error = %error,
                "wait on enrichment future failed"
            ),
        }
        outcome
    }

    fn cancel(&self) -> CompletionStatus {
        let status = self.inner.cancel();
        info!(
            request_id = %self.inner.request_id(),
            outstanding_ms = self.started.elapsed().as_millis() as u64,
            status = ?status,
            "request future cancelled"
        );
        status
    }

    fn status(&self) -> CompletionStatus {
        self.inner.status()
    }

    fn request_id(&self) -> Uuid {
        self.inner.request_id()
    }
}

impl<F: RequestFuture> std::fmt::Debug for TracedFuture<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracedFuture")
            .field("request_id", &self.inner.request_id())
            .field("status", &self.inner.status())
            .field("elapsed", &self.started.elapsed())
            .finish_non_exhaustive()
    }
}
