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

//! The root orchestrator an application talks to.
//!
//! [`CuratorConnector`] composes the pieces the rest of this crate provides:
//! a primary [`BrokerController`], two topology-configured endpoints (one
//! facing the curator, one receiving its responses), the correlation tables,
//! and the per-request futures. Applications call `connect`, issue requests,
//! await the returned futures, and `disconnect`; dispatch, correlation, and
//! cancellation bookkeeping happen on broker-driven tasks behind this type.

use std::sync::Arc;

use futures::future::join_all;
use static_assertions::assert_impl_all;
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};

use crate::common::config::ConnectorConfig;
use crate::common::controller::BrokerController;
use crate::common::correlation::{ActiveRequest, CorrelationSet};
use crate::common::enrichment::{Enrichment, EnrichmentResult, Failure, ResultHandler};
use crate::common::errors::ConnectorError;
use crate::common::future::{EnrichmentFuture, FutureCore, TracedFuture};
use crate::common::topology::{
    ConfiguredEndpoint, TopologyConfigurator, TopologyRole, DISCONNECT_SUFFIX, ENRICHMENT_SUFFIX,
};
use crate::message::{
    Agent, DeliveryChannel, EnrichmentSpec, JsonCodec, Message, MessageBody, MessageClass,
    MessageCodec,
};
use crate::traits::{BrokerTransport, PayloadHandler};

/// Both configured endpoints, present only between `connect` and
/// `disconnect`.
struct ConnectorLink {
    curator: ConfiguredEndpoint,
    response: ConfiguredEndpoint,
}

/// Client endpoint for asynchronous enrichment requests to a remote curator.
///
/// One connector serves any number of concurrent application tasks: requests,
/// cancellations, and waits all take `&self`. Connect and disconnect are
/// strict: connecting twice or disconnecting while unconnected is a state
/// error, not a silent no-op.
///
/// # Example
///
/// ```ignore
/// let transport = Arc::new(MemoryTransport::new());
/// let connector = CuratorConnector::new(ConnectorConfig::load(), transport);
/// connector.connect().await?;
///
/// let future = connector
///     .request_enrichment(
///         EnrichmentSpec::for_resource("urn:isbn:0451450523"),
///         Arc::new(|result| println!("{} properties", result.additions.len())),
///     )
///     .await?;
/// let enrichment = future.wait().await?;
/// ```
pub struct CuratorConnector {
    config: ConnectorConfig,
    transport: Arc<dyn BrokerTransport>,
    codec: Arc<dyn MessageCodec>,
    agent: Agent,
    correlation: Arc<CorrelationSet>,
    primary: Arc<BrokerController>,
    link: RwLock<Option<ConnectorLink>>,
}

impl CuratorConnector {
    /// Creates a connector using the reference JSON codec and a freshly
    /// generated agent identity. No I/O happens until
    /// [`connect`](Self::connect).
    #[must_use]
    pub fn new(config: ConnectorConfig, transport: Arc<dyn BrokerTransport>) -> Self {
        Self::with_codec(config, transport, Arc::new(JsonCodec::new()))
    }

    /// Creates a connector with a caller-supplied codec.
    #[must_use]
    pub fn with_codec(
        config: ConnectorConfig,
        transport: Arc<dyn BrokerTransport>,
        codec: Arc<dyn MessageCodec>,
    ) -> Self {
        let primary = Arc::new(BrokerController::new(
            config.broker.clone(),
            Arc::clone(&transport),
        ));
        Self {
            config,
            transport,
            codec,
            agent: Agent::generate(),
            correlation: Arc::new(CorrelationSet::default()),
            primary,
            link: RwLock::new(None),
        }
    }

    /// Replaces the generated agent identity. Call before `connect`; the
    /// identity is burned into the topology once configured.
    #[must_use]
    pub fn with_agent(mut self, agent: Agent) -> Self {
        self.agent = agent;
        self
    }

    /// The identity requests are submitted under.
    #[must_use]
    pub const fn agent(&self) -> &Agent {
        &self.agent
    }

    /// Whether the connector is currently connected.
    pub async fn is_connected(&self) -> bool {
        self.link.read().await.is_some()
    }

    /// The effective response channel, once connected. This is the address
    /// requests carry as their `reply_to`.
    pub async fn response_channel(&self) -> Option<DeliveryChannel> {
        let link = self.link.read().await;
        link.as_ref().map(|link| link.response.channel().clone())
    }

    /// The effective curator channel, once connected.
    pub async fn curator_channel(&self) -> Option<DeliveryChannel> {
        let link = self.link.read().await;
        link.as_ref().map(|link| link.curator.channel().clone())
    }

    /// Requests awaiting an acknowledgement.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.correlation.pending_len()
    }

    /// Accepted requests whose result stream is still subscribed.
    #[must_use]
    pub fn active_requests(&self) -> usize {
        self.correlation.active_len()
    }

    /// Connects to the broker and configures the topology for both
    /// endpoints.
    ///
    /// Fails with the "Already connected" state error when called twice. Any
    /// bring-up failure unwinds everything opened so far; a failed connect
    /// leaves no broker state behind.
    pub async fn connect(&self) -> Result<(), ConnectorError> {
        let mut slot = self.link.write().await;
        if slot.is_some() {
            return Err(ConnectorError::already_connected());
        }

        self.primary.connect().await?;
        match self.bring_up().await {
            Ok(link) => {
                info!(
                    agent = %self.agent.id,
                    curator = %link.curator.channel(),
                    response = %link.response.channel(),
                    "connector ready"
                );
                *slot = Some(link);
                Ok(())
            }
            Err(error) => {
                if let Err(teardown) = self.primary.disconnect().await {
                    warn!(error = %teardown, "primary teardown after failed connect");
                }
                Err(error)
            }
        }
    }

    /// Submits an enrichment request and returns the future that resolves
    /// with its acknowledgement.
    ///
    /// The correlation entry is registered before the publish goes out, so an
    /// answer arriving immediately still finds it. `handler` is invoked once
    /// per [`EnrichmentResult`] the curator later streams for an accepted
    /// request; it runs on a broker-driven task and must not block.
    ///
    /// On publish failure the error is surfaced and the request stays
    /// pending; it resolves as aborted at disconnect unless an answer arrives
    /// after all.
    pub async fn request_enrichment(
        &self,
        spec: EnrichmentSpec,
        handler: ResultHandler,
    ) -> Result<TracedFuture<EnrichmentFuture>, ConnectorError> {
        let slot = self.link.read().await;
        let link = slot.as_ref().ok_or_else(ConnectorError::not_connected)?;

        let target_resource = spec.target_resource.clone();
        let message =
            Message::enrichment_request(self.agent.clone(), link.response.channel().clone(), spec);
        let request_id = message.id();

        let core = FutureCore::new(request_id, Arc::clone(&self.correlation));
        self.correlation.register(
            request_id,
            Arc::clone(&core),
            ActiveRequest {
                handler,
                target_resource: target_resource.clone(),
            },
        );

        let payload = match self.codec.encode(&message) {
            Ok(payload) => payload,
            Err(error) => {
                self.correlation.drop_request(&request_id);
                return Err(ConnectorError::conversion(
                    "Encoding enrichment request",
                    error,
                ));
            }
        };

        let routing_key = format!(
            "{}.{ENRICHMENT_SUFFIX}",
            link.curator.channel().routing_key_or_empty()
        );
        info!(
            request_id = %request_id,
            target_resource = %target_resource,
            routing_key = %routing_key,
            "publishing enrichment request"
        );
        link.curator
            .controller()
            .publish_message(link.curator.channel(), &routing_key, payload)
            .await?;

        Ok(TracedFuture::new(EnrichmentFuture::new(core)))
    }

    /// Stops the result stream of an accepted enrichment.
    ///
    /// Best-effort and non-blocking: cancels the enrichment handle and, only
    /// when that transition reports the enrichment was previously active,
    /// removes the active-request entry so later results are dropped. The
    /// curator is not notified; its remaining responses go unmatched.
    pub fn cancel_enrichment(&self, enrichment: &Enrichment) {
        if !enrichment.cancel() {
            debug!("enrichment was not active; nothing to stop");
            return;
        }
        match enrichment.message_id() {
            Ok(request_id) => {
                let target = self.correlation.target_resource(&request_id);
                let removed = self.correlation.remove_active(&request_id);
                info!(
                    request_id = %request_id,
                    target_resource = target.as_deref().unwrap_or("<unknown>"),
                    removed,
                    "enrichment cancelled"
                );
            }
            Err(_) => debug!("aborted enrichment carries no request id"),
        }
    }

    /// Notifies the curator and tears everything down.
    ///
    /// The disconnect notice is best-effort: when its publish fails, cleanup
    /// still runs to completion and the failure is returned afterwards. Every
    /// request still pending is aborted (its future resolves cancelled with an
    /// aborted enrichment) and both correlation tables are emptied. Dedicated
    /// endpoint controllers disconnect before the primary.
    pub async fn disconnect(&self) -> Result<(), ConnectorError> {
        let mut slot = self.link.write().await;
        let link = slot.take().ok_or_else(ConnectorError::not_connected)?;

        let notice = self.publish_disconnect(&link).await;
        if let Err(error) = &notice {
            warn!(error = %error, "disconnect notice could not be published");
        }

        let pending = self.correlation.abort_all();
        if !pending.is_empty() {
            info!(count = pending.len(), "aborting requests still pending");
            for core in pending {
                core.cancel();
            }
        }

        let mut dedicated = Vec::new();
        if link.response.is_dedicated() {
            dedicated.push(Arc::clone(link.response.controller()));
        }
        if link.curator.is_dedicated() {
            dedicated.push(Arc::clone(link.curator.controller()));
        }
        for outcome in join_all(dedicated.iter().map(|c| c.disconnect())).await {
            if let Err(error) = outcome {
                warn!(error = %error, "dedicated controller disconnect failed");
            }
        }
        if let Err(error) = self.primary.disconnect().await {
            warn!(error = %error, "primary controller disconnect failed");
        }

        info!(agent = %self.agent.id, "connector closed");
        notice
    }

    /// Configures both endpoints and installs the response consumer,
    /// unwinding dedicated resources on any failure.
    async fn bring_up(&self) -> Result<ConnectorLink, ConnectorError> {
        let curator = TopologyConfigurator::new(TopologyRole::Curator, self.config.curator.clone())
            .configure(&self.primary, &self.transport, None)
            .await?;

        // Queue reuse only makes sense when both endpoints land on the same
        // broker.
        let response_broker = self
            .config
            .response
            .broker
            .as_ref()
            .unwrap_or_else(|| self.primary.broker());
        let peer_queue =
            (response_broker == curator.controller().broker()).then(|| curator.queue());

        let response = match TopologyConfigurator::new(
            TopologyRole::Connector {
                agent_id: self.agent.id,
            },
            self.config.response.clone(),
        )
        .configure(&self.primary, &self.transport, peer_queue)
        .await
        {
            Ok(endpoint) => endpoint,
            Err(error) => {
                Self::teardown_endpoint(&curator).await;
                return Err(error);
            }
        };

        if let Err(error) = self.install_consumer(&response).await {
            Self::teardown_endpoint(&response).await;
            Self::teardown_endpoint(&curator).await;
            return Err(error);
        }

        Ok(ConnectorLink { curator, response })
    }

    /// Registers the single transport consumer on the response queue. Its
    /// callback fans each payload out to the acknowledgement handler and the
    /// result handler; each decodes against its own expected class and
    /// ignores what is not addressed to it.
    async fn install_consumer(&self, response: &ConfiguredEndpoint) -> Result<(), ConnectorError> {
        let codec = Arc::clone(&self.codec);
        let correlation = Arc::clone(&self.correlation);
        let handler: PayloadHandler = Arc::new(move |payload: Vec<u8>| {
            handle_acknowledgement(codec.as_ref(), &correlation, &payload);
            handle_result(codec.as_ref(), &correlation, &payload);
        });
        response
            .controller()
            .register_consumer(response.queue(), handler)
            .await
    }

    /// Disconnects an endpoint's dedicated controller, if it has one.
    async fn teardown_endpoint(endpoint: &ConfiguredEndpoint) {
        if !endpoint.is_dedicated() {
            return;
        }
        if let Err(error) = endpoint.controller().disconnect().await {
            warn!(
                broker = %endpoint.controller().broker(),
                error = %error,
                "dedicated endpoint teardown failed"
            );
        }
    }

    async fn publish_disconnect(&self, link: &ConnectorLink) -> Result<(), ConnectorError> {
        let message = Message::disconnect(self.agent.clone(), link.response.channel().clone());
        let payload = self
            .codec
            .encode(&message)
            .map_err(|e| ConnectorError::conversion("Encoding disconnect notice", e))?;
        let routing_key = format!(
            "{}.{DISCONNECT_SUFFIX}",
            link.curator.channel().routing_key_or_empty()
        );
        link.curator
            .controller()
            .publish_message(link.curator.channel(), &routing_key, payload)
            .await
    }
}

impl std::fmt::Debug for CuratorConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CuratorConnector")
            .field("agent", &self.agent)
            .field("broker", &self.config.broker)
            .field("pending_requests", &self.pending_requests())
            .field("active_requests", &self.active_requests())
            .finish_non_exhaustive()
    }
}

/// Resolves pending futures from Accepted and Failure acknowledgements.
fn handle_acknowledgement(codec: &dyn MessageCodec, correlation: &CorrelationSet, payload: &[u8]) {
    let message = match codec.decode(payload, MessageClass::Acknowledgement) {
        Ok(Some(message)) => message,
        Ok(None) => return,
        Err(error) => {
            warn!(
                class = %MessageClass::Acknowledgement,
                error = %error,
                "undecodable payload on the response queue"
            );
            return;
        }
    };
    let Some(request_id) = message.response_to() else {
        return;
    };

    match message.body() {
        MessageBody::Accepted { .. } => match correlation.take_pending(&request_id) {
            Some(core) => {
                debug!(request_id = %request_id, "request accepted");
                core.complete(Enrichment::accepted(request_id));
            }
            // Still tracked means a duplicate accept; untracked means the
            // request already resolved or was never ours.
            None => debug!(
                request_id = %request_id,
                tracked = correlation.contains(&request_id),
                "accept for an unknown request dropped"
            ),
        },
        MessageBody::Failure {
            code,
            subcode,
            reason,
            detail,
            ..
        } => {
            let pending = correlation.take_pending(&request_id);
            // No result stream follows a failure.
            correlation.remove_active(&request_id);
            match pending {
                Some(core) => {
                    info!(request_id = %request_id, code, reason = %reason, "request failed");
                    let failure = Failure::new(*code, *subcode, reason.clone(), detail.clone());
                    core.complete(Enrichment::failed(request_id, failure));
                }
                None => debug!(
                    request_id = %request_id,
                    "failure for an unknown request dropped"
                ),
            }
        }
        _ => {}
    }
}

/// Dispatches EnrichmentResponse payloads to the registered result handler.
fn handle_result(codec: &dyn MessageCodec, correlation: &CorrelationSet, payload: &[u8]) {
    let message = match codec.decode(payload, MessageClass::EnrichmentResponse) {
        Ok(Some(message)) => message,
        Ok(None) => return,
        Err(error) => {
            warn!(
                class = %MessageClass::EnrichmentResponse,
                error = %error,
                "undecodable payload on the response queue"
            );
            return;
        }
    };
    let Some(request_id) = message.response_to() else {
        return;
    };

    if let MessageBody::EnrichmentResponse {
        response_number,
        target_resource,
        additions,
        removals,
        ..
    } = message.body()
    {
        match correlation.result_handler(&request_id) {
            Some(handler) => {
                trace!(
                    request_id = %request_id,
                    response_number,
                    "dispatching enrichment result"
                );
                handler(EnrichmentResult {
                    request_id,
                    response_number: *response_number,
                    target_resource: target_resource.clone(),
                    additions: additions.clone(),
                    removals: removals.clone(),
                });
            }
            None => debug!(
                request_id = %request_id,
                "enrichment result for an unknown request dropped"
            ),
        }
    }
}

// The connector is shared across application tasks and broker-driven tasks.
assert_impl_all!(CuratorConnector: Send, Sync);
