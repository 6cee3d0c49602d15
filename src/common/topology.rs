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

//! Self-configuring broker topology.
//!
//! A caller describes an endpoint partially (maybe just a routing key, maybe
//! a full broker/exchange/queue triple) and [`TopologyConfigurator`] turns it
//! into an *effective configuration*: exchanges declared, queues declared and
//! bound, every omitted field resolved. The two [`TopologyRole`]s share the
//! whole algorithm and differ only in how binding keys and the effective
//! routing key derive from the caller's base key.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::common::controller::BrokerController;
use crate::common::errors::ConnectorError;
use crate::message::DeliveryChannel;
use crate::traits::BrokerTransport;

/// Exchange used when the caller leaves the exchange name unset.
///
/// Brokers provide this topic exchange out of the box, which is why topology
/// setup skips declaring it on a shared broker.
pub const DEFAULT_EXCHANGE: &str = "amq.topic";

/// Routing-key suffix for enrichment requests to the curator.
pub const ENRICHMENT_SUFFIX: &str = "enrichment";

/// Routing-key suffix for disconnect notices to the curator.
pub const DISCONNECT_SUFFIX: &str = "disconnect";

/// Which side of the protocol an endpoint faces.
///
/// The role decides routing-key derivation. The curator side listens on one
/// well-known key family; the connector side suffixes its agent id so many
/// connectors can multiplex one exchange without seeing each other's
/// responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopologyRole {
    /// The endpoint requests are published to: binds `<key>.enrichment` and
    /// `<key>.disconnect`; the effective routing key stays the bare base key
    /// (publish paths append the per-message suffix).
    Curator,

    /// The endpoint responses come back on: binds `<key>.<agent_id>`, which
    /// is also the effective routing key.
    Connector {
        /// Identity of the requesting agent.
        agent_id: Uuid,
    },
}

impl TopologyRole {
    /// The binding-key patterns to attach to the endpoint's queue, derived
    /// from the caller's base routing key.
    #[must_use]
    pub fn binding_keys(&self, base: &str) -> Vec<String> {
        match self {
            Self::Curator => vec![
                format!("{base}.{ENRICHMENT_SUFFIX}"),
                format!("{base}.{DISCONNECT_SUFFIX}"),
            ],
            Self::Connector { agent_id } => vec![format!("{base}.{agent_id}")],
        }
    }

    /// The routing key the effective configuration carries.
    #[must_use]
    pub fn effective_key(&self, base: &str) -> String {
        match self {
            Self::Curator => base.to_string(),
            Self::Connector { agent_id } => format!("{base}.{agent_id}"),
        }
    }
}

/// A fully resolved endpoint: the effective channel plus the controller that
/// owns its broker resources.
#[derive(Debug)]
pub struct ConfiguredEndpoint {
    channel: DeliveryChannel,
    queue: String,
    controller: Arc<BrokerController>,
    dedicated: bool,
}

impl ConfiguredEndpoint {
    /// The effective configuration: every field resolved.
    #[must_use]
    pub const fn channel(&self) -> &DeliveryChannel {
        &self.channel
    }

    /// Name of the endpoint's queue.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Controller holding the endpoint's broker resources. The shared primary
    /// controller unless the endpoint named a different broker.
    #[must_use]
    pub const fn controller(&self) -> &Arc<BrokerController> {
        &self.controller
    }

    /// Whether this endpoint opened a dedicated broker connection (and so
    /// owns its disconnect).
    #[must_use]
    pub const fn is_dedicated(&self) -> bool {
        self.dedicated
    }
}

/// Declares and binds the broker resources a partially specified endpoint
/// needs, yielding its effective configuration.
#[derive(Debug)]
pub struct TopologyConfigurator {
    role: TopologyRole,
    desired: DeliveryChannel,
}

impl TopologyConfigurator {
    /// Creates a configurator for one endpoint description.
    #[must_use]
    pub const fn new(role: TopologyRole, desired: DeliveryChannel) -> Self {
        Self { role, desired }
    }

    /// Resolves the endpoint against the broker.
    ///
    /// Uses `primary` unless the endpoint names a different broker, in which
    /// case a dedicated controller is opened (and torn down again should any
    /// later step fail; a shared controller is never unwound here). The
    /// exchange is declared only when it is not the preexisting default on a
    /// shared broker. When the endpoint names the same queue as `peer_queue`,
    /// the peer's queue is reused instead of redeclared, so co-located
    /// endpoints share one queue.
    pub async fn configure(
        &self,
        primary: &Arc<BrokerController>,
        transport: &Arc<dyn BrokerTransport>,
        peer_queue: Option<&str>,
    ) -> Result<ConfiguredEndpoint, ConnectorError> {
        let (controller, dedicated) = match &self.desired.broker {
            Some(broker) if broker != primary.broker() => {
                debug!(broker = %broker, "endpoint names a dedicated broker");
                let controller = Arc::new(BrokerController::new(
                    broker.clone(),
                    Arc::clone(transport),
                ));
                controller.connect().await?;
                (controller, true)
            }
            _ => (Arc::clone(primary), false),
        };

        match self.apply(&controller, dedicated, peer_queue).await {
            Ok((channel, queue)) => {
                info!(
                    role = ?self.role,
                    channel = %channel,
                    dedicated,
                    "endpoint configured"
                );
                Ok(ConfiguredEndpoint {
                    channel,
                    queue,
                    controller,
                    dedicated,
                })
            }
            Err(error) => {
                if dedicated {
                    if let Err(teardown) = controller.disconnect().await {
                        warn!(
                            broker = %controller.broker(),
                            error = %teardown,
                            "tearing down dedicated controller after failed configuration"
                        );
                    }
                }
                Err(error)
            }
        }
    }

    /// Declares, binds, and resolves. Split out so `configure` can unwind a
    /// dedicated controller on any failure.
    async fn apply(
        &self,
        controller: &Arc<BrokerController>,
        dedicated: bool,
        peer_queue: Option<&str>,
    ) -> Result<(DeliveryChannel, String), ConnectorError> {
        let exchange = if self.desired.exchange_name.is_empty() {
            DEFAULT_EXCHANGE
        } else {
            self.desired.exchange_name.as_str()
        };
        if exchange != DEFAULT_EXCHANGE || dedicated {
            controller.declare_exchange(exchange).await?;
        }

        let queue = match self.desired.queue_name.as_deref() {
            Some(name) if peer_queue == Some(name) => {
                debug!(queue = %name, "reusing the peer's queue");
                name.to_string()
            }
            other => controller.declare_queue(other).await?,
        };

        let base = self.desired.routing_key_or_empty();
        for binding_key in self.role.binding_keys(base) {
            controller.bind_queue(exchange, &queue, &binding_key).await?;
        }

        let channel = DeliveryChannel {
            broker: Some(controller.broker().clone()),
            exchange_name: exchange.to_string(),
            queue_name: Some(queue.clone()),
            routing_key: Some(self.role.effective_key(base)),
        };
        Ok((channel, queue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curator_binding_keys() {
        let keys = TopologyRole::Curator.binding_keys("curator");
        assert_eq!(keys, vec!["curator.enrichment", "curator.disconnect"]);
        assert_eq!(TopologyRole::Curator.effective_key("curator"), "curator");
    }

    #[test]
    fn test_connector_binding_keys() {
        let agent_id = Uuid::new_v4();
        let role = TopologyRole::Connector { agent_id };

        let keys = role.binding_keys("curator.response");
        assert_eq!(keys, vec![format!("curator.response.{agent_id}")]);
        assert_eq!(
            role.effective_key("curator.response"),
            format!("curator.response.{agent_id}")
        );
    }

    #[test]
    fn test_unset_base_key_derives_from_empty() {
        let keys = TopologyRole::Curator.binding_keys("");
        assert_eq!(keys, vec![".enrichment", ".disconnect"]);
    }
}
