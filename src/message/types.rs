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

//! Value types shared by the message model, the topology layer, and configuration.

use std::fmt;

use derive_new::new;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default broker host applied when the field is unset.
fn default_host() -> String {
    "localhost".to_string()
}

/// Default AMQP-style broker port.
const fn default_port() -> u16 {
    5672
}

/// Default virtual host.
fn default_virtual_host() -> String {
    "/".to_string()
}

/// Identifies a message-broker endpoint.
///
/// Equality is value equality over all three fields; the topology layer compares
/// a requested broker against the configured default to decide whether an
/// endpoint needs a dedicated connection.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Broker {
    /// Broker host name or address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Broker port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Virtual host namespace on the broker.
    #[serde(default = "default_virtual_host")]
    pub virtual_host: String,
}

impl Default for Broker {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            virtual_host: default_virtual_host(),
        }
    }
}

impl Broker {
    /// Creates a broker endpoint with an explicit host and port and the default
    /// virtual host.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            virtual_host: default_virtual_host(),
        }
    }

    /// Replaces the virtual host.
    #[must_use]
    pub fn with_virtual_host(mut self, virtual_host: impl Into<String>) -> Self {
        self.virtual_host = virtual_host.into();
        self
    }
}

impl fmt::Display for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}{}", self.host, self.port, self.virtual_host)
    }
}

/// Address for publishing to or consuming from the broker.
///
/// Callers supply a partial channel (any field may be left unset); topology
/// setup completes it into an "effective configuration" with the resolved
/// broker, exchange, queue name, and routing key filled in.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryChannel {
    /// Broker endpoint; `None` means the configured default broker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker: Option<Broker>,

    /// Exchange name; empty means the default exchange.
    #[serde(default)]
    pub exchange_name: String,

    /// Queue name; `None` requests a broker-assigned name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_name: Option<String>,

    /// Routing key; `None` is treated as the empty key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,
}

impl DeliveryChannel {
    /// Creates an empty channel to be filled in with the builder methods.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the broker endpoint.
    #[must_use]
    pub fn with_broker(mut self, broker: Broker) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Sets the exchange name.
    #[must_use]
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange_name = exchange.into();
        self
    }

    /// Sets the queue name.
    #[must_use]
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue_name = Some(queue.into());
        self
    }

    /// Sets the routing key.
    #[must_use]
    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    /// The routing key, with `None` collapsed to the empty key.
    #[must_use]
    pub fn routing_key_or_empty(&self) -> &str {
        self.routing_key.as_deref().unwrap_or("")
    }
}

impl fmt::Display for DeliveryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "exchange={} queue={} routing_key={}",
            if self.exchange_name.is_empty() {
                "<default>"
            } else {
                &self.exchange_name
            },
            self.queue_name.as_deref().unwrap_or("<assigned>"),
            self.routing_key_or_empty(),
        )
    }
}

/// A protocol participant (the application or the curator), identified by UUID.
#[derive(new, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Agent {
    /// Participant identity.
    pub id: Uuid,
}

impl Agent {
    /// Creates an agent with a freshly generated v4 identity.
    #[must_use]
    pub fn generate() -> Self {
        Self { id: Uuid::new_v4() }
    }
}

/// A single property/value pair carried by an enrichment result.
#[derive(new, Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PropertyValue {
    /// Property name.
    pub property: String,
    /// Property value.
    pub value: serde_json::Value,
}

/// Selects the properties a request is interested in.
#[derive(new, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PropertySelector {
    /// Property name to select on.
    pub property: String,
    /// Match pattern for the property.
    pub pattern: String,
}

/// A named constraint attached to an enrichment request.
#[derive(new, Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Constraint {
    /// Constraint name.
    pub name: String,
    /// Constraint value.
    pub value: serde_json::Value,
}

/// Caller input to a new enrichment request.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EnrichmentSpec {
    /// The resource enrichment is requested for.
    pub target_resource: String,

    /// Property selectors narrowing the request.
    #[serde(default)]
    pub filters: Vec<PropertySelector>,

    /// Constraints the curator should honour.
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

impl EnrichmentSpec {
    /// Creates a spec for a target resource with no filters or constraints.
    #[must_use]
    pub fn for_resource(target_resource: impl Into<String>) -> Self {
        Self {
            target_resource: target_resource.into(),
            filters: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// Adds a property selector.
    #[must_use]
    pub fn with_filter(mut self, filter: PropertySelector) -> Self {
        self.filters.push(filter);
        self
    }

    /// Adds a constraint.
    #[must_use]
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_defaults() {
        let broker = Broker::default();
        assert_eq!(broker.host, "localhost");
        assert_eq!(broker.port, 5672);
        assert_eq!(broker.virtual_host, "/");
    }

    #[test]
    fn test_broker_value_equality() {
        let a = Broker::new("curator.example", 5672);
        let b = Broker::new("curator.example", 5672);
        let c = Broker::new("curator.example", 5673);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, a.clone().with_virtual_host("/staging"));
    }

    #[test]
    fn test_broker_deserialization_defaults() {
        let broker: Broker = serde_json::from_str("{}").unwrap();
        assert_eq!(broker, Broker::default());

        let broker: Broker = serde_json::from_str(r#"{"host": "remote"}"#).unwrap();
        assert_eq!(broker.host, "remote");
        assert_eq!(broker.port, 5672);
    }

    #[test]
    fn test_delivery_channel_builder() {
        let channel = DeliveryChannel::new()
            .with_exchange("curation")
            .with_queue("curator.requests")
            .with_routing_key("curator");

        assert_eq!(channel.exchange_name, "curation");
        assert_eq!(channel.queue_name.as_deref(), Some("curator.requests"));
        assert_eq!(channel.routing_key_or_empty(), "curator");
        assert!(channel.broker.is_none());
    }

    #[test]
    fn test_delivery_channel_empty_routing_key() {
        let channel = DeliveryChannel::new();
        assert_eq!(channel.routing_key_or_empty(), "");
    }

    #[test]
    fn test_enrichment_spec_builder() {
        let spec = EnrichmentSpec::for_resource("resource:1234")
            .with_filter(PropertySelector::new("colour".to_string(), "*".to_string()))
            .with_constraint(Constraint::new(
                "max-results".to_string(),
                serde_json::json!(10),
            ));

        assert_eq!(spec.target_resource, "resource:1234");
        assert_eq!(spec.filters.len(), 1);
        assert_eq!(spec.constraints.len(), 1);
    }
}
