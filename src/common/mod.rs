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
pub use config::{ConfigError, ConnectorConfig};
pub use connector::CuratorConnector;
pub use controller::{BrokerController, SEQUENCE_HEADER};
pub use enrichment::{AckState, Enrichment, EnrichmentResult, Failure, ResultHandler};
pub use errors::{ConnectorError, ALREADY_CONNECTED, NOT_CONNECTED};
pub use future::{EnrichmentFuture, TracedFuture};
pub use topology::{
    ConfiguredEndpoint, TopologyConfigurator, TopologyRole, DEFAULT_EXCHANGE, DISCONNECT_SUFFIX,
    ENRICHMENT_SUFFIX,
};

mod config;
mod connector;
mod controller;
pub(crate) mod correlation;
mod enrichment;
mod errors;
mod future;
mod topology;
