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

//! Connection and channel management for one broker endpoint.
//!
//! [`BrokerController`] owns a single transport connection and layers policy
//! on top of it: a read/write lock separating lifecycle transitions from
//! steady-state traffic, a checkout/checkin pool of publish channels, a LIFO
//! stack of cleanup actions replayed at disconnect, and a one-shot retry for
//! structural declares the transport classifies as recoverable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::common::errors::ConnectorError;
use crate::message::{Broker, DeliveryChannel};
use crate::traits::{
    BrokerChannel, BrokerConnection, BrokerTransport, ExchangeOptions, PayloadHandler, Publication,
    QueueOptions, TransportError, TransportEvent,
};

/// Diagnostic header stamped on every outbound publication: a per-controller
/// monotonically increasing counter used only for log correlation.
pub const SEQUENCE_HEADER: &str = "x-sequence";

/// How long an unconsumed protocol queue lingers before the broker drops it.
const QUEUE_EXPIRY: Duration = Duration::from_secs(1);

/// Live transport state, present only between `connect` and `disconnect`.
///
/// The control channel carries every structural declare and every consumer
/// registration; it sits behind an async mutex because the recover-and-retry
/// path must hold it across transport awaits while it swaps in a fresh
/// channel.
struct ControllerCore {
    connection: Box<dyn BrokerConnection>,
    control: AsyncMutex<Box<dyn BrokerChannel>>,
}

/// Inverse of a structural declare, replayed at disconnect.
enum CleanupAction {
    DeleteQueue {
        queue: String,
    },
    Unbind {
        exchange: String,
        queue: String,
        routing_key: String,
    },
}

impl CleanupAction {
    async fn run(&self, channel: &dyn BrokerChannel) -> Result<(), TransportError> {
        match self {
            Self::DeleteQueue { queue } => channel.delete_queue(queue).await,
            Self::Unbind {
                exchange,
                queue,
                routing_key,
            } => channel.unbind_queue(exchange, queue, routing_key).await,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::DeleteQueue { queue } => format!("delete queue '{queue}'"),
            Self::Unbind {
                exchange,
                queue,
                routing_key,
            } => format!("unbind '{queue}' from '{exchange}' under '{routing_key}'"),
        }
    }
}

/// A structural declare the controller may retry once on a fresh channel.
enum StructuralOp<'a> {
    DeclareExchange {
        name: &'a str,
    },
    DeclareQueue {
        name: Option<&'a str>,
    },
    BindQueue {
        exchange: &'a str,
        queue: &'a str,
        routing_key: &'a str,
    },
}

impl StructuralOp<'_> {
    async fn run(&self, channel: &dyn BrokerChannel) -> Result<Option<String>, TransportError> {
        match self {
            Self::DeclareExchange { name } => channel
                .declare_exchange(name, ExchangeOptions::topic())
                .await
                .map(|()| None),
            Self::DeclareQueue { name } => {
                let options = QueueOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: true,
                    expires: Some(QUEUE_EXPIRY),
                };
                channel.declare_queue(*name, options).await.map(Some)
            }
            Self::BindQueue {
                exchange,
                queue,
                routing_key,
            } => channel
                .bind_queue(exchange, queue, routing_key)
                .await
                .map(|()| None),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::DeclareExchange { name } => format!("declare exchange '{name}'"),
            Self::DeclareQueue { name } => {
                format!("declare queue '{}'", name.unwrap_or("<assigned>"))
            }
            Self::BindQueue {
                exchange,
                queue,
                routing_key,
            } => format!("bind '{queue}' to '{exchange}' under '{routing_key}'"),
        }
    }
}

/// Manages the connection, channels, and declared topology for one broker
/// endpoint.
///
/// `connect`/`disconnect` take the write side of the lifecycle lock and so run
/// exclusively; declares, publishes, and consumer registrations take the read
/// side and interleave freely with each other. The controller is cheap to
/// share behind an `Arc` and every method takes `&self`.
pub struct BrokerController {
    broker: Broker,
    transport: Arc<dyn BrokerTransport>,
    core: RwLock<Option<ControllerCore>>,
    pool: Mutex<Vec<Box<dyn BrokerChannel>>>,
    cleanups: Mutex<Vec<CleanupAction>>,
    sequence: AtomicU64,
}

impl BrokerController {
    /// Creates a controller for the given endpoint. No I/O happens until
    /// [`connect`](Self::connect).
    #[must_use]
    pub fn new(broker: Broker, transport: Arc<dyn BrokerTransport>) -> Self {
        Self {
            broker,
            transport,
            core: RwLock::new(None),
            pool: Mutex::new(Vec::new()),
            cleanups: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// The endpoint this controller talks to.
    #[must_use]
    pub const fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Opens the connection and control channel. A no-op when already
    /// connected; on failure any partially opened state is rolled back.
    pub async fn connect(&self) -> Result<(), ConnectorError> {
        let mut slot = self.core.write().await;
        if slot.is_some() {
            debug!(broker = %self.broker, "already connected; nothing to do");
            return Ok(());
        }

        let connection = self.transport.connect(&self.broker).await.map_err(|e| {
            ConnectorError::connection(format!("Opening connection to {}", self.broker), e)
        })?;
        connection.set_event_listener(Arc::new(|event| match event {
            TransportEvent::Returned {
                exchange,
                routing_key,
                reason,
            } => warn!(
                exchange = %exchange,
                routing_key = %routing_key,
                reason = %reason,
                "publication returned unroutable"
            ),
            TransportEvent::Fault { context } => warn!(context = %context, "transport fault"),
        }));

        let control = match connection.open_channel().await {
            Ok(channel) => channel,
            Err(error) => {
                if let Err(close_error) = connection.close().await {
                    debug!(error = %close_error, "closing connection after failed channel open");
                }
                return Err(ConnectorError::channel("Opening control channel", error));
            }
        };

        *slot = Some(ControllerCore {
            connection,
            control: AsyncMutex::new(control),
        });
        info!(broker = %self.broker, "broker connection established");
        Ok(())
    }

    /// Tears the endpoint down: replays registered cleanup actions in LIFO
    /// order, then closes pooled channels, the control channel, and the
    /// connection.
    ///
    /// Fails only when not connected. Cleanup and close failures are logged
    /// and swallowed; teardown always runs to the end.
    pub async fn disconnect(&self) -> Result<(), ConnectorError> {
        let mut slot = self.core.write().await;
        let core = slot.take().ok_or_else(ConnectorError::not_connected)?;
        let control = core.control.into_inner();

        let mut actions = {
            let mut cleanups = self.cleanups.lock();
            std::mem::take(&mut *cleanups)
        };
        while let Some(action) = actions.pop() {
            trace!(action = %action.describe(), "running cleanup");
            if let Err(error) = action.run(control.as_ref()).await {
                warn!(action = %action.describe(), error = %error, "cleanup failed");
            }
        }

        let pooled = {
            let mut pool = self.pool.lock();
            std::mem::take(&mut *pool)
        };
        for channel in pooled {
            if let Err(error) = channel.close().await {
                debug!(error = %error, "pooled channel close failed");
            }
        }

        if let Err(error) = control.close().await {
            debug!(error = %error, "control channel close failed");
        }
        if let Err(error) = core.connection.close().await {
            warn!(broker = %self.broker, error = %error, "connection close failed");
        }
        info!(
            broker = %self.broker,
            messages_published = self.sequence.load(Ordering::Relaxed),
            "broker connection closed"
        );
        Ok(())
    }

    /// Whether the controller currently holds an open connection.
    pub async fn is_connected(&self) -> bool {
        self.core.read().await.is_some()
    }

    /// Messages published through this controller since it was created.
    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Declares a durable, auto-delete topic exchange.
    pub async fn declare_exchange(&self, name: &str) -> Result<(), ConnectorError> {
        let slot = self.core.read().await;
        let core = slot.as_ref().ok_or_else(ConnectorError::not_connected)?;
        self.run_structural(core, StructuralOp::DeclareExchange { name })
            .await?;
        debug!(exchange = %name, "exchange declared");
        Ok(())
    }

    /// Declares a durable, shared, auto-delete queue that expires shortly
    /// after its last consumer leaves, returning its (possibly
    /// broker-assigned) name. Registers a delete cleaner for disconnect.
    pub async fn declare_queue(&self, name: Option<&str>) -> Result<String, ConnectorError> {
        let slot = self.core.read().await;
        let core = slot.as_ref().ok_or_else(ConnectorError::not_connected)?;
        let assigned = self
            .run_structural(core, StructuralOp::DeclareQueue { name })
            .await?
            .ok_or_else(|| ConnectorError::state("Queue declaration returned no name"))?;
        self.cleanups.lock().push(CleanupAction::DeleteQueue {
            queue: assigned.clone(),
        });
        debug!(queue = %assigned, "queue declared");
        Ok(assigned)
    }

    /// Binds a queue to an exchange under a routing-key pattern. Registers an
    /// unbind cleaner for disconnect.
    pub async fn bind_queue(
        &self,
        exchange: &str,
        queue: &str,
        routing_key: &str,
    ) -> Result<(), ConnectorError> {
        let slot = self.core.read().await;
        let core = slot.as_ref().ok_or_else(ConnectorError::not_connected)?;
        self.run_structural(
            core,
            StructuralOp::BindQueue {
                exchange,
                queue,
                routing_key,
            },
        )
        .await?;
        self.cleanups.lock().push(CleanupAction::Unbind {
            exchange: exchange.to_string(),
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
        });
        debug!(exchange = %exchange, queue = %queue, routing_key = %routing_key, "queue bound");
        Ok(())
    }

    /// Declares a queue and binds it in one call, returning the effective
    /// queue name.
    pub async fn prepare_queue(
        &self,
        exchange: &str,
        name: Option<&str>,
        routing_key: &str,
    ) -> Result<String, ConnectorError> {
        let queue = self.declare_queue(name).await?;
        self.bind_queue(exchange, &queue, routing_key).await?;
        Ok(queue)
    }

    /// Publishes a payload to the channel's exchange under the given routing
    /// key.
    ///
    /// The publish runs on a channel checked out of the pool (opened lazily),
    /// private to this call for its duration. The publication is mandatory,
    /// so unroutable messages come back through the event listener instead of
    /// vanishing, and carries the [`SEQUENCE_HEADER`] diagnostic counter. On
    /// I/O failure the checked-out channel is discarded, forcing the next
    /// publish onto a fresh one.
    pub async fn publish_message(
        &self,
        channel: &DeliveryChannel,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> Result<(), ConnectorError> {
        let slot = self.core.read().await;
        let core = slot.as_ref().ok_or_else(ConnectorError::not_connected)?;
        let publisher = self.checkout_channel(core).await?;

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let publication = Publication::new(payload)
            .mandatory()
            .with_header(SEQUENCE_HEADER, serde_json::json!(sequence));
        trace!(
            exchange = %channel.exchange_name,
            routing_key = %routing_key,
            sequence,
            "publishing message"
        );

        match publisher
            .publish(&channel.exchange_name, routing_key, publication)
            .await
        {
            Ok(()) => {
                self.pool.lock().push(publisher);
                Ok(())
            }
            Err(error) => {
                if let Err(close_error) = publisher.close().await {
                    debug!(error = %close_error, "discarded publish channel close failed");
                }
                Err(ConnectorError::publish(
                    format!(
                        "Publishing to exchange '{}' with key '{routing_key}'",
                        channel.exchange_name
                    ),
                    error,
                ))
            }
        }
    }

    /// Attaches an auto-ack consumer to a queue on the control channel.
    pub async fn register_consumer(
        &self,
        queue: &str,
        handler: PayloadHandler,
    ) -> Result<(), ConnectorError> {
        let slot = self.core.read().await;
        let core = slot.as_ref().ok_or_else(ConnectorError::not_connected)?;
        let control = core.control.lock().await;
        let tag = control.consume(queue, true, handler).await.map_err(|e| {
            ConnectorError::channel(format!("Registering consumer on queue '{queue}'"), e)
        })?;
        debug!(queue = %queue, consumer_tag = %tag, "consumer registered");
        Ok(())
    }

    /// Runs a structural declare on the control channel, retrying exactly
    /// once on a freshly opened channel when the transport classifies the
    /// refusal as recoverable. A refused declare poisons the channel it ran
    /// on, so the stale one is closed and replaced.
    async fn run_structural(
        &self,
        core: &ControllerCore,
        op: StructuralOp<'_>,
    ) -> Result<Option<String>, ConnectorError> {
        let mut control = core.control.lock().await;
        match op.run(control.as_ref()).await {
            Ok(outcome) => Ok(outcome),
            Err(error) if error.is_recoverable() => {
                warn!(
                    op = %op.describe(),
                    error = %error,
                    "structural declare refused; retrying on a fresh control channel"
                );
                let fresh = core.connection.open_channel().await.map_err(|e| {
                    ConnectorError::channel("Reopening control channel after refused declare", e)
                })?;
                let stale = std::mem::replace(&mut *control, fresh);
                if let Err(close_error) = stale.close().await {
                    debug!(error = %close_error, "stale control channel close failed");
                }
                op.run(control.as_ref())
                    .await
                    .map_err(|e| ConnectorError::structural(op.describe(), e))
            }
            Err(error) => Err(ConnectorError::structural(op.describe(), error)),
        }
    }

    /// Takes a publish channel out of the pool, opening one if none is idle.
    async fn checkout_channel(
        &self,
        core: &ControllerCore,
    ) -> Result<Box<dyn BrokerChannel>, ConnectorError> {
        let idle = self.pool.lock().pop();
        match idle {
            Some(channel) => Ok(channel),
            None => core
                .connection
                .open_channel()
                .await
                .map_err(|e| ConnectorError::channel("Opening publish channel", e)),
        }
    }
}

impl std::fmt::Debug for BrokerController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerController")
            .field("broker", &self.broker)
            .field("messages_published", &self.messages_published())
            .finish_non_exhaustive()
    }
}
