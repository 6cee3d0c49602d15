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

//! An in-process broker implementing the transport traits.
//!
//! [`MemoryTransport`] emulates one broker endpoint per [`Broker`] value:
//! topic exchanges with `*`/`#` wildcard bindings, named and broker-assigned
//! queues, competing consumers served round-robin from one dispatch task per
//! queue, mandatory-publish return events, and queue auto-expiry. Cloning the
//! transport shares the emulated brokers, so a connector and a scripted
//! curator can meet in one process; the test suite is built on exactly that,
//! and applications embedding a local curator can do the same.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use static_assertions::assert_impl_all;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::common::DEFAULT_EXCHANGE;
use crate::message::Broker;
use crate::traits::{
    BrokerChannel, BrokerConnection, BrokerTransport, EventListener, ExchangeKind,
    ExchangeOptions, PayloadHandler, Publication, QueueOptions, StructuralErrorKind,
    TransportError, TransportEvent,
};

/// How often expired queues are swept.
const SWEEP_INTERVAL: Duration = Duration::from_millis(50);

/// Matches an AMQP-style binding pattern against a routing key.
///
/// Patterns and keys are dot-separated words; `*` matches exactly one word,
/// `#` matches zero or more.
fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    fn match_words(pattern: &[&str], key: &[&str]) -> bool {
        match pattern.split_first() {
            None => key.is_empty(),
            Some((&"#", rest)) => {
                (0..=key.len()).any(|skip| match_words(rest, &key[skip..]))
            }
            Some((&"*", rest)) => !key.is_empty() && match_words(rest, &key[1..]),
            Some((word, rest)) => {
                key.first() == Some(word) && match_words(rest, &key[1..])
            }
        }
    }

    // An empty string has zero words, not one empty word.
    fn words(raw: &str) -> Vec<&str> {
        if raw.is_empty() {
            Vec::new()
        } else {
            raw.split('.').collect()
        }
    }

    match_words(&words(pattern), &words(routing_key))
}

fn structural(kind: StructuralErrorKind, context: impl Into<String>) -> TransportError {
    TransportError::Structural {
        kind,
        context: context.into(),
    }
}

struct ConsumerReg {
    tag: String,
    connection: Uuid,
    handler: PayloadHandler,
}

/// The consumers attached to one queue, served round-robin.
#[derive(Default)]
struct ConsumerSet {
    entries: Mutex<Vec<ConsumerReg>>,
    notify: Notify,
    cursor: AtomicUsize,
    had_consumers: AtomicBool,
    empty_since: Mutex<Option<Instant>>,
}

impl ConsumerSet {
    fn register(&self, reg: ConsumerReg) {
        self.entries.lock().push(reg);
        self.had_consumers.store(true, Ordering::Relaxed);
        *self.empty_since.lock() = None;
        self.notify.notify_one();
    }

    fn remove_connection(&self, connection: Uuid) {
        let mut entries = self.entries.lock();
        entries.retain(|reg| {
            let keep = reg.connection != connection;
            if !keep {
                trace!(consumer_tag = %reg.tag, "consumer detached");
            }
            keep
        });
        if entries.is_empty() {
            *self.empty_since.lock() = Some(Instant::now());
        }
    }

    fn next_handler(&self) -> Option<PayloadHandler> {
        let entries = self.entries.lock();
        if entries.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % entries.len();
        Some(Arc::clone(&entries[index].handler))
    }

    fn owned_by(&self, connection: Uuid) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|reg| reg.connection == connection)
    }
}

struct QueueState {
    name: String,
    options: QueueOptions,
    /// Connection holding the queue, for exclusive declarations.
    owner: Option<Uuid>,
    sender: mpsc::UnboundedSender<Vec<u8>>,
    consumers: ConsumerSet,
    token: CancellationToken,
}

impl QueueState {
    /// A queue is swept once unconsumed past its linger: the declared expiry,
    /// or immediately for auto-delete queues that have already had a
    /// consumer.
    fn expired(&self) -> bool {
        let linger = match self.options.expires {
            Some(expiry) => expiry,
            None if self.options.auto_delete
                && self.consumers.had_consumers.load(Ordering::Relaxed) =>
            {
                Duration::ZERO
            }
            None => return false,
        };
        self.consumers
            .empty_since
            .lock()
            .is_some_and(|since| since.elapsed() >= linger)
    }
}

struct Binding {
    queue: String,
    pattern: String,
}

struct ExchangeState {
    options: ExchangeOptions,
    bindings: Mutex<Vec<Binding>>,
}

/// One emulated broker endpoint: its exchanges, queues, and dispatch tasks.
struct BrokerCore {
    endpoint: Broker,
    exchanges: DashMap<String, ExchangeState>,
    queues: DashMap<String, Arc<QueueState>>,
    token: CancellationToken,
    tracker: TaskTracker,
}

impl BrokerCore {
    /// Creates the endpoint state and starts its expiry sweeper. The default
    /// topic exchange is pre-seeded the way real brokers provide it.
    fn start(endpoint: Broker, token: CancellationToken, tracker: TaskTracker) -> Arc<Self> {
        let core = Arc::new(Self {
            endpoint,
            exchanges: DashMap::new(),
            queues: DashMap::new(),
            token,
            tracker,
        });
        core.exchanges.insert(
            DEFAULT_EXCHANGE.to_string(),
            ExchangeState {
                options: ExchangeOptions::topic(),
                bindings: Mutex::new(Vec::new()),
            },
        );

        let sweeper = Arc::clone(&core);
        core.tracker.spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    () = sweeper.token.cancelled() => break,
                    _ = interval.tick() => sweeper.sweep_expired(),
                }
            }
        });
        core
    }

    fn sweep_expired(&self) {
        let expired: Vec<String> = self
            .queues
            .iter()
            .filter(|entry| entry.value().expired())
            .map(|entry| entry.key().clone())
            .collect();
        for name in expired {
            if let Some((_, state)) = self.queues.remove(&name) {
                state.token.cancel();
                self.drop_bindings(&name);
                debug!(broker = %self.endpoint, queue = %name, "unconsumed queue expired");
            }
        }
    }

    fn drop_bindings(&self, queue: &str) {
        for exchange in self.exchanges.iter() {
            exchange.value().bindings.lock().retain(|b| b.queue != queue);
        }
    }

    fn declare_exchange(
        &self,
        name: &str,
        options: ExchangeOptions,
    ) -> Result<(), TransportError> {
        if let Some(existing) = self.exchanges.get(name) {
            if existing.options == options {
                return Ok(());
            }
            return Err(structural(
                StructuralErrorKind::PreconditionFailed,
                format!("exchange '{name}' exists with different options"),
            ));
        }
        self.exchanges.insert(
            name.to_string(),
            ExchangeState {
                options,
                bindings: Mutex::new(Vec::new()),
            },
        );
        trace!(broker = %self.endpoint, exchange = %name, "exchange declared");
        Ok(())
    }

    fn declare_queue(
        self: &Arc<Self>,
        name: Option<&str>,
        options: QueueOptions,
        connection: Uuid,
    ) -> Result<String, TransportError> {
        let name = match name {
            Some(given) if !given.is_empty() => given.to_string(),
            _ => format!("amq.gen-{}", Uuid::new_v4()),
        };

        if let Some(existing) = self.queues.get(&name) {
            if let Some(owner) = existing.owner {
                if owner != connection {
                    return Err(structural(
                        StructuralErrorKind::ResourceLocked,
                        format!("queue '{name}' is exclusively held by another connection"),
                    ));
                }
            }
            if existing.options == options {
                return Ok(name);
            }
            return Err(structural(
                StructuralErrorKind::PreconditionFailed,
                format!("queue '{name}' exists with different options"),
            ));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(QueueState {
            name: name.clone(),
            options,
            owner: options.exclusive.then_some(connection),
            sender,
            consumers: ConsumerSet::default(),
            token: self.token.child_token(),
        });
        *state.consumers.empty_since.lock() = Some(Instant::now());
        self.queues.insert(name.clone(), Arc::clone(&state));
        self.tracker.spawn(run_queue(state, receiver));
        trace!(broker = %self.endpoint, queue = %name, "queue declared");
        Ok(name)
    }

    fn bind_queue(
        &self,
        exchange: &str,
        queue: &str,
        routing_key: &str,
    ) -> Result<(), TransportError> {
        if !self.queues.contains_key(queue) {
            return Err(structural(
                StructuralErrorKind::NotFound,
                format!("no queue '{queue}'"),
            ));
        }
        let Some(state) = self.exchanges.get(exchange) else {
            return Err(structural(
                StructuralErrorKind::NotFound,
                format!("no exchange '{exchange}'"),
            ));
        };
        let mut bindings = state.bindings.lock();
        let duplicate = bindings
            .iter()
            .any(|b| b.queue == queue && b.pattern == routing_key);
        if !duplicate {
            bindings.push(Binding {
                queue: queue.to_string(),
                pattern: routing_key.to_string(),
            });
            trace!(
                broker = %self.endpoint,
                exchange = %exchange,
                queue = %queue,
                pattern = %routing_key,
                "binding added"
            );
        }
        Ok(())
    }

    fn unbind_queue(&self, exchange: &str, queue: &str, routing_key: &str) {
        if let Some(state) = self.exchanges.get(exchange) {
            state
                .bindings
                .lock()
                .retain(|b| !(b.queue == queue && b.pattern == routing_key));
        }
    }

    fn delete_queue(&self, queue: &str) {
        if let Some((_, state)) = self.queues.remove(queue) {
            state.token.cancel();
            self.drop_bindings(queue);
            trace!(broker = %self.endpoint, queue = %queue, "queue deleted");
        }
    }

    /// Routes a publication, returning how many queues it reached.
    fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<usize, TransportError> {
        let Some(state) = self.exchanges.get(exchange) else {
            return Err(structural(
                StructuralErrorKind::NotFound,
                format!("no exchange '{exchange}'"),
            ));
        };

        let mut matched: Vec<String> = Vec::new();
        {
            let bindings = state.bindings.lock();
            for binding in bindings.iter() {
                let hit = match state.options.kind {
                    ExchangeKind::Topic => topic_matches(&binding.pattern, routing_key),
                    ExchangeKind::Direct => binding.pattern == routing_key,
                };
                // One delivery per queue however many bindings match.
                if hit && !matched.contains(&binding.queue) {
                    matched.push(binding.queue.clone());
                }
            }
        }

        let mut delivered = 0;
        for name in matched {
            if let Some(queue) = self.queues.get(&name) {
                if queue.sender.send(body.to_vec()).is_ok() {
                    delivered += 1;
                }
            }
        }
        trace!(
            broker = %self.endpoint,
            exchange = %exchange,
            routing_key = %routing_key,
            delivered,
            "publication routed"
        );
        Ok(delivered)
    }

    fn consume(
        &self,
        queue: &str,
        connection: Uuid,
        handler: PayloadHandler,
    ) -> Result<String, TransportError> {
        let Some(state) = self.queues.get(queue) else {
            return Err(structural(
                StructuralErrorKind::NotFound,
                format!("no queue '{queue}'"),
            ));
        };
        if let Some(owner) = state.owner {
            if owner != connection {
                return Err(structural(
                    StructuralErrorKind::ResourceLocked,
                    format!("queue '{queue}' is exclusively held by another connection"),
                ));
            }
        }
        let tag = format!("ctag-{}", Uuid::new_v4());
        state.consumers.register(ConsumerReg {
            tag: tag.clone(),
            connection,
            handler,
        });
        debug!(broker = %self.endpoint, queue = %queue, consumer_tag = %tag, "consumer attached");
        Ok(tag)
    }

    /// Detaches everything a closing connection left behind: its consumers
    /// everywhere and any queues it held exclusively.
    fn release_connection(&self, connection: Uuid) {
        for entry in self.queues.iter() {
            entry.value().consumers.remove_connection(connection);
        }
        let owned: Vec<String> = self
            .queues
            .iter()
            .filter(|entry| entry.value().owner == Some(connection))
            .map(|entry| entry.key().clone())
            .collect();
        for name in owned {
            self.delete_queue(&name);
        }
    }
}

/// Per-queue dispatch task: deliveries stay in order and go to one consumer
/// each, rotating through whoever is attached. With no consumer attached a
/// delivery waits; it is dropped only when the queue itself goes away.
async fn run_queue(state: Arc<QueueState>, mut receiver: mpsc::UnboundedReceiver<Vec<u8>>) {
    loop {
        // Deliveries buffered before the queue was dropped still go out.
        let payload = tokio::select! {
            biased;
            received = receiver.recv() => match received {
                Some(payload) => payload,
                None => break,
            },
            () = state.token.cancelled() => break,
        };
        if !dispatch(&state, payload).await {
            break;
        }
    }
    trace!(queue = %state.name, "queue task stopped");
}

async fn dispatch(state: &QueueState, payload: Vec<u8>) -> bool {
    loop {
        if let Some(handler) = state.consumers.next_handler() {
            handler(payload);
            return true;
        }
        tokio::select! {
            () = state.token.cancelled() => return false,
            () = state.consumers.notify.notified() => {}
        }
    }
}

/// An in-process [`BrokerTransport`].
///
/// One transport value emulates any number of broker endpoints, created on
/// first connect and keyed by [`Broker`] value. Clones share everything;
/// hand a clone to each party that should see the same broker.
#[derive(Clone)]
pub struct MemoryTransport {
    brokers: Arc<DashMap<Broker, Arc<BrokerCore>>>,
    token: CancellationToken,
    tracker: TaskTracker,
}

impl MemoryTransport {
    /// Creates an empty transport with no endpoints yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            brokers: Arc::new(DashMap::new()),
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Stops every dispatch task and waits for them to finish.
    ///
    /// Pending deliveries are dropped. Further use of connections created
    /// from this transport yields closed/empty behavior rather than panics.
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Whether the endpoint has a queue with this name. For tests and
    /// embedders asserting topology.
    #[must_use]
    pub fn queue_exists(&self, broker: &Broker, queue: &str) -> bool {
        self.brokers
            .get(broker)
            .is_some_and(|core| core.queues.contains_key(queue))
    }

    /// Whether the endpoint has an exchange with this name.
    #[must_use]
    pub fn exchange_exists(&self, broker: &Broker, exchange: &str) -> bool {
        self.brokers
            .get(broker)
            .is_some_and(|core| core.exchanges.contains_key(exchange))
    }

    /// How many bindings point at the given queue across all exchanges.
    #[must_use]
    pub fn binding_count(&self, broker: &Broker, queue: &str) -> usize {
        let Some(core) = self.brokers.get(broker) else {
            return 0;
        };
        core.exchanges
            .iter()
            .map(|entry| {
                entry
                    .value()
                    .bindings
                    .lock()
                    .iter()
                    .filter(|b| b.queue == queue)
                    .count()
            })
            .sum()
    }

    fn core_for(&self, broker: &Broker) -> Arc<BrokerCore> {
        self.brokers
            .entry(broker.clone())
            .or_insert_with(|| {
                debug!(broker = %broker, "emulated broker endpoint created");
                BrokerCore::start(
                    broker.clone(),
                    self.token.child_token(),
                    self.tracker.clone(),
                )
            })
            .clone()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("endpoints", &self.brokers.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BrokerTransport for MemoryTransport {
    async fn connect(&self, broker: &Broker) -> Result<Box<dyn BrokerConnection>, TransportError> {
        let core = self.core_for(broker);
        Ok(Box::new(MemoryConnection {
            core,
            id: Uuid::new_v4(),
            open: Arc::new(AtomicBool::new(true)),
            listener: Arc::new(Mutex::new(None)),
        }))
    }
}

struct MemoryConnection {
    core: Arc<BrokerCore>,
    id: Uuid,
    open: Arc<AtomicBool>,
    listener: Arc<Mutex<Option<EventListener>>>,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, TransportError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(Box::new(MemoryChannel {
            core: Arc::clone(&self.core),
            connection: self.id,
            connection_open: Arc::clone(&self.open),
            listener: Arc::clone(&self.listener),
            open: AtomicBool::new(true),
        }))
    }

    fn set_event_listener(&self, listener: EventListener) {
        *self.listener.lock() = Some(listener);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.open.swap(false, Ordering::AcqRel) {
            self.core.release_connection(self.id);
            debug!(broker = %self.core.endpoint, connection = %self.id, "connection closed");
        }
        Ok(())
    }
}

struct MemoryChannel {
    core: Arc<BrokerCore>,
    connection: Uuid,
    connection_open: Arc<AtomicBool>,
    listener: Arc<Mutex<Option<EventListener>>>,
    open: AtomicBool,
}

impl MemoryChannel {
    fn guard(&self) -> Result<(), TransportError> {
        if self.open.load(Ordering::Acquire) && self.connection_open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_exchange(
        &self,
        name: &str,
        options: ExchangeOptions,
    ) -> Result<(), TransportError> {
        self.guard()?;
        self.core.declare_exchange(name, options)
    }

    async fn declare_queue(
        &self,
        name: Option<&str>,
        options: QueueOptions,
    ) -> Result<String, TransportError> {
        self.guard()?;
        self.core.declare_queue(name, options, self.connection)
    }

    async fn bind_queue(
        &self,
        exchange: &str,
        queue: &str,
        routing_key: &str,
    ) -> Result<(), TransportError> {
        self.guard()?;
        self.core.bind_queue(exchange, queue, routing_key)
    }

    async fn unbind_queue(
        &self,
        exchange: &str,
        queue: &str,
        routing_key: &str,
    ) -> Result<(), TransportError> {
        self.guard()?;
        self.core.unbind_queue(exchange, queue, routing_key);
        Ok(())
    }

    async fn delete_queue(&self, queue: &str) -> Result<(), TransportError> {
        self.guard()?;
        self.core.delete_queue(queue);
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        publication: Publication,
    ) -> Result<(), TransportError> {
        self.guard()?;
        let delivered = self.core.publish(exchange, routing_key, &publication.body)?;
        if delivered == 0 && publication.mandatory {
            let listener = self.listener.lock().clone();
            match listener {
                Some(listener) => listener(TransportEvent::Returned {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    reason: "NO_ROUTE".to_string(),
                }),
                None => warn!(
                    exchange = %exchange,
                    routing_key = %routing_key,
                    "mandatory publication unroutable and no return listener installed"
                ),
            }
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        _auto_ack: bool,
        handler: PayloadHandler,
    ) -> Result<String, TransportError> {
        self.guard()?;
        self.core.consume(queue, self.connection, handler)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && self.connection_open.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::Release);
        Ok(())
    }
}

// Shared between the connector, scripted peers, and broker-driven tasks.
assert_impl_all!(MemoryTransport: Send, Sync);
