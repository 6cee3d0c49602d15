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
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::*;

use curator_connect::prelude::*;

use crate::setup::*;

mod setup;

const WAIT: Duration = Duration::from_secs(5);

fn collecting_consumer() -> (PayloadHandler, mpsc::UnboundedReceiver<Vec<u8>>) {
    let (deliveries, received) = mpsc::unbounded_channel();
    let handler: PayloadHandler = Arc::new(move |payload: Vec<u8>| {
        let _ = deliveries.send(payload);
    });
    (handler, received)
}

#[tokio::test]
async fn test_publish_reaches_bound_consumer() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MemoryTransport::new();
    let connection = transport.connect(&Broker::default()).await?;
    let channel = connection.open_channel().await?;

    channel
        .declare_exchange("inventory.topic", ExchangeOptions::topic())
        .await?;
    let queue = channel
        .declare_queue(Some("inventory.watch"), QueueOptions::default())
        .await?;
    assert_eq!(queue, "inventory.watch");
    channel
        .bind_queue("inventory.topic", &queue, "inventory.#")
        .await?;

    let (handler, mut received) = collecting_consumer();
    let tag = channel.consume(&queue, true, handler).await?;
    assert!(tag.starts_with("ctag-"));

    channel
        .publish(
            "inventory.topic",
            "inventory.changed.42",
            Publication::new(b"restocked".to_vec()),
        )
        .await?;

    let payload = timeout(WAIT, received.recv()).await?.expect("delivery");
    assert_eq!(payload, b"restocked");

    connection.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_server_named_queues_are_unique() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MemoryTransport::new();
    let connection = transport.connect(&Broker::default()).await?;
    let channel = connection.open_channel().await?;

    let first = channel.declare_queue(None, QueueOptions::default()).await?;
    let second = channel.declare_queue(None, QueueOptions::default()).await?;
    assert!(first.starts_with("amq.gen-"));
    assert!(second.starts_with("amq.gen-"));
    assert_ne!(first, second);
    Ok(())
}

#[tokio::test]
async fn test_redeclare_with_different_options_is_refused() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MemoryTransport::new();
    let connection = transport.connect(&Broker::default()).await?;
    let channel = connection.open_channel().await?;

    let queue = channel
        .declare_queue(Some("orders.inbox"), QueueOptions::default())
        .await?;
    // Redeclaring with identical options is a no-op.
    let again = channel
        .declare_queue(Some("orders.inbox"), QueueOptions::default())
        .await?;
    assert_eq!(queue, again);

    let error = channel
        .declare_queue(
            Some("orders.inbox"),
            QueueOptions {
                durable: true,
                ..QueueOptions::default()
            },
        )
        .await
        .expect_err("conflicting options must be refused");
    assert!(matches!(
        error,
        TransportError::Structural {
            kind: StructuralErrorKind::PreconditionFailed,
            ..
        }
    ));
    assert!(error.is_recoverable());
    Ok(())
}

#[tokio::test]
async fn test_mandatory_unroutable_publication_comes_back() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MemoryTransport::new();
    let connection = transport.connect(&Broker::default()).await?;

    let events: Arc<Mutex<Vec<TransportEvent>>> = Arc::default();
    let listener: EventListener = Arc::new({
        let events = Arc::clone(&events);
        move |event| events.lock().push(event)
    });
    connection.set_event_listener(listener);

    let channel = connection.open_channel().await?;
    channel
        .publish(
            DEFAULT_EXCHANGE,
            "nowhere.special",
            Publication::new(b"lost".to_vec()).mandatory(),
        )
        .await?;
    {
        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            TransportEvent::Returned { routing_key, reason, .. }
                if routing_key == "nowhere.special" && reason == "NO_ROUTE"
        ));
    }

    // A non-mandatory publication vanishes silently.
    channel
        .publish(
            DEFAULT_EXCHANGE,
            "nowhere.special",
            Publication::new(b"quietly lost".to_vec()),
        )
        .await?;
    assert_eq!(events.lock().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_consumers_compete_round_robin() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MemoryTransport::new();
    let connection = transport.connect(&Broker::default()).await?;
    let channel = connection.open_channel().await?;

    let queue = channel
        .declare_queue(Some("jobs.queue"), QueueOptions::default())
        .await?;
    channel
        .bind_queue(DEFAULT_EXCHANGE, &queue, "jobs.ready")
        .await?;

    let (first_handler, mut first_rx) = collecting_consumer();
    let (second_handler, mut second_rx) = collecting_consumer();
    channel.consume(&queue, true, first_handler).await?;
    channel.consume(&queue, true, second_handler).await?;

    for n in 0..4_u8 {
        channel
            .publish(DEFAULT_EXCHANGE, "jobs.ready", Publication::new(vec![n]))
            .await?;
    }

    // Dispatch rotates strictly: 0 and 2 to the first consumer, 1 and 3 to
    // the second.
    assert_eq!(timeout(WAIT, first_rx.recv()).await?, Some(vec![0]));
    assert_eq!(timeout(WAIT, first_rx.recv()).await?, Some(vec![2]));
    assert_eq!(timeout(WAIT, second_rx.recv()).await?, Some(vec![1]));
    assert_eq!(timeout(WAIT, second_rx.recv()).await?, Some(vec![3]));
    assert!(first_rx.try_recv().is_err());
    assert!(second_rx.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn test_unconsumed_queues_expire() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MemoryTransport::new();
    let broker = Broker::default();
    let connection = transport.connect(&broker).await?;
    let channel = connection.open_channel().await?;

    let keeper_connection = transport.connect(&broker).await?;
    let keeper_channel = keeper_connection.open_channel().await?;
    keeper_channel
        .declare_queue(Some("keeper"), QueueOptions::default())
        .await?;

    channel
        .declare_queue(
            Some("expiring.soon"),
            QueueOptions {
                expires: Some(Duration::from_millis(50)),
                ..QueueOptions::default()
            },
        )
        .await?;
    channel
        .declare_queue(
            Some("drop.after.use"),
            QueueOptions {
                auto_delete: true,
                ..QueueOptions::default()
            },
        )
        .await?;
    let (handler, _received) = collecting_consumer();
    channel.consume("drop.after.use", true, handler).await?;

    // Never consumed, so the expiry clock started at declaration.
    assert!(eventually(WAIT, || !transport.queue_exists(&broker, "expiring.soon")).await);
    // Still consumed, so the auto-delete queue stays.
    assert!(transport.queue_exists(&broker, "drop.after.use"));

    connection.close().await?;
    assert!(eventually(WAIT, || !transport.queue_exists(&broker, "drop.after.use")).await);

    // No expiry, no auto-delete: untouched by the sweeper.
    assert!(transport.queue_exists(&broker, "keeper"));
    info!("expiry sweeps behaved");

    keeper_connection.close().await?;
    transport.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_exclusive_queue_is_private_to_its_connection() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MemoryTransport::new();
    let broker = Broker::default();
    let exclusive = QueueOptions {
        exclusive: true,
        ..QueueOptions::default()
    };

    let owner = transport.connect(&broker).await?;
    let owner_channel = owner.open_channel().await?;
    let queue = owner_channel
        .declare_queue(Some("private.inbox"), exclusive)
        .await?;

    let intruder = transport.connect(&broker).await?;
    let intruder_channel = intruder.open_channel().await?;

    let error = intruder_channel
        .declare_queue(Some("private.inbox"), exclusive)
        .await
        .expect_err("foreign declare of an exclusive queue must be refused");
    assert!(matches!(
        error,
        TransportError::Structural {
            kind: StructuralErrorKind::ResourceLocked,
            ..
        }
    ));
    assert!(error.is_recoverable());

    let (handler, _received) = collecting_consumer();
    let error = intruder_channel
        .consume(&queue, true, handler)
        .await
        .expect_err("foreign consume of an exclusive queue must be refused");
    assert!(matches!(
        error,
        TransportError::Structural {
            kind: StructuralErrorKind::ResourceLocked,
            ..
        }
    ));

    // The owner may redeclare freely; closing it takes the queue along.
    owner_channel
        .declare_queue(Some("private.inbox"), exclusive)
        .await?;
    owner.close().await?;
    assert!(!transport.queue_exists(&broker, "private.inbox"));
    Ok(())
}

#[tokio::test]
async fn test_unbind_of_missing_binding_is_a_noop() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MemoryTransport::new();
    let connection = transport.connect(&Broker::default()).await?;
    let channel = connection.open_channel().await?;

    channel
        .unbind_queue(DEFAULT_EXCHANGE, "never.bound", "no.key")
        .await?;
    channel
        .unbind_queue("no.such.exchange", "never.bound", "no.key")
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_default_exchange_is_preseeded() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MemoryTransport::new();
    let broker = Broker::default();
    let connection = transport.connect(&broker).await?;
    assert!(transport.exchange_exists(&broker, DEFAULT_EXCHANGE));

    let channel = connection.open_channel().await?;
    channel
        .declare_exchange(DEFAULT_EXCHANGE, ExchangeOptions::topic())
        .await?;

    let error = channel
        .declare_exchange(
            DEFAULT_EXCHANGE,
            ExchangeOptions {
                kind: ExchangeKind::Direct,
                durable: true,
                auto_delete: true,
            },
        )
        .await
        .expect_err("conflicting redeclare of the default exchange must be refused");
    assert!(matches!(
        error,
        TransportError::Structural {
            kind: StructuralErrorKind::PreconditionFailed,
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn test_closed_channels_and_connections_reject_operations() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MemoryTransport::new();
    let connection = transport.connect(&Broker::default()).await?;

    let channel = connection.open_channel().await?;
    let survivor = connection.open_channel().await?;
    channel.close().await?;
    assert!(!channel.is_open());

    let error = channel
        .declare_queue(Some("late"), QueueOptions::default())
        .await
        .expect_err("closed channel must reject declares");
    assert!(matches!(error, TransportError::Closed));
    let error = channel
        .publish(DEFAULT_EXCHANGE, "late.key", Publication::new(Vec::new()))
        .await
        .expect_err("closed channel must reject publishes");
    assert!(matches!(error, TransportError::Closed));

    // Closing the connection takes its surviving channels with it.
    connection.close().await?;
    assert!(!connection.is_open());
    assert!(!survivor.is_open());
    let error = survivor
        .declare_queue(Some("late"), QueueOptions::default())
        .await
        .expect_err("channel of a closed connection must reject declares");
    assert!(matches!(error, TransportError::Closed));
    let error = connection
        .open_channel()
        .await
        .expect_err("closed connection must not open channels");
    assert!(matches!(error, TransportError::Closed));
    Ok(())
}

#[tokio::test]
async fn test_topic_wildcards_route_end_to_end() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MemoryTransport::new();
    let connection = transport.connect(&Broker::default()).await?;
    let channel = connection.open_channel().await?;

    channel
        .declare_queue(Some("watch.all"), QueueOptions::default())
        .await?;
    channel
        .bind_queue(DEFAULT_EXCHANGE, "watch.all", "curator.#")
        .await?;
    channel
        .declare_queue(Some("watch.responses"), QueueOptions::default())
        .await?;
    channel
        .bind_queue(DEFAULT_EXCHANGE, "watch.responses", "*.response")
        .await?;

    let (all_handler, mut all_rx) = collecting_consumer();
    channel.consume("watch.all", true, all_handler).await?;
    let (responses_handler, mut responses_rx) = collecting_consumer();
    channel
        .consume("watch.responses", true, responses_handler)
        .await?;

    for key in ["curator", "curator.response", "a.b.response"] {
        channel
            .publish(
                DEFAULT_EXCHANGE,
                key,
                Publication::new(key.as_bytes().to_vec()),
            )
            .await?;
    }

    // `#` matches zero or more words, so the bare base key lands too; `*`
    // matches exactly one.
    assert_eq!(timeout(WAIT, all_rx.recv()).await?, Some(b"curator".to_vec()));
    assert_eq!(
        timeout(WAIT, all_rx.recv()).await?,
        Some(b"curator.response".to_vec())
    );
    assert_eq!(
        timeout(WAIT, responses_rx.recv()).await?,
        Some(b"curator.response".to_vec())
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(all_rx.try_recv().is_err());
    assert!(responses_rx.try_recv().is_err());
    Ok(())
}
