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
#![allow(unused)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::*;

use curator_connect::prelude::*;

/// How the scripted curator answers each enrichment request it receives.
#[derive(Clone, Copy, Debug)]
pub enum CuratorScript {
    /// Accept, then stream `results` responses spaced `interval_ms` apart.
    AcceptAndRespond { results: u32, interval_ms: u64 },
    /// Reject immediately with the given failure code.
    Fail { code: u32, reason: &'static str },
    /// Sit on the request for `delay_ms`, then reject it.
    FailAfter {
        delay_ms: u64,
        code: u32,
        reason: &'static str,
    },
    /// Swallow the request without answering.
    Ignore,
}

/// An in-process curator wired to the default broker of a [`MemoryTransport`],
/// answering every request according to a fixed [`CuratorScript`].
pub struct ScriptedCurator {
    controller: Arc<BrokerController>,
    requests_seen: Arc<AtomicUsize>,
    disconnect_notices: Arc<AtomicUsize>,
}

impl ScriptedCurator {
    /// Connects to the broker, claims the curator queue, and starts the
    /// responder task.
    pub async fn start(
        transport: &MemoryTransport,
        script: CuratorScript,
    ) -> anyhow::Result<Self> {
        let transport: Arc<dyn BrokerTransport> = Arc::new(transport.clone());
        let controller = Arc::new(BrokerController::new(
            Broker::default(),
            Arc::clone(&transport),
        ));
        controller.connect().await?;

        let desired = DeliveryChannel::default()
            .with_exchange(DEFAULT_EXCHANGE)
            .with_queue("curator.requests")
            .with_routing_key("curator");
        let endpoint = TopologyConfigurator::new(TopologyRole::Curator, desired)
            .configure(&controller, &transport, None)
            .await?;

        let agent = Agent::generate();
        let requests_seen = Arc::new(AtomicUsize::new(0));
        let disconnect_notices = Arc::new(AtomicUsize::new(0));

        let (requests, mut inbox) = mpsc::unbounded_channel::<Message>();
        let codec = JsonCodec::new();
        let notices = Arc::clone(&disconnect_notices);
        let handler: PayloadHandler = Arc::new(move |payload: Vec<u8>| {
            match codec.decode(&payload, MessageClass::Request) {
                Ok(Some(message)) => {
                    if matches!(message.body(), MessageBody::Disconnect { .. }) {
                        notices.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    let _ = requests.send(message);
                }
                Ok(None) => {}
                Err(error) => warn!(error = %error, "curator could not decode a payload"),
            }
        });
        endpoint
            .controller()
            .register_consumer(endpoint.queue(), handler)
            .await?;

        let responder = Responder {
            agent,
            controller: Arc::clone(&controller),
            script,
            requests_seen: Arc::clone(&requests_seen),
        };
        tokio::spawn(async move {
            while let Some(request) = inbox.recv().await {
                responder.answer(request).await;
            }
        });

        Ok(Self {
            controller,
            requests_seen,
            disconnect_notices,
        })
    }

    /// Requests this curator has pulled off its queue so far.
    pub fn requests_seen(&self) -> usize {
        self.requests_seen.load(Ordering::Relaxed)
    }

    /// Disconnect notices received from departing clients.
    pub fn disconnect_notices(&self) -> usize {
        self.disconnect_notices.load(Ordering::Relaxed)
    }

    /// Detaches the curator from the broker.
    pub async fn stop(&self) -> anyhow::Result<()> {
        self.controller.disconnect().await?;
        Ok(())
    }
}

/// The spawned half of the curator: consumes queued requests and publishes
/// whatever the script dictates back to each request's `reply_to`.
struct Responder {
    agent: Agent,
    controller: Arc<BrokerController>,
    script: CuratorScript,
    requests_seen: Arc<AtomicUsize>,
}

impl Responder {
    async fn answer(&self, request: Message) {
        let MessageBody::EnrichmentRequest {
            reply_to,
            target_resource,
            ..
        } = request.body()
        else {
            return;
        };
        self.requests_seen.fetch_add(1, Ordering::Relaxed);
        let reply_to = reply_to.clone();
        let target = target_resource.clone();
        let request_id = request.id();
        debug!(request_id = %request_id, target_resource = %target, script = ?self.script, "curator answering");

        match self.script {
            CuratorScript::AcceptAndRespond {
                results,
                interval_ms,
            } => {
                self.publish(&reply_to, Message::accepted(self.agent.clone(), request_id, 0))
                    .await;
                for number in 1..=results {
                    tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                    let response = Message::enrichment_response(
                        self.agent.clone(),
                        request_id,
                        number,
                        target.clone(),
                        vec![
                            PropertyValue::new(
                                "title".to_string(),
                                serde_json::json!("The Dispossessed"),
                            ),
                            PropertyValue::new("sequence".to_string(), serde_json::json!(number)),
                        ],
                        vec![PropertyValue::new(
                            "draft".to_string(),
                            serde_json::Value::Null,
                        )],
                    );
                    self.publish(&reply_to, response).await;
                }
            }
            CuratorScript::Fail { code, reason } => {
                let failure =
                    Message::failure(self.agent.clone(), request_id, 0, code, None, reason, None);
                self.publish(&reply_to, failure).await;
            }
            CuratorScript::FailAfter {
                delay_ms,
                code,
                reason,
            } => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                let failure =
                    Message::failure(self.agent.clone(), request_id, 0, code, None, reason, None);
                self.publish(&reply_to, failure).await;
            }
            CuratorScript::Ignore => {}
        }
    }

    async fn publish(&self, reply_to: &DeliveryChannel, message: Message) {
        let payload = JsonCodec::new().encode(&message).expect("encodable reply");
        if let Err(error) = self
            .controller
            .publish_message(reply_to, reply_to.routing_key_or_empty(), payload)
            .await
        {
            warn!(error = %error, reply_to = %reply_to, "curator reply did not publish");
        }
    }
}
