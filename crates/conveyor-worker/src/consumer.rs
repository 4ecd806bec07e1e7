// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Queue consumer loop.
//!
//! Pulls deliveries from the durable processing queue one at a time and
//! hands them to the order processor. The loop owns its own recovery: a
//! failed consumer setup and a lost connection are both retried on a fixed
//! delay until shutdown, so the worker keeps running while the broker is
//! down instead of exiting.
//!
//! Every delivery is resolved exactly once. A structured outcome, success
//! or business failure, publishes the reply (when one was asked for) and
//! acknowledges. Only unhandled faults, an undecodable body or a failed
//! reply publish, requeue the delivery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conveyor_transport::{BrokerClient, BrokerError, Delivery, QueueConsumer, ReplyPublisher};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::processor::OrderProcessor;

/// Delay before retrying consumer setup after a broker failure. Fixed on
/// purpose: the worker sits next to the broker, and the producer side
/// already paces redispatches with its own backoff.
const REINIT_DELAY: Duration = Duration::from_secs(5);

/// Where the consumer loop pulls its deliveries from.
///
/// [`QueueConsumer`] is the production source; tests script their own to
/// pin the loop's sequencing.
#[async_trait]
trait DeliverySource: Send + Sync {
    /// Next delivery, `Ok(None)` when the fetch window closes empty.
    async fn fetch(&self) -> Result<Option<Box<dyn Delivery>>, BrokerError>;
}

#[async_trait]
impl DeliverySource for QueueConsumer {
    async fn fetch(&self) -> Result<Option<Box<dyn Delivery>>, BrokerError> {
        let delivery = self.next_delivery().await?;
        Ok(delivery.map(|d| Box::new(d) as Box<dyn Delivery>))
    }
}

/// Why the consume loop handed control back.
#[derive(Debug, PartialEq, Eq)]
enum LoopExit {
    /// Shutdown was requested.
    Shutdown,
    /// The consumer needs to be set up again.
    Reinit,
}

/// Pull loop over the processing queue, run as a background task.
pub struct ConsumerLoop {
    broker: Arc<BrokerClient>,
    processor: Arc<OrderProcessor>,
    queue: String,
    durable_name: String,
    shutdown: Arc<Notify>,
}

impl ConsumerLoop {
    /// Create a consumer loop over `queue` using the durable consumer
    /// `durable_name`.
    pub fn new(
        broker: Arc<BrokerClient>,
        processor: Arc<OrderProcessor>,
        queue: impl Into<String>,
        durable_name: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            processor,
            queue: queue.into(),
            durable_name: durable_name.into(),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run until shutdown is requested.
    pub async fn run(self) {
        info!(
            queue = %self.queue,
            durable_name = %self.durable_name,
            "Consumer loop started"
        );

        loop {
            let consumer = tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("Consumer loop shutting down");
                    return;
                }
                result = QueueConsumer::create(&self.broker, &self.queue, &self.durable_name) => {
                    match result {
                        Ok(consumer) => consumer,
                        Err(err) => {
                            error!(error = %err, "Failed to set up queue consumer");
                            if self.shutdown_or_delay(REINIT_DELAY).await {
                                info!("Consumer loop shutting down");
                                return;
                            }
                            continue;
                        }
                    }
                }
            };

            info!(queue = %self.queue, "Consuming from processing queue");

            match self.consume_from(&consumer).await {
                LoopExit::Shutdown => {
                    info!("Consumer loop shutting down");
                    return;
                }
                LoopExit::Reinit => {}
            }
        }
    }

    /// Fetch and handle deliveries until shutdown or a fault that needs a
    /// fresh consumer. Deliveries are handled strictly one after another;
    /// the next fetch starts only once the previous delivery is resolved.
    async fn consume_from(&self, source: &dyn DeliverySource) -> LoopExit {
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => return LoopExit::Shutdown,
                result = source.fetch() => match result {
                    Ok(Some(delivery)) => {
                        handle_delivery(delivery.as_ref(), &self.processor, self.broker.as_ref())
                            .await;
                    }
                    Ok(None) => {
                        // An empty fetch window doubles as the liveness probe.
                        if !self.broker.is_open().await {
                            warn!("Broker connection lost; setting the consumer up again");
                            return LoopExit::Reinit;
                        }
                    }
                    Err(err) => {
                        error!(error = %err, "Failed to fetch from processing queue");
                        if self.shutdown_or_delay(REINIT_DELAY).await {
                            return LoopExit::Shutdown;
                        }
                        return LoopExit::Reinit;
                    }
                }
            }
        }
    }

    /// Wait out `delay`, returning `true` when shutdown was requested
    /// before it elapsed.
    async fn shutdown_or_delay(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.notified() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }
}

/// Handle one delivery end to end.
///
/// An undecodable payload or a failed reply publish requeues the delivery
/// without acknowledging it. Everything else, business failures included,
/// is acknowledged exactly once after the outcome was published.
async fn handle_delivery(
    delivery: &dyn Delivery,
    processor: &OrderProcessor,
    replies: &dyn ReplyPublisher,
) {
    let payload = delivery.payload();
    debug!(payload_len = payload.len(), "Received delivery");

    let text = match std::str::from_utf8(&payload) {
        Ok(text) => text,
        Err(err) => {
            warn!(error = %err, "Delivery payload is not valid UTF-8; requeueing");
            requeue(delivery).await;
            return;
        }
    };

    let outcome = processor.process(text).await;

    if let Some(reply_to) = delivery.reply_to() {
        let reply = match serde_json::to_vec(&outcome) {
            Ok(reply) => reply,
            Err(err) => {
                error!(error = %err, "Failed to serialize processing outcome; requeueing");
                requeue(delivery).await;
                return;
            }
        };

        if let Err(err) = replies.publish_reply(&reply_to, reply.into()).await {
            error!(
                reply_to = %reply_to,
                error = %err,
                "Failed to publish processing outcome; requeueing"
            );
            requeue(delivery).await;
            return;
        }

        debug!(
            reply_to = %reply_to,
            success = outcome.success,
            "Published processing outcome"
        );
    }

    if let Err(err) = delivery.ack().await {
        error!(error = %err, "Failed to acknowledge delivery");
    }
}

async fn requeue(delivery: &dyn Delivery) {
    if let Err(err) = delivery.nack_requeue().await {
        error!(error = %err, "Failed to requeue delivery");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use bytes::Bytes;
    use chrono::Utc;
    use conveyor_transport::{
        BrokerConfig, DispatchEnvelope, MockDelivery, MockReplyPublisher, ProcessingOutcome,
    };

    use crate::orders::MockOrderStore;

    fn envelope_bytes(request_id: &str, content: &str) -> Bytes {
        let envelope = DispatchEnvelope {
            request_id: request_id.to_string(),
            content: content.to_string(),
            request_date: Utc::now(),
            source: "external-api".to_string(),
        };
        Bytes::from(serde_json::to_vec(&envelope).unwrap())
    }

    fn processor_with(store: MockOrderStore) -> OrderProcessor {
        OrderProcessor::new(Arc::new(store))
    }

    fn parse_outcome(payload: &Bytes) -> ProcessingOutcome {
        serde_json::from_slice(payload).unwrap()
    }

    #[tokio::test]
    async fn test_delivery_with_reply_is_acked_exactly_once() {
        let mut store = MockOrderStore::new();
        store.expect_save_order().times(1).returning(|_| Ok(42));
        let processor = processor_with(store);

        let mut delivery = MockDelivery::new();
        delivery
            .expect_payload()
            .return_const(envelope_bytes("req-1", r#"{"OrderNumber":"ORD-100"}"#));
        delivery
            .expect_reply_to()
            .return_const(Some("_INBOX.r1".to_string()));
        delivery.expect_ack().times(1).returning(|| Ok(()));
        delivery.expect_nack_requeue().times(0);

        let mut replies = MockReplyPublisher::new();
        replies
            .expect_publish_reply()
            .times(1)
            .withf(|subject: &str, payload: &Bytes| {
                let outcome = parse_outcome(payload);
                subject == "_INBOX.r1" && outcome.success && outcome.order_id == Some(42)
            })
            .returning(|_, _| Ok(()));

        handle_delivery(&delivery, &processor, &replies).await;
    }

    #[tokio::test]
    async fn test_delivery_without_reply_is_still_acked() {
        let mut store = MockOrderStore::new();
        store.expect_save_order().times(1).returning(|_| Ok(7));
        let processor = processor_with(store);

        let mut delivery = MockDelivery::new();
        delivery
            .expect_payload()
            .return_const(envelope_bytes("req-2", r#"{"OrderNumber":"ORD-101"}"#));
        delivery.expect_reply_to().return_const(None);
        delivery.expect_ack().times(1).returning(|| Ok(()));
        delivery.expect_nack_requeue().times(0);

        let mut replies = MockReplyPublisher::new();
        replies.expect_publish_reply().times(0);

        handle_delivery(&delivery, &processor, &replies).await;
    }

    #[tokio::test]
    async fn test_business_failure_is_replied_and_acked() {
        let mut store = MockOrderStore::new();
        store.expect_save_order().times(0);
        let processor = processor_with(store);

        let mut delivery = MockDelivery::new();
        delivery
            .expect_payload()
            .return_const(envelope_bytes("req-3", "not-json"));
        delivery
            .expect_reply_to()
            .return_const(Some("_INBOX.r3".to_string()));
        delivery.expect_ack().times(1).returning(|| Ok(()));
        delivery.expect_nack_requeue().times(0);

        let mut replies = MockReplyPublisher::new();
        replies
            .expect_publish_reply()
            .times(1)
            .withf(|_, payload: &Bytes| {
                let outcome = parse_outcome(payload);
                !outcome.success
                    && outcome.message == "Invalid order data format"
                    && outcome.request_id.as_deref() == Some("req-3")
            })
            .returning(|_, _| Ok(()));

        handle_delivery(&delivery, &processor, &replies).await;
    }

    #[tokio::test]
    async fn test_non_utf8_payload_is_requeued() {
        let mut store = MockOrderStore::new();
        store.expect_save_order().times(0);
        let processor = processor_with(store);

        let mut delivery = MockDelivery::new();
        delivery
            .expect_payload()
            .return_const(Bytes::from_static(&[0xff, 0xfe, 0x80]));
        delivery.expect_ack().times(0);
        delivery.expect_nack_requeue().times(1).returning(|| Ok(()));

        let mut replies = MockReplyPublisher::new();
        replies.expect_publish_reply().times(0);

        handle_delivery(&delivery, &processor, &replies).await;
    }

    #[tokio::test]
    async fn test_reply_publish_failure_requeues_without_ack() {
        let mut store = MockOrderStore::new();
        store.expect_save_order().times(1).returning(|_| Ok(9));
        let processor = processor_with(store);

        let mut delivery = MockDelivery::new();
        delivery
            .expect_payload()
            .return_const(envelope_bytes("req-4", r#"{"OrderNumber":"ORD-102"}"#));
        delivery
            .expect_reply_to()
            .return_const(Some("_INBOX.r4".to_string()));
        delivery.expect_ack().times(0);
        delivery.expect_nack_requeue().times(1).returning(|| Ok(()));

        let mut replies = MockReplyPublisher::new();
        replies
            .expect_publish_reply()
            .times(1)
            .returning(|_, _| Err(BrokerError::Publish("connection reset".to_string())));

        handle_delivery(&delivery, &processor, &replies).await;
    }

    /// Scripted delivery source recording fetch/ack order.
    struct ScriptedSource {
        deliveries: Mutex<VecDeque<ScriptedDelivery>>,
        events: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedSource {
        fn new(deliveries: Vec<ScriptedDelivery>, events: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                deliveries: Mutex::new(deliveries.into()),
                events,
            }
        }
    }

    #[async_trait]
    impl DeliverySource for ScriptedSource {
        async fn fetch(&self) -> Result<Option<Box<dyn Delivery>>, BrokerError> {
            let next = self.deliveries.lock().unwrap().pop_front();
            match next {
                Some(delivery) => {
                    self.events
                        .lock()
                        .unwrap()
                        .push(format!("fetch:{}", delivery.label));
                    Ok(Some(Box::new(delivery)))
                }
                // Script exhausted; pend until the loop is shut down.
                None => futures::future::pending().await,
            }
        }
    }

    struct ScriptedDelivery {
        label: &'static str,
        payload: Bytes,
        events: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Delivery for ScriptedDelivery {
        fn payload(&self) -> Bytes {
            self.payload.clone()
        }

        fn reply_to(&self) -> Option<String> {
            None
        }

        async fn ack(&self) -> conveyor_transport::Result<()> {
            // Keep the delivery in flight long enough that an overlapping
            // fetch would show up in the event order.
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.events
                .lock()
                .unwrap()
                .push(format!("ack:{}", self.label));
            Ok(())
        }

        async fn nack_requeue(&self) -> conveyor_transport::Result<()> {
            self.events
                .lock()
                .unwrap()
                .push(format!("nack:{}", self.label));
            Ok(())
        }
    }

    fn consumer_loop(store: MockOrderStore) -> ConsumerLoop {
        ConsumerLoop::new(
            Arc::new(BrokerClient::new(BrokerConfig::default())),
            Arc::new(processor_with(store)),
            "orders-processing",
            "order-worker",
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliveries_are_handled_one_at_a_time() {
        let events = Arc::new(Mutex::new(Vec::new()));

        let mut store = MockOrderStore::new();
        store.expect_save_order().times(2).returning(|_| Ok(1));

        let source = ScriptedSource::new(
            vec![
                ScriptedDelivery {
                    label: "A",
                    payload: envelope_bytes("req-a", r#"{"OrderNumber":"ORD-A"}"#),
                    events: events.clone(),
                },
                ScriptedDelivery {
                    label: "B",
                    payload: envelope_bytes("req-b", r#"{"OrderNumber":"ORD-B"}"#),
                    events: events.clone(),
                },
            ],
            events.clone(),
        );

        let consumer = consumer_loop(store);
        let shutdown = consumer.shutdown_handle();
        let handle = tokio::spawn(async move { consumer.consume_from(&source).await });

        let mut settled = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if events.lock().unwrap().len() == 4 {
                settled = true;
                break;
            }
        }
        assert!(settled, "both deliveries should be handled");

        // The second fetch must not start before the first delivery is
        // acknowledged.
        assert_eq!(
            *events.lock().unwrap(),
            vec!["fetch:A", "ack:A", "fetch:B", "ack:B"]
        );

        shutdown.notify_one();
        let exit = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("consume loop should stop after shutdown")
            .unwrap();
        assert_eq!(exit, LoopExit::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_idle_consume_loop() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let source = ScriptedSource::new(Vec::new(), events);

        let consumer = consumer_loop(MockOrderStore::new());
        let shutdown = consumer.shutdown_handle();
        shutdown.notify_one();

        let exit = tokio::time::timeout(Duration::from_secs(5), consumer.consume_from(&source))
            .await
            .expect("consume loop should stop after shutdown");
        assert_eq!(exit, LoopExit::Shutdown);
    }
}
