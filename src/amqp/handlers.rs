//! AMQP consumer: decode deliveries, dispatch them and settle them
//!
//! Settlement policy: a delivery is acknowledged when handling succeeds or fails
//! with a validation, state-conflict or not-found error, since redelivery cannot
//! change the outcome. Collaborator failures are negatively acknowledged with
//! requeue so the broker redelivers them.

use crate::amqp::messages::{
    decode_event, DomainEvent, CONSUMED_BINDINGS, MATCH_EXCHANGE, TOURNAMENT_EXCHANGE,
};
use crate::error::{classify, ErrorKind, Result, TournamentError};
use crate::metrics::MetricsCollector;
use amqprs::{
    channel::{
        BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, BasicNackArguments,
        Channel, ExchangeDeclareArguments, QueueBindArguments, QueueDeclareArguments,
    },
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Receiver of decoded inbound events
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: DomainEvent) -> Result<()>;
}

/// What to tell the broker about a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Requeue,
}

impl Disposition {
    pub fn for_error(error: &anyhow::Error) -> Self {
        match classify(error) {
            ErrorKind::Validation | ErrorKind::StateConflict | ErrorKind::NotFound => {
                Disposition::Ack
            }
            ErrorKind::Collaborator => Disposition::Requeue,
        }
    }
}

/// Decode, dispatch and decide the disposition of one delivery
pub async fn process_delivery(
    handler: &dyn EventHandler,
    exchange: &str,
    body: &[u8],
) -> Disposition {
    let event = match decode_event(exchange, body) {
        Ok(Some(event)) => event,
        Ok(None) => return Disposition::Ack,
        Err(e) => {
            warn!("Dropping invalid delivery from exchange '{}': {}", exchange, e);
            return Disposition::for_error(&e);
        }
    };

    let name = event.name();
    match handler.handle_event(event).await {
        Ok(()) => Disposition::Ack,
        Err(e) => {
            let disposition = Disposition::for_error(&e);
            match disposition {
                Disposition::Ack => warn!("{} rejected ({}): {}", name, classify(&e), e),
                Disposition::Requeue => error!("{} failed, requeueing: {}", name, e),
            }
            disposition
        }
    }
}

/// Declare exchanges, the durable consumer queue and its bindings
pub async fn declare_topology(channel: &Channel, queue_name: &str) -> Result<()> {
    for exchange in [TOURNAMENT_EXCHANGE, MATCH_EXCHANGE] {
        let args = ExchangeDeclareArguments::new(exchange, "topic")
            .durable(true)
            .finish();
        channel
            .exchange_declare(args)
            .await
            .map_err(|e| TournamentError::AmqpConnectionFailed {
                message: format!("Failed to declare exchange {}: {}", exchange, e),
            })?;
    }

    let args = QueueDeclareArguments::new(queue_name)
        .durable(true)
        .auto_delete(false)
        .finish();
    channel
        .queue_declare(args)
        .await
        .map_err(|e| TournamentError::AmqpConnectionFailed {
            message: format!("Failed to declare queue {}: {}", queue_name, e),
        })?;

    for (exchange, routing_key) in CONSUMED_BINDINGS {
        channel
            .queue_bind(QueueBindArguments::new(queue_name, exchange, routing_key))
            .await
            .map_err(|e| TournamentError::AmqpConnectionFailed {
                message: format!("Failed to bind {} to {}: {}", queue_name, routing_key, e),
            })?;
    }

    info!("Queue '{}' declared and bound", queue_name);
    Ok(())
}

/// Consumer for the service's event queue
pub struct EventConsumer {
    handler: Arc<dyn EventHandler>,
    metrics: Option<Arc<MetricsCollector>>,
    channel: Channel,
    consumer_tag: String,
}

impl EventConsumer {
    pub fn new(
        handler: Arc<dyn EventHandler>,
        metrics: Option<Arc<MetricsCollector>>,
        channel: Channel,
    ) -> Self {
        let consumer_tag = format!("tournament-consumer-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            metrics,
            channel,
            consumer_tag,
        }
    }

    /// Start consuming messages from the queue with manual acknowledgement
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag);

        self.channel
            .basic_consume(
                DeliveryConsumer {
                    handler: self.handler.clone(),
                    metrics: self.metrics.clone(),
                },
                args,
            )
            .await
            .map_err(|e| TournamentError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming messages from queue: {}", queue_name);
        Ok(())
    }

    /// Stop consuming messages
    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel
            .basic_cancel(args)
            .await
            .map_err(|e| TournamentError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            })?;

        info!("Stopped consuming messages");
        Ok(())
    }
}

struct DeliveryConsumer {
    handler: Arc<dyn EventHandler>,
    metrics: Option<Arc<MetricsCollector>>,
}

#[async_trait]
impl AsyncConsumer for DeliveryConsumer {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        let exchange = deliver.exchange().to_string();

        info!(
            "AMQP message received - delivery_tag: {}, exchange: '{}', routing_key: '{}', size: {} bytes",
            delivery_tag,
            exchange,
            deliver.routing_key(),
            content.len()
        );

        let start_time = std::time::Instant::now();
        let disposition = process_delivery(self.handler.as_ref(), &exchange, &content).await;
        let processing_time = start_time.elapsed();

        if let Some(metrics) = &self.metrics {
            metrics.record_event_processed(&exchange, disposition, processing_time);
        }

        let settled = match disposition {
            Disposition::Ack => channel
                .basic_ack(BasicAckArguments::new(delivery_tag, false))
                .await,
            Disposition::Requeue => channel
                .basic_nack(BasicNackArguments::new(delivery_tag, false, true))
                .await,
        };

        match settled {
            Ok(()) => info!(
                "Message settled - delivery_tag: {}, disposition: {:?}, processing_time: {:.2}ms",
                delivery_tag,
                disposition,
                processing_time.as_secs_f64() * 1000.0
            ),
            Err(e) => error!(
                "Failed to settle delivery {} as {:?}: {}",
                delivery_tag, disposition, e
            ),
        }
    }
}

/// Handler that records every event it receives
#[derive(Default)]
pub struct MockEventHandler {
    pub received_events: Arc<tokio::sync::Mutex<Vec<DomainEvent>>>,
    failure: std::sync::Mutex<Option<fn() -> anyhow::Error>>,
}

impl MockEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every event with the error produced by `make`
    pub fn failing_with(make: fn() -> anyhow::Error) -> Self {
        Self {
            received_events: Arc::default(),
            failure: std::sync::Mutex::new(Some(make)),
        }
    }
}

#[async_trait]
impl EventHandler for MockEventHandler {
    async fn handle_event(&self, event: DomainEvent) -> Result<()> {
        self.received_events.lock().await.push(event);
        let failure = self.failure.lock().ok().and_then(|failure| *failure);
        match failure {
            Some(make) => Err(make()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULT_BODY: &[u8] = br#"{"eventType":"RESULT","tournamentId":1,"matchId":2,"player1Score":2,"player2Score":0,"winnerId":7,"loserId":8}"#;

    #[tokio::test]
    async fn test_success_is_acked() {
        let handler = MockEventHandler::new();
        let disposition = process_delivery(&handler, MATCH_EXCHANGE, RESULT_BODY).await;

        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(handler.received_events.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_payload_is_acked_without_dispatch() {
        let handler = MockEventHandler::new();
        let disposition = process_delivery(&handler, MATCH_EXCHANGE, b"not json").await;

        assert_eq!(disposition, Disposition::Ack);
        assert!(handler.received_events.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_conflict_is_acked() {
        let handler = MockEventHandler::failing_with(|| {
            TournamentError::MatchAlreadyResolved { match_id: 2 }.into()
        });
        let disposition = process_delivery(&handler, MATCH_EXCHANGE, RESULT_BODY).await;
        assert_eq!(disposition, Disposition::Ack);
    }

    #[tokio::test]
    async fn test_collaborator_failure_is_requeued() {
        let handler = MockEventHandler::failing_with(|| {
            TournamentError::Store {
                message: "unavailable".to_string(),
            }
            .into()
        });
        let disposition = process_delivery(&handler, MATCH_EXCHANGE, RESULT_BODY).await;
        assert_eq!(disposition, Disposition::Requeue);

        let handler = MockEventHandler::failing_with(|| anyhow::anyhow!("socket closed"));
        let disposition = process_delivery(&handler, MATCH_EXCHANGE, RESULT_BODY).await;
        assert_eq!(disposition, Disposition::Requeue);
    }
}
