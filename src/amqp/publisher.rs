//! AMQP event publisher for outbound events

use crate::amqp::messages::{
    MatchRequested, MatchTopicMessage, OutboundMessage, TournamentCreated, TournamentRequested,
    TournamentTopicMessage, MATCH_EXCHANGE, TOURNAMENT_EXCHANGE,
};
use crate::error::{Result, TournamentError};
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Trait for publishing tournament events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a completed cohort
    async fn publish_tournament_requested(&self, event: TournamentRequested) -> Result<()>;

    /// Publish a freshly initialized tournament
    async fn publish_tournament_created(&self, event: TournamentCreated) -> Result<()>;

    /// Ask for a match to be hosted
    async fn publish_match_requested(&self, event: MatchRequested) -> Result<()>;
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub publish_timeout_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 500,
            publish_timeout_ms: 5000,
        }
    }
}

/// AMQP-based event publisher implementation
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
}

impl AmqpEventPublisher {
    /// Create a new event publisher and declare its exchanges
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self { channel, config };
        publisher.setup_exchanges().await?;
        Ok(publisher)
    }

    async fn setup_exchanges(&self) -> Result<()> {
        for exchange in [TOURNAMENT_EXCHANGE, MATCH_EXCHANGE] {
            let args = ExchangeDeclareArguments::new(exchange, "topic")
                .durable(true)
                .finish();
            self.channel.exchange_declare(args).await.map_err(|e| {
                TournamentError::AmqpConnectionFailed {
                    message: format!("Failed to declare exchange {}: {}", exchange, e),
                }
            })?;
        }

        info!("Successfully set up AMQP exchanges");
        Ok(())
    }

    /// Publish with bounded exponential backoff
    async fn publish_with_retry(&self, message: &OutboundMessage) -> Result<()> {
        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(message).await {
                Ok(_) => {
                    debug!(
                        "Published message {} to {}/{}",
                        message.correlation_id, message.exchange, message.routing_key
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish message {} after {} retries: {}",
                            message.correlation_id, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                        retry_count, message.correlation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    async fn try_publish(&self, message: &OutboundMessage) -> Result<()> {
        let args = BasicPublishArguments::new(message.exchange, message.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&message.correlation_id)
            .with_timestamp(message.timestamp.timestamp() as u64)
            .with_content_type("application/json")
            .with_persistence(true);

        let publish = self
            .channel
            .basic_publish(properties, message.body.clone(), args);

        match timeout(Duration::from_millis(self.config.publish_timeout_ms), publish).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TournamentError::AmqpConnectionFailed {
                message: format!("Failed to publish message: {}", e),
            }
            .into()),
            Err(_) => Err(TournamentError::AmqpConnectionFailed {
                message: format!(
                    "Publishing timed out after {}ms",
                    self.config.publish_timeout_ms
                ),
            }
            .into()),
        }
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish_tournament_requested(&self, event: TournamentRequested) -> Result<()> {
        let message = OutboundMessage::tournament(&TournamentTopicMessage::Request(event))?;
        self.publish_with_retry(&message).await
    }

    async fn publish_tournament_created(&self, event: TournamentCreated) -> Result<()> {
        let message = OutboundMessage::tournament(&TournamentTopicMessage::Created(event))?;
        self.publish_with_retry(&message).await
    }

    async fn publish_match_requested(&self, event: MatchRequested) -> Result<()> {
        let message = OutboundMessage::match_topic(&MatchTopicMessage::Request(event))?;
        self.publish_with_retry(&message).await
    }
}

/// A recorded publication
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishedEvent {
    TournamentRequested(TournamentRequested),
    TournamentCreated(TournamentCreated),
    MatchRequested(MatchRequested),
}

/// Mock event publisher for testing
#[derive(Debug, Default)]
pub struct MockEventPublisher {
    published_events: std::sync::Mutex<Vec<PublishedEvent>>,
    failing: std::sync::atomic::AtomicBool,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail with a collaborator error
    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    /// Get all published events (for testing)
    pub fn get_published_events(&self) -> Vec<PublishedEvent> {
        self.published_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn tournament_requests(&self) -> Vec<TournamentRequested> {
        self.get_published_events()
            .into_iter()
            .filter_map(|event| match event {
                PublishedEvent::TournamentRequested(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    pub fn tournaments_created(&self) -> Vec<TournamentCreated> {
        self.get_published_events()
            .into_iter()
            .filter_map(|event| match event {
                PublishedEvent::TournamentCreated(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    pub fn match_requests(&self) -> Vec<MatchRequested> {
        self.get_published_events()
            .into_iter()
            .filter_map(|event| match event {
                PublishedEvent::MatchRequested(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    /// Clear published events (for testing)
    pub fn clear_events(&self) {
        if let Ok(mut events) = self.published_events.lock() {
            events.clear();
        }
    }

    fn record(&self, event: PublishedEvent) -> Result<()> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(TournamentError::AmqpConnectionFailed {
                message: "broker unavailable".to_string(),
            }
            .into());
        }
        if let Ok(mut events) = self.published_events.lock() {
            events.push(event);
        }
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish_tournament_requested(&self, event: TournamentRequested) -> Result<()> {
        self.record(PublishedEvent::TournamentRequested(event))
    }

    async fn publish_tournament_created(&self, event: TournamentCreated) -> Result<()> {
        self.record(PublishedEvent::TournamentCreated(event))
    }

    async fn publish_match_requested(&self, event: MatchRequested) -> Result<()> {
        self.record(PublishedEvent::MatchRequested(event))
    }
}
