//! Event log integration over AMQP
//!
//! Connections, the wire format of tournament and match events, outbound
//! publishing and the inbound consumer.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

// Re-export commonly used types
pub use connection::{AmqpConfig, AmqpConnection};
pub use handlers::{Disposition, EventConsumer, EventHandler};
pub use messages::*;
pub use publisher::{AmqpEventPublisher, EventPublisher, MockEventPublisher, PublishedEvent};
