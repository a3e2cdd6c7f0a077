use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::fmt;

// ============================================================================
// Broker Abstraction
// ============================================================================
//
// The minimal surface routers and workers need from a message broker:
// declare a durable queue, consume it, publish raw bodies to a named queue
// (default exchange, routing key = queue name) and acknowledge deliveries.
//
// One `Broker` value owns one connection/channel. Callers publish and ack
// from a single task only.
//
// ============================================================================

/// Broker-assigned identifier of a delivered message, valid on the
/// connection that delivered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag(pub u64);

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message handed to a consumer, pending acknowledgment.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub body: Vec<u8>,
    pub redelivered: bool,
}

pub type DeliveryStream = BoxStream<'static, Result<Delivery, BrokerError>>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    #[error("Broker connection failed: {0}")]
    Connection(String),

    #[error("Failed to declare queue {queue}: {reason}")]
    Declare { queue: String, reason: String },

    #[error("Failed to consume from {queue}: {reason}")]
    Consume { queue: String, reason: String },

    #[error("Publish to {queue} failed: {reason}")]
    Publish { queue: String, reason: String },

    #[error("Ack of delivery {tag} failed: {reason}")]
    Ack { tag: DeliveryTag, reason: String },

    #[error("Queue {0} has not been declared")]
    UnknownQueue(String),
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare a durable queue. Declaring an existing queue is a no-op.
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError>;

    /// Start consuming a queue with manual acknowledgment.
    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BrokerError>;

    /// Publish a body unchanged to `queue`. Returns once the broker has
    /// accepted the message.
    async fn publish(&self, queue: &str, body: &[u8]) -> Result<(), BrokerError>;

    /// Acknowledge a delivery, removing it from its queue.
    async fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError>;

    /// Release the connection. Unacknowledged deliveries become eligible
    /// for redelivery.
    async fn close(&self) -> Result<(), BrokerError>;
}
