use crate::transport::outbound::dispatch::Dispatch;
use crate::{AckError, BrokerError, Exchange, MessageProperties};
use async_trait::async_trait;
use std::fmt::{Debug, Formatter};

pub mod amqp;
#[cfg(any(test, feature = "memory"))]
pub mod memory;

/// The message broker as seen by subscriptions and publishers.
///
/// [`AmqpBroker`](crate::AmqpBroker) talks to RabbitMQ;
/// [`MemoryBroker`](crate::MemoryBroker) is an in-process stand-in.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Declares an exclusive, auto-deleting, non-durable queue bound to
    /// `binding_key` on the given exchange, and starts consuming from it with
    /// manual acknowledgement.
    ///
    /// May wait for as long as it takes to obtain a connection.
    async fn consume(
        &self,
        exchange: &Exchange,
        binding_key: &str,
        consumer_tag: &str,
    ) -> Result<Box<dyn Consumer>, BrokerError>;

    /// Makes a single attempt at publishing the given [`Dispatch`].
    async fn publish(&self, exchange: &Exchange, dispatch: &Dispatch) -> Result<(), BrokerError>;

    /// Releases the connections held by this broker. Further calls fail with
    /// [`BrokerError::Closed`].
    async fn close(&self);
}

/// A live stream of deliveries from one queue.
#[async_trait]
pub trait Consumer: Send {
    /// Waits for the next delivery.
    ///
    /// Returns [`None`] once the consumer is cancelled or its connection is
    /// gone, and an error when the underlying channel breaks down.
    async fn next(&mut self) -> Option<Result<Delivery, BrokerError>>;

    /// Cancels the consumer and releases its channel. Safe to call on a
    /// consumer whose connection is already lost.
    async fn close(self: Box<Self>);
}

/// Positively acknowledges exactly one delivery.
#[async_trait]
pub trait Acker: Send + Sync {
    /// Acknowledges the delivery. Fails with [`AckError::InvalidState`] when
    /// the delivery was already acknowledged or its tag expired.
    async fn ack(&self) -> Result<(), AckError>;
}

/// A raw message as delivered by a [`Consumer`].
pub struct Delivery {
    /// The tag assigned by the channel that delivered this message.
    pub delivery_tag: u64,
    /// The exchange the message was published to.
    pub exchange: String,
    /// The routing key the message was published under.
    pub routing_key: String,
    /// Whether the broker delivered this message before.
    pub redelivered: bool,
    /// The broker-level message options.
    pub properties: MessageProperties,
    /// The message body.
    pub bytes: Vec<u8>,
    /// Acknowledges this delivery.
    pub acker: Box<dyn Acker>,
}

impl Debug for Delivery {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("properties", &self.properties)
            .field("bytes", &self.bytes.len())
            .finish_non_exhaustive()
    }
}
