#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![cfg_attr(test, deny(warnings))]

/// Exposes the client facade.
mod client;
pub use self::client::{SubscribeOptions, Yosun};

/// Exposes an application configuration section.
mod config;
pub use self::config::{ConfigSources, PublishingConfig, SubscriptionConfig, YosunConfig};

/// Exposes the error types of this crate.
mod error;
pub use self::error::{AckError, BrokerError, PublishingError, YosunError};

/// Exposes a handle for defining a set of connection credentials.
mod handle;
pub use self::handle::{DsnChunks, Handle};

/// Exposes the types for defining where messages are routed.
mod routing {
    pub mod exchange;
    pub mod topic;
}
pub use self::routing::exchange::{EXCHANGE_AMQ_TOPIC, Exchange, ExchangeError};
pub use self::routing::topic::topic_matches;

/// Exposes machinery for maintaining a connection to a RabbitMQ cluster.
mod connector;
pub use self::connector::Connector;

/// Exposes the seam between this crate and the message broker.
mod broker;
pub use self::broker::amqp::AmqpBroker;
#[cfg(any(test, feature = "memory"))]
pub use self::broker::memory::MemoryBroker;
pub use self::broker::{Acker, Broker, Consumer, Delivery};

/// Exposes machinery for transporting incoming and outgoing messages.
mod transport {
    pub mod inbound;
    pub mod outbound;
}
pub use self::transport::inbound::callback::{
    Callback, CallbackError, CallbackFailure, CallbackResult, ErrorHandler, ErrorPolicy, Handler,
};
pub use self::transport::inbound::envelope::Envelope;
pub use self::transport::inbound::subscription::Subscription;
pub use self::transport::outbound::dispatch::Dispatch;
pub use self::transport::outbound::publisher::Publisher;

/// Exposes the domain types that describe a message beyond its payload.
mod repr {
    pub mod delivery;
    pub mod properties;
}
pub use self::repr::delivery::DeliveryMode;
pub use self::repr::properties::MessageProperties;

#[cfg(test)]
mod test_support;

/// The body of every message: a JSON object.
pub type Payload = serde_json::Map<String, serde_json::Value>;
