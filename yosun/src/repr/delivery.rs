use serde::Deserialize;

/// Defines whether RabbitMQ persists the messages to disk, which affects
/// whether such messages are able to survive a broker restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Delivery mode `1`: non-persistent messages that do **not** survive a
    /// broker restart.
    #[serde(alias = "non_persistent", alias = "1")]
    Transient,
    /// Delivery mode `2`: messages written to disk. They survive a broker
    /// restart only when **also** routed to a durable queue, which subscription
    /// queues never are.
    #[serde(alias = "persistent", alias = "2")]
    Durable,
}

impl DeliveryMode {
    /// Returns the appropriate `u8` value recognized by RabbitMQ.
    pub const fn rabbitmq_value(&self) -> u8 {
        match self {
            DeliveryMode::Transient => 1,
            DeliveryMode::Durable => 2,
        }
    }
}

impl From<u8> for DeliveryMode {
    fn from(value: u8) -> Self {
        match value {
            2 => DeliveryMode::Durable,
            _ => DeliveryMode::Transient,
        }
    }
}
