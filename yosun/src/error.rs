use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced to the callers of the [`Yosun`](crate::Yosun) client.
#[derive(Error, Debug)]
pub enum YosunError {
    /// The payload given for publishing does not serialize into a key/value
    /// mapping (a JSON object). Raised before any interaction with the broker.
    #[error("payload must be a key/value mapping, got {found}")]
    InvalidPayload {
        /// The JSON type the payload serialized into.
        found: &'static str,
    },

    /// The payload could not be serialized at all.
    #[error("failed to serialize the payload: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A message could not be published within the allowed attempts.
    #[error(transparent)]
    Publishing(#[from] PublishingError),

    /// The configuration could not be assembled or deserialized.
    #[error("failed to load the configuration: {0}")]
    Config(#[from] config::ConfigError),

    /// The client was created outside a Tokio runtime.
    #[error("the Yosun client must be created within a Tokio runtime")]
    NoRuntime,
}

/// Failures reported by a [`Broker`](crate::Broker) implementation.
#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    /// No connection could be obtained within the allotted time.
    #[error("the broker is unavailable: {0}")]
    Unavailable(String),

    /// The broker was closed and serves no further requests.
    #[error("the broker has been closed")]
    Closed,

    /// Declaring the exchange or the queue, or binding them, failed.
    #[error("failed to declare or bind '{binding_key}' on exchange '{exchange}': {reason}")]
    Declaration {
        /// The exchange name.
        exchange: String,
        /// The binding key of the queue.
        binding_key: String,
        /// What the broker reported.
        reason: String,
    },

    /// Starting a consumer failed.
    #[error("failed to start consuming: {0}")]
    Consume(String),

    /// The connection or the channel under an active consumer broke down.
    #[error("lost the connection to the broker: {0}")]
    ConnectionLost(String),

    /// A single publishing attempt failed.
    #[error("failed to publish a message: {0}")]
    Publish(String),
}

/// Failures of a single acknowledgement.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AckError {
    /// The delivery can no longer be acknowledged: it was already acknowledged,
    /// or its delivery tag expired together with the channel that delivered
    /// it.
    #[error("the message is in an invalid state for acknowledgement")]
    InvalidState,

    /// Any other broker-side failure.
    #[error("failed to acknowledge a message: {0}")]
    Broker(String),
}

/// Terminal failure of [`Publisher::try_publish`](crate::Publisher::try_publish)
/// after every allowed attempt failed.
#[derive(Error, Debug, Clone)]
#[error(
    "failed to publish a message with routing key '{routing_key}' after {attempts} attempt(s): {error}"
)]
pub struct PublishingError {
    routing_key: Arc<str>,
    attempts: u32,
    error: BrokerError,
}

impl PublishingError {
    pub(crate) fn new(routing_key: impl Into<Arc<str>>, attempts: u32, error: BrokerError) -> Self {
        Self {
            routing_key: routing_key.into(),
            attempts,
            error,
        }
    }

    /// Reports the routing key of the message that was not published.
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Reports how many attempts were made.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Exposes the failure of the last attempt.
    pub fn error(&self) -> &BrokerError {
        &self.error
    }
}

impl YosunError {
    /// Names the JSON type of the given value, for [`YosunError::InvalidPayload`].
    pub(crate) fn invalid_payload(value: &serde_json::Value) -> Self {
        use serde_json::Value;

        let found = match value {
            Value::Null => "null",
            Value::Bool(_) => "a boolean",
            Value::Number(_) => "a number",
            Value::String(_) => "a string",
            Value::Array(_) => "an array",
            Value::Object(_) => "an object",
        };

        Self::InvalidPayload { found }
    }
}
