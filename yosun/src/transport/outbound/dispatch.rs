use crate::{MessageProperties, Payload};
use std::sync::Arc;

/// Represents an **outgoing** message, ready to be handed to a
/// [`Broker`](crate::Broker): the final routing key, the JSON-encoded payload,
/// and the broker-level options.
///
/// Dispatches are normally assembled by [`Yosun`](crate::Yosun), which
/// validates the payload, merges the default payload fragment into it, and
/// prefixes the routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    routing_key: Arc<str>,
    bytes: Vec<u8>,
    properties: MessageProperties,
}

impl Dispatch {
    /// Creates a dispatch out of already encoded bytes.
    pub fn new(
        routing_key: impl Into<Arc<str>>,
        bytes: Vec<u8>,
        properties: MessageProperties,
    ) -> Self {
        Self {
            routing_key: routing_key.into(),
            bytes,
            properties,
        }
    }

    /// Encodes the given payload as JSON into a new dispatch.
    pub fn json(
        routing_key: impl Into<Arc<str>>,
        payload: &Payload,
        properties: MessageProperties,
    ) -> Result<Self, serde_json::Error> {
        let bytes = serde_json::to_vec(payload)?;

        Ok(Self::new(routing_key, bytes, properties))
    }
}

impl Dispatch {
    /// Exposes the routing key.
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Shares the routing key.
    pub(crate) fn shared_routing_key(&self) -> Arc<str> {
        self.routing_key.clone()
    }

    /// Exposes the encoded payload.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Exposes the broker-level options.
    pub fn properties(&self) -> &MessageProperties {
        &self.properties
    }
}
