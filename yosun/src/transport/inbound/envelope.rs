use crate::broker::{Acker, Delivery};
use crate::{AckError, MessageProperties, Payload};
use parking_lot::Mutex as SyncMutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Represents an **incoming** message: its decoded JSON object payload, the
/// original bytes, the delivery metadata, and the means to acknowledge it.
///
/// Envelopes are acknowledged by the [`Subscription`](crate::Subscription)
/// once every callback returned. A callback may also
/// [acknowledge](Envelope::ack) early; the later acknowledgement is then a
/// no-op.
pub struct Envelope {
    subscription: Arc<str>,
    delivery_tag: u64,
    exchange: String,
    routing_key: String,
    is_redelivered: bool,
    properties: MessageProperties,
    bytes: Vec<u8>,
    payload: Payload,
    acker: SyncMutex<Option<Box<dyn Acker>>>,
}

/// A delivery whose body is not a JSON object.
#[derive(Debug)]
pub(crate) struct Undecodable {
    pub(crate) delivery: Delivery,
    pub(crate) error: serde_json::Error,
}

impl Envelope {
    /// Decodes the given [`Delivery`] received by the named subscription.
    pub(crate) fn decode(subscription: Arc<str>, delivery: Delivery) -> Result<Self, Undecodable> {
        let payload = match serde_json::from_slice::<Payload>(&delivery.bytes) {
            Ok(payload) => payload,
            Err(error) => return Err(Undecodable { delivery, error }),
        };

        let Delivery {
            delivery_tag,
            exchange,
            routing_key,
            redelivered,
            properties,
            bytes,
            acker,
        } = delivery;

        Ok(Self {
            subscription,
            delivery_tag,
            exchange,
            routing_key,
            is_redelivered: redelivered,
            properties,
            bytes,
            payload,
            acker: SyncMutex::new(Some(acker)),
        })
    }
}

impl Envelope {
    /// Reports the name of the subscription that received this message.
    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    /// Exposes the delivery tag.
    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// Exposes the exchange the message was published to.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Exposes the full routing key, including the client's key prefix.
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Reports whether the broker delivered this message before.
    pub fn is_redelivered(&self) -> bool {
        self.is_redelivered
    }

    /// Exposes the broker-level message options.
    pub fn properties(&self) -> &MessageProperties {
        &self.properties
    }

    /// Exposes the original bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Exposes the decoded payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Looks up a single top-level payload value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Deserializes the original bytes into the given type.
    pub fn deserialize<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(&self.bytes)
    }

    /// Reports whether this message was acknowledged already.
    pub fn is_acked(&self) -> bool {
        self.acker.lock().is_none()
    }
}

impl Envelope {
    /// Acknowledges this message. Only the first call reaches the broker.
    ///
    /// A delivery that can no longer be acknowledged (e.g., its tag expired
    /// across a reconnect) is silently skipped; other failures are logged.
    pub async fn ack(&self) {
        let acker = self.acker.lock().take();
        let Some(acker) = acker else {
            return;
        };

        match acker.ack().await {
            Ok(()) => {}
            Err(AckError::InvalidState) => debug!(
                subscription = self.subscription.as_ref(),
                routing_key = self.routing_key.as_str(),
                delivery_tag = self.delivery_tag,
                "Skipped acknowledging a message that is no longer pending",
            ),
            Err(error) => warn!(
                subscription = self.subscription.as_ref(),
                routing_key = self.routing_key.as_str(),
                delivery_tag = self.delivery_tag,
                ?error,
                error_message = %error,
                "Failed to acknowledge an incoming message",
            ),
        }
    }
}

impl Debug for Envelope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("subscription", &self.subscription)
            .field("delivery_tag", &self.delivery_tag)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("is_redelivered", &self.is_redelivered)
            .field("properties", &self.properties)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

impl Drop for Envelope {
    fn drop(&mut self) {
        if self.acker.get_mut().is_some() {
            error!(
                alert = true,
                subscription = self.subscription.as_ref(),
                routing_key = self.routing_key.as_str(),
                byte_preview = String::from_utf8_lossy(&self.bytes).as_ref(),
                "Dropped an incoming message without acknowledging it",
            );
        }
    }
}
