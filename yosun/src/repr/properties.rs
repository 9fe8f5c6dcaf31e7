use crate::DeliveryMode;
use lapin::protocol::basic::AMQPProperties;
use lapin::types::{AMQPValue, FieldTable, ShortString};
use std::collections::BTreeMap;
use std::time::Duration;

/// The content type stamped on every outgoing message.
pub(crate) const CONTENT_TYPE_JSON: &str = "application/json";

/// Broker-level options of a message that travel next to its payload:
/// correlation, expiry, priority, persistence, and free-form string headers.
///
/// Published through [`Yosun::publish_with`](crate::Yosun::publish_with) and
/// exposed again on the receiving [`Envelope`](crate::Envelope).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MessageProperties {
    correlation_id: Option<String>,
    reply_to: Option<String>,
    message_id: Option<String>,
    expiration: Option<Duration>,
    priority: Option<u8>,
    delivery_mode: Option<DeliveryMode>,
    headers: BTreeMap<String, String>,
}

impl MessageProperties {
    /// Creates an empty set of properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the correlation ID.
    pub fn with_correlation_id(self, correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            ..self
        }
    }

    /// Sets the reply-to routing key.
    pub fn with_reply_to(self, reply_to: impl Into<String>) -> Self {
        Self {
            reply_to: Some(reply_to.into()),
            ..self
        }
    }

    /// Sets the message ID.
    pub fn with_message_id(self, message_id: impl Into<String>) -> Self {
        Self {
            message_id: Some(message_id.into()),
            ..self
        }
    }

    /// Sets the per-message TTL. The broker works in whole milliseconds.
    pub fn with_expiration(self, expiration: Duration) -> Self {
        Self {
            expiration: Some(expiration),
            ..self
        }
    }

    /// Sets the priority.
    pub fn with_priority(self, priority: u8) -> Self {
        Self {
            priority: Some(priority),
            ..self
        }
    }

    /// Sets the [`DeliveryMode`].
    pub fn with_delivery_mode(self, delivery_mode: DeliveryMode) -> Self {
        Self {
            delivery_mode: Some(delivery_mode),
            ..self
        }
    }

    /// Adds a string header, replacing any previous value under the same key.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());

        self
    }
}

impl MessageProperties {
    /// Reports the correlation ID, if any.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Reports the reply-to routing key, if any.
    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    /// Reports the message ID, if any.
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    /// Reports the per-message TTL, if any.
    pub fn expiration(&self) -> Option<Duration> {
        self.expiration
    }

    /// Reports the priority, if any.
    pub fn priority(&self) -> Option<u8> {
        self.priority
    }

    /// Reports the [`DeliveryMode`], if any.
    pub fn delivery_mode(&self) -> Option<DeliveryMode> {
        self.delivery_mode
    }

    /// Looks up a header by key.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Exposes all headers.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }
}

impl MessageProperties {
    /// Renders these properties as [`AMQPProperties`] of a JSON message.
    pub(crate) fn to_amqp(&self) -> AMQPProperties {
        let mut properties =
            AMQPProperties::default().with_content_type(ShortString::from(CONTENT_TYPE_JSON));

        if let Some(correlation_id) = self.correlation_id.as_deref() {
            properties = properties.with_correlation_id(ShortString::from(correlation_id));
        }

        if let Some(reply_to) = self.reply_to.as_deref() {
            properties = properties.with_reply_to(ShortString::from(reply_to));
        }

        if let Some(message_id) = self.message_id.as_deref() {
            properties = properties.with_message_id(ShortString::from(message_id));
        }

        if let Some(expiration) = self.expiration {
            let millis = expiration.as_millis().to_string();
            properties = properties.with_expiration(ShortString::from(millis));
        }

        if let Some(priority) = self.priority {
            properties = properties.with_priority(priority);
        }

        if let Some(delivery_mode) = self.delivery_mode {
            properties = properties.with_delivery_mode(delivery_mode.rabbitmq_value());
        }

        if !self.headers.is_empty() {
            let mut table = FieldTable::default();
            for (key, value) in &self.headers {
                table.insert(
                    ShortString::from(key.as_str()),
                    AMQPValue::LongString(value.as_bytes().into()),
                );
            }
            properties = properties.with_headers(table);
        }

        properties
    }

    /// Extracts the supported subset of the given [`AMQPProperties`]. Header
    /// values that are not strings are skipped.
    pub(crate) fn from_amqp(properties: &AMQPProperties) -> Self {
        let text = |value: &Option<ShortString>| value.as_ref().map(|s| s.as_str().to_string());

        let expiration = properties
            .expiration()
            .as_ref()
            .and_then(|s| s.as_str().parse::<u64>().ok())
            .map(Duration::from_millis);

        let headers = properties
            .headers()
            .as_ref()
            .map(|table| {
                table
                    .inner()
                    .iter()
                    .filter_map(|(key, value)| {
                        let value = match value {
                            AMQPValue::LongString(s) => {
                                String::from_utf8_lossy(s.as_bytes()).into_owned()
                            }
                            AMQPValue::ShortString(s) => s.as_str().to_string(),
                            _ => return None,
                        };
                        Some((key.as_str().to_string(), value))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            correlation_id: text(properties.correlation_id()),
            reply_to: text(properties.reply_to()),
            message_id: text(properties.message_id()),
            expiration,
            priority: *properties.priority(),
            delivery_mode: properties.delivery_mode().map(DeliveryMode::from),
            headers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn to_amqp_always_sets_json_content_type() {
        // Given
        let properties = MessageProperties::new();

        // When
        let amqp = properties.to_amqp();

        // Then
        assert_eq!(
            amqp.content_type().as_ref().map(ShortString::as_str),
            Some(CONTENT_TYPE_JSON),
        );
        assert!(amqp.headers().is_none());
        assert!(amqp.delivery_mode().is_none());
    }

    #[test]
    fn through_amqp() {
        // Given
        let expected_output = MessageProperties::new()
            .with_correlation_id("c-1")
            .with_reply_to("replies.node-7")
            .with_message_id("m-42")
            .with_expiration(Duration::from_millis(1500))
            .with_priority(4)
            .with_delivery_mode(DeliveryMode::Durable)
            .with_header("node", "node-7")
            .with_header("origin", "scheduler");

        // When
        let amqp = expected_output.to_amqp();
        let actual_output = MessageProperties::from_amqp(&amqp);

        // Then
        assert_eq!(
            amqp.expiration().as_ref().map(ShortString::as_str),
            Some("1500"),
        );
        assert_eq!(*amqp.delivery_mode(), Some(2));
        assert_eq!(expected_output, actual_output);
    }

    #[test]
    fn from_amqp_skips_non_string_headers() {
        // Given
        let mut table = FieldTable::default();
        table.insert("count".into(), AMQPValue::LongUInt(7));
        table.insert("label".into(), AMQPValue::LongString("blue".as_bytes().into()));
        let amqp = AMQPProperties::default()
            .with_headers(table)
            .with_expiration("soon".into());

        // When
        let properties = MessageProperties::from_amqp(&amqp);

        // Then
        assert_eq!(properties.header("label"), Some("blue"));
        assert_eq!(properties.header("count"), None);
        assert_eq!(properties.expiration(), None);
    }
}
